//! FLAC 码流解析.
//!
//! 头部: "fLaC" 魔数 + 元数据块序列 (STREAMINFO 必为首块).
//! 帧边界: 帧头同步码 0b11111111_111110 加 UTF-8 式帧/采样计数编码;
//! 每帧采样数由块大小码得出, 变长块流从帧头直接读取.

use bytes::Bytes;
use log::warn;
use taowa_core::{BitReader, MuxError, MuxResult};
use taowa_core::timestamp::NS_PER_SECOND;

use crate::frame::Frame;

const MAX_BUFFER: usize = 4 * 1024 * 1024;

/// STREAMINFO 元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// 最小块大小 (采样)
    pub min_block_size: u32,
    /// 最大块大小 (采样)
    pub max_block_size: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数
    pub channels: u32,
    /// 位深
    pub bits_per_sample: u32,
    /// 总采样数 (0 = 未知)
    pub total_samples: u64,
}

impl StreamInfo {
    /// 是否为定长块流
    pub fn fixed_block_size(&self) -> bool {
        self.min_block_size == self.max_block_size
    }
}

/// 解析 STREAMINFO 块数据 (不含块头)
pub fn parse_stream_info(data: &[u8]) -> MuxResult<StreamInfo> {
    if data.len() < 34 {
        return Err(MuxError::malformed_at_unknown("FLAC: STREAMINFO 太短"));
    }
    let mut br = BitReader::new(data);
    let min_block_size = br.read_bits(16)? as u32;
    let max_block_size = br.read_bits(16)? as u32;
    br.skip_bits(24 + 24)?; // 最小/最大帧字节数
    let sample_rate = br.read_bits(20)? as u32;
    let channels = br.read_bits(3)? as u32 + 1;
    let bits_per_sample = br.read_bits(5)? as u32 + 1;
    let total_samples = br.read_bits(36)?;
    if sample_rate == 0 {
        return Err(MuxError::malformed_at_unknown("FLAC: 采样率为 0"));
    }
    Ok(StreamInfo {
        min_block_size,
        max_block_size,
        sample_rate,
        channels,
        bits_per_sample,
        total_samples,
    })
}

/// 解析出的头部区
#[derive(Debug, Clone)]
pub struct FlacHeaders {
    /// 头部区总字节数 ("fLaC" + 全部元数据块)
    pub header_bytes: usize,
    /// STREAMINFO 参数
    pub stream_info: StreamInfo,
    /// 元数据块数 (Ogg 映射所需的头部包数为块数 + 1)
    pub num_metadata_blocks: usize,
}

/// 解析 "fLaC" 魔数与元数据块序列
///
/// 数据不足返回 `NeedMoreData`.
pub fn parse_headers(buf: &[u8]) -> MuxResult<FlacHeaders> {
    if buf.len() < 4 {
        return Err(MuxError::NeedMoreData);
    }
    if &buf[..4] != b"fLaC" {
        return Err(MuxError::malformed_at_unknown("FLAC: 魔数缺失"));
    }

    let mut pos = 4usize;
    let mut stream_info = None;
    let mut blocks = 0usize;
    loop {
        if buf.len() < pos + 4 {
            return Err(MuxError::NeedMoreData);
        }
        let last = buf[pos] & 0x80 != 0;
        let block_type = buf[pos] & 0x7F;
        let len = usize::from(buf[pos + 1]) << 16 | usize::from(buf[pos + 2]) << 8
            | usize::from(buf[pos + 3]);
        if buf.len() < pos + 4 + len {
            return Err(MuxError::NeedMoreData);
        }
        if block_type == 0 {
            stream_info = Some(parse_stream_info(&buf[pos + 4..pos + 4 + len])?);
        }
        blocks += 1;
        pos += 4 + len;
        if last {
            break;
        }
    }

    let stream_info = stream_info
        .ok_or_else(|| MuxError::malformed_at_unknown("FLAC: 缺少 STREAMINFO 块"))?;
    Ok(FlacHeaders {
        header_bytes: pos,
        stream_info,
        num_metadata_blocks: blocks,
    })
}

/// 跳过帧头中 UTF-8 式的帧/采样编号
fn skip_utf8(br: &mut BitReader, max_bits: u32) -> MuxResult<()> {
    let first = br.read_bits(8)? as u8;
    let extra = if first & 0x80 == 0 {
        0
    } else if first & 0xE0 == 0xC0 {
        1
    } else if first & 0xF0 == 0xE0 {
        2
    } else if first & 0xF8 == 0xF0 {
        3
    } else if first & 0xFC == 0xF8 {
        4
    } else if first & 0xFE == 0xFC {
        5
    } else if max_bits == 64 && first == 0xFE {
        6
    } else {
        return Err(MuxError::malformed_at_unknown("FLAC: 无效的 UTF-8 编号"));
    };
    br.skip_bits(extra * 8)?;
    Ok(())
}

/// 读取帧头并返回本帧采样数
///
/// 帧头非法返回错误 (伪同步码判别).
pub fn frame_samples(data: &[u8], info: &StreamInfo) -> MuxResult<u32> {
    let mut br = BitReader::new(data);
    if br.read_bits(14)? != 0x3FFE {
        return Err(MuxError::malformed_at_unknown("FLAC: 帧同步码缺失"));
    }
    br.skip_bits(1)?; // reserved
    let variable_block = br.read_bit()?;
    let block_size_code = br.read_bits(4)? as u32;
    br.skip_bits(4)?; // 采样率码
    br.skip_bits(4)?; // 声道分配
    br.skip_bits(4)?; // 位深 + 保留位

    skip_utf8(&mut br, if variable_block { 64 } else { 32 })?;

    let samples = match block_size_code {
        0 => info.min_block_size,
        1 => 192,
        2..=5 => 576 << (block_size_code - 2),
        8..=15 => 256 << (block_size_code - 8),
        6 => br.read_bits(8)? as u32 + 1,
        7 => br.read_bits(16)? as u32 + 1,
        _ => unreachable!("4 位编码"),
    };
    Ok(samples)
}

/// FLAC 帧切分器 (裸 .flac 流)
#[derive(Default)]
pub struct FlacParser {
    buffer: Vec<u8>,
    headers: Option<FlacHeaders>,
    /// "fLaC" + 元数据块原始字节 (codec private)
    header_bytes: Vec<u8>,
    done_headers: bool,
}

impl FlacParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 头部区参数 (在足够数据喂入后可用)
    pub fn headers(&self) -> Option<&FlacHeaders> {
        self.headers.as_ref()
    }

    /// codec private: "fLaC" 魔数与全部元数据块
    pub fn codec_private(&self) -> &[u8] {
        &self.header_bytes
    }

    /// 吞入字节并返回切出的完整帧
    pub fn add_bytes(&mut self, data: &[u8]) -> MuxResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        if !self.done_headers {
            match parse_headers(&self.buffer) {
                Ok(headers) => {
                    self.header_bytes = self.buffer[..headers.header_bytes].to_vec();
                    self.buffer.drain(..headers.header_bytes);
                    self.headers = Some(headers);
                    self.done_headers = true;
                }
                Err(MuxError::NeedMoreData) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            }
        }

        let mut frames = Vec::new();
        let info = self.headers.as_ref().expect("头部已就绪").stream_info;
        // 帧长未知, 以下一个合法帧头为界; 尾帧由 flush 收尾
        loop {
            let Some(start) = find_frame_sync(&self.buffer, 0, &info) else {
                break;
            };
            if start > 0 {
                warn!("FLAC: 跳过 {start} 字节杂散数据");
                self.buffer.drain(..start);
            }
            let Some(next) = find_frame_sync(&self.buffer, 2, &info) else {
                break;
            };
            let samples = frame_samples(&self.buffer, &info)?;
            let data: Vec<u8> = self.buffer.drain(..next).collect();
            frames.push(make_frame(data, samples, &info));
        }

        if self.buffer.len() > MAX_BUFFER {
            return Err(MuxError::malformed_at_unknown("FLAC: 缓冲超限"));
        }
        Ok(frames)
    }

    /// 吐出尾帧
    pub fn flush(&mut self) -> MuxResult<Vec<Frame>> {
        let mut frames = Vec::new();
        if let Some(headers) = &self.headers {
            let info = headers.stream_info;
            if let Ok(samples) = frame_samples(&self.buffer, &info) {
                let data = std::mem::take(&mut self.buffer);
                frames.push(make_frame(data, samples, &info));
            }
        }
        self.buffer.clear();
        Ok(frames)
    }
}

fn make_frame(data: Vec<u8>, samples: u32, info: &StreamInfo) -> Frame {
    Frame {
        data: Bytes::from(data),
        timestamp_ns: None,
        duration_ns: Some(i64::from(samples) * NS_PER_SECOND / i64::from(info.sample_rate)),
        key_frame: true,
        bref_ns: None,
        params_changed: false,
    }
}

/// 从 `from` 开始搜索下一个通过帧头校验的同步位置
fn find_frame_sync(buf: &[u8], from: usize, info: &StreamInfo) -> Option<usize> {
    let mut i = from;
    while i + 16 <= buf.len() {
        if buf[i] == 0xFF && (buf[i + 1] & 0xFC) == 0xF8 && frame_samples(&buf[i..], info).is_ok()
        {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stream_info_block(min_bs: u32, max_bs: u32) -> Vec<u8> {
        let mut block = vec![0u8; 34];
        block[0..2].copy_from_slice(&(min_bs as u16).to_be_bytes());
        block[2..4].copy_from_slice(&(max_bs as u16).to_be_bytes());
        // sample_rate=44100 (20 位), channels=2 (001), bps=16 (01111)
        // 字节 10..13: 20+3+5 位
        let packed: u32 = (44_100 << 12) | (1 << 9) | (15 << 4);
        block[10..14].copy_from_slice(&packed.to_be_bytes());
        block
    }

    fn make_headers() -> Vec<u8> {
        let mut buf = b"fLaC".to_vec();
        let info = make_stream_info_block(4096, 4096);
        buf.push(0x80); // last + type 0
        buf.extend_from_slice(&[0, 0, info.len() as u8]);
        buf.extend_from_slice(&info);
        buf
    }

    /// 定长块流的帧: 同步码 + 块大小码 0 + UTF-8 帧号
    fn make_flac_frame(frame_number: u8, payload: usize) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xF8];
        // 块大小码 0 (= min_block_size), 采样率码 0
        frame.push(0x00);
        // 声道分配 0, 位深 0
        frame.push(0x00);
        frame.push(frame_number & 0x7F);
        frame.resize(5 + payload, 0xA5);
        frame
    }

    #[test]
    fn test_stream_info_解析() {
        let info = parse_stream_info(&make_stream_info_block(4096, 4096)).unwrap();
        assert_eq!(info.min_block_size, 4096);
        assert_eq!(info.sample_rate, 44_100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert!(info.fixed_block_size());
    }

    #[test]
    fn test_头部区解析() {
        let headers = parse_headers(&make_headers()).unwrap();
        assert_eq!(headers.num_metadata_blocks, 1);
        assert_eq!(headers.header_bytes, 4 + 4 + 34);
    }

    #[test]
    fn test_头部数据不足() {
        let full = make_headers();
        assert!(matches!(
            parse_headers(&full[..10]),
            Err(MuxError::NeedMoreData)
        ));
    }

    #[test]
    fn test_帧采样数() {
        let info = parse_stream_info(&make_stream_info_block(4096, 4096)).unwrap();
        let samples = frame_samples(&make_flac_frame(0, 100), &info).unwrap();
        assert_eq!(samples, 4096);
    }

    #[test]
    fn test_切帧与时长() {
        let mut parser = FlacParser::new();
        let mut stream = make_headers();
        for i in 0..3u8 {
            stream.extend_from_slice(&make_flac_frame(i, 60));
        }
        let mut frames = parser.add_bytes(&stream).unwrap();
        frames.extend(parser.flush().unwrap());

        assert_eq!(frames.len(), 3);
        assert_eq!(parser.headers().unwrap().stream_info.sample_rate, 44_100);
        // 4096 采样 @ 44.1kHz
        assert_eq!(frames[0].duration_ns, Some(92_879_818));
        assert_eq!(parser.codec_private().len(), 42);
        assert_eq!(&parser.codec_private()[..4], b"fLaC");
    }
}
