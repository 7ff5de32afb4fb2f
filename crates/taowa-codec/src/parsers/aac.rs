//! AAC (ADTS) 码流解析.
//!
//! 同步字 0xFFF (12 位). 头部携带 profile、MPEG-2/4 选择位、
//! 采样率索引、声道配置与帧总长. 每帧 1024 个采样
//! (SBR 变体由上游配置处理, 解析器不翻倍).

use bytes::Bytes;
use log::warn;
use taowa_core::{BitReader, MuxError, MuxResult};
use taowa_core::timestamp::NS_PER_SECOND;

use crate::frame::Frame;

const MAX_BUFFER: usize = 64 * 1024;

/// 采样率索引表
pub const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
    8_000, 7_350,
];

/// 解析出的 ADTS 帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacHeader {
    /// 是否为 MPEG-4 (否则 MPEG-2)
    pub mpeg4: bool,
    /// profile (0=Main, 1=LC, 2=SSR, 3=LTP)
    pub profile: u8,
    /// 采样率索引
    pub sample_rate_index: u8,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道配置
    pub channels: u32,
    /// 帧总字节数 (含头部)
    pub frame_bytes: usize,
    /// 头部字节数 (7, 带 CRC 为 9)
    pub header_bytes: usize,
}

impl AacHeader {
    /// 帧时长 (纳秒)
    pub fn duration_ns(&self) -> i64 {
        1024 * NS_PER_SECOND / i64::from(self.sample_rate)
    }

    /// AudioSpecificConfig (codec private)
    ///
    /// 5 位 object type + 4 位采样率索引 + 4 位声道配置.
    pub fn audio_specific_config(&self) -> Vec<u8> {
        let object_type = u16::from(self.profile) + 1;
        let config: u16 = (object_type << 11)
            | (u16::from(self.sample_rate_index) << 7)
            | ((self.channels as u16) << 3);
        config.to_be_bytes().to_vec()
    }
}

/// 从缓冲区起始位置解析 ADTS 帧头
pub fn parse_header(buf: &[u8]) -> MuxResult<AacHeader> {
    if buf.len() < 7 {
        return Err(MuxError::NeedMoreData);
    }
    let mut br = BitReader::new(buf);
    if br.read_bits(12)? != 0xFFF {
        return Err(MuxError::malformed_at_unknown("ADTS 同步字缺失"));
    }
    let mpeg4 = !br.read_bit()?; // ID: 0 = MPEG-4
    br.skip_bits(2)?; // layer
    let protection_absent = br.read_bit()?;
    let profile = br.read_bits(2)? as u8;
    let sample_rate_index = br.read_bits(4)? as u8;
    if sample_rate_index as usize >= SAMPLE_RATES.len() {
        return Err(MuxError::malformed_at_unknown("ADTS 采样率索引无效"));
    }
    br.skip_bits(1)?; // private
    let channels = br.read_bits(3)? as u32;
    br.skip_bits(4)?; // original/copy, home, copyright id bit + start
    let frame_bytes = br.read_bits(13)? as usize;
    if frame_bytes < 7 {
        return Err(MuxError::malformed_at_unknown("ADTS 帧长字段无效"));
    }

    Ok(AacHeader {
        mpeg4,
        profile,
        sample_rate_index,
        sample_rate: SAMPLE_RATES[sample_rate_index as usize],
        channels,
        frame_bytes,
        header_bytes: if protection_absent { 7 } else { 9 },
    })
}

/// ADTS 帧切分器
///
/// 产出的帧数据为去掉 ADTS 头的裸 AAC (Matroska 存裸帧,
/// 参数在 codec private 里).
#[derive(Default)]
pub struct AacParser {
    buffer: Vec<u8>,
    header: Option<AacHeader>,
    skipped: usize,
}

impl AacParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次成功解析的帧头
    pub fn header(&self) -> Option<&AacHeader> {
        self.header.as_ref()
    }

    /// 吞入字节并返回切出的完整帧
    pub fn add_bytes(&mut self, data: &[u8]) -> MuxResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let Some(pos) = find_sync(&self.buffer) else {
                let keep = self.buffer.len().min(1);
                self.skipped += self.buffer.len() - keep;
                let tail = self.buffer.split_off(self.buffer.len() - keep);
                self.buffer = tail;
                break;
            };
            if pos > 0 {
                self.skipped += pos;
                self.buffer.drain(..pos);
            }

            let header = match parse_header(&self.buffer) {
                Ok(h) => h,
                Err(MuxError::NeedMoreData) => break,
                Err(_) => {
                    self.skipped += 1;
                    self.buffer.drain(..1);
                    continue;
                }
            };
            if self.buffer.len() < header.frame_bytes {
                break;
            }

            if self.skipped > 0 {
                warn!("AAC: 跳过 {} 字节后找到下一个同步字", self.skipped);
                self.skipped = 0;
            }

            let params_changed = self.header.is_some_and(|prev| {
                prev.sample_rate != header.sample_rate || prev.channels != header.channels
            });
            self.header = Some(header);

            let whole: Vec<u8> = self.buffer.drain(..header.frame_bytes).collect();
            let payload = whole[header.header_bytes..].to_vec();
            frames.push(Frame {
                data: Bytes::from(payload),
                timestamp_ns: None,
                duration_ns: Some(header.duration_ns()),
                key_frame: true,
                bref_ns: None,
                params_changed,
            });
        }

        if self.buffer.len() > MAX_BUFFER {
            return Err(MuxError::malformed_at_unknown("AAC: 缓冲超限仍未找到完整帧"));
        }
        Ok(frames)
    }

    /// 吐出尾帧 (ADTS 帧自带长度, 无尾帧可吐)
    pub fn flush(&mut self) -> MuxResult<Vec<Frame>> {
        self.buffer.clear();
        Ok(Vec::new())
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(2)
        .position(|w| w[0] == 0xFF && (w[1] & 0xF0) == 0xF0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造一个 44.1kHz 立体声 LC 帧
    fn make_frame(payload_len: usize) -> Vec<u8> {
        let frame_len = payload_len + 7;
        let mut frame = vec![0u8; frame_len];
        frame[0] = 0xFF;
        // ID=0 (MPEG-4), layer=00, protection_absent=1
        frame[1] = 0xF1;
        // profile=1 (LC), sf_index=4 (44100), private=0, channels 高 1 位
        frame[2] = 0b01_0100_0_0;
        // channels 低 2 位 = 10 (2 声道), 4 个杂项位, 帧长高 2 位
        frame[3] = 0b10_0000_00 | ((frame_len >> 11) & 0x3) as u8;
        frame[4] = ((frame_len >> 3) & 0xFF) as u8;
        frame[5] = (((frame_len & 0x7) as u8) << 5) | 0x1F;
        frame[6] = 0xFC;
        for (i, b) in frame[7..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        frame
    }

    #[test]
    fn test_帧头解析() {
        let h = parse_header(&make_frame(100)).unwrap();
        assert!(h.mpeg4);
        assert_eq!(h.profile, 1);
        assert_eq!(h.sample_rate, 44_100);
        assert_eq!(h.channels, 2);
        assert_eq!(h.frame_bytes, 107);
        assert_eq!(h.header_bytes, 7);
        // 1024 采样 @ 44.1kHz ≈ 23.22ms
        assert_eq!(h.duration_ns(), 23_219_954);
    }

    #[test]
    fn test_audio_specific_config() {
        let h = parse_header(&make_frame(10)).unwrap();
        // LC (object type 2), sf_index 4, channels 2
        assert_eq!(h.audio_specific_config(), vec![0x12, 0x10]);
    }

    #[test]
    fn test_切帧_去头() {
        let mut parser = AacParser::new();
        let mut input = Vec::new();
        for _ in 0..10 {
            input.extend_from_slice(&make_frame(100));
        }
        let mut frames = Vec::new();
        for chunk in input.chunks(37) {
            frames.extend(parser.add_bytes(chunk).unwrap());
        }
        assert_eq!(frames.len(), 10);
        for f in &frames {
            assert_eq!(f.data.len(), 100);
        }
    }

    #[test]
    fn test_参数变化标记() {
        let mut parser = AacParser::new();
        let mut input = make_frame(50);
        // 第二帧换为 48kHz (sf_index=3)
        let mut second = make_frame(50);
        second[2] = 0b01_0011_0_0;
        input.extend_from_slice(&second);
        let frames = parser.add_bytes(&input).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].params_changed);
        assert!(frames[1].params_changed);
    }
}
