//! AC-3 / E-AC-3 码流解析.
//!
//! 同步字 0x0B77. AC-3 (bsid <= 10) 的帧长由比特率码 × 采样率码
//! 查表得出; E-AC-3 (bsid 11..16) 直接携带 frmsiz 字段.
//! 每帧 1536 个采样 (E-AC-3 为 256 × numblks).

use bytes::Bytes;
use log::warn;
use taowa_core::{BitReader, MuxError, MuxResult};
use taowa_core::timestamp::NS_PER_SECOND;

use crate::frame::Frame;

/// 同步字
const SYNC_WORD: u16 = 0x0B77;

/// 缓冲上限: 最大帧 (E-AC-3 4096 字 × 2) 的若干倍
const MAX_BUFFER: usize = 64 * 1024;

/// 比特率表 (kbit/s), 按 frmsizecod >> 1 索引
const BIT_RATES: [u32; 19] = [
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 448, 512, 576, 640,
];

/// acmod → 全带声道数
const ACMOD_CHANNELS: [u32; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

/// E-AC-3 numblkscod → 块数
const EAC3_BLOCKS: [u32; 4] = [1, 2, 3, 6];

/// 解析出的帧头参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ac3Header {
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 声道数 (含 LFE)
    pub channels: u32,
    /// 比特率 (bit/s), E-AC-3 下为推算值
    pub bit_rate: u32,
    /// 帧字节数
    pub frame_bytes: usize,
    /// 本帧采样数
    pub samples: u32,
    /// 是否为 E-AC-3 (bsid 11..16)
    pub eac3: bool,
}

impl Ac3Header {
    /// 帧时长 (纳秒)
    pub fn duration_ns(&self) -> i64 {
        i64::from(self.samples) * NS_PER_SECOND / i64::from(self.sample_rate)
    }
}

/// 从缓冲区起始位置解析一个帧头
///
/// 数据不足返回 `NeedMoreData`; 字段非法返回 `MalformedInput`.
pub fn parse_header(buf: &[u8]) -> MuxResult<Ac3Header> {
    if buf.len() < 8 {
        return Err(MuxError::NeedMoreData);
    }
    if u16::from_be_bytes([buf[0], buf[1]]) != SYNC_WORD {
        return Err(MuxError::malformed_at_unknown("AC-3 同步字缺失"));
    }

    let bsid = buf[5] >> 3;
    if bsid <= 10 {
        parse_ac3(buf)
    } else if bsid <= 16 {
        parse_eac3(buf)
    } else {
        Err(MuxError::malformed_at_unknown(format!("无效的 AC-3 bsid {bsid}")))
    }
}

fn parse_ac3(buf: &[u8]) -> MuxResult<Ac3Header> {
    let fscod = buf[4] >> 6;
    let frmsizecod = (buf[4] & 0x3F) as usize;
    if frmsizecod >= 38 {
        return Err(MuxError::malformed_at_unknown("无效的 AC-3 frmsizecod"));
    }
    let bit_rate_kbps = BIT_RATES[frmsizecod >> 1];

    let (sample_rate, frame_bytes) = match fscod {
        0 => (48_000, 4 * bit_rate_kbps as usize),
        1 => (
            44_100,
            2 * (320 * bit_rate_kbps as usize / 147 + (frmsizecod & 1)),
        ),
        2 => (32_000, 6 * bit_rate_kbps as usize),
        _ => return Err(MuxError::malformed_at_unknown("无效的 AC-3 采样率码")),
    };

    let acmod = (buf[6] >> 5) as usize;
    // acmod 之后的附加字段会移动 lfeon 的位置, 用位读取器定位
    let mut br = BitReader::new(&buf[6..]);
    br.skip_bits(3)?;
    if acmod & 1 != 0 && acmod != 1 {
        br.skip_bits(2)?; // cmixlev
    }
    if acmod & 4 != 0 {
        br.skip_bits(2)?; // surmixlev
    }
    if acmod == 2 {
        br.skip_bits(2)?; // dsurmod
    }
    let lfeon = br.read_bit()?;

    Ok(Ac3Header {
        sample_rate,
        channels: ACMOD_CHANNELS[acmod] + u32::from(lfeon),
        bit_rate: bit_rate_kbps * 1000,
        frame_bytes,
        samples: 1536,
        eac3: false,
    })
}

fn parse_eac3(buf: &[u8]) -> MuxResult<Ac3Header> {
    let mut br = BitReader::new(&buf[2..]);
    let _strmtyp = br.read_bits(2)?;
    let _substreamid = br.read_bits(3)?;
    let frmsiz = br.read_bits(11)? as usize;
    let fscod = br.read_bits(2)?;

    let (sample_rate, blocks) = if fscod == 3 {
        let fscod2 = br.read_bits(2)?;
        let rate = match fscod2 {
            0 => 24_000,
            1 => 22_050,
            2 => 16_000,
            _ => return Err(MuxError::malformed_at_unknown("无效的 E-AC-3 fscod2")),
        };
        (rate, 6)
    } else {
        let numblkscod = br.read_bits(2)? as usize;
        let rate = match fscod {
            0 => 48_000,
            1 => 44_100,
            _ => 32_000,
        };
        (rate, EAC3_BLOCKS[numblkscod])
    };

    let acmod = br.read_bits(3)? as usize;
    let lfeon = br.read_bit()?;

    let frame_bytes = (frmsiz + 1) * 2;
    let samples = blocks * 256;
    // 推算平均比特率
    let bit_rate = (frame_bytes as u64 * 8 * u64::from(sample_rate) / u64::from(samples)) as u32;

    Ok(Ac3Header {
        sample_rate,
        channels: ACMOD_CHANNELS[acmod] + u32::from(lfeon),
        bit_rate,
        frame_bytes,
        samples,
        eac3: true,
    })
}

/// AC-3 / E-AC-3 帧切分器
#[derive(Default)]
pub struct Ac3Parser {
    buffer: Vec<u8>,
    header: Option<Ac3Header>,
    /// 自上次同步以来跳过的垃圾字节数 (告警用)
    skipped: usize,
}

impl Ac3Parser {
    /// 创建解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 首个成功解析的帧头
    pub fn header(&self) -> Option<&Ac3Header> {
        self.header.as_ref()
    }

    /// 吞入字节并返回切出的完整帧
    pub fn add_bytes(&mut self, data: &[u8]) -> MuxResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            // 定位同步字
            let Some(pos) = find_sync(&self.buffer) else {
                // 留 1 字节防止同步字跨界
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
                    // 伪同步字, 跳过一个字节重新搜索
                    self.skipped += 1;
                    self.buffer.drain(..1);
                    continue;
                }
            };
            if self.buffer.len() < header.frame_bytes {
                break;
            }

            if self.skipped > 0 {
                warn!("AC-3: 跳过 {} 字节后找到下一个同步字", self.skipped);
                self.skipped = 0;
            }

            let params_changed = self.header.is_some_and(|prev| prev != header);
            self.header = Some(header);

            let data: Vec<u8> = self.buffer.drain(..header.frame_bytes).collect();
            frames.push(Frame {
                data: Bytes::from(data),
                timestamp_ns: None,
                duration_ns: Some(header.duration_ns()),
                key_frame: true,
                bref_ns: None,
                params_changed,
            });
        }

        if self.buffer.len() > MAX_BUFFER {
            return Err(MuxError::malformed_at_unknown(
                "AC-3: 缓冲超限仍未找到完整帧",
            ));
        }
        Ok(frames)
    }

    /// 吐出尾帧 (AC-3 帧定长, 无尾帧可吐)
    pub fn flush(&mut self) -> MuxResult<Vec<Frame>> {
        self.buffer.clear();
        Ok(Vec::new())
    }
}

fn find_sync(buf: &[u8]) -> Option<usize> {
    buf.windows(2)
        .position(|w| w[0] == 0x0B && w[1] == 0x77)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造一个合法的 48kHz 立体声 AC-3 帧 (192 kbps → 768 字节)
    fn make_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 768];
        frame[0] = 0x0B;
        frame[1] = 0x77;
        // CRC 占位
        frame[2] = 0x00;
        frame[3] = 0x00;
        // fscod=0 (48k), frmsizecod=20 (192kbps, 偶数)
        frame[4] = 20;
        // bsid=8, bsmod=0
        frame[5] = 8 << 3;
        // acmod=2 (L,R), dsurmod=0, lfeon=0
        frame[6] = 0b010_00_0_00;
        frame
    }

    #[test]
    fn test_帧头解析() {
        let h = parse_header(&make_frame()).unwrap();
        assert_eq!(h.sample_rate, 48_000);
        assert_eq!(h.channels, 2);
        assert_eq!(h.bit_rate, 192_000);
        assert_eq!(h.frame_bytes, 768);
        assert_eq!(h.samples, 1536);
        assert!(!h.eac3);
        assert_eq!(h.duration_ns(), 32_000_000);
    }

    #[test]
    fn test_切帧_任意切分() {
        let mut parser = Ac3Parser::new();
        let mut input = Vec::new();
        for _ in 0..3 {
            input.extend_from_slice(&make_frame());
        }

        let mut frames = Vec::new();
        // 以 100 字节为步长喂入
        for chunk in input.chunks(100) {
            frames.extend(parser.add_bytes(chunk).unwrap());
        }
        assert_eq!(frames.len(), 3);
        for f in &frames {
            assert_eq!(f.data.len(), 768);
            assert_eq!(f.duration_ns, Some(32_000_000));
            assert!(f.key_frame);
        }
    }

    #[test]
    fn test_跳过前导垃圾() {
        let mut parser = Ac3Parser::new();
        let mut input = vec![0xAAu8; 17];
        input.extend_from_slice(&make_frame());
        let frames = parser.add_bytes(&input).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_lfe_声道计数() {
        let mut frame = make_frame();
        // acmod=7 (3/2): cmixlev + surmixlev 各 2 位之后才是 lfeon
        frame[6] = 0b1110_0000;
        frame[7] = 0b1000_0000;
        let h = parse_header(&frame).unwrap();
        assert_eq!(h.channels, 6);
    }
}
