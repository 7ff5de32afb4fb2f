//! DTS / DTS-HD 码流解析.
//!
//! 核心帧同步字 0x7FFE8001; 核心帧之后紧跟 0x64582025 时为 DTS-HD
//! 扩展, 其大小并入帧长. 头部变化检测只比较声道数、采样率、LFE
//! 类型与帧时长这个子集.
//!
//! DVD 来源的 14-bit 打包形式由 `repack_14_to_16` 还原 (每 16 位字
//! 丢弃高 2 位), 字节序通过在两种假设下搜索同步字自动判定.

use bytes::Bytes;
use log::warn;
use taowa_core::{BitReader, MuxError, MuxResult};
use taowa_core::timestamp::NS_PER_SECOND;

use crate::frame::Frame;

/// 核心帧同步字
pub const SYNC_WORD: u32 = 0x7FFE_8001;

/// DTS-HD 扩展同步字
pub const HD_SYNC_WORD: u32 = 0x6458_2025;

const MAX_BUFFER: usize = 256 * 1024;

/// 核心采样率表
const CORE_SAMPLE_RATES: [i32; 16] = [
    -1, 8000, 16000, 32000, -1, -1, 11025, 22050, 44100, -1, -1, 12000, 24000, 48000, -1, -1,
];

/// 传输比特率表 (bit/s); 负值为哨兵: -1 开放, -2 可变, -3 无损
const TRANSMISSION_BIT_RATES: [i32; 32] = [
    32_000, 56_000, 64_000, 96_000, 112_000, 128_000, 192_000, 224_000, 256_000, 320_000,
    384_000, 448_000, 512_000, 576_000, 640_000, 768_000, 960_000, 1_024_000, 1_152_000,
    1_280_000, 1_344_000, 1_408_000, 1_411_200, 1_472_000, 1_536_000, 1_920_000, 2_048_000,
    3_072_000, 3_840_000, -1, -2, -3,
];

/// 声道布局表: (声道数, 描述)
const CHANNEL_ARRANGEMENTS: [(u32, &str); 16] = [
    (1, "A (mono)"),
    (2, "A, B (dual mono)"),
    (2, "L, R"),
    (2, "L+R, L-R"),
    (2, "LT, RT"),
    (3, "C, L, R"),
    (3, "L, R, S"),
    (4, "C, L, R, S"),
    (4, "L, R, SL, SR"),
    (5, "C, L, R, SL, SR"),
    (6, "CL, CR, L, R, SL, SR"),
    (6, "C, L, R, LR, RR, OV"),
    (6, "CF, CR, LF, RF, LR, RR"),
    (7, "CL, C, CR, L, R, SL, SR"),
    (8, "CL, CR, L, R, SL1, SL2, SR1, SR2"),
    (8, "CL, C, CR, L, R, SL, S, SR"),
];

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// 正常帧
    Normal,
    /// 终止帧 (采样数需扣除 deficit)
    Termination,
}

/// LFE 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfeType {
    /// 无 LFE
    None,
    /// 128 倍插值
    Lfe128,
    /// 64 倍插值
    Lfe64,
    /// 无效值
    Invalid,
}

/// 解析出的 DTS 帧头
#[derive(Debug, Clone)]
pub struct DtsHeader {
    /// 帧类型
    pub frame_type: FrameType,
    /// 终止帧的采样亏空
    pub deficit_sample_count: u32,
    /// 是否带 CRC
    pub crc_present: bool,
    /// PCM 采样块数 (1..=128, 每块 32 采样)
    pub num_pcm_sample_blocks: u32,
    /// 核心帧字节数 (>= 96), 含 HD 扩展时为总长
    pub frame_byte_size: usize,
    /// 声道数 (不含 LFE), 用户自定义布局时为 None
    pub audio_channels: Option<u32>,
    /// 声道布局描述
    pub audio_channel_arrangement: &'static str,
    /// 核心采样率 (Hz)
    pub core_sampling_frequency: u32,
    /// 传输比特率 (bit/s), 哨兵见表
    pub transmission_bitrate: i32,
    /// LFE 类型
    pub lfe_type: LfeType,
    /// 源 PCM 位深 (16/20/24)
    pub source_pcm_resolution: u32,
    /// 环绕声道是否为 DTS-ES 母带
    pub source_surround_in_es: bool,
    /// 是否带 DTS-HD 扩展
    pub dts_hd: bool,
    /// HD 扩展部分字节数
    pub hd_part_size: usize,
}

impl DtsHeader {
    /// 总声道数 (含 LFE)
    pub fn total_channels(&self) -> u32 {
        self.audio_channels.unwrap_or(0)
            + u32::from(matches!(self.lfe_type, LfeType::Lfe128 | LfeType::Lfe64))
    }

    /// 本帧采样数 (终止帧扣除亏空)
    pub fn samples(&self) -> u32 {
        let samples = self.num_pcm_sample_blocks * 32;
        match self.frame_type {
            FrameType::Normal => samples,
            FrameType::Termination => samples.saturating_sub(self.deficit_sample_count),
        }
    }

    /// 帧时长 (纳秒)
    pub fn duration_ns(&self) -> i64 {
        i64::from(self.samples()) * NS_PER_SECOND / i64::from(self.core_sampling_frequency)
    }

    /// 头部变化检测使用的参数子集是否一致
    pub fn params_match(&self, other: &DtsHeader) -> bool {
        self.core_sampling_frequency == other.core_sampling_frequency
            && self.lfe_type == other.lfe_type
            && self.audio_channels == other.audio_channels
            && self.duration_ns() == other.duration_ns()
    }
}

/// 在缓冲区中搜索核心同步字
pub fn find_sync_word(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    buf.windows(4)
        .position(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]) == SYNC_WORD)
}

/// 从同步字处解析帧头
///
/// `allow_no_hd_search` 为 true 时, 数据不足以判断 HD 扩展也返回
/// 成功 (流尾部使用).
pub fn parse_header(buf: &[u8], allow_no_hd_search: bool) -> MuxResult<DtsHeader> {
    if buf.len() < 15 {
        return Err(MuxError::NeedMoreData);
    }
    if u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) != SYNC_WORD {
        return Err(MuxError::malformed_at_unknown("DTS 同步字缺失"));
    }

    let mut bc = BitReader::new(&buf[4..]);

    let frame_type = if bc.read_bit()? {
        FrameType::Normal
    } else {
        FrameType::Termination
    };
    let deficit_sample_count = (bc.read_bits(5)? as u32 + 1) % 32;
    let crc_present = bc.read_bit()?;
    let num_pcm_sample_blocks = bc.read_bits(7)? as u32 + 1;
    let frame_byte_size = bc.read_bits(14)? as usize + 1;
    if frame_byte_size < 96 {
        return Err(MuxError::malformed_at_unknown("DTS 帧长字段无效"));
    }

    let amode = bc.read_bits(6)? as usize;
    let (audio_channels, audio_channel_arrangement) = if amode >= 16 {
        (None, "unknown (user defined)")
    } else {
        let (n, desc) = CHANNEL_ARRANGEMENTS[amode];
        (Some(n), desc)
    };

    let sfreq = CORE_SAMPLE_RATES[bc.read_bits(4)? as usize];
    if sfreq <= 0 {
        return Err(MuxError::malformed_at_unknown("DTS 采样率码无效"));
    }
    let transmission_bitrate = TRANSMISSION_BIT_RATES[bc.read_bits(5)? as usize];

    bc.skip_bits(1)?; // embedded down mix
    bc.skip_bits(1)?; // embedded dynamic range
    bc.skip_bits(1)?; // embedded time stamp
    bc.skip_bits(1)?; // auxiliary data
    bc.skip_bits(1)?; // hdcd master
    bc.skip_bits(3)?; // extension audio descriptor
    bc.skip_bits(1)?; // extended coding
    bc.skip_bits(1)?; // audio sync word insertion
    let lfe_type = match bc.read_bits(2)? {
        0 => LfeType::None,
        1 => LfeType::Lfe128,
        2 => LfeType::Lfe64,
        _ => LfeType::Invalid,
    };
    bc.skip_bits(1)?; // predictor history
    if crc_present {
        bc.skip_bits(16)?;
    }
    bc.skip_bits(1)?; // multirate interpolator
    bc.skip_bits(4)?; // encoder software revision
    bc.skip_bits(2)?; // copy history

    let (source_pcm_resolution, source_surround_in_es) = match bc.read_bits(3)? {
        0 => (16, false),
        1 => (16, true),
        2 => (20, false),
        3 => (20, true),
        6 => (24, false),
        5 => (24, true),
        _ => return Err(MuxError::malformed_at_unknown("DTS 源 PCM 位深无效")),
    };

    let mut header = DtsHeader {
        frame_type,
        deficit_sample_count,
        crc_present,
        num_pcm_sample_blocks,
        frame_byte_size,
        audio_channels,
        audio_channel_arrangement,
        core_sampling_frequency: sfreq as u32,
        transmission_bitrate,
        lfe_type,
        source_pcm_resolution,
        source_surround_in_es,
        dts_hd: false,
        hd_part_size: 0,
    };

    // 核心帧之后的 DTS-HD 扩展
    let hd_offset = header.frame_byte_size;
    if hd_offset + 9 > buf.len() {
        if allow_no_hd_search {
            return Ok(header);
        }
        return Err(MuxError::NeedMoreData);
    }
    if u32::from_be_bytes([
        buf[hd_offset],
        buf[hd_offset + 1],
        buf[hd_offset + 2],
        buf[hd_offset + 3],
    ]) != HD_SYNC_WORD
    {
        return Ok(header);
    }

    let mut hd = BitReader::new(&buf[hd_offset + 4..]);
    hd.skip_bits(8 + 2)?;
    let hd_part_size = if hd.read_bit()? {
        // 扩展头标志置位
        hd.skip_bits(12)?;
        hd.read_bits(20)? as usize + 1
    } else {
        hd.skip_bits(8)?;
        hd.read_bits(16)? as usize + 1
    };

    header.dts_hd = true;
    header.hd_part_size = hd_part_size;
    header.frame_byte_size += hd_part_size;
    Ok(header)
}

/// DTS 帧切分器
#[derive(Default)]
pub struct DtsParser {
    buffer: Vec<u8>,
    header: Option<DtsHeader>,
    skipped: usize,
}

impl DtsParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 最近一次成功解析的帧头
    pub fn header(&self) -> Option<&DtsHeader> {
        self.header.as_ref()
    }

    /// 吞入字节并返回切出的完整帧
    pub fn add_bytes(&mut self, data: &[u8]) -> MuxResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);
        self.extract(false)
    }

    /// 吐出尾帧 (允许缺少 HD 扩展判定所需的后续字节)
    pub fn flush(&mut self) -> MuxResult<Vec<Frame>> {
        let frames = self.extract(true)?;
        self.buffer.clear();
        Ok(frames)
    }

    fn extract(&mut self, at_eof: bool) -> MuxResult<Vec<Frame>> {
        let mut frames = Vec::new();
        loop {
            let Some(pos) = find_sync_word(&self.buffer) else {
                let keep = self.buffer.len().min(3);
                self.skipped += self.buffer.len() - keep;
                let tail = self.buffer.split_off(self.buffer.len() - keep);
                self.buffer = tail;
                break;
            };
            if pos > 0 {
                self.skipped += pos;
                self.buffer.drain(..pos);
            }

            let header = match parse_header(&self.buffer, at_eof) {
                Ok(h) => h,
                Err(MuxError::NeedMoreData) => break,
                Err(_) => {
                    self.skipped += 1;
                    self.buffer.drain(..1);
                    continue;
                }
            };
            if self.buffer.len() < header.frame_byte_size {
                if at_eof {
                    warn!("DTS: 流尾部的不完整帧被丢弃, {} 字节", self.buffer.len());
                    self.buffer.clear();
                }
                break;
            }

            if self.skipped > 0 {
                warn!("DTS: 跳过 {} 字节后找到下一个同步字", self.skipped);
                self.skipped = 0;
            }

            let params_changed = self
                .header
                .as_ref()
                .map(|prev| !prev.params_match(&header))
                .unwrap_or(false);

            let data: Vec<u8> = self.buffer.drain(..header.frame_byte_size).collect();
            let duration = header.duration_ns();
            self.header = Some(header);
            frames.push(Frame {
                data: Bytes::from(data),
                timestamp_ns: None,
                duration_ns: Some(duration),
                key_frame: true,
                bref_ns: None,
                params_changed,
            });
        }
        if self.buffer.len() > MAX_BUFFER {
            return Err(MuxError::malformed_at_unknown("DTS: 缓冲超限仍未找到完整帧"));
        }
        Ok(frames)
    }
}

// ============================================================
// 14-bit → 16-bit 重打包
// ============================================================

/// 14-bit 打包形式的字节序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dts14Endianness {
    /// 大端 14-bit
    BigEndian,
    /// 小端 14-bit
    LittleEndian,
}

/// 检测缓冲区是否为 14-bit 打包形式, 并判定字节序
///
/// 分别按两种字节序尝试重打包并搜索同步字.
pub fn detect_14_bit(buf: &[u8]) -> Option<Dts14Endianness> {
    for endianness in [Dts14Endianness::BigEndian, Dts14Endianness::LittleEndian] {
        let probe_len = buf.len().min(1024) & !7;
        let repacked = repack_14_to_16(&buf[..probe_len], endianness);
        if find_sync_word(&repacked) == Some(0) {
            return Some(endianness);
        }
    }
    None
}

/// 将 14-bit 打包数据还原为 16-bit 形式
///
/// 每 8 个输入字节 (4 个 16 位字, 各含 14 个有效位) 重组为
/// 7 个输出字节.
pub fn repack_14_to_16(buf: &[u8], endianness: Dts14Endianness) -> Vec<u8> {
    let words = buf.len() / 2;
    let mut out = Vec::with_capacity(buf.len() * 7 / 8 + 2);
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for i in 0..words {
        let word = match endianness {
            Dts14Endianness::BigEndian => u16::from_be_bytes([buf[2 * i], buf[2 * i + 1]]),
            Dts14Endianness::LittleEndian => u16::from_le_bytes([buf[2 * i], buf[2 * i + 1]]),
        };
        // 丢弃高 2 位
        acc = (acc << 14) | u64::from(word & 0x3FFF);
        acc_bits += 14;
        while acc_bits >= 8 {
            out.push((acc >> (acc_bits - 8)) as u8);
            acc_bits -= 8;
            acc &= (1 << acc_bits) - 1;
        }
    }
    out
}
