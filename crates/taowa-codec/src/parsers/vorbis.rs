//! Vorbis 头部与数据包时长解析.
//!
//! 三个头部包 (identification / comment / setup) 原样进入
//! codec private, 以 Xiph 式花边打包. 数据包时长由当前与上一包的
//! 块大小得出: (bs_prev + bs_cur) / 4 个采样.
//!
//! 包的块大小取决于 mode 号, mode 的 blockflag 表位于 setup 头的
//! 末尾; 这里采用对整个 setup 头做位序反转后自尾部回扫的办法提取
//! mode 表, 免去完整的码本解析.

use log::debug;
use taowa_core::{BitReader, MuxError, MuxResult};
use taowa_core::timestamp::NS_PER_SECOND;

/// identification 头参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VorbisIdent {
    /// 声道数
    pub channels: u32,
    /// 采样率 (Hz)
    pub sample_rate: u32,
    /// 短块大小 (采样)
    pub blocksize_0: u32,
    /// 长块大小 (采样)
    pub blocksize_1: u32,
}

/// 解析 identification 头 (包类型 1)
pub fn parse_ident(packet: &[u8]) -> MuxResult<VorbisIdent> {
    if packet.len() < 30 {
        return Err(MuxError::malformed_at_unknown("Vorbis: identification 头太短"));
    }
    if packet[0] != 1 || &packet[1..7] != b"vorbis" {
        return Err(MuxError::malformed_at_unknown("Vorbis: identification 头标识缺失"));
    }
    let version = u32::from_le_bytes([packet[7], packet[8], packet[9], packet[10]]);
    if version != 0 {
        return Err(MuxError::malformed_at_unknown(format!(
            "Vorbis: 不支持的版本 {version}"
        )));
    }
    let channels = u32::from(packet[11]);
    let sample_rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
    if channels == 0 || sample_rate == 0 {
        return Err(MuxError::malformed_at_unknown("Vorbis: 声道或采样率为 0"));
    }
    // 比特率 3 × 4 字节之后是块大小字节 (低 4 位 bs0, 高 4 位 bs1)
    let bs = packet[28];
    let blocksize_0 = 1u32 << (bs & 0x0F);
    let blocksize_1 = 1u32 << (bs >> 4);
    Ok(VorbisIdent {
        channels,
        sample_rate,
        blocksize_0,
        blocksize_1,
    })
}

/// 从 setup 头提取各 mode 的 blockflag
///
/// mode 表在 setup 头末尾: 6 位 mode 计数 - 1, 每个 mode 为
/// [blockflag(1)][windowtype(16)=0][transformtype(16)=0][mapping(8)],
/// 之后 1 个取 1 的边帧位与补零. 对位序反转后的流自尾部回扫,
/// 逐项验证并在计数字段吻合处定界.
pub fn parse_mode_flags(setup: &[u8]) -> MuxResult<Vec<bool>> {
    if setup.len() < 8 {
        return Err(MuxError::malformed_at_unknown("Vorbis: setup 头太短"));
    }

    // 位序反转: 字节倒排且每字节位倒排, 使 LSB-first 流可从尾部正读
    let reversed: Vec<u8> = setup.iter().rev().map(|b| b.reverse_bits()).collect();
    let mut br = BitReader::new(&reversed);

    // 跳过补零直到边帧位
    let mut guard = 0;
    while !br.read_bit()? {
        guard += 1;
        if guard > 63 {
            return Err(MuxError::malformed_at_unknown("Vorbis: setup 头缺少边帧位"));
        }
    }

    // 回扫 mode 项; 每读出一项便试探 6 位计数字段是否吻合
    let mut flags_reversed: Vec<bool> = Vec::new();
    let mut confirmed: Option<usize> = None;
    while br.bits_remaining() >= 41 + 6 {
        let mapping = br.read_bits(8)?;
        if mapping > 63 {
            break;
        }
        if br.read_bits(32)? != 0 {
            break;
        }
        let blockflag = br.read_bit()?;
        flags_reversed.push(blockflag);
        if flags_reversed.len() > 64 {
            break;
        }

        // 试探: 紧邻之前应是 mode_count - 1
        let mut probe = BitReader::new(&reversed);
        probe.skip_bits(br.bits_consumed() as u32)?;
        if probe.read_bits(6)? as usize + 1 == flags_reversed.len() {
            confirmed = Some(flags_reversed.len());
        }
    }

    let count = confirmed
        .ok_or_else(|| MuxError::malformed_at_unknown("Vorbis: 未能定位 mode 表"))?;
    let mut flags: Vec<bool> = flags_reversed[..count].to_vec();
    flags.reverse();
    debug!("Vorbis: {} 个 mode, blockflags {:?}", count, flags);
    Ok(flags)
}

/// 以 Xiph 式花边打包三个头部包为 codec private
///
/// 首字节为包数减一, 其后各前置包的长度以 0xFF 游程 + 余数字节
/// 表示; 末包长度由总长隐含.
pub fn build_codec_private(headers: &[&[u8]; 3]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        1 + headers[0].len() / 255 + headers[1].len() / 255 + 2
            + headers.iter().map(|h| h.len()).sum::<usize>(),
    );
    out.push(2);
    for header in &headers[..2] {
        let mut len = header.len();
        while len >= 255 {
            out.push(255);
            len -= 255;
        }
        out.push(len as u8);
    }
    for header in headers {
        out.extend_from_slice(header);
    }
    out
}

/// 数据包时长计算器
pub struct VorbisDurations {
    ident: VorbisIdent,
    mode_flags: Vec<bool>,
    mode_bits: u32,
    prev_blocksize: Option<u32>,
}

impl VorbisDurations {
    /// 由三个头部包构造
    pub fn new(ident_packet: &[u8], setup_packet: &[u8]) -> MuxResult<Self> {
        let ident = parse_ident(ident_packet)?;
        let mode_flags = parse_mode_flags(setup_packet)?;
        let mode_bits = if mode_flags.len() > 1 {
            64 - ((mode_flags.len() - 1) as u64).leading_zeros()
        } else {
            0
        };
        Ok(Self {
            ident,
            mode_flags,
            mode_bits,
            prev_blocksize: None,
        })
    }

    /// identification 头参数
    pub fn ident(&self) -> &VorbisIdent {
        &self.ident
    }

    /// 数据包的块大小 (采样)
    pub fn packet_blocksize(&self, packet: &[u8]) -> MuxResult<u32> {
        let first = *packet.first().ok_or_else(|| {
            MuxError::malformed_at_unknown("Vorbis: 空数据包")
        })?;
        if first & 1 != 0 {
            return Err(MuxError::malformed_at_unknown("Vorbis: 头部包混入数据流"));
        }
        // LSB-first: 位 0 为包类型, 随后 mode 号
        let mode = (usize::from(first) >> 1) & ((1 << self.mode_bits) - 1);
        let long_block = *self
            .mode_flags
            .get(mode)
            .ok_or_else(|| MuxError::malformed_at_unknown("Vorbis: mode 号越界"))?;
        Ok(if long_block {
            self.ident.blocksize_1
        } else {
            self.ident.blocksize_0
        })
    }

    /// 数据包产生的采样数与时长 (纳秒)
    ///
    /// 首包仅记录块大小, 产生 0 采样.
    pub fn packet_duration(&mut self, packet: &[u8]) -> MuxResult<(u32, i64)> {
        let cur = self.packet_blocksize(packet)?;
        let samples = match self.prev_blocksize {
            Some(prev) => (prev + cur) / 4,
            None => 0,
        };
        self.prev_blocksize = Some(cur);
        let duration = i64::from(samples) * NS_PER_SECOND / i64::from(self.ident.sample_rate);
        Ok((samples, duration))
    }
}
