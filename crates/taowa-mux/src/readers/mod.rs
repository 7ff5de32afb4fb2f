//! 输入读取器.
//!
//! 读取器按 probe 评分认领输入文件, 打开时探测轨道参数并创建
//! 对应的 Packetizer, 此后主循环反复调用 `read` 拉取一段数据.
//! `read` 是管线中唯一可能阻塞在 I/O 上的悬挂点.

use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::packetizer::{Packetizer, TrackOptions};

pub mod aac;
pub mod ac3;
pub mod dts;
pub mod flac;
pub mod hevc;
pub mod srt;
pub mod vc1;

/// 一次 read 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// 还有数据
    MoreData,
    /// 此输入已读完 (Packetizer 已 flush)
    Done,
}

/// 读取器 trait
pub trait Reader {
    /// 格式名 (进度输出)
    fn format_name(&self) -> &'static str;

    /// 此读取器的 Packetizer (只读, 轨道参数查询)
    fn packetizer(&self) -> &dyn Packetizer;

    /// 此读取器的 Packetizer
    fn packetizer_mut(&mut self) -> &mut dyn Packetizer;

    /// 拉取一段数据送入 Packetizer
    fn read(&mut self, sched: &mut ClusterScheduler) -> MuxResult<ReadStatus>;
}

/// 已识别的输入文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// AC-3 / E-AC-3 基本流
    Ac3,
    /// AAC (ADTS) 基本流
    Aac,
    /// DTS 基本流 (含 14-bit 形式)
    Dts,
    /// HEVC Annex-B 基本流
    HevcEs,
    /// VC-1 基本流
    Vc1Es,
    /// 裸 FLAC
    Flac,
    /// SRT 字幕
    Srt,
}

impl FileFormat {
    /// 格式名
    pub fn name(self) -> &'static str {
        match self {
            Self::Ac3 => "AC-3",
            Self::Aac => "AAC",
            Self::Dts => "DTS",
            Self::HevcEs => "HEVC",
            Self::Vc1Es => "VC-1",
            Self::Flac => "FLAC",
            Self::Srt => "SRT",
        }
    }
}

/// 对 peek 缓冲运行全部 probe, 返回评分最高的格式
///
/// 评分 0 表示 "不是我的格式".
pub fn probe_format(peek: &[u8]) -> Option<FileFormat> {
    let candidates = [
        (FileFormat::Flac, flac::probe(peek)),
        (FileFormat::Srt, srt::probe(peek)),
        (FileFormat::HevcEs, hevc::probe(peek)),
        (FileFormat::Vc1Es, vc1::probe(peek)),
        (FileFormat::Ac3, ac3::probe(peek)),
        (FileFormat::Dts, dts::probe(peek)),
        (FileFormat::Aac, aac::probe(peek)),
    ];
    candidates
        .into_iter()
        .filter(|(_, score)| *score > 0)
        .max_by_key(|(_, score)| *score)
        .map(|(format, _)| format)
}

/// 打开输入文件: probe + 创建对应读取器
pub fn open_input(
    path: &str,
    track_number: u64,
    opts: TrackOptions,
) -> MuxResult<Box<dyn Reader>> {
    let peek = {
        let mut io = crate::io::IoContext::open_read(path)?;
        let mut buf = vec![0u8; PROBE_SIZE];
        let mut filled = 0;
        while filled < buf.len() {
            let n = io.read_some(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        buf
    };

    let format = probe_format(&peek).ok_or_else(|| {
        MuxError::UnsupportedCodec(format!("无法识别输入文件 '{path}' 的格式"))
    })?;
    log::info!("输入 '{path}': 识别为 {}", format.name());

    match format {
        FileFormat::Ac3 => Ok(Box::new(ac3::Ac3Reader::open(path, track_number, opts)?)),
        FileFormat::Aac => Ok(Box::new(aac::AacReader::open(path, track_number, opts)?)),
        FileFormat::Dts => Ok(Box::new(dts::DtsReader::open(path, track_number, opts)?)),
        FileFormat::HevcEs => Ok(Box::new(hevc::HevcReader::open(path, track_number, opts)?)),
        FileFormat::Vc1Es => Ok(Box::new(vc1::Vc1Reader::open(path, track_number, opts)?)),
        FileFormat::Flac => Ok(Box::new(flac::FlacReader::open(path, track_number, opts)?)),
        FileFormat::Srt => Ok(Box::new(srt::SrtReader::open(path, track_number, opts)?)),
    }
}

/// probe 读取量
pub const PROBE_SIZE: usize = 256 * 1024;

/// 读取器单次拉取量
pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_选择最高分() {
        // fLaC 魔数给满分
        let mut buf = b"fLaC".to_vec();
        buf.extend_from_slice(&[0u8; 100]);
        assert_eq!(probe_format(&buf), Some(FileFormat::Flac));

        // 无法识别
        assert_eq!(probe_format(&[0u8; 100]), None);
    }
}
