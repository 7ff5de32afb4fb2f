//! HEVC Annex-B 基本流读取器.
//!
//! 打开时持续预喂解析器直到参数集就绪, TrackEntry 才能定型.
//! `--nalu-size-length` 与 `--default-duration` 透传给 Packetizer.

use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, PacketizerInput, TrackOptions};
use crate::packetizers::HevcEsPacketizer;

use super::{CHUNK_SIZE, ReadStatus, Reader};

/// 探测上限: 参数集必须出现在流的前 8 MiB 内
const MAX_PROBE_BYTES: usize = 8 * 1024 * 1024;

/// probe: 起始码后出现 VPS/SPS NAL
pub fn probe(peek: &[u8]) -> u8 {
    let mut score = 0u8;
    let mut pos = 0usize;
    let mut start_codes = 0;
    while pos + 5 < peek.len() && start_codes < 16 {
        let Some((offset, len)) =
            taowa_codec::parsers::hevc::nal::find_start_code(&peek[pos..])
        else {
            break;
        };
        pos += offset + len;
        start_codes += 1;
        if pos < peek.len() {
            let nal_type = (peek[pos] >> 1) & 0x3F;
            match nal_type {
                32 | 33 => score = 80, // VPS / SPS
                34 if score < 60 => score = 60,
                _ => {}
            }
        }
    }
    if score == 0 && start_codes >= 4 {
        // 有起始码但没认出参数集, 弱分
        score = 20;
    }
    score
}

/// HEVC 基本流读取器
pub struct HevcReader {
    io: IoContext,
    packetizer: HevcEsPacketizer,
    done: bool,
}

impl HevcReader {
    /// 打开并预喂至参数集就绪
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let mut packetizer = HevcEsPacketizer::new(track_number, opts)?;

        let mut probed = 0usize;
        while !packetizer.headers_ready() {
            if probed > MAX_PROBE_BYTES {
                return Err(MuxError::malformed_at_unknown(format!(
                    "'{path}' 的前 {MAX_PROBE_BYTES} 字节内没有 HEVC 参数集"
                )));
            }
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = io.read_some(&mut chunk)?;
            if n == 0 {
                return Err(MuxError::malformed_at_unknown(format!(
                    "'{path}' 结束时仍未见 HEVC 参数集"
                )));
            }
            probed += n;
            packetizer.prime(&chunk[..n])?;
        }

        Ok(Self {
            io,
            packetizer,
            done: false,
        })
    }
}

impl Reader for HevcReader {
    fn format_name(&self) -> &'static str {
        "HEVC"
    }

    fn packetizer(&self) -> &dyn Packetizer {
        &self.packetizer
    }

    fn packetizer_mut(&mut self) -> &mut dyn Packetizer {
        &mut self.packetizer
    }

    fn read(&mut self, sched: &mut ClusterScheduler) -> MuxResult<ReadStatus> {
        if self.done {
            return Ok(ReadStatus::Done);
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = self.io.read_some(&mut chunk)?;
        if n == 0 {
            self.packetizer.flush(sched)?;
            self.done = true;
            return Ok(ReadStatus::Done);
        }
        self.packetizer
            .process(PacketizerInput::bytes(&chunk[..n]), sched)?;
        Ok(ReadStatus::MoreData)
    }
}
