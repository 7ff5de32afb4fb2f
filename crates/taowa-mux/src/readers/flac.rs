//! 裸 FLAC 读取器.

use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, PacketizerInput, TrackOptions};
use crate::packetizers::FlacPacketizer;

use super::{CHUNK_SIZE, ReadStatus, Reader};

/// probe: "fLaC" 魔数
pub fn probe(peek: &[u8]) -> u8 {
    if peek.starts_with(b"fLaC") { 100 } else { 0 }
}

/// 裸 FLAC 读取器
pub struct FlacReader {
    io: IoContext,
    packetizer: FlacPacketizer,
    done: bool,
}

impl FlacReader {
    /// 打开并预喂至 STREAMINFO 就绪
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let mut packetizer = FlacPacketizer::new(track_number, opts);

        while !packetizer.headers_ready() {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = io.read_some(&mut chunk)?;
            if n == 0 {
                return Err(MuxError::malformed_at_unknown(format!(
                    "'{path}' 结束时仍未见完整的 FLAC 头部区"
                )));
            }
            packetizer.prime(&chunk[..n])?;
        }

        Ok(Self {
            io,
            packetizer,
            done: false,
        })
    }
}

impl Reader for FlacReader {
    fn format_name(&self) -> &'static str {
        "FLAC"
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
