//! VC-1 基本流读取器.

use taowa_codec::parsers::vc1 as vc1_parser;
use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, PacketizerInput, TrackOptions};
use crate::packetizers::Vc1Packetizer;

use super::{CHUNK_SIZE, ReadStatus, Reader};

/// 探测上限: 序列头必须出现在流的前 1 MiB 内
const MAX_PROBE_BYTES: usize = 1024 * 1024;

/// probe: 出现序列头标记并可解析
pub fn probe(peek: &[u8]) -> u8 {
    let mut pos = 0usize;
    while pos + 8 < peek.len() {
        let Some(offset) = peek[pos..]
            .windows(4)
            .position(|w| w == vc1_parser::marker::SEQHDR.to_be_bytes())
        else {
            return 0;
        };
        pos += offset;
        if vc1_parser::parse_sequence_header(&peek[pos..]).is_ok() {
            return if pos == 0 { 80 } else { 55 };
        }
        pos += 4;
    }
    0
}

/// VC-1 基本流读取器
pub struct Vc1Reader {
    io: IoContext,
    packetizer: Vc1Packetizer,
    done: bool,
}

impl Vc1Reader {
    /// 打开并预喂至序列头就绪
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let mut packetizer = Vc1Packetizer::new(track_number, opts);

        let mut probed = 0usize;
        while !packetizer.headers_ready() {
            if probed > MAX_PROBE_BYTES {
                return Err(MuxError::malformed_at_unknown(format!(
                    "'{path}' 的前 {MAX_PROBE_BYTES} 字节内没有 VC-1 序列头"
                )));
            }
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = io.read_some(&mut chunk)?;
            if n == 0 {
                return Err(MuxError::malformed_at_unknown(format!(
                    "'{path}' 结束时仍未见 VC-1 序列头"
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

impl Reader for Vc1Reader {
    fn format_name(&self) -> &'static str {
        "VC-1"
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
