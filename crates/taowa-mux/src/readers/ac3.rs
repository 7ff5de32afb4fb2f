//! AC-3 / E-AC-3 基本流读取器.

use taowa_codec::parsers::ac3;
use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, PacketizerInput, TrackOptions};
use crate::packetizers::Ac3Packetizer;

use super::{CHUNK_SIZE, ReadStatus, Reader};

/// probe: 在缓冲内找到同步字并成功解析两个连续帧头
pub fn probe(peek: &[u8]) -> u8 {
    let mut pos = 0usize;
    while pos + 8 < peek.len() {
        let Some(offset) = peek[pos..].windows(2).position(|w| w == [0x0B, 0x77]) else {
            return 0;
        };
        pos += offset;
        if let Ok(header) = ac3::parse_header(&peek[pos..]) {
            let next = pos + header.frame_bytes;
            if next + 8 <= peek.len() && ac3::parse_header(&peek[next..]).is_ok() {
                return if pos == 0 { 80 } else { 50 };
            }
        }
        pos += 1;
    }
    0
}

/// AC-3 基本流读取器
pub struct Ac3Reader {
    io: IoContext,
    packetizer: Ac3Packetizer,
    /// 探测期间已读出的数据, 首次 read 时先交给 Packetizer
    pending: Vec<u8>,
    done: bool,
}

impl Ac3Reader {
    /// 打开并探测首个帧头
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let mut probe_buf = vec![0u8; CHUNK_SIZE];
        let n = io.read_some(&mut probe_buf)?;
        probe_buf.truncate(n);

        let header = find_first_header(&probe_buf).ok_or_else(|| {
            MuxError::malformed_at_unknown(format!("'{path}' 中找不到 AC-3 帧头"))
        })?;
        let packetizer = Ac3Packetizer::new(
            track_number,
            header.sample_rate,
            header.channels,
            header.eac3,
            opts,
        );
        Ok(Self {
            io,
            packetizer,
            pending: probe_buf,
            done: false,
        })
    }
}

fn find_first_header(buf: &[u8]) -> Option<ac3::Ac3Header> {
    let mut pos = 0usize;
    while pos + 8 < buf.len() {
        let offset = buf[pos..].windows(2).position(|w| w == [0x0B, 0x77])?;
        pos += offset;
        if let Ok(header) = ac3::parse_header(&buf[pos..]) {
            return Some(header);
        }
        pos += 1;
    }
    None
}

impl Reader for Ac3Reader {
    fn format_name(&self) -> &'static str {
        "AC-3"
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
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.packetizer
                .process(PacketizerInput::bytes(&pending), sched)?;
            return Ok(ReadStatus::MoreData);
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
