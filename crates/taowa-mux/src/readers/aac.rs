//! AAC (ADTS) 基本流读取器.
//!
//! ADIF 形式 (文件头 "ADIF") 不支持, 显式报错.

use taowa_codec::parsers::aac;
use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, PacketizerInput, TrackOptions};
use crate::packetizers::AacPacketizer;

use super::{CHUNK_SIZE, ReadStatus, Reader};

/// probe: 连续两个可解析的 ADTS 帧头
pub fn probe(peek: &[u8]) -> u8 {
    if peek.starts_with(b"ADIF") {
        // 可识别但不支持, 交由 open 报错
        return 30;
    }
    let mut pos = 0usize;
    while pos + 7 < peek.len() {
        let Some(offset) = peek[pos..]
            .windows(2)
            .position(|w| w[0] == 0xFF && (w[1] & 0xF0) == 0xF0)
        else {
            return 0;
        };
        pos += offset;
        if let Ok(header) = aac::parse_header(&peek[pos..]) {
            let next = pos + header.frame_bytes;
            if next + 7 <= peek.len() && aac::parse_header(&peek[next..]).is_ok() {
                return if pos == 0 { 70 } else { 45 };
            }
        }
        pos += 1;
    }
    0
}

/// AAC 基本流读取器
pub struct AacReader {
    io: IoContext,
    packetizer: AacPacketizer,
    pending: Vec<u8>,
    done: bool,
}

impl AacReader {
    /// 打开并探测首个 ADTS 帧头
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let mut probe_buf = vec![0u8; CHUNK_SIZE];
        let n = io.read_some(&mut probe_buf)?;
        probe_buf.truncate(n);

        if probe_buf.starts_with(b"ADIF") {
            return Err(MuxError::UnsupportedParameter(
                "ADIF 形式的 AAC 不受支持, 请先转为 ADTS".into(),
            ));
        }

        let header = find_first_header(&probe_buf).ok_or_else(|| {
            MuxError::malformed_at_unknown(format!("'{path}' 中找不到 ADTS 帧头"))
        })?;
        let packetizer = AacPacketizer::new(
            track_number,
            header.sample_rate,
            header.channels,
            header.audio_specific_config(),
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

fn find_first_header(buf: &[u8]) -> Option<aac::AacHeader> {
    let mut pos = 0usize;
    while pos + 7 < buf.len() {
        let offset = buf[pos..]
            .windows(2)
            .position(|w| w[0] == 0xFF && (w[1] & 0xF0) == 0xF0)?;
        pos += offset;
        if let Ok(header) = aac::parse_header(&buf[pos..]) {
            return Some(header);
        }
        pos += 1;
    }
    None
}

impl Reader for AacReader {
    fn format_name(&self) -> &'static str {
        "AAC"
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
