//! DTS 基本流读取器.
//!
//! DVD 来源的 14-bit 打包形式在这里检测并还原为 16-bit 后再交给
//! Packetizer; 字节序在两种假设下搜索同步字自动判定.

use taowa_codec::parsers::dts;
use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, PacketizerInput, TrackOptions};
use crate::packetizers::DtsPacketizer;

use super::{CHUNK_SIZE, ReadStatus, Reader};

/// probe: 16-bit 同步字或 14-bit 形式检出
pub fn probe(peek: &[u8]) -> u8 {
    if let Some(pos) = dts::find_sync_word(peek) {
        if dts::parse_header(&peek[pos..], true).is_ok() {
            return if pos == 0 { 75 } else { 50 };
        }
    }
    if dts::detect_14_bit(peek).is_some() {
        return 60;
    }
    0
}

/// DTS 基本流读取器
pub struct DtsReader {
    io: IoContext,
    packetizer: DtsPacketizer,
    pending: Vec<u8>,
    /// 14-bit 形式的重打包设置与跨块对齐余量
    repack: Option<(dts::Dts14Endianness, Vec<u8>)>,
    done: bool,
}

impl DtsReader {
    /// 打开并探测首个核心帧头
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let mut probe_buf = vec![0u8; CHUNK_SIZE];
        let n = io.read_some(&mut probe_buf)?;
        probe_buf.truncate(n);

        // 14-bit 检测在前; 命中则整条流重打包
        let mut repack = None;
        let mut effective = probe_buf.clone();
        if dts::find_sync_word(&probe_buf).is_none() {
            if let Some(endianness) = dts::detect_14_bit(&probe_buf) {
                log::info!("DTS: 检测到 14-bit 打包形式 ({endianness:?}), 将重打包为 16-bit");
                let aligned = probe_buf.len() & !7;
                effective = dts::repack_14_to_16(&probe_buf[..aligned], endianness);
                repack = Some((endianness, probe_buf[aligned..].to_vec()));
                probe_buf.truncate(aligned);
            }
        }

        let pos = dts::find_sync_word(&effective).ok_or_else(|| {
            MuxError::malformed_at_unknown(format!("'{path}' 中找不到 DTS 同步字"))
        })?;
        let header = dts::parse_header(&effective[pos..], true)?;
        let packetizer = DtsPacketizer::new(
            track_number,
            header.core_sampling_frequency,
            header.total_channels(),
            header.source_pcm_resolution,
            opts,
        );
        Ok(Self {
            io,
            packetizer,
            pending: effective,
            repack,
            done: false,
        })
    }

    fn forward(&mut self, data: &[u8], sched: &mut ClusterScheduler) -> MuxResult<()> {
        match &mut self.repack {
            None => self
                .packetizer
                .process(PacketizerInput::bytes(data), sched),
            Some((endianness, carry)) => {
                let endianness = *endianness;
                carry.extend_from_slice(data);
                let aligned = carry.len() & !7;
                let repacked = dts::repack_14_to_16(&carry[..aligned], endianness);
                carry.drain(..aligned);
                self.packetizer
                    .process(PacketizerInput::bytes(&repacked), sched)
            }
        }
    }
}

impl Reader for DtsReader {
    fn format_name(&self) -> &'static str {
        "DTS"
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
            // 探测数据已经过重打包, 直接交给 Packetizer
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
        self.forward(&chunk[..n].to_vec(), sched)?;
        Ok(ReadStatus::MoreData)
    }
}
