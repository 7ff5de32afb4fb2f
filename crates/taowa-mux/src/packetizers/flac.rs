//! FLAC Packetizer.
//!
//! codec private 为 "fLaC" 魔数加全部元数据块; 帧时长由各帧
//! 块大小得出, 时间戳按累计时长推进.

use taowa_codec::parsers::flac::FlacParser;
use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{AudioParams, TrackSpec};

use super::ac3::{apply_common_audio_options, block_duration};

/// FLAC Packetizer
pub struct FlacPacketizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    parser: FlacParser,
    /// 读取器预喂期间切出的帧
    primed_frames: Vec<taowa_codec::Frame>,
    elapsed_ns: i64,
    headers_applied: bool,
}

impl FlacPacketizer {
    /// 创建 (读取器先行探测 STREAMINFO)
    pub fn new(track_number: u64, opts: TrackOptions) -> Self {
        let spec = TrackSpec::new(track_number, TrackType::Audio, CodecId::Flac);
        let sync = SyncState::new(&opts);
        Self {
            spec,
            opts,
            sync,
            parser: FlacParser::new(),
            primed_frames: Vec::new(),
            elapsed_ns: 0,
            headers_applied: false,
        }
    }

    /// 读取器在 set_headers 之前预喂数据 (探测 STREAMINFO)
    pub fn prime(&mut self, data: &[u8]) -> MuxResult<()> {
        let frames = self.parser.add_bytes(data)?;
        self.primed_frames.extend(frames);
        Ok(())
    }

    /// STREAMINFO 是否就绪
    pub fn headers_ready(&self) -> bool {
        self.parser.headers().is_some()
    }

    fn apply_headers(&mut self) {
        if self.headers_applied {
            return;
        }
        if let Some(headers) = self.parser.headers() {
            let info = headers.stream_info;
            self.spec.audio = Some(AudioParams {
                sample_rate: f64::from(info.sample_rate),
                output_sample_rate: None,
                channels: u64::from(info.channels),
                bit_depth: Some(u64::from(info.bits_per_sample)),
            });
            self.spec.codec_private = Some(self.parser.codec_private().to_vec().into());
            apply_common_audio_options(&mut self.spec, &self.opts);
            self.headers_applied = true;
        }
    }

    fn emit_frames(
        &mut self,
        frames: Vec<taowa_codec::Frame>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        self.apply_headers();
        for frame in frames {
            let duration = self.sync.scale(frame.duration_ns.unwrap_or(0));
            let copies = self.sync.admit(duration);
            for _ in 0..copies {
                let mut packet =
                    Packet::key_frame(self.spec.number, self.elapsed_ns, frame.data.clone());
                packet.duration_hint_ns = duration;
                packet.duration_ns = block_duration(&self.spec, &self.opts, duration);
                packetizer::enqueue(&self.spec, sched, packet)?;
                self.elapsed_ns += duration;
            }
        }
        Ok(())
    }
}

impl Packetizer for FlacPacketizer {
    fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    fn set_headers(&mut self) -> MuxResult<Element> {
        self.apply_headers();
        // 定长块流有稳定的默认时长
        if let Some(headers) = self.parser.headers() {
            let info = headers.stream_info;
            if info.fixed_block_size() && info.min_block_size > 0 {
                let duration = i64::from(info.min_block_size) * 1_000_000_000
                    / i64::from(info.sample_rate);
                self.spec.default_duration_ns = Some(self.sync.scale(duration));
            }
        }
        self.spec.to_element()
    }

    fn process(
        &mut self,
        input: PacketizerInput<'_>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        let primed = std::mem::take(&mut self.primed_frames);
        self.emit_frames(primed, sched)?;
        let frames = self.parser.add_bytes(input.data)?;
        self.emit_frames(frames, sched)
    }

    fn flush(&mut self, sched: &mut ClusterScheduler) -> MuxResult<()> {
        let primed = std::mem::take(&mut self.primed_frames);
        self.emit_frames(primed, sched)?;
        let frames = self.parser.flush()?;
        self.emit_frames(frames, sched)
    }
}
