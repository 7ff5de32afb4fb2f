//! Vorbis Packetizer.
//!
//! 三个头部包逐字进入 codec private (Xiph 花边); 数据包时长由
//! 当前与上一包的块大小得出.

use taowa_codec::parsers::vorbis::{VorbisDurations, build_codec_private};
use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{AudioParams, TrackSpec};

use super::ac3::apply_common_audio_options;

/// Vorbis Packetizer
pub struct VorbisPacketizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    durations: VorbisDurations,
    elapsed_ns: i64,
}

impl VorbisPacketizer {
    /// 创建 (identification/comment/setup 三个头部包来自读取器)
    pub fn new(
        track_number: u64,
        ident: &[u8],
        comment: &[u8],
        setup: &[u8],
        opts: TrackOptions,
    ) -> MuxResult<Self> {
        let durations = VorbisDurations::new(ident, setup)?;
        let mut spec = TrackSpec::new(track_number, TrackType::Audio, CodecId::Vorbis);
        spec.audio = Some(AudioParams {
            sample_rate: f64::from(durations.ident().sample_rate),
            output_sample_rate: None,
            channels: u64::from(durations.ident().channels),
            bit_depth: None,
        });
        spec.codec_private = Some(build_codec_private(&[ident, comment, setup]).into());
        apply_common_audio_options(&mut spec, &opts);
        let sync = SyncState::new(&opts);
        Ok(Self {
            spec,
            opts,
            sync,
            durations,
            elapsed_ns: 0,
        })
    }
}

impl Packetizer for VorbisPacketizer {
    fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    fn set_headers(&mut self) -> MuxResult<Element> {
        self.spec.to_element()
    }

    fn process(
        &mut self,
        input: PacketizerInput<'_>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        let (_, duration) = self.durations.packet_duration(input.data)?;
        let duration = self.sync.scale(duration);
        let copies = self.sync.admit(duration.max(1));
        for _ in 0..copies {
            let timestamp = input
                .timestamp_ns
                .map(|ts| self.sync.scale(ts) + self.opts.sync_displacement_ns)
                .unwrap_or(self.elapsed_ns);
            let mut packet = Packet::key_frame(
                self.spec.number,
                timestamp.max(0),
                input.data.to_vec(),
            );
            // Vorbis 无默认时长, 块时长总是显式
            packet.duration_ns = Some(duration);
            packetizer::enqueue(&self.spec, sched, packet)?;
            self.elapsed_ns = timestamp.max(0) + duration;
        }
        Ok(())
    }

    fn flush(&mut self, _sched: &mut ClusterScheduler) -> MuxResult<()> {
        Ok(())
    }
}
