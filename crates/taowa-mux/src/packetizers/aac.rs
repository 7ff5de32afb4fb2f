//! AAC Packetizer.
//!
//! ADTS 输入逐帧去头, codec private 为 AudioSpecificConfig.

use taowa_codec::parsers::aac::AacParser;
use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{AudioParams, TrackSpec};

use super::ac3::{apply_common_audio_options, block_duration};

/// AAC Packetizer
pub struct AacPacketizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    parser: AacParser,
    packetno: u64,
    nominal_duration_ns: i64,
}

impl AacPacketizer {
    /// 创建 (参数来自读取器探测到的首个 ADTS 帧头)
    pub fn new(
        track_number: u64,
        sample_rate: u32,
        channels: u32,
        audio_specific_config: Vec<u8>,
        opts: TrackOptions,
    ) -> Self {
        let mut spec = TrackSpec::new(track_number, TrackType::Audio, CodecId::Aac);
        spec.audio = Some(AudioParams {
            sample_rate: f64::from(sample_rate),
            output_sample_rate: None,
            channels: u64::from(channels),
            bit_depth: None,
        });
        spec.codec_private = Some(audio_specific_config.into());
        apply_common_audio_options(&mut spec, &opts);
        let nominal = 1024i64 * 1_000_000_000 / i64::from(sample_rate);
        let sync = SyncState::new(&opts);
        Self {
            spec,
            opts,
            sync,
            parser: AacParser::new(),
            packetno: 0,
            nominal_duration_ns: nominal,
        }
    }

    fn emit_frames(
        &mut self,
        frames: Vec<taowa_codec::Frame>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        for frame in frames {
            let duration = self
                .sync
                .scale(frame.duration_ns.unwrap_or(self.nominal_duration_ns));
            let copies = self.sync.admit(duration);
            for _ in 0..copies {
                let timestamp = self.packetno as i64 * duration;
                let mut packet = Packet::key_frame(self.spec.number, timestamp, frame.data.clone());
                packet.duration_hint_ns = duration;
                packet.duration_ns = block_duration(&self.spec, &self.opts, duration);
                packetizer::enqueue(&self.spec, sched, packet)?;
                self.packetno += 1;
            }
        }
        Ok(())
    }
}

impl Packetizer for AacPacketizer {
    fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    fn set_headers(&mut self) -> MuxResult<Element> {
        self.spec.default_duration_ns = Some(self.sync.scale(self.nominal_duration_ns));
        self.spec.to_element()
    }

    fn process(
        &mut self,
        input: PacketizerInput<'_>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        let frames = self.parser.add_bytes(input.data)?;
        self.emit_frames(frames, sched)
    }

    fn flush(&mut self, sched: &mut ClusterScheduler) -> MuxResult<()> {
        let frames = self.parser.flush()?;
        self.emit_frames(frames, sched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SchedulerConfig;

    fn make_adts_frame(payload_len: usize) -> Vec<u8> {
        let frame_len = payload_len + 7;
        let mut frame = vec![0u8; frame_len];
        frame[0] = 0xFF;
        frame[1] = 0xF1;
        frame[2] = 0b01_0100_0_0;
        frame[3] = 0b10_0000_00 | ((frame_len >> 11) & 0x3) as u8;
        frame[4] = ((frame_len >> 3) & 0xFF) as u8;
        frame[5] = (((frame_len & 0x7) as u8) << 5) | 0x1F;
        frame[6] = 0xFC;
        frame
    }

    #[test]
    fn test_sync_负位移场景() {
        // 10 帧 @ 44.1kHz, --sync -46ms: 前两帧被丢弃, 余 8 帧从 0 开始
        let opts = TrackOptions {
            sync_displacement_ns: -46_000_000,
            ..TrackOptions::default()
        };
        let mut packetizer =
            AacPacketizer::new(1, 44_100, 2, vec![0x12, 0x10], opts);
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        packetizer.set_headers().unwrap();

        let mut input = Vec::new();
        for _ in 0..10 {
            input.extend_from_slice(&make_adts_frame(64));
        }
        packetizer
            .process(PacketizerInput::bytes(&input), &mut sched)
            .unwrap();
        sched.flush().unwrap();

        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].cue_entries.len(), 8);
        // 第一条从 0 开始
        assert_eq!(rendered[0].cue_entries[0].time_ns, 0);
        // 第二条一个帧时长之后
        assert_eq!(rendered[0].cue_entries[1].time_ns, 23_219_954);
    }

    #[test]
    fn test_codec_private() {
        let packetizer =
            AacPacketizer::new(1, 44_100, 2, vec![0x12, 0x10], TrackOptions::default());
        assert_eq!(
            packetizer.spec().codec_private.as_deref(),
            Some(&[0x12u8, 0x10][..])
        );
        assert_eq!(packetizer.spec().codec.matroska_id(), "A_AAC");
    }
}
