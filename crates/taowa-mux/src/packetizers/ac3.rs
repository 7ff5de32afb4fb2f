//! AC-3 / E-AC-3 Packetizer.
//!
//! 按帧头切分输入字节流, 逐帧按采样数推算时间戳.
//! 同步位移通过丢帧/重复首帧实现.

use log::warn;
use taowa_codec::parsers::ac3::Ac3Parser;
use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{AudioParams, TrackSpec};

/// AC-3 Packetizer
pub struct Ac3Packetizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    parser: Ac3Parser,
    packetno: u64,
    nominal_duration_ns: i64,
}

impl Ac3Packetizer {
    /// 创建 (采样率与声道来自读取器的探测)
    pub fn new(
        track_number: u64,
        sample_rate: u32,
        channels: u32,
        eac3: bool,
        opts: TrackOptions,
    ) -> Self {
        let codec = if eac3 { CodecId::Eac3 } else { CodecId::Ac3 };
        let mut spec = TrackSpec::new(track_number, TrackType::Audio, codec);
        spec.audio = Some(AudioParams {
            sample_rate: f64::from(sample_rate),
            output_sample_rate: None,
            channels: u64::from(channels),
            bit_depth: None,
        });
        apply_common_audio_options(&mut spec, &opts);
        let nominal = 1536i64 * 1_000_000_000 / i64::from(sample_rate);
        let sync = SyncState::new(&opts);
        Self {
            spec,
            opts,
            sync,
            parser: Ac3Parser::new(),
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
            if frame.params_changed {
                warn!("AC-3: 帧头参数发生变化");
            }
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

impl Packetizer for Ac3Packetizer {
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

/// 语言/名称/标志等用户调整项落到轨道参数上
pub(crate) fn apply_common_audio_options(spec: &mut TrackSpec, opts: &TrackOptions) {
    if let Some(language) = &opts.language {
        spec.language = language.clone();
    }
    if let Some(name) = &opts.track_name {
        spec.name = Some(name.clone());
    }
    if let Some(flag) = opts.flag_default {
        spec.flag_default = flag;
    }
    if let Some(flag) = opts.flag_forced {
        spec.flag_forced = flag;
    }
    if let Some(compression) = opts.compression {
        spec.compression = compression;
    }
}

/// 块时长策略: use_durations 时总是写; 否则仅在与默认时长不同时写
pub(crate) fn block_duration(
    spec: &TrackSpec,
    opts: &TrackOptions,
    duration_ns: i64,
) -> Option<i64> {
    if opts.use_durations || spec.default_duration_ns != Some(duration_ns) {
        Some(duration_ns)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SchedulerConfig;

    fn make_ac3_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 768];
        frame[0] = 0x0B;
        frame[1] = 0x77;
        frame[4] = 20;
        frame[5] = 8 << 3;
        frame[6] = 0b0100_0000;
        frame
    }

    #[test]
    fn test_ac3_直通_100_帧单簇() {
        let mut packetizer = Ac3Packetizer::new(1, 48_000, 2, false, TrackOptions::default());
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());

        let entry = packetizer.set_headers().unwrap();
        assert_eq!(
            entry
                .find_child(taowa_ebml::ids::CODEC_ID)
                .unwrap()
                .as_str()
                .unwrap(),
            "A_AC3"
        );
        assert_eq!(
            entry
                .find_child(taowa_ebml::ids::DEFAULT_DURATION)
                .unwrap()
                .as_uint()
                .unwrap(),
            32_000_000
        );

        let mut input = Vec::new();
        for _ in 0..100 {
            input.extend_from_slice(&make_ac3_frame());
        }
        packetizer
            .process(PacketizerInput::bytes(&input), &mut sched)
            .unwrap();
        packetizer.flush(&mut sched).unwrap();
        sched.flush().unwrap();

        let rendered = sched.take_rendered();
        // 100 帧 * 32ms = 3.2s, 单簇
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].timestamp_ns, 0);
        // 全部为 SimpleBlock (无引用无显式时长)
        let segment = taowa_ebml::registry::by_id(taowa_ebml::ids::SEGMENT).unwrap();
        let (cluster, _) =
            taowa_ebml::parse_element(&rendered[0].bytes, &vec![segment]).unwrap();
        let blocks = cluster
            .children()
            .iter()
            .filter(|c| c.id() == taowa_ebml::ids::SIMPLE_BLOCK)
            .count();
        assert_eq!(blocks, 100);
    }

    #[test]
    fn test_负同步丢帧() {
        let opts = TrackOptions {
            sync_displacement_ns: -64_000_000,
            ..TrackOptions::default()
        };
        let mut packetizer = Ac3Packetizer::new(1, 48_000, 2, false, opts);
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        packetizer.set_headers().unwrap();

        let mut input = Vec::new();
        for _ in 0..5 {
            input.extend_from_slice(&make_ac3_frame());
        }
        packetizer
            .process(PacketizerInput::bytes(&input), &mut sched)
            .unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        // -64ms = 2 帧被丢弃, 余 3 帧
        assert_eq!(rendered[0].cue_entries.len(), 3);
    }
}
