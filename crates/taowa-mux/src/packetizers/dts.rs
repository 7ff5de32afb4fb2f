//! DTS Packetizer.
//!
//! 帧时长随帧头变化 (终止帧扣除亏空), 时间戳按累计时长推进.
//! 14-bit 形式的重打包在读取器一侧完成.

use log::warn;
use taowa_codec::parsers::dts::DtsParser;
use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{AudioParams, TrackSpec};

use super::ac3::{apply_common_audio_options, block_duration};

/// DTS Packetizer
pub struct DtsPacketizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    parser: DtsParser,
    /// 已输出内容的累计时长 (帧长可变, 不能按帧号乘)
    elapsed_ns: i64,
}

impl DtsPacketizer {
    /// 创建 (参数来自读取器探测到的首个核心帧头)
    pub fn new(
        track_number: u64,
        sample_rate: u32,
        channels: u32,
        bit_depth: u32,
        opts: TrackOptions,
    ) -> Self {
        let mut spec = TrackSpec::new(track_number, TrackType::Audio, CodecId::Dts);
        spec.audio = Some(AudioParams {
            sample_rate: f64::from(sample_rate),
            output_sample_rate: None,
            channels: u64::from(channels),
            bit_depth: Some(u64::from(bit_depth)),
        });
        apply_common_audio_options(&mut spec, &opts);
        let sync = SyncState::new(&opts);
        Self {
            spec,
            opts,
            sync,
            parser: DtsParser::new(),
            elapsed_ns: 0,
        }
    }

    fn emit_frames(
        &mut self,
        frames: Vec<taowa_codec::Frame>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        for frame in frames {
            if frame.params_changed {
                warn!("DTS: 帧头参数发生变化 (声道/采样率/LFE/时长)");
            }
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

impl Packetizer for DtsPacketizer {
    fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    fn set_headers(&mut self) -> MuxResult<Element> {
        // 帧长可变, 默认时长在首帧后由解析器头部给出; 此处若已知则写
        if let Some(header) = self.parser.header() {
            self.spec.default_duration_ns = Some(self.sync.scale(header.duration_ns()));
        }
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
