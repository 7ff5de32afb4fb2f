//! 直通 Packetizer.
//!
//! Matroska 输入重封装时使用: 保留既有的 bref/fref 语义, 支持
//! "整组同步" — 一组 B 帧不会因同步丢帧被拆散, 负位移期间持续
//! 丢弃到下一个关键帧为止.

use taowa_codec::{CodecId, Packet};
use taowa_codec::packet::NO_REFERENCE;
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::TrackSpec;

/// 直通 Packetizer
pub struct PassthroughPacketizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    /// 丢帧后等待下一个关键帧 (整组同步)
    sync_to_keyframe: bool,
    packets_processed: u64,
    bytes_processed: u64,
}

impl PassthroughPacketizer {
    /// 创建 (轨道参数由调用方从源容器完整交付)
    pub fn new(spec: TrackSpec, opts: TrackOptions) -> Self {
        let sync = SyncState::new(&opts);
        Self {
            spec,
            opts,
            sync,
            sync_to_keyframe: false,
            packets_processed: 0,
            bytes_processed: 0,
        }
    }

    /// 已处理的包数与字节数
    pub fn stats(&self) -> (u64, u64) {
        (self.packets_processed, self.bytes_processed)
    }
}

impl Packetizer for PassthroughPacketizer {
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
        self.packets_processed += 1;
        self.bytes_processed += input.data.len() as u64;

        let duration = input.duration_ns.map(|d| self.sync.scale(d));
        let key = input.key_frame.unwrap_or(true);

        // 负位移丢帧时保持整组完整: 丢到下一个关键帧为止
        if let Some(d) = duration {
            let copies = self.sync.admit(d);
            if copies == 0 {
                self.sync_to_keyframe = true;
                return Ok(());
            }
        }
        if self.sync_to_keyframe {
            if !key {
                return Ok(());
            }
            self.sync_to_keyframe = false;
        }

        let timestamp =
            (self.sync.scale(input.timestamp_ns.unwrap_or(0)) + self.opts.sync_displacement_ns)
                .max(0);
        let packet = Packet {
            data: input.data.to_vec().into(),
            timestamp_ns: timestamp,
            duration_ns: duration,
            duration_hint_ns: duration.unwrap_or(0),
            track: self.spec.number,
            key_frame: key,
            bref_ns: input.bref_ns.map_or(NO_REFERENCE, |b| {
                (self.sync.scale(b) + self.opts.sync_displacement_ns).max(0)
            }),
            fref_ns: input.fref_ns.map_or(NO_REFERENCE, |f| {
                (self.sync.scale(f) + self.opts.sync_displacement_ns).max(0)
            }),
            discardable: false,
            reference_priority: 0,
        };
        packetizer::enqueue(&self.spec, sched, packet)
    }

    fn flush(&mut self, _sched: &mut ClusterScheduler) -> MuxResult<()> {
        Ok(())
    }
}

/// 便捷构造: 按源轨道的类型与编码直通
pub fn passthrough_spec(number: u64, track_type: TrackType, codec: CodecId) -> TrackSpec {
    TrackSpec::new(number, track_type, codec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SchedulerConfig;

    #[test]
    fn test_保留引用语义() {
        let spec = passthrough_spec(1, TrackType::Video, CodecId::Hevc);
        let mut packetizer = PassthroughPacketizer::new(spec, TrackOptions::default());
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());

        packetizer
            .process(
                PacketizerInput {
                    data: &[1, 2, 3],
                    timestamp_ns: Some(0),
                    key_frame: Some(true),
                    ..PacketizerInput::default()
                },
                &mut sched,
            )
            .unwrap();
        packetizer
            .process(
                PacketizerInput {
                    data: &[4, 5],
                    timestamp_ns: Some(40_000_000),
                    key_frame: Some(false),
                    bref_ns: Some(0),
                    ..PacketizerInput::default()
                },
                &mut sched,
            )
            .unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1);
        assert_eq!(packetizer.stats().0, 2);

        let segment = taowa_ebml::registry::by_id(taowa_ebml::ids::SEGMENT).unwrap();
        let (cluster, _) =
            taowa_ebml::parse_element(&rendered[0].bytes, &vec![segment]).unwrap();
        let group = cluster.find_child(taowa_ebml::ids::BLOCK_GROUP).unwrap();
        assert_eq!(
            group
                .find_child(taowa_ebml::ids::REFERENCE_BLOCK)
                .unwrap()
                .as_sint()
                .unwrap(),
            -40
        );
    }

    #[test]
    fn test_整组同步_丢到关键帧() {
        let spec = passthrough_spec(1, TrackType::Video, CodecId::Hevc);
        let opts = TrackOptions {
            sync_displacement_ns: -40_000_000,
            ..TrackOptions::default()
        };
        let mut packetizer = PassthroughPacketizer::new(spec, opts);
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());

        // 首关键帧被位移吞掉, 之后的非关键帧也被丢弃
        for (ts, key) in [(0i64, true), (40_000_000, false), (80_000_000, false)] {
            packetizer
                .process(
                    PacketizerInput {
                        data: &[0u8; 4],
                        timestamp_ns: Some(ts),
                        duration_ns: Some(40_000_000),
                        key_frame: Some(key),
                        ..PacketizerInput::default()
                    },
                    &mut sched,
                )
                .unwrap();
        }
        // 新的关键帧重新放行
        packetizer
            .process(
                PacketizerInput {
                    data: &[0u8; 4],
                    timestamp_ns: Some(120_000_000),
                    duration_ns: Some(40_000_000),
                    key_frame: Some(true),
                    ..PacketizerInput::default()
                },
                &mut sched,
            )
            .unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered[0].cue_entries.len(), 1);
        // 位移已作用到时间戳: 120ms - 40ms
        assert_eq!(rendered[0].cue_entries[0].time_ns, 80_000_000);
    }
}
