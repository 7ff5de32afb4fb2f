//! VobBtn (DVD 按钮) Packetizer.
//!
//! 每条按钮数据在偏移 0x0D/0x11 处携带 VOBU 起止扇区号,
//! 条目时长由扇区差按 90kHz 时钟换算; 默认开启 zlib 压缩.

use byteorder::{BigEndian, ByteOrder};
use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxError, MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::compression::Compression;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{TrackSpec, VideoParams};

/// VobBtn Packetizer
pub struct VobBtnPacketizer {
    spec: TrackSpec,
    sync: SyncState,
    previous_timestamp: i64,
}

impl VobBtnPacketizer {
    /// 创建 (按钮面尺寸来自上游)
    pub fn new(track_number: u64, width: u64, height: u64, opts: TrackOptions) -> Self {
        let mut spec = TrackSpec::new(track_number, TrackType::Buttons, CodecId::VobBtn);
        spec.video = Some(VideoParams {
            pixel_width: width,
            pixel_height: height,
            display_width: None,
            display_height: None,
            interlaced: false,
        });
        // 默认 zlib, 用户可显式关闭
        spec.compression = match opts.compression {
            Some(value) => value,
            None => Some(Compression::Zlib),
        };
        if let Some(language) = &opts.language {
            spec.language = language.clone();
        }
        let sync = SyncState::new(&opts);
        Self {
            spec,
            sync,
            previous_timestamp: 0,
        }
    }
}

impl Packetizer for VobBtnPacketizer {
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
        if input.data.len() < 0x11 + 4 {
            return Err(MuxError::malformed_at_unknown("VobBtn: 条目太短"));
        }
        let vobu_start = BigEndian::read_u32(&input.data[0x0D..]);
        let vobu_end = BigEndian::read_u32(&input.data[0x11..]);
        // 扇区差按 90kHz 时钟换算为纳秒
        let duration =
            (100_000.0 * f64::from(vobu_end.wrapping_sub(vobu_start)) / 9.0) as i64;
        let duration = self.sync.scale(duration);

        let timestamp = match input.timestamp_ns {
            Some(ts) => self.sync.scale(ts),
            None => {
                let ts = self.previous_timestamp;
                self.previous_timestamp += duration;
                ts
            }
        };

        let mut packet = Packet::key_frame(self.spec.number, timestamp, input.data.to_vec());
        // 条目时长总是显式写出
        packet.duration_ns = Some(duration);
        packetizer::enqueue(&self.spec, sched, packet)
    }

    fn flush(&mut self, _sched: &mut ClusterScheduler) -> MuxResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SchedulerConfig;

    #[test]
    fn test_vobu_时长换算() {
        let mut packetizer = VobBtnPacketizer::new(1, 720, 480, TrackOptions::default());
        assert_eq!(packetizer.spec().compression, Some(Compression::Zlib));

        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        let mut entry = vec![0u8; 0x20];
        BigEndian::write_u32(&mut entry[0x0D..], 90);
        BigEndian::write_u32(&mut entry[0x11..], 180);
        packetizer
            .process(PacketizerInput::bytes(&entry), &mut sched)
            .unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1);
        // (180-90) * 100000 / 9 = 1ms
        let segment = taowa_ebml::registry::by_id(taowa_ebml::ids::SEGMENT).unwrap();
        let (cluster, _) =
            taowa_ebml::parse_element(&rendered[0].bytes, &vec![segment]).unwrap();
        let group = cluster.find_child(taowa_ebml::ids::BLOCK_GROUP).unwrap();
        assert_eq!(
            group
                .find_child(taowa_ebml::ids::BLOCK_DURATION)
                .unwrap()
                .as_uint()
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_条目太短报错() {
        let mut packetizer = VobBtnPacketizer::new(1, 720, 480, TrackOptions::default());
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        assert!(
            packetizer
                .process(PacketizerInput::bytes(&[0u8; 8]), &mut sched)
                .is_err()
        );
    }
}
