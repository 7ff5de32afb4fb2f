//! VC-1 Packetizer.
//!
//! codec private 为 BITMAPINFOHEADER (biCompression = "WVC1") 加
//! 一个零字节与原始序列头/entrypoint. 不含序列头的 P 帧以前一帧
//! 时间戳为后向引用; I 帧为关键帧.

use bytes::Bytes;
use taowa_codec::parsers::vc1::{Vc1EsParser, Vc1Frame};
use taowa_codec::{CodecId, Packet};
use taowa_codec::packet::NO_REFERENCE;
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{TrackSpec, VideoParams};

/// VC-1 Packetizer
pub struct Vc1Packetizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    parser: Vc1EsParser,
    /// 读取器预喂期间切出的帧
    primed_frames: Vec<Vc1Frame>,
    previous_timestamp: Option<i64>,
}

impl Vc1Packetizer {
    /// 创建
    pub fn new(track_number: u64, opts: TrackOptions) -> Self {
        let spec = TrackSpec::new(track_number, TrackType::Video, CodecId::Vc1);
        let mut parser = Vc1EsParser::new();
        if let Some(dd) = opts.default_duration_ns {
            parser.force_default_duration(dd);
        }
        let sync = SyncState::new(&opts);
        Self {
            spec,
            opts,
            sync,
            parser,
            primed_frames: Vec::new(),
            previous_timestamp: None,
        }
    }

    /// 读取器在 set_headers 之前预喂数据 (探测序列头)
    pub fn prime(&mut self, data: &[u8]) -> MuxResult<()> {
        let frames = self.parser.add_bytes(data)?;
        self.primed_frames.extend(frames);
        Ok(())
    }

    /// 序列头是否就绪
    pub fn headers_ready(&self) -> bool {
        self.parser.seqhdr().is_some()
    }

    fn finalize_headers(&mut self) -> MuxResult<()> {
        let seqhdr = *self.parser.seqhdr().ok_or_else(|| {
            taowa_core::MuxError::malformed_at_unknown("VC-1: 没有可用的序列头")
        })?;

        // BITMAPINFOHEADER + 零字节 + 原始序列头与 entrypoint
        let mut raw_headers = Vec::new();
        if let Some(raw) = self.parser.raw_seqhdr() {
            raw_headers.extend_from_slice(raw);
        }
        if let Some(raw) = self.parser.raw_entrypoint() {
            raw_headers.extend_from_slice(raw);
        }
        let priv_size = 40 + if raw_headers.is_empty() { 0 } else { raw_headers.len() + 1 };
        let mut bih = vec![0u8; 40];
        bih[0..4].copy_from_slice(&(priv_size as u32).to_le_bytes());
        bih[4..8].copy_from_slice(&seqhdr.pixel_width.to_le_bytes());
        bih[8..12].copy_from_slice(&seqhdr.pixel_height.to_le_bytes());
        bih[12..14].copy_from_slice(&1u16.to_le_bytes()); // planes
        bih[14..16].copy_from_slice(&24u16.to_le_bytes()); // bit count
        bih[16..20].copy_from_slice(b"WVC1");
        bih[20..24]
            .copy_from_slice(&(seqhdr.pixel_width * seqhdr.pixel_height * 3).to_le_bytes());
        bih[24..28].copy_from_slice(&1u32.to_le_bytes()); // x pels per meter
        bih[28..32].copy_from_slice(&1u32.to_le_bytes()); // y pels per meter
        let mut private = bih;
        if !raw_headers.is_empty() {
            private.push(0);
            private.extend_from_slice(&raw_headers);
        }
        self.spec.codec_private = Some(Bytes::from(private));

        let (display_width, display_height) = match self.opts.display_dimensions {
            Some(dims) => dims,
            None => (
                u64::from(seqhdr.display_width.unwrap_or(seqhdr.pixel_width)),
                u64::from(seqhdr.display_height.unwrap_or(seqhdr.pixel_height)),
            ),
        };
        self.spec.video = Some(VideoParams {
            pixel_width: u64::from(seqhdr.pixel_width),
            pixel_height: u64::from(seqhdr.pixel_height),
            display_width: Some(display_width),
            display_height: Some(display_height),
            interlaced: seqhdr.interlace,
        });
        self.spec.default_duration_ns = Some(
            self.opts
                .default_duration_ns
                .unwrap_or_else(|| self.parser.default_duration()),
        );
        if let Some(language) = &self.opts.language {
            self.spec.language = language.clone();
        }
        Ok(())
    }

    fn emit_frames(
        &mut self,
        frames: Vec<Vc1Frame>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        for frame in frames {
            let timestamp =
                self.sync.scale(frame.timestamp_ns) + self.opts.sync_displacement_ns;
            if timestamp < 0 {
                continue;
            }
            let key = frame.key_frame();
            // 不含序列头的 P/B 帧引用前一帧
            let bref = if !key && !frame.contains_sequence_header {
                self.previous_timestamp.unwrap_or(NO_REFERENCE)
            } else {
                NO_REFERENCE
            };
            let packet = Packet {
                data: frame.data,
                timestamp_ns: timestamp,
                duration_ns: if self.opts.use_durations {
                    Some(self.sync.scale(frame.duration_ns))
                } else {
                    None
                },
                duration_hint_ns: self.sync.scale(frame.duration_ns),
                track: self.spec.number,
                key_frame: key,
                bref_ns: bref,
                fref_ns: NO_REFERENCE,
                discardable: false,
                reference_priority: 0,
            };
            packetizer::enqueue(&self.spec, sched, packet)?;
            self.previous_timestamp = Some(timestamp);
        }
        Ok(())
    }
}

impl Packetizer for Vc1Packetizer {
    fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    fn set_headers(&mut self) -> MuxResult<Element> {
        self.finalize_headers()?;
        self.spec.to_element()
    }

    fn process(
        &mut self,
        input: PacketizerInput<'_>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        if let Some(ts) = input.timestamp_ns {
            self.parser.add_timestamp(ts);
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::SchedulerConfig;

    // 与解析器测试相同的最小序列头/帧构造
    fn seqhdr_packet() -> Vec<u8> {
        let mut bits: Vec<bool> = Vec::new();
        let push = |value: u64, width: u32, bits: &mut Vec<bool>| {
            for i in (0..width).rev() {
                bits.push((value >> i) & 1 != 0);
            }
        };
        push(3, 2, &mut bits);
        push(2, 3, &mut bits);
        push(1, 2, &mut bits);
        push(0, 9, &mut bits);
        push((1280 >> 1) - 1, 12, &mut bits);
        push((720 >> 1) - 1, 12, &mut bits);
        push(0, 6, &mut bits);
        push(0, 1, &mut bits); // display_info 关
        push(0, 1, &mut bits); // hrd
        let mut out = vec![0x00, 0x00, 0x01, 0x0F];
        let mut acc = 0u8;
        let mut n = 0;
        for b in bits {
            acc = (acc << 1) | u8::from(b);
            n += 1;
            if n == 8 {
                out.push(acc);
                acc = 0;
                n = 0;
            }
        }
        if n > 0 {
            out.push(acc << (8 - n));
        }
        out
    }

    fn frame_packet(first_byte: u8) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x01, 0x0D, first_byte];
        out.extend_from_slice(&[0x22; 16]);
        out
    }

    #[test]
    fn test_p_帧引用前一帧() {
        let mut packetizer = Vc1Packetizer::new(1, TrackOptions::default());
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());

        let mut stream = seqhdr_packet();
        stream.extend_from_slice(&frame_packet(0b1100_0000)); // I
        stream.extend_from_slice(&frame_packet(0b0000_0000)); // P
        packetizer
            .process(PacketizerInput::bytes(&stream), &mut sched)
            .unwrap();
        let entry = packetizer.set_headers().unwrap();
        assert_eq!(
            entry
                .find_child(taowa_ebml::ids::CODEC_ID)
                .unwrap()
                .as_str()
                .unwrap(),
            "V_MS/VFW/FOURCC"
        );
        let private = packetizer.spec().codec_private.clone().unwrap();
        assert_eq!(&private[16..20], b"WVC1");

        packetizer.flush(&mut sched).unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1);

        let segment = taowa_ebml::registry::by_id(taowa_ebml::ids::SEGMENT).unwrap();
        let (cluster, _) =
            taowa_ebml::parse_element(&rendered[0].bytes, &vec![segment]).unwrap();
        // I 帧为 SimpleBlock, P 帧为带 ReferenceBlock 的 BlockGroup
        assert!(cluster.find_child(taowa_ebml::ids::SIMPLE_BLOCK).is_some());
        let group = cluster.find_child(taowa_ebml::ids::BLOCK_GROUP).unwrap();
        assert!(group.find_child(taowa_ebml::ids::REFERENCE_BLOCK).is_some());
    }
}
