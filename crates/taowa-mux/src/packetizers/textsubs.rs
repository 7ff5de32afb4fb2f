//! 文本字幕 Packetizer.
//!
//! 行尾统一为 \r\n, 剥除尾部空行; SRT 式格式在文本前预置时长
//! 字段. 条目按同步位移裁剪: 结束早于 0 的丢弃, 跨 0 的钳到 0.

use taowa_codec::{CodecId, Packet};
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::TrackSpec;

/// 文本字幕 Packetizer
pub struct TextSubsPacketizer {
    spec: TrackSpec,
    sync: SyncState,
    /// SRT 式格式预置时长字段
    prepend_duration: bool,
}

impl TextSubsPacketizer {
    /// 创建
    pub fn new(track_number: u64, codec: CodecId, opts: TrackOptions) -> Self {
        let mut spec = TrackSpec::new(track_number, TrackType::Subtitles, codec);
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
        let prepend_duration = codec == CodecId::TextUtf8;
        let sync = SyncState::new(&opts);
        Self {
            spec,
            sync,
            prepend_duration,
        }
    }

    /// 处理一条字幕条目
    pub fn process_entry(
        &mut self,
        text: &str,
        start_ns: i64,
        duration_ns: i64,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        // 线性系数先缩放, 再裁剪
        let start = self.sync.scale(start_ns);
        let duration = self.sync.scale(duration_ns);
        let Some((start, duration)) = self.sync.clip_subtitle(start, duration) else {
            return Ok(());
        };

        let normalized = normalize_line_endings(text);
        let payload = if self.prepend_duration {
            // 预置时长字段 (毫秒十进制)
            format!("{}\r\n{}", duration / 1_000_000, normalized)
        } else {
            normalized
        };

        let mut packet = Packet::key_frame(self.spec.number, start, payload.into_bytes());
        // 字幕块总是携带显式时长
        packet.duration_ns = Some(duration);
        packetizer::enqueue(&self.spec, sched, packet)
    }
}

/// 行尾统一为 \r\n 并剥除尾部空行
fn normalize_line_endings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\r' => {}
            '\n' => out.push_str("\r\n"),
            other => out.push(other),
        }
    }
    while out.ends_with('\n') || out.ends_with('\r') {
        out.pop();
    }
    out
}

impl Packetizer for TextSubsPacketizer {
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
        let text = std::str::from_utf8(input.data).map_err(|_| {
            taowa_core::MuxError::malformed_at_unknown("字幕文本不是合法 UTF-8")
        })?;
        self.process_entry(
            text,
            input.timestamp_ns.unwrap_or(0),
            input.duration_ns.unwrap_or(0),
            sched,
        )
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
    fn test_行尾规整() {
        assert_eq!(normalize_line_endings("a\nb\n"), "a\r\nb");
        assert_eq!(normalize_line_endings("a\r\nb\r\n\r\n"), "a\r\nb");
        assert_eq!(normalize_line_endings("abc"), "abc");
    }

    #[test]
    fn test_预置时长字段() {
        let mut packetizer =
            TextSubsPacketizer::new(1, CodecId::TextUtf8, TrackOptions::default());
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        packetizer
            .process_entry("Hello\nWorld", 1_000_000_000, 2_500_000_000, &mut sched)
            .unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1);
        // 负载以 "2500\r\n" 开头
        let bytes = &rendered[0].bytes;
        let pos = bytes
            .windows(6)
            .position(|w| w == b"2500\r\n")
            .expect("时长字段在负载内");
        assert_eq!(&bytes[pos + 6..pos + 6 + 12], b"Hello\r\nWorld");
    }

    #[test]
    fn test_条目裁剪() {
        let opts = TrackOptions {
            sync_displacement_ns: -3_000_000_000,
            ..TrackOptions::default()
        };
        let mut packetizer = TextSubsPacketizer::new(1, CodecId::TextUtf8, opts);
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        // 完全在 0 之前: 丢弃
        packetizer
            .process_entry("gone", 0, 2_000_000_000, &mut sched)
            .unwrap();
        // 跨 0: 钳到 0
        packetizer
            .process_entry("clipped", 2_000_000_000, 2_000_000_000, &mut sched)
            .unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].cue_entries.len(), 1);
        assert_eq!(rendered[0].cue_entries[0].time_ns, 0);
    }
}
