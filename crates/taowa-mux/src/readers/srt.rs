//! SRT 字幕读取器.
//!
//! 条目形如:
//! ```text
//! 1
//! 00:00:01,500 --> 00:00:03,000
//! 字幕文本
//! (空行)
//! ```
//! 毫秒分隔符接受 ',' 与 '.'; 打开时整体解析, read 每次产出一条.

use log::warn;
use taowa_codec::CodecId;
use taowa_core::{MuxError, MuxResult};

use crate::cluster::ClusterScheduler;
use crate::io::IoContext;
use crate::packetizer::{Packetizer, TrackOptions};
use crate::packetizers::TextSubsPacketizer;

use super::{ReadStatus, Reader};

/// probe: 首个条目的序号行与时间线
pub fn probe(peek: &[u8]) -> u8 {
    let text = String::from_utf8_lossy(&peek[..peek.len().min(2048)]);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(first) = lines.next() else {
        return 0;
    };
    if first.trim().trim_start_matches('\u{feff}').parse::<u64>().is_err() {
        return 0;
    }
    match lines.next() {
        Some(second) if parse_time_line(second).is_some() => 90,
        _ => 0,
    }
}

/// 解析 "HH:MM:SS,mmm --> HH:MM:SS,mmm" 行, 返回 (开始, 结束) 纳秒
fn parse_time_line(line: &str) -> Option<(i64, i64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_srt_timestamp(start.trim())?, parse_srt_timestamp(end.trim())?))
}

fn parse_srt_timestamp(text: &str) -> Option<i64> {
    // HH:MM:SS,mmm (逗号或点)
    let normalized = text.replace(',', ".");
    let mut parts = normalized.split(':');
    let hours: i64 = parts.next()?.trim().parse().ok()?;
    let minutes: i64 = parts.next()?.trim().parse().ok()?;
    let rest = parts.next()?;
    let (seconds, millis) = match rest.split_once('.') {
        Some((s, m)) => {
            let mut millis = m.trim().to_owned();
            while millis.len() < 3 {
                millis.push('0');
            }
            (s.trim().parse::<i64>().ok()?, millis[..3].parse::<i64>().ok()?)
        }
        None => (rest.trim().parse::<i64>().ok()?, 0),
    };
    Some(((hours * 3600 + minutes * 60 + seconds) * 1000 + millis) * 1_000_000)
}

struct SrtEntry {
    start_ns: i64,
    duration_ns: i64,
    text: String,
}

/// SRT 字幕读取器
pub struct SrtReader {
    packetizer: TextSubsPacketizer,
    entries: Vec<SrtEntry>,
    next: usize,
}

impl SrtReader {
    /// 打开并整体解析
    pub fn open(path: &str, track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let mut io = IoContext::open_read(path)?;
        let raw = io.read_to_end()?;
        let text = String::from_utf8_lossy(&raw);
        let entries = parse_entries(&text, path)?;
        log::info!("SRT '{path}': {} 条字幕", entries.len());

        let packetizer = TextSubsPacketizer::new(track_number, CodecId::TextUtf8, opts);
        Ok(Self {
            packetizer,
            entries,
            next: 0,
        })
    }
}

fn parse_entries(text: &str, path: &str) -> MuxResult<Vec<SrtEntry>> {
    let mut entries = Vec::new();
    let mut lines = text.lines().enumerate().peekable();

    while let Some((line_no, line)) = lines.next() {
        let trimmed = line.trim().trim_start_matches('\u{feff}');
        if trimmed.is_empty() {
            continue;
        }
        // 序号行
        if trimmed.parse::<u64>().is_err() {
            warn!("SRT '{path}' 第 {} 行: 期望条目序号, 跳过 '{trimmed}'", line_no + 1);
            continue;
        }
        // 时间线
        let Some((_, time_line)) = lines.next() else {
            break;
        };
        let Some((start_ns, end_ns)) = parse_time_line(time_line) else {
            return Err(MuxError::malformed_at_unknown(format!(
                "SRT '{path}' 第 {} 行: 无效的时间线 '{}'",
                line_no + 2,
                time_line.trim()
            )));
        };
        if end_ns < start_ns {
            warn!(
                "SRT '{path}' 第 {} 行: 条目结束早于开始, 跳过",
                line_no + 2
            );
        }
        // 文本行直到空行
        let mut body = String::new();
        for (_, text_line) in lines.by_ref() {
            if text_line.trim().is_empty() {
                break;
            }
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(text_line);
        }
        if end_ns >= start_ns {
            entries.push(SrtEntry {
                start_ns,
                duration_ns: end_ns - start_ns,
                text: body,
            });
        }
    }
    Ok(entries)
}

impl Reader for SrtReader {
    fn format_name(&self) -> &'static str {
        "SRT"
    }

    fn packetizer(&self) -> &dyn Packetizer {
        &self.packetizer
    }

    fn packetizer_mut(&mut self) -> &mut dyn Packetizer {
        &mut self.packetizer
    }

    fn read(&mut self, sched: &mut ClusterScheduler) -> MuxResult<ReadStatus> {
        let Some(entry) = self.entries.get(self.next) else {
            self.packetizer.flush(sched)?;
            return Ok(ReadStatus::Done);
        };
        self.packetizer
            .process_entry(&entry.text, entry.start_ns, entry.duration_ns, sched)?;
        self.next += 1;
        Ok(ReadStatus::MoreData)
    }
}
