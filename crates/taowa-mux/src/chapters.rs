//! 章节加载.
//!
//! 三种来源按内容探测自动识别:
//! - XML (`<Chapters>` 文档, 经模式引导的转换器)
//! - 简单文本格式 (`CHAPTER01=00:00:00.000` / `CHAPTER01NAME=...`)
//! - CUE 表单 (`PERFORMER`/`TITLE`/`FILE`/`TRACK`/`INDEX 01`,
//!   每个 TRACK 一个章节原子, 名称按 "演出者 - 标题" 合成)

use std::path::Path;

use log::info;
use taowa_core::timestamp::NS_PER_SECOND;
use taowa_core::{MuxError, MuxResult, random};
use taowa_ebml::{Element, XmlFlavor, ids, parse_xml};

/// 从文件加载章节, 按内容自动识别格式
pub fn load_chapters(path: &str, language: &str) -> MuxResult<Element> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);

    if probe_simple(&text) {
        info!("章节文件 '{path}': 简单格式");
        return parse_simple(&text, language);
    }
    if probe_cue(&text) {
        info!("章节文件 '{path}': CUE 表单");
        return parse_cue(&text, language);
    }
    info!("章节文件 '{path}': XML");
    parse_xml(
        XmlFlavor::Chapters,
        &text,
        Path::new(path).parent(),
    )
}

// ============================================================
// 简单格式
// ============================================================

/// 首个非空行为 CHAPTERxx=..., 其后跟 CHAPTERxxNAME=...
pub fn probe_simple(text: &str) -> bool {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    let Some(first) = lines.next() else {
        return false;
    };
    is_chapter_line(first) && lines.next().is_some_and(is_chapter_name_line)
}

fn is_chapter_line(line: &str) -> bool {
    line.len() > 10
        && line.starts_with("CHAPTER")
        && line.as_bytes()[7].is_ascii_digit()
        && line.as_bytes()[8].is_ascii_digit()
        && line.as_bytes()[9] == b'='
}

fn is_chapter_name_line(line: &str) -> bool {
    line.len() > 14
        && line.starts_with("CHAPTER")
        && line.as_bytes()[7].is_ascii_digit()
        && line.as_bytes()[8].is_ascii_digit()
        && line[9..].starts_with("NAME=")
}

fn parse_simple(text: &str, language: &str) -> MuxResult<Element> {
    let mut chapters = Vec::new();
    let mut start: Option<i64> = None;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }
        if is_chapter_name_line(line) {
            let Some(start_ns) = start.take() else {
                return Err(MuxError::malformed_at_unknown(format!(
                    "第 {} 行: CHAPTERxxNAME 之前没有对应的 CHAPTERxx 行",
                    line_no + 1
                )));
            };
            let name = &line[14..];
            chapters.push((start_ns, name.to_owned()));
        } else if is_chapter_line(line) {
            if start.is_some() {
                return Err(MuxError::malformed_at_unknown(format!(
                    "第 {} 行: 连续两个 CHAPTERxx 行", line_no + 1
                )));
            }
            let ts = taowa_core::timestamp::parse_timestamp(&line[10..])?;
            start = Some(ts);
        } else {
            return Err(MuxError::malformed_at_unknown(format!(
                "第 {} 行: '{line}' 不是 CHAPTERxx=... 行",
                line_no + 1
            )));
        }
    }

    build_single_edition(chapters, language)
}

// ============================================================
// CUE 表单
// ============================================================

/// 首行为 PERFORMER/TITLE/FILE/CATALOG/REM
pub fn probe_cue(text: &str) -> bool {
    let Some(first) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return false;
    };
    let lowered = first.to_lowercase();
    ["performer ", "title ", "file ", "catalog ", "rem "]
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

fn parse_cue(text: &str, language: &str) -> MuxResult<Element> {
    let mut global_performer = String::new();
    let mut track_performer = String::new();
    let mut track_title = String::new();
    let mut in_track = false;
    let mut pending: Option<(i64, String)> = None;
    let mut chapters: Vec<(i64, String)> = Vec::new();

    let finish_track =
        |pending: &mut Option<(i64, String)>, chapters: &mut Vec<(i64, String)>| {
            if let Some(entry) = pending.take() {
                chapters.push(entry);
            }
        };

    for (line_no, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.to_lowercase().starts_with("rem") {
            continue;
        }
        let lowered = line.to_lowercase();
        if let Some(rest) = strip_keyword(line, "performer") {
            let value = unquote(rest);
            if in_track {
                track_performer = value;
            } else {
                global_performer = value;
            }
        } else if let Some(rest) = strip_keyword(line, "title") {
            if in_track {
                track_title = unquote(rest);
            }
        } else if lowered.starts_with("track ") {
            finish_track(&mut pending, &mut chapters);
            in_track = true;
            track_performer = global_performer.clone();
            track_title.clear();
        } else if let Some(rest) = strip_keyword(line, "index") {
            let mut parts = rest.split_whitespace();
            let number: u32 = parts
                .next()
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| cue_error(line_no, line))?;
            let time = parts.next().ok_or_else(|| cue_error(line_no, line))?;
            // 只取 INDEX 01 (实际曲目起点)
            if number == 1 {
                let start_ns = parse_cue_index_time(time)
                    .ok_or_else(|| cue_error(line_no, line))?;
                let name = if track_performer.is_empty() {
                    track_title.clone()
                } else if track_title.is_empty() {
                    track_performer.clone()
                } else {
                    format!("{track_performer} - {track_title}")
                };
                pending = Some((start_ns, name));
            }
        }
        // FILE/CATALOG/FLAGS 等行忽略
    }
    finish_track(&mut pending, &mut chapters);

    if chapters.is_empty() {
        return Err(MuxError::malformed_at_unknown(
            "CUE 表单中没有任何 TRACK 的 INDEX 01 条目",
        ));
    }
    build_single_edition(chapters, language)
}

fn cue_error(line_no: usize, line: &str) -> MuxError {
    MuxError::malformed_at_unknown(format!(
        "CUE 表单第 {} 行: 无效的 INDEX 条目 '{line}'",
        line_no + 1
    ))
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let lowered = line.to_lowercase();
    if lowered.starts_with(keyword)
        && line.len() > keyword.len()
        && line.as_bytes()[keyword.len()] == b' '
    {
        Some(line[keyword.len() + 1..].trim())
    } else {
        None
    }
}

fn unquote(text: &str) -> String {
    text.trim().trim_matches('"').to_owned()
}

/// CUE 的 INDEX 时间: MM:SS:FF (FF = 帧, 每秒 75 帧)
fn parse_cue_index_time(text: &str) -> Option<i64> {
    let mut parts = text.split(':');
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    let frames: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || seconds >= 60 || frames >= 75 {
        return None;
    }
    Some((minutes * 60 + seconds) * NS_PER_SECOND + frames * NS_PER_SECOND / 75)
}

// ============================================================
// 构造章节树
// ============================================================

fn build_single_edition(entries: Vec<(i64, String)>, language: &str) -> MuxResult<Element> {
    let mut root = Element::new(ids::CHAPTERS)?;
    let mut edition = Element::new(ids::EDITION_ENTRY)?;
    edition
        .get_child(ids::EDITION_UID)
        .set_uint(random::random_u64())?;

    for (start_ns, name) in entries {
        let mut atom = Element::new(ids::CHAPTER_ATOM)?;
        atom.get_child(ids::CHAPTER_UID)
            .set_uint(random::random_u64())?;
        atom.get_child(ids::CHAPTER_TIME_START)
            .set_uint(start_ns as u64)?;
        if !name.is_empty() {
            let display = atom.get_child(ids::CHAPTER_DISPLAY);
            display.get_child(ids::CHAPTER_STRING).set_str(&name)?;
            display.get_child(ids::CHAPTER_LANGUAGE).set_str(language)?;
        }
        edition.push(atom);
    }
    root.push(edition);
    root.fix_mandatory();
    Ok(root)
}
