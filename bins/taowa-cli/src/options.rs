//! 命令行选项的二级解析.
//!
//! 形如 `TRACK:值` 的轨道选项在这里拆开; TRACK 为输出轨道编号
//! (按输入文件顺序从 1 起). `--sync`/`--split`/`--default-duration`
//! 的取值语法各有小语法, 逐一解析.

use std::collections::HashMap;

use taowa_core::{MuxError, MuxResult};
use taowa_mux::CueStrategy;
use taowa_mux::compression::Compression;
use taowa_mux::packetizer::TrackOptions;

/// 拆开 `TRACK:rest`
pub fn split_track_option(value: &str, option: &str) -> MuxResult<(u64, String)> {
    let (track, rest) = value.split_once(':').ok_or_else(|| {
        MuxError::InvalidArgument(format!("{option} 需要 '轨道:值' 形式, 实为 '{value}'"))
    })?;
    let track: u64 = track.parse().map_err(|_| {
        MuxError::InvalidArgument(format!("{option} 的轨道编号无效: '{track}'"))
    })?;
    Ok((track, rest.to_owned()))
}

/// `--sync TRACK:D[,L[/F]]`: 位移 D 毫秒, 线性系数 L/F
pub fn parse_sync(rest: &str) -> MuxResult<(i64, f64)> {
    let (displacement, linear) = match rest.split_once(',') {
        Some((d, l)) => (d, Some(l)),
        None => (rest, None),
    };
    let displacement_ms: i64 = displacement.trim().parse().map_err(|_| {
        MuxError::InvalidArgument(format!("--sync 的位移无效: '{displacement}'"))
    })?;
    let linear = match linear {
        None => 1.0,
        Some(l) => match l.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.trim().parse().map_err(|_| {
                    MuxError::InvalidArgument(format!("--sync 的线性系数无效: '{l}'"))
                })?;
                let den: f64 = den.trim().parse().map_err(|_| {
                    MuxError::InvalidArgument(format!("--sync 的线性系数无效: '{l}'"))
                })?;
                num / den
            }
            None => l.trim().parse().map_err(|_| {
                MuxError::InvalidArgument(format!("--sync 的线性系数无效: '{l}'"))
            })?,
        },
    };
    if linear <= 0.0 {
        return Err(MuxError::InvalidArgument(format!(
            "--sync 的线性系数必须为正: {linear}"
        )));
    }
    Ok((displacement_ms * 1_000_000, linear))
}

/// `--default-duration TRACK:N[s|ms|us|ns|fps|i|p]`
pub fn parse_default_duration(rest: &str) -> MuxResult<i64> {
    let rest = rest.trim();
    let split = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let (number, unit) = rest.split_at(split);
    let value: f64 = number.parse().map_err(|_| {
        MuxError::InvalidArgument(format!("--default-duration 的数值无效: '{rest}'"))
    })?;
    let ns = match unit {
        "fps" => 1_000_000_000.0 / value,
        // i = 每秒场数 (隔行), p = 每秒帧数
        "i" => 2_000_000_000.0 / value,
        "p" => 1_000_000_000.0 / value,
        "s" => value * 1_000_000_000.0,
        "ms" => value * 1_000_000.0,
        "us" => value * 1_000.0,
        "ns" | "" => value,
        other => {
            return Err(MuxError::InvalidArgument(format!(
                "--default-duration 的单位无效: '{other}'"
            )));
        }
    };
    if ns <= 0.0 {
        return Err(MuxError::InvalidArgument(
            "--default-duration 必须为正".into(),
        ));
    }
    Ok(ns as i64)
}

/// `--cues TRACK:none|iframes|all`
pub fn parse_cue_strategy(rest: &str) -> MuxResult<CueStrategy> {
    match rest {
        "none" => Ok(CueStrategy::None),
        "iframes" => Ok(CueStrategy::IFrames),
        "all" => Ok(CueStrategy::All),
        other => Err(MuxError::InvalidArgument(format!(
            "--cues 的取值无效: '{other}' (应为 none/iframes/all)"
        ))),
    }
}

/// `--display-dimensions TRACK:WxH`
pub fn parse_display_dimensions(rest: &str) -> MuxResult<(u64, u64)> {
    let (w, h) = rest.split_once('x').ok_or_else(|| {
        MuxError::InvalidArgument(format!(
            "--display-dimensions 需要 '宽x高' 形式, 实为 '{rest}'"
        ))
    })?;
    let width = w.parse().map_err(|_| {
        MuxError::InvalidArgument(format!("--display-dimensions 的宽度无效: '{w}'"))
    })?;
    let height = h.parse().map_err(|_| {
        MuxError::InvalidArgument(format!("--display-dimensions 的高度无效: '{h}'"))
    })?;
    Ok((width, height))
}

/// `--aspect-ratio TRACK:R` 或 `TRACK:W/H`
pub fn parse_aspect_ratio(rest: &str) -> MuxResult<f64> {
    let value = match rest.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| {
                MuxError::InvalidArgument(format!("--aspect-ratio 无效: '{rest}'"))
            })?;
            let den: f64 = den.trim().parse().map_err(|_| {
                MuxError::InvalidArgument(format!("--aspect-ratio 无效: '{rest}'"))
            })?;
            num / den
        }
        None => rest.trim().parse().map_err(|_| {
            MuxError::InvalidArgument(format!("--aspect-ratio 无效: '{rest}'"))
        })?,
    };
    if value <= 0.0 {
        return Err(MuxError::InvalidArgument("--aspect-ratio 必须为正".into()));
    }
    Ok(value)
}

/// 分割模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// 按数据量 (字节)
    Size(u64),
    /// 按时长 (纳秒)
    Duration(i64),
}

/// `--split size:N[K|M|G] | duration:HH:MM:SS | parts:... | chapters:...`
pub fn parse_split(value: &str) -> MuxResult<SplitMode> {
    let (mode, rest) = value.split_once(':').ok_or_else(|| {
        MuxError::InvalidArgument(format!("--split 需要 '模式:值' 形式, 实为 '{value}'"))
    })?;
    match mode {
        "size" => {
            let rest = rest.trim();
            let (number, factor) = match rest.as_bytes().last() {
                Some(b'K' | b'k') => (&rest[..rest.len() - 1], 1024u64),
                Some(b'M' | b'm') => (&rest[..rest.len() - 1], 1024 * 1024),
                Some(b'G' | b'g') => (&rest[..rest.len() - 1], 1024 * 1024 * 1024),
                _ => (rest, 1),
            };
            let value: u64 = number.trim().parse().map_err(|_| {
                MuxError::InvalidArgument(format!("--split size 的数值无效: '{rest}'"))
            })?;
            Ok(SplitMode::Size(value * factor))
        }
        "duration" => {
            let ns = taowa_core::timestamp::parse_timestamp(rest)
                .or_else(|_| {
                    rest.trim()
                        .strip_suffix('s')
                        .unwrap_or(rest.trim())
                        .parse::<f64>()
                        .map(|seconds| (seconds * 1_000_000_000.0) as i64)
                        .map_err(|_| {
                            MuxError::InvalidArgument(format!(
                                "--split duration 的取值无效: '{rest}'"
                            ))
                        })
                })?;
            Ok(SplitMode::Duration(ns))
        }
        "parts" | "chapters" => Err(MuxError::UnsupportedParameter(format!(
            "--split {mode}: 此模式尚不支持"
        ))),
        other => Err(MuxError::InvalidArgument(format!(
            "--split 的模式无效: '{other}'"
        ))),
    }
}

/// 解析 `--segment-uid` 的十六进制 UID
pub fn parse_segment_uid(value: &str) -> MuxResult<Vec<u8>> {
    let digits: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect::<String>()
        .replace("0x", "")
        .replace("0X", "");
    if digits.len() != 32 || digits.chars().any(|c| !c.is_ascii_hexdigit()) {
        return Err(MuxError::InvalidArgument(format!(
            "--segment-uid 需要 32 位十六进制 (16 字节), 实为 '{value}'"
        )));
    }
    Ok(digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            u8::from_str_radix(std::str::from_utf8(pair).expect("纯 ASCII"), 16)
                .expect("已验证为十六进制")
        })
        .collect())
}

/// 所有轨道选项的汇总表
#[derive(Debug, Default)]
pub struct TrackOptionsMap {
    map: HashMap<u64, TrackOptions>,
    cues: HashMap<u64, CueStrategy>,
    track_tags: HashMap<u64, String>,
}

impl TrackOptionsMap {
    /// 取某轨道的可变选项 (无则建默认)
    pub fn entry(&mut self, track: u64) -> &mut TrackOptions {
        self.map.entry(track).or_default()
    }

    /// 取某轨道的选项 (无则默认)
    pub fn get(&self, track: u64) -> TrackOptions {
        self.map.get(&track).cloned().unwrap_or_default()
    }

    /// 记录 Cue 策略
    pub fn set_cues(&mut self, track: u64, strategy: CueStrategy) {
        self.cues.insert(track, strategy);
    }

    /// Cue 策略
    pub fn cues(&self, track: u64) -> Option<CueStrategy> {
        self.cues.get(&track).copied()
    }

    /// 记录轨道标签文件
    pub fn set_track_tags(&mut self, track: u64, path: String) {
        self.track_tags.insert(track, path);
    }

    /// 全部轨道标签文件
    pub fn track_tags(&self) -> &HashMap<u64, String> {
        &self.track_tags
    }
}

/// 解析 `--compression TRACK:zlib|none` 的值部分
pub fn parse_compression(rest: &str) -> MuxResult<Option<Compression>> {
    Compression::from_option(rest).ok_or_else(|| {
        MuxError::InvalidArgument(format!(
            "--compression 的取值无效: '{rest}' (应为 zlib/none)"
        ))
    })
}
