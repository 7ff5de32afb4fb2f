//! taowa - Matroska 封装命令行工具
//!
//! 从基本流与字幕文件选取轨道, 封装为单个 Matroska 文件,
//! 支持重定时、章节、标签、附件与按大小/时长分割.

mod logging;
mod options;

use clap::Parser;
use std::process;

use taowa_core::{MuxError, TrackType, random};
use taowa_ebml::Element;
use taowa_mux::attachments::{Attachment, build_attachments};
use taowa_mux::chapters::load_chapters;
use taowa_mux::cluster::{ClusterScheduler, SchedulerConfig};
use taowa_mux::readers::{ReadStatus, Reader, open_input};
use taowa_mux::segment::{SegmentOptions, SegmentWriter};
use taowa_mux::tags::{load_tags, load_track_tags, merge_tags};
use taowa_mux::{CueStrategy, IoContext};

use options::{SplitMode, TrackOptionsMap};

#[derive(Parser, Debug)]
#[command(name = "taowa", version, about = "纯 Rust Matroska 封装工具")]
struct Cli {
    /// 输入文件 (基本流或字幕, 每个文件一条轨道)
    #[arg(required = true)]
    inputs: Vec<String>,

    /// 输出文件路径
    #[arg(short, long)]
    output: String,

    /// 保留的音频轨道编号 (逗号分隔, 缺省全部)
    #[arg(long)]
    atracks: Option<String>,

    /// 保留的视频轨道编号
    #[arg(long)]
    vtracks: Option<String>,

    /// 保留的字幕轨道编号
    #[arg(long)]
    stracks: Option<String>,

    /// 轨道语言 (轨道:代码, 如 2:jpn)
    #[arg(long = "language")]
    languages: Vec<String>,

    /// 轨道名称 (轨道:名称)
    #[arg(long = "track-name")]
    track_names: Vec<String>,

    /// 默认帧时长 (轨道:值, 如 1:25fps)
    #[arg(long = "default-duration")]
    default_durations: Vec<String>,

    /// A/V 同步 (轨道:位移ms[,线性[/分母]])
    #[arg(long = "sync")]
    syncs: Vec<String>,

    /// 显示宽高比 (轨道:比值或 宽/高)
    #[arg(long = "aspect-ratio")]
    aspect_ratios: Vec<String>,

    /// 显示尺寸 (轨道:宽x高)
    #[arg(long = "display-dimensions")]
    display_dimensions: Vec<String>,

    /// NALU 长度前缀宽度 (轨道:字节数)
    #[arg(long = "nalu-size-length")]
    nalu_size_lengths: Vec<String>,

    /// 轨道压缩 (轨道:zlib|none)
    #[arg(long = "compression")]
    compressions: Vec<String>,

    /// Cue 策略 (轨道:none|iframes|all)
    #[arg(long = "cues")]
    cues: Vec<String>,

    /// 每块都写显式时长
    #[arg(long = "durations")]
    use_durations: bool,

    /// 章节文件 (XML / 简单格式 / CUE 表单)
    #[arg(long)]
    chapters: Option<String>,

    /// 章节语言 (非 XML 章节格式使用)
    #[arg(long = "chapter-language", default_value = "eng")]
    chapter_language: String,

    /// 全局标签 XML
    #[arg(long = "global-tags")]
    global_tags: Option<String>,

    /// 轨道标签 (轨道:XML文件)
    #[arg(long = "track-tags")]
    track_tags: Vec<String>,

    /// 附件文件
    #[arg(long = "attach-file")]
    attach_files: Vec<String>,

    /// 附件 MIME 类型 (按 --attach-file 顺序)
    #[arg(long = "attachment-mime-type")]
    attachment_mime_types: Vec<String>,

    /// 附件描述 (按 --attach-file 顺序)
    #[arg(long = "attachment-description")]
    attachment_descriptions: Vec<String>,

    /// 输出标题
    #[arg(long)]
    title: Option<String>,

    /// 分割 (size:N[K|M|G] 或 duration:时长)
    #[arg(long)]
    split: Option<String>,

    /// 分割的各分段相互链接 (PrevUID/NextUID)
    #[arg(long)]
    link: bool,

    /// 指定 SegmentUID (32 位十六进制)
    #[arg(long = "segment-uid")]
    segment_uid: Option<String>,

    /// 单个轨道出错时继续处理其它轨道
    #[arg(long = "keep-going")]
    keep_going: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    logging::init("taowa", cli.verbose);

    match run(&cli) {
        Ok(()) => {
            let warnings = logging::warning_count();
            if warnings > 0 {
                eprintln!("完成, 有 {warnings} 条警告.");
                process::exit(1);
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("错误: {e}");
            process::exit(2);
        }
    }
}

fn run(cli: &Cli) -> Result<(), MuxError> {
    eprintln!(
        "taowa 版本 {} -- 纯 Rust Matroska 封装工具",
        env!("CARGO_PKG_VERSION")
    );

    // 轨道选项收集
    let mut track_opts = collect_track_options(cli)?;
    if cli.use_durations {
        for track in 1..=cli.inputs.len() as u64 {
            track_opts.entry(track).use_durations = true;
        }
    }
    let split_mode = cli.split.as_deref().map(options::parse_split).transpose()?;

    // 打开输入, 轨道编号按输入顺序从 1 起
    let keep_audio = parse_selection(cli.atracks.as_deref())?;
    let keep_video = parse_selection(cli.vtracks.as_deref())?;
    let keep_subs = parse_selection(cli.stracks.as_deref())?;

    let mut readers: Vec<Box<dyn Reader>> = Vec::new();
    let mut next_track = 1u64;
    for input in &cli.inputs {
        let opts = track_opts.get(next_track);
        match open_input(input, next_track, opts) {
            Ok(reader) => {
                readers.push(reader);
                next_track += 1;
            }
            Err(e) if cli.keep_going => {
                log::warn!("跳过输入 '{input}': {e}");
            }
            Err(e) => return Err(e),
        }
    }
    if readers.is_empty() {
        return Err(MuxError::InvalidArgument("没有可用的输入轨道".into()));
    }

    // 轨道选择
    readers.retain(|reader| {
        let spec = reader_spec(reader.as_ref());
        let keep = match spec.1 {
            TrackType::Audio => selected(&keep_audio, spec.0),
            TrackType::Video => selected(&keep_video, spec.0),
            TrackType::Subtitles => selected(&keep_subs, spec.0),
            _ => true,
        };
        if !keep {
            eprintln!("  轨道 {}: 按选择排除", spec.0);
        }
        keep
    });
    if readers.is_empty() {
        return Err(MuxError::InvalidArgument("全部轨道都被排除了".into()));
    }

    // 定型轨道头
    let mut track_entries = Vec::new();
    for reader in &mut readers {
        let entry = reader.packetizer_mut().set_headers()?;
        let spec = reader_spec(reader.as_ref());
        eprintln!(
            "  轨道 {}: {} ({}, {})",
            spec.0,
            reader.format_name(),
            spec.1,
            spec.2,
        );
        track_entries.push(entry);
    }

    // 调度器与 Cue 策略
    let mut sched = ClusterScheduler::new(SchedulerConfig::default());
    let has_video = readers
        .iter()
        .any(|r| reader_spec(r.as_ref()).1 == TrackType::Video);
    for reader in &readers {
        let (number, track_type, _) = reader_spec(reader.as_ref());
        let strategy = track_opts.cues(number).unwrap_or(match track_type {
            TrackType::Video => CueStrategy::IFrames,
            TrackType::Audio if !has_video => CueStrategy::IFrames,
            _ => CueStrategy::None,
        });
        sched.set_cue_strategy(number, strategy);
    }

    // 章节 / 标签 / 附件
    let chapters = cli
        .chapters
        .as_deref()
        .map(|path| load_chapters(path, &cli.chapter_language))
        .transpose()?;
    let mut tags: Option<Element> = cli.global_tags.as_deref().map(load_tags).transpose()?;
    for (track, path) in track_opts.track_tags().clone() {
        let uid = readers
            .iter()
            .find(|r| reader_spec(r.as_ref()).0 == track)
            .map(|r| spec_of(r.as_ref()).uid)
            .ok_or_else(|| {
                MuxError::InvalidArgument(format!("--track-tags 指向不存在的轨道 {track}"))
            })?;
        let track_tag = load_track_tags(&path, uid)?;
        tags = Some(match tags.take() {
            Some(base) => merge_tags(base, track_tag),
            None => track_tag,
        });
    }
    let attachments = if cli.attach_files.is_empty() {
        None
    } else {
        let list: Vec<Attachment> = cli
            .attach_files
            .iter()
            .enumerate()
            .map(|(i, path)| Attachment {
                path: path.clone(),
                mime_type: cli.attachment_mime_types.get(i).cloned(),
                description: cli.attachment_descriptions.get(i).cloned(),
            })
            .collect();
        Some(build_attachments(&list)?)
    };

    // 输出文件 (分割时轮换)
    let segment_uid = cli
        .segment_uid
        .as_deref()
        .map(options::parse_segment_uid)
        .transpose()?;
    let mut output = OutputFile::create(
        cli,
        &track_entries,
        chapters.clone(),
        attachments.clone(),
        tags.clone(),
        segment_uid,
        None,
        0,
    )?;
    let mut file_index = 0u32;
    let mut split_base_ns: i64 = 0;

    eprintln!("输出: {}", output.path);

    // 主循环: 轮流拉取各读取器, 协作式调度
    let mut active: Vec<bool> = vec![true; readers.len()];
    while active.iter().any(|&a| a) {
        for (i, reader) in readers.iter_mut().enumerate() {
            if !active[i] {
                continue;
            }
            if sched.is_full() {
                // 背压: 先落盘在途的簇
                break;
            }
            match reader.read(&mut sched) {
                Ok(ReadStatus::MoreData) => {}
                Ok(ReadStatus::Done) => active[i] = false,
                Err(e) if cli.keep_going => {
                    log::warn!("轨道 {} 读取失败, 已放弃: {e}", reader_spec(reader.as_ref()).0);
                    active[i] = false;
                }
                Err(e) => return Err(e),
            }
        }

        for rendered in sched.take_rendered() {
            // 分割判定: 在簇边界检查阈值
            if let Some(mode) = split_mode {
                let should_split = match mode {
                    SplitMode::Size(limit) => output.bytes_written >= limit,
                    SplitMode::Duration(limit) => {
                        rendered.timestamp_ns - split_base_ns >= limit
                    }
                };
                if should_split {
                    file_index += 1;
                    split_base_ns = rendered.timestamp_ns;
                    let next_uid = random::random_bytes(16);
                    let prev_uid = output.writer.segment_uid().to_vec();
                    if cli.link {
                        output.writer.set_next_uid(next_uid.clone())?;
                    }
                    output.finish()?;
                    output = OutputFile::create(
                        cli,
                        &track_entries,
                        None,
                        attachments.clone(),
                        tags.clone(),
                        if cli.link { Some(next_uid) } else { None },
                        if cli.link { Some(prev_uid) } else { None },
                        file_index,
                    )?;
                    eprintln!("分割: 继续写入 {}", output.path);
                }
            }
            output.write_cluster(rendered)?;
        }
    }

    // 收尾: 排空 Packetizer 与调度器
    for reader in &mut readers {
        reader.packetizer_mut().flush(&mut sched)?;
    }
    sched.flush()?;
    for rendered in sched.take_rendered() {
        output.write_cluster(rendered)?;
    }
    output.writer.clear_next_uid();
    output.finish()?;

    eprintln!("封装完成.");
    Ok(())
}

struct OutputFile {
    writer: SegmentWriter,
    path: String,
    bytes_written: u64,
    finished: bool,
}

impl OutputFile {
    #[allow(clippy::too_many_arguments)]
    fn create(
        cli: &Cli,
        track_entries: &[Element],
        chapters: Option<Element>,
        attachments: Option<Element>,
        tags: Option<Element>,
        segment_uid: Option<Vec<u8>>,
        prev_uid: Option<Vec<u8>>,
        file_index: u32,
    ) -> Result<Self, MuxError> {
        let path = if cli.split.is_some() {
            split_file_name(&cli.output, file_index + 1)
        } else {
            cli.output.clone()
        };
        let io = IoContext::open_write(&path)?;
        let opts = SegmentOptions {
            title: cli.title.clone(),
            segment_uid,
            prev_uid,
            link: cli.link,
            ..SegmentOptions::default()
        };
        let mut writer = SegmentWriter::new(io, opts);
        writer.write_prologue(track_entries.to_vec(), chapters, attachments, tags)?;
        Ok(Self {
            writer,
            path,
            bytes_written: 0,
            finished: false,
        })
    }

    fn write_cluster(
        &mut self,
        rendered: taowa_mux::cluster::RenderedCluster,
    ) -> Result<(), MuxError> {
        self.bytes_written += rendered.bytes.len() as u64;
        self.writer.write_cluster(rendered)
    }

    fn finish(&mut self) -> Result<(), MuxError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // SegmentWriter::finalize 按值消费, 以占位换出
        let io = IoContext::new(Box::new(taowa_mux::io::MemoryBackend::new()));
        let placeholder = SegmentWriter::new(io, SegmentOptions::default());
        let writer = std::mem::replace(&mut self.writer, placeholder);
        writer.finalize()
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish();
        }
    }
}

/// 分割输出文件名: out.mkv → out-001.mkv
fn split_file_name(base: &str, index: u32) -> String {
    match base.rsplit_once('.') {
        Some((stem, extension)) => format!("{stem}-{index:03}.{extension}"),
        None => format!("{base}-{index:03}"),
    }
}

fn parse_selection(value: Option<&str>) -> Result<Option<Vec<u64>>, MuxError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let mut out = Vec::new();
    for part in value.split(',') {
        let n: u64 = part.trim().parse().map_err(|_| {
            MuxError::InvalidArgument(format!("轨道选择列表无效: '{value}'"))
        })?;
        out.push(n);
    }
    Ok(Some(out))
}

fn selected(list: &Option<Vec<u64>>, track: u64) -> bool {
    list.as_ref().is_none_or(|l| l.contains(&track))
}

fn spec_of(reader: &dyn Reader) -> &taowa_mux::TrackSpec {
    reader.packetizer().spec()
}

fn reader_spec(reader: &dyn Reader) -> (u64, TrackType, String) {
    let spec = spec_of(reader);
    (spec.number, spec.track_type, spec.codec.to_string())
}

fn collect_track_options(cli: &Cli) -> Result<TrackOptionsMap, MuxError> {
    let mut map = TrackOptionsMap::default();
    for value in &cli.languages {
        let (track, rest) = options::split_track_option(value, "--language")?;
        map.entry(track).language = Some(rest);
    }
    for value in &cli.track_names {
        let (track, rest) = options::split_track_option(value, "--track-name")?;
        map.entry(track).track_name = Some(rest);
    }
    for value in &cli.default_durations {
        let (track, rest) = options::split_track_option(value, "--default-duration")?;
        map.entry(track).default_duration_ns = Some(options::parse_default_duration(&rest)?);
    }
    for value in &cli.syncs {
        let (track, rest) = options::split_track_option(value, "--sync")?;
        let (displacement, linear) = options::parse_sync(&rest)?;
        let opts = map.entry(track);
        opts.sync_displacement_ns = displacement;
        opts.sync_linear = linear;
    }
    for value in &cli.aspect_ratios {
        let (track, rest) = options::split_track_option(value, "--aspect-ratio")?;
        map.entry(track).aspect_ratio = Some(options::parse_aspect_ratio(&rest)?);
    }
    for value in &cli.display_dimensions {
        let (track, rest) = options::split_track_option(value, "--display-dimensions")?;
        map.entry(track).display_dimensions =
            Some(options::parse_display_dimensions(&rest)?);
    }
    for value in &cli.nalu_size_lengths {
        let (track, rest) = options::split_track_option(value, "--nalu-size-length")?;
        let width: usize = rest.parse().map_err(|_| {
            MuxError::InvalidArgument(format!("--nalu-size-length 的取值无效: '{rest}'"))
        })?;
        map.entry(track).nalu_size_length = Some(width);
    }
    for value in &cli.compressions {
        let (track, rest) = options::split_track_option(value, "--compression")?;
        map.entry(track).compression = Some(options::parse_compression(&rest)?);
    }
    for value in &cli.cues {
        let (track, rest) = options::split_track_option(value, "--cues")?;
        map.set_cues(track, options::parse_cue_strategy(&rest)?);
    }
    for value in &cli.track_tags {
        let (track, rest) = options::split_track_option(value, "--track-tags")?;
        map.set_track_tags(track, rest);
    }
    Ok(map)
}
