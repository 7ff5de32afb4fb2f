//! Packetizer 契约与公共机制.
//!
//! 每个 Packetizer 将一种编码格式适配到 Matroska 轨道模型:
//! 在首个 Cluster 之前通过 `set_headers` 定型 TrackEntry,
//! 随后 `process` 吞入读取器交来的数据并向调度器入队带时间戳的
//! 数据包, `flush` 在收尾时排空缓冲的尾帧.
//!
//! A/V 同步修正在这里统一实现: 累计位移加到每个出站时间戳上,
//! 线性系数缩放时长. 正位移以重复首帧实现, 负位移以丢帧实现;
//! 字幕轨道按条目裁剪 (结束早于 0 的丢弃, 跨 0 的钳到 0).

use taowa_codec::Packet;
use taowa_core::MuxResult;
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::compression::Compression;
use crate::track::TrackSpec;

/// 用户对一条轨道的调整项 (命令行来源)
#[derive(Debug, Clone)]
pub struct TrackOptions {
    /// 同步位移 (纳秒, `--sync` 的 D)
    pub sync_displacement_ns: i64,
    /// 线性缩放系数 (`--sync` 的 L/F)
    pub sync_linear: f64,
    /// 是否为每个块写显式时长
    pub use_durations: bool,
    /// 用户指定的默认帧时长
    pub default_duration_ns: Option<i64>,
    /// 语言
    pub language: Option<String>,
    /// 轨道名称
    pub track_name: Option<String>,
    /// 默认轨道标志
    pub flag_default: Option<bool>,
    /// 强制显示标志
    pub flag_forced: Option<bool>,
    /// NALU 长度前缀宽度
    pub nalu_size_length: Option<usize>,
    /// 压缩设置 (None = 按格式缺省)
    pub compression: Option<Option<Compression>>,
    /// 显示尺寸 (`--display-dimensions`)
    pub display_dimensions: Option<(u64, u64)>,
    /// 宽高比 (`--aspect-ratio`, 与显示尺寸二选一)
    pub aspect_ratio: Option<f64>,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            sync_displacement_ns: 0,
            sync_linear: 1.0,
            use_durations: false,
            default_duration_ns: None,
            language: None,
            track_name: None,
            flag_default: None,
            flag_forced: None,
            nalu_size_length: None,
            compression: None,
            display_dimensions: None,
            aspect_ratio: None,
        }
    }
}

/// 轨道拼接检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectCheck {
    /// 可以拼接
    Ok,
    /// 格式不同
    WrongFormat(String),
    /// 参数不同 (采样率、尺寸等)
    WrongParameters(String),
    /// codec private 不同, 也许可由解析器调和
    MaybeCodecPrivate(String),
}

/// 读取器交给 Packetizer 的一份数据
#[derive(Debug, Default)]
pub struct PacketizerInput<'a> {
    /// 原始字节 (基本流) 或一帧数据 (成帧来源)
    pub data: &'a [u8],
    /// 上游时间戳 (纳秒)
    pub timestamp_ns: Option<i64>,
    /// 上游时长 (纳秒)
    pub duration_ns: Option<i64>,
    /// 上游关键帧标志
    pub key_frame: Option<bool>,
    /// 上游后向引用
    pub bref_ns: Option<i64>,
    /// 上游前向引用
    pub fref_ns: Option<i64>,
}

impl<'a> PacketizerInput<'a> {
    /// 只携带字节的输入
    pub fn bytes(data: &'a [u8]) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

/// Packetizer trait
pub trait Packetizer {
    /// 输出轨道参数
    fn spec(&self) -> &TrackSpec;

    /// 定型轨道头并渲染 TrackEntry (首个 Cluster 之前调用一次)
    fn set_headers(&mut self) -> MuxResult<Element>;

    /// 处理一份输入数据
    fn process(
        &mut self,
        input: PacketizerInput<'_>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()>;

    /// 排空缓冲的尾帧
    fn flush(&mut self, sched: &mut ClusterScheduler) -> MuxResult<()>;

    /// 能否与另一条轨道拼接 (输入文件链接时)
    fn can_connect_to(&self, other: &TrackSpec) -> ConnectCheck {
        check_connection(self.spec(), other)
    }
}

/// 按默认规则比较两条轨道: 格式、音频/视频参数、codec private
pub fn check_connection(a: &TrackSpec, b: &TrackSpec) -> ConnectCheck {
    if a.codec != b.codec {
        return ConnectCheck::WrongFormat(format!("{} 对 {}", a.codec, b.codec));
    }
    if let (Some(audio_a), Some(audio_b)) = (&a.audio, &b.audio) {
        if audio_a.sample_rate != audio_b.sample_rate {
            return ConnectCheck::WrongParameters("采样率不同".into());
        }
        if audio_a.channels != audio_b.channels {
            return ConnectCheck::WrongParameters("声道数不同".into());
        }
        if audio_a.bit_depth != audio_b.bit_depth {
            return ConnectCheck::WrongParameters("位深不同".into());
        }
    }
    if let (Some(video_a), Some(video_b)) = (&a.video, &b.video) {
        if video_a.pixel_width != video_b.pixel_width
            || video_a.pixel_height != video_b.pixel_height
        {
            return ConnectCheck::WrongParameters("图像尺寸不同".into());
        }
        if video_a.display_width != video_b.display_width
            || video_a.display_height != video_b.display_height
        {
            return ConnectCheck::WrongParameters("显示尺寸不同".into());
        }
    }
    if a.codec_private != b.codec_private {
        return ConnectCheck::MaybeCodecPrivate("codec private 数据不一致".into());
    }
    ConnectCheck::Ok
}

/// 同步位移状态机
///
/// 负位移: 丢弃帧并把位移朝 0 累加, 越过 -时长/2 即归零.
/// 正位移: 重复首帧, 把位移朝 0 递减, 低于 时长/2 即归零.
#[derive(Debug)]
pub struct SyncState {
    displacement_ns: i64,
    linear: f64,
}

impl SyncState {
    /// 由轨道调整项构造
    pub fn new(opts: &TrackOptions) -> Self {
        Self {
            displacement_ns: opts.sync_displacement_ns,
            linear: opts.sync_linear,
        }
    }

    /// 线性系数
    pub fn linear(&self) -> f64 {
        self.linear
    }

    /// 按线性系数缩放时长
    pub fn scale(&self, ns: i64) -> i64 {
        (ns as f64 * self.linear) as i64
    }

    /// 一帧应输出的次数: 0 = 丢弃, 1 = 正常, >1 = 重复
    pub fn admit(&mut self, duration_ns: i64) -> u32 {
        if duration_ns <= 0 {
            return 1;
        }
        if self.displacement_ns < 0 {
            self.displacement_ns += duration_ns;
            if self.displacement_ns > -duration_ns / 2 {
                self.displacement_ns = 0;
            }
            return 0;
        }
        if self.displacement_ns > 0 {
            let mut copies = 1u32;
            while self.displacement_ns > 0 {
                copies += 1;
                self.displacement_ns -= duration_ns;
                if self.displacement_ns < duration_ns / 2 {
                    self.displacement_ns = 0;
                }
            }
            return copies;
        }
        1
    }

    /// 字幕条目裁剪: 返回调整后的 (开始, 时长), 整条在 0 之前则 None
    pub fn clip_subtitle(&mut self, start_ns: i64, duration_ns: i64) -> Option<(i64, i64)> {
        let start = start_ns + self.displacement_ns;
        let end = start + duration_ns;
        if end <= 0 {
            return None;
        }
        if start < 0 {
            return Some((0, end));
        }
        Some((start, duration_ns))
    }
}

/// 压缩后入队 (所有 Packetizer 的统一出口)
pub fn enqueue(
    spec: &TrackSpec,
    sched: &mut ClusterScheduler,
    mut packet: Packet,
) -> MuxResult<()> {
    if let Some(compression) = spec.compression {
        packet.data = compression.compress(&packet.data)?.into();
    }
    sched.add_packet(packet)
}
