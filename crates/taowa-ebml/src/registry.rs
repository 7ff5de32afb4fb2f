//! 静态元素注册表.
//!
//! 每个已知元素一条描述符: 保留标记位的 ID、调试名、值类型、默认值、
//! 是否在父元素内唯一、是否必需, 以及 (master 元素) 允许的子元素 ID 表.
//! 注册表构成一个以 Segment 描述符为根的 DAG; 环仅经由全局元素
//! (Void, Crc32) 出现 — 它们在任何上下文中都合法.
//!
//! 注册表不执行业务规则; mandatory/unique 标志是供 master 树和
//! XML 转换器消费的元数据. 按 ID 查找未知元素时返回合成的
//! "dummy binary" 描述符, 读取方据此跳过未知元素而不中止.

/// 元素值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 无符号整数
    UInt,
    /// 有符号整数
    SInt,
    /// 浮点数
    Float,
    /// 8 位 ASCII 字符串
    String,
    /// UTF-8 字符串
    Utf8,
    /// 日期 (2001-01-01 纪元纳秒)
    Date,
    /// 原始字节
    Binary,
    /// 容器元素
    Master,
}

/// 描述符声明的默认值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    /// 无默认值
    None,
    /// 无符号整数默认值
    UInt(u64),
    /// 浮点默认值
    Float(f64),
    /// 字符串默认值
    Str(&'static str),
}

/// 元素描述符
#[derive(Debug)]
pub struct Descriptor {
    /// 保留标记位的元素 ID
    pub id: u32,
    /// 调试名 (同时是 XML 标签名)
    pub name: &'static str,
    /// 值类型
    pub kind: ElementKind,
    /// 默认值 (缺省时可省略渲染)
    pub default: DefaultValue,
    /// 在父元素内是否必需
    pub mandatory: bool,
    /// 在父元素内是否唯一
    pub unique: bool,
    /// 最小渲染宽度 (0 = 最小编码; 浮点 4 表示单精度)
    pub default_size: usize,
    /// 取值范围 (整数按值, binary 按字节长度), XML 转换器校验
    pub bounds: Option<(i64, i64)>,
    /// 允许的子元素 ID 表 (按规范顺序, 决定 sort 结果)
    pub children: &'static [u32],
}

impl Descriptor {
    const fn new(id: u32, name: &'static str, kind: ElementKind) -> Self {
        Self {
            id,
            name,
            kind,
            default: DefaultValue::None,
            mandatory: false,
            unique: true,
            default_size: 0,
            bounds: None,
            children: &[],
        }
    }

    const fn master(id: u32, name: &'static str, children: &'static [u32]) -> Self {
        let mut d = Self::new(id, name, ElementKind::Master);
        d.children = children;
        d
    }

    const fn uint(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::UInt)
    }

    const fn sint(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::SInt)
    }

    const fn float(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::Float)
    }

    const fn string(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::String)
    }

    const fn utf8(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::Utf8)
    }

    const fn date(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::Date)
    }

    const fn binary(id: u32, name: &'static str) -> Self {
        Self::new(id, name, ElementKind::Binary)
    }

    const fn def_uint(mut self, v: u64) -> Self {
        self.default = DefaultValue::UInt(v);
        self
    }

    const fn def_float(mut self, v: f64) -> Self {
        self.default = DefaultValue::Float(v);
        self
    }

    const fn def_str(mut self, v: &'static str) -> Self {
        self.default = DefaultValue::Str(v);
        self
    }

    const fn mand(mut self) -> Self {
        self.mandatory = true;
        self
    }

    const fn multi(mut self) -> Self {
        self.unique = false;
        self
    }

    const fn range(mut self, lo: i64, hi: i64) -> Self {
        self.bounds = Some((lo, hi));
        self
    }

    /// 此上下文是否允许指定 ID 的子元素 (不含全局元素)
    pub fn allows_child(&self, id: u32) -> bool {
        self.children.contains(&id)
    }

    /// 子元素 ID 在规范顺序中的位置 (sort 的键)
    pub fn child_order(&self, id: u32) -> usize {
        self.children
            .iter()
            .position(|&c| c == id)
            .unwrap_or(usize::MAX)
    }
}

/// 已知的 Matroska 元素 ID (保留前导标记位)
pub mod ids {
    // EBML 头部
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    // 全局元素
    pub const VOID: u32 = 0xEC;
    pub const CRC32: u32 = 0xBF;

    // Segment
    pub const SEGMENT: u32 = 0x1853_8067;

    // SeekHead
    pub const SEEK_HEAD: u32 = 0x114D_9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;

    // Info
    pub const INFO: u32 = 0x1549_A966;
    pub const SEGMENT_UID: u32 = 0x73A4;
    pub const SEGMENT_FILENAME: u32 = 0x7384;
    pub const PREV_UID: u32 = 0x3CB9_23;
    pub const PREV_FILENAME: u32 = 0x3C83_AB;
    pub const NEXT_UID: u32 = 0x3EB9_23;
    pub const NEXT_FILENAME: u32 = 0x3E83_BB;
    pub const SEGMENT_FAMILY: u32 = 0x4444;
    pub const TIMECODE_SCALE: u32 = 0x2AD7_B1;
    pub const DURATION: u32 = 0x4489;
    pub const DATE_UTC: u32 = 0x4461;
    pub const TITLE: u32 = 0x7BA9;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    // Tracks
    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const FLAG_ENABLED: u32 = 0xB9;
    pub const FLAG_DEFAULT: u32 = 0x88;
    pub const FLAG_FORCED: u32 = 0x55AA;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const MIN_CACHE: u32 = 0x6DE7;
    pub const MAX_CACHE: u32 = 0x6DF8;
    pub const DEFAULT_DURATION: u32 = 0x23E3_83;
    pub const MAX_BLOCK_ADDITION_ID: u32 = 0x55EE;
    pub const TRACK_NAME: u32 = 0x536E;
    pub const LANGUAGE: u32 = 0x22B5_9C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const CODEC_NAME: u32 = 0x2586_88;
    pub const CODEC_DELAY: u32 = 0x56AA;
    pub const SEEK_PRE_ROLL: u32 = 0x56BB;

    // 视频参数
    pub const VIDEO: u32 = 0xE0;
    pub const FLAG_INTERLACED: u32 = 0x9A;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const PIXEL_CROP_BOTTOM: u32 = 0x54AA;
    pub const PIXEL_CROP_TOP: u32 = 0x54BB;
    pub const PIXEL_CROP_LEFT: u32 = 0x54CC;
    pub const PIXEL_CROP_RIGHT: u32 = 0x54DD;
    pub const DISPLAY_WIDTH: u32 = 0x54B0;
    pub const DISPLAY_HEIGHT: u32 = 0x54BA;
    pub const DISPLAY_UNIT: u32 = 0x54B2;
    pub const ASPECT_RATIO_TYPE: u32 = 0x54B3;
    pub const COLOUR_SPACE: u32 = 0x2EB5_24;

    // 音频参数
    pub const AUDIO: u32 = 0xE1;
    pub const SAMPLING_FREQUENCY: u32 = 0xB5;
    pub const OUTPUT_SAMPLING_FREQUENCY: u32 = 0x78B5;
    pub const CHANNELS: u32 = 0x9F;
    pub const BIT_DEPTH: u32 = 0x6264;

    // 内容编码 (压缩)
    pub const CONTENT_ENCODINGS: u32 = 0x6D80;
    pub const CONTENT_ENCODING: u32 = 0x6240;
    pub const CONTENT_ENCODING_ORDER: u32 = 0x5031;
    pub const CONTENT_ENCODING_SCOPE: u32 = 0x5032;
    pub const CONTENT_ENCODING_TYPE: u32 = 0x5033;
    pub const CONTENT_COMPRESSION: u32 = 0x5034;
    pub const CONTENT_COMP_ALGO: u32 = 0x4254;
    pub const CONTENT_COMP_SETTINGS: u32 = 0x4255;

    // Cluster
    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const CLUSTER_TIMECODE: u32 = 0xE7;
    pub const CLUSTER_POSITION: u32 = 0xA7;
    pub const CLUSTER_PREV_SIZE: u32 = 0xAB;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_ADDITIONS: u32 = 0x75A1;
    pub const BLOCK_MORE: u32 = 0xA6;
    pub const BLOCK_ADD_ID: u32 = 0xEE;
    pub const BLOCK_ADDITIONAL: u32 = 0xA5;
    pub const BLOCK_DURATION: u32 = 0x9B;
    pub const REFERENCE_PRIORITY: u32 = 0xFA;
    pub const REFERENCE_BLOCK: u32 = 0xFB;
    pub const CODEC_STATE: u32 = 0xA4;
    pub const DISCARD_PADDING: u32 = 0x75A2;

    // Cues
    pub const CUES: u32 = 0x1C53_BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
    pub const CUE_RELATIVE_POSITION: u32 = 0xF0;
    pub const CUE_BLOCK_NUMBER: u32 = 0x5378;

    // Chapters
    pub const CHAPTERS: u32 = 0x1043_A770;
    pub const EDITION_ENTRY: u32 = 0x45B9;
    pub const EDITION_UID: u32 = 0x45BC;
    pub const EDITION_FLAG_HIDDEN: u32 = 0x45BD;
    pub const EDITION_FLAG_DEFAULT: u32 = 0x45DB;
    pub const EDITION_FLAG_ORDERED: u32 = 0x45DD;
    pub const CHAPTER_ATOM: u32 = 0xB6;
    pub const CHAPTER_UID: u32 = 0x73C4;
    pub const CHAPTER_TIME_START: u32 = 0x91;
    pub const CHAPTER_TIME_END: u32 = 0x92;
    pub const CHAPTER_FLAG_HIDDEN: u32 = 0x98;
    pub const CHAPTER_FLAG_ENABLED: u32 = 0x4598;
    pub const CHAPTER_SEGMENT_UID: u32 = 0x6E67;
    pub const CHAPTER_SEGMENT_EDITION_UID: u32 = 0x6EBC;
    pub const CHAPTER_PHYSICAL_EQUIV: u32 = 0x63C3;
    pub const CHAPTER_TRACK: u32 = 0x8F;
    pub const CHAPTER_TRACK_NUMBER: u32 = 0x89;
    pub const CHAPTER_DISPLAY: u32 = 0x80;
    pub const CHAPTER_STRING: u32 = 0x85;
    pub const CHAPTER_LANGUAGE: u32 = 0x437C;
    pub const CHAPTER_COUNTRY: u32 = 0x437E;

    // Tags (XML 标签名与 mkv 规范调试名不同, 注册表用 XML 名)
    pub const TAGS: u32 = 0x1254_C367;
    pub const TAG: u32 = 0x7373;
    pub const TAG_TARGETS: u32 = 0x63C0;
    pub const TARGET_TYPE_VALUE: u32 = 0x68CA;
    pub const TARGET_TYPE: u32 = 0x63CA;
    pub const TAG_TRACK_UID: u32 = 0x63C5;
    pub const TAG_EDITION_UID: u32 = 0x63C9;
    pub const TAG_CHAPTER_UID: u32 = 0x63C4;
    pub const TAG_ATTACHMENT_UID: u32 = 0x63C6;
    pub const TAG_SIMPLE: u32 = 0x67C8;
    pub const TAG_NAME: u32 = 0x45A3;
    pub const TAG_LANGUAGE: u32 = 0x447A;
    pub const TAG_DEFAULT: u32 = 0x4484;
    pub const TAG_STRING: u32 = 0x4487;
    pub const TAG_BINARY: u32 = 0x4485;

    // Attachments
    pub const ATTACHMENTS: u32 = 0x1941_A469;
    pub const ATTACHED_FILE: u32 = 0x61A7;
    pub const FILE_DESCRIPTION: u32 = 0x467E;
    pub const FILE_NAME: u32 = 0x466E;
    pub const FILE_MIME_TYPE: u32 = 0x4660;
    pub const FILE_DATA: u32 = 0x465C;
    pub const FILE_UID: u32 = 0x46AE;
}

use ids::*;

/// 全部已知元素的描述符表
pub static DESCRIPTORS: &[Descriptor] = &[
    // EBML 头部
    Descriptor::master(EBML, "EBML", &[
        EBML_VERSION, EBML_READ_VERSION, EBML_MAX_ID_LENGTH, EBML_MAX_SIZE_LENGTH,
        DOC_TYPE, DOC_TYPE_VERSION, DOC_TYPE_READ_VERSION,
    ]).mand(),
    Descriptor::uint(EBML_VERSION, "EBMLVersion").def_uint(1).mand(),
    Descriptor::uint(EBML_READ_VERSION, "EBMLReadVersion").def_uint(1).mand(),
    Descriptor::uint(EBML_MAX_ID_LENGTH, "EBMLMaxIDLength").def_uint(4).mand(),
    Descriptor::uint(EBML_MAX_SIZE_LENGTH, "EBMLMaxSizeLength").def_uint(8).mand(),
    Descriptor::string(DOC_TYPE, "DocType").def_str("matroska").mand(),
    Descriptor::uint(DOC_TYPE_VERSION, "DocTypeVersion").def_uint(1).mand(),
    Descriptor::uint(DOC_TYPE_READ_VERSION, "DocTypeReadVersion").def_uint(1).mand(),

    // 全局元素
    Descriptor::binary(VOID, "Void").multi(),
    Descriptor::binary(CRC32, "CRC-32"),

    // Segment
    Descriptor::master(SEGMENT, "Segment", &[
        SEEK_HEAD, INFO, TRACKS, CHAPTERS, ATTACHMENTS, TAGS, CLUSTER, CUES,
    ]).mand().multi(),

    // SeekHead
    Descriptor::master(SEEK_HEAD, "SeekHead", &[SEEK]).multi(),
    Descriptor::master(SEEK, "Seek", &[SEEK_ID, SEEK_POSITION]).mand().multi(),
    Descriptor::binary(SEEK_ID, "SeekID").mand(),
    Descriptor::uint(SEEK_POSITION, "SeekPosition").mand(),

    // Info
    Descriptor::master(INFO, "Info", &[
        SEGMENT_UID, SEGMENT_FILENAME, PREV_UID, PREV_FILENAME, NEXT_UID, NEXT_FILENAME,
        SEGMENT_FAMILY, TIMECODE_SCALE, DURATION, DATE_UTC, TITLE, MUXING_APP, WRITING_APP,
    ]).mand(),
    Descriptor::binary(SEGMENT_UID, "SegmentUID").range(16, 16),
    Descriptor::utf8(SEGMENT_FILENAME, "SegmentFilename"),
    Descriptor::binary(PREV_UID, "PrevUID").range(16, 16),
    Descriptor::utf8(PREV_FILENAME, "PrevFilename"),
    Descriptor::binary(NEXT_UID, "NextUID").range(16, 16),
    Descriptor::utf8(NEXT_FILENAME, "NextFilename"),
    Descriptor::binary(SEGMENT_FAMILY, "SegmentFamily").multi().range(16, 16),
    Descriptor::uint(TIMECODE_SCALE, "TimecodeScale").def_uint(1_000_000).mand(),
    Descriptor::float(DURATION, "Duration"),
    Descriptor::date(DATE_UTC, "DateUTC"),
    Descriptor::utf8(TITLE, "Title"),
    Descriptor::utf8(MUXING_APP, "MuxingApp").mand(),
    Descriptor::utf8(WRITING_APP, "WritingApp").mand(),

    // Tracks
    Descriptor::master(TRACKS, "Tracks", &[TRACK_ENTRY]),
    Descriptor::master(TRACK_ENTRY, "TrackEntry", &[
        TRACK_NUMBER, TRACK_UID, TRACK_TYPE, FLAG_ENABLED, FLAG_DEFAULT, FLAG_FORCED,
        FLAG_LACING, MIN_CACHE, MAX_CACHE, DEFAULT_DURATION, MAX_BLOCK_ADDITION_ID,
        TRACK_NAME, LANGUAGE, CODEC_ID, CODEC_PRIVATE, CODEC_NAME, CODEC_DELAY,
        SEEK_PRE_ROLL, VIDEO, AUDIO, CONTENT_ENCODINGS,
    ]).mand().multi(),
    Descriptor::uint(TRACK_NUMBER, "TrackNumber").mand(),
    Descriptor::uint(TRACK_UID, "TrackUID").mand(),
    Descriptor::uint(TRACK_TYPE, "TrackType").mand().range(1, 254),
    Descriptor::uint(FLAG_ENABLED, "FlagEnabled").def_uint(1).range(0, 1).mand(),
    Descriptor::uint(FLAG_DEFAULT, "FlagDefault").def_uint(1).range(0, 1).mand(),
    Descriptor::uint(FLAG_FORCED, "FlagForced").def_uint(0).range(0, 1).mand(),
    Descriptor::uint(FLAG_LACING, "FlagLacing").def_uint(1).range(0, 1).mand(),
    Descriptor::uint(MIN_CACHE, "MinCache").def_uint(0),
    Descriptor::uint(MAX_CACHE, "MaxCache"),
    Descriptor::uint(DEFAULT_DURATION, "DefaultDuration"),
    Descriptor::uint(MAX_BLOCK_ADDITION_ID, "MaxBlockAdditionID").def_uint(0),
    Descriptor::utf8(TRACK_NAME, "Name"),
    Descriptor::string(LANGUAGE, "Language").def_str("eng").mand(),
    Descriptor::string(CODEC_ID, "CodecID").mand(),
    Descriptor::binary(CODEC_PRIVATE, "CodecPrivate"),
    Descriptor::utf8(CODEC_NAME, "CodecName"),
    Descriptor::uint(CODEC_DELAY, "CodecDelay").def_uint(0),
    Descriptor::uint(SEEK_PRE_ROLL, "SeekPreRoll").def_uint(0),

    // 视频参数
    Descriptor::master(VIDEO, "Video", &[
        FLAG_INTERLACED, PIXEL_WIDTH, PIXEL_HEIGHT, PIXEL_CROP_BOTTOM, PIXEL_CROP_TOP,
        PIXEL_CROP_LEFT, PIXEL_CROP_RIGHT, DISPLAY_WIDTH, DISPLAY_HEIGHT, DISPLAY_UNIT,
        ASPECT_RATIO_TYPE, COLOUR_SPACE,
    ]),
    Descriptor::uint(FLAG_INTERLACED, "FlagInterlaced").def_uint(0),
    Descriptor::uint(PIXEL_WIDTH, "PixelWidth").mand(),
    Descriptor::uint(PIXEL_HEIGHT, "PixelHeight").mand(),
    Descriptor::uint(PIXEL_CROP_BOTTOM, "PixelCropBottom").def_uint(0),
    Descriptor::uint(PIXEL_CROP_TOP, "PixelCropTop").def_uint(0),
    Descriptor::uint(PIXEL_CROP_LEFT, "PixelCropLeft").def_uint(0),
    Descriptor::uint(PIXEL_CROP_RIGHT, "PixelCropRight").def_uint(0),
    Descriptor::uint(DISPLAY_WIDTH, "DisplayWidth"),
    Descriptor::uint(DISPLAY_HEIGHT, "DisplayHeight"),
    Descriptor::uint(DISPLAY_UNIT, "DisplayUnit").def_uint(0),
    Descriptor::uint(ASPECT_RATIO_TYPE, "AspectRatioType").def_uint(0),
    Descriptor::binary(COLOUR_SPACE, "ColourSpace"),

    // 音频参数
    Descriptor::master(AUDIO, "Audio", &[
        SAMPLING_FREQUENCY, OUTPUT_SAMPLING_FREQUENCY, CHANNELS, BIT_DEPTH,
    ]),
    Descriptor::float(SAMPLING_FREQUENCY, "SamplingFrequency").def_float(8000.0).mand(),
    Descriptor::float(OUTPUT_SAMPLING_FREQUENCY, "OutputSamplingFrequency"),
    Descriptor::uint(CHANNELS, "Channels").def_uint(1).mand(),
    Descriptor::uint(BIT_DEPTH, "BitDepth"),

    // 内容编码
    Descriptor::master(CONTENT_ENCODINGS, "ContentEncodings", &[CONTENT_ENCODING]),
    Descriptor::master(CONTENT_ENCODING, "ContentEncoding", &[
        CONTENT_ENCODING_ORDER, CONTENT_ENCODING_SCOPE, CONTENT_ENCODING_TYPE,
        CONTENT_COMPRESSION,
    ]).mand().multi(),
    Descriptor::uint(CONTENT_ENCODING_ORDER, "ContentEncodingOrder").def_uint(0).mand(),
    Descriptor::uint(CONTENT_ENCODING_SCOPE, "ContentEncodingScope").def_uint(1).mand(),
    Descriptor::uint(CONTENT_ENCODING_TYPE, "ContentEncodingType").def_uint(0).mand(),
    Descriptor::master(CONTENT_COMPRESSION, "ContentCompression", &[
        CONTENT_COMP_ALGO, CONTENT_COMP_SETTINGS,
    ]),
    Descriptor::uint(CONTENT_COMP_ALGO, "ContentCompAlgo").def_uint(0).mand(),
    Descriptor::binary(CONTENT_COMP_SETTINGS, "ContentCompSettings"),

    // Cluster
    Descriptor::master(CLUSTER, "Cluster", &[
        CLUSTER_TIMECODE, CLUSTER_POSITION, CLUSTER_PREV_SIZE, SIMPLE_BLOCK, BLOCK_GROUP,
    ]).multi(),
    Descriptor::uint(CLUSTER_TIMECODE, "Timecode").mand(),
    Descriptor::uint(CLUSTER_POSITION, "Position"),
    Descriptor::uint(CLUSTER_PREV_SIZE, "PrevSize"),
    Descriptor::binary(SIMPLE_BLOCK, "SimpleBlock").multi(),
    Descriptor::master(BLOCK_GROUP, "BlockGroup", &[
        BLOCK, BLOCK_ADDITIONS, BLOCK_DURATION, REFERENCE_PRIORITY, REFERENCE_BLOCK,
        CODEC_STATE, DISCARD_PADDING,
    ]).multi(),
    Descriptor::binary(BLOCK, "Block").mand(),
    Descriptor::master(BLOCK_ADDITIONS, "BlockAdditions", &[BLOCK_MORE]),
    Descriptor::master(BLOCK_MORE, "BlockMore", &[BLOCK_ADD_ID, BLOCK_ADDITIONAL]).mand().multi(),
    Descriptor::uint(BLOCK_ADD_ID, "BlockAddID").def_uint(1).mand(),
    Descriptor::binary(BLOCK_ADDITIONAL, "BlockAdditional").mand(),
    Descriptor::uint(BLOCK_DURATION, "BlockDuration"),
    Descriptor::uint(REFERENCE_PRIORITY, "ReferencePriority").def_uint(0),
    Descriptor::sint(REFERENCE_BLOCK, "ReferenceBlock").multi(),
    Descriptor::binary(CODEC_STATE, "CodecState"),
    Descriptor::sint(DISCARD_PADDING, "DiscardPadding"),

    // Cues
    Descriptor::master(CUES, "Cues", &[CUE_POINT]),
    Descriptor::master(CUE_POINT, "CuePoint", &[CUE_TIME, CUE_TRACK_POSITIONS]).mand().multi(),
    Descriptor::uint(CUE_TIME, "CueTime").mand(),
    Descriptor::master(CUE_TRACK_POSITIONS, "CueTrackPositions", &[
        CUE_TRACK, CUE_CLUSTER_POSITION, CUE_RELATIVE_POSITION, CUE_BLOCK_NUMBER,
    ]).mand().multi(),
    Descriptor::uint(CUE_TRACK, "CueTrack").mand(),
    Descriptor::uint(CUE_CLUSTER_POSITION, "CueClusterPosition").mand(),
    Descriptor::uint(CUE_RELATIVE_POSITION, "CueRelativePosition"),
    Descriptor::uint(CUE_BLOCK_NUMBER, "CueBlockNumber").def_uint(1),

    // Chapters
    Descriptor::master(CHAPTERS, "Chapters", &[EDITION_ENTRY]),
    Descriptor::master(EDITION_ENTRY, "EditionEntry", &[
        EDITION_UID, EDITION_FLAG_HIDDEN, EDITION_FLAG_DEFAULT, EDITION_FLAG_ORDERED,
        CHAPTER_ATOM,
    ]).mand().multi(),
    Descriptor::uint(EDITION_UID, "EditionUID"),
    Descriptor::uint(EDITION_FLAG_HIDDEN, "EditionFlagHidden").def_uint(0).range(0, 1).mand(),
    Descriptor::uint(EDITION_FLAG_DEFAULT, "EditionFlagDefault").def_uint(0).range(0, 1).mand(),
    Descriptor::uint(EDITION_FLAG_ORDERED, "EditionFlagOrdered").def_uint(0).range(0, 1),
    Descriptor::master(CHAPTER_ATOM, "ChapterAtom", &[
        CHAPTER_UID, CHAPTER_TIME_START, CHAPTER_TIME_END, CHAPTER_FLAG_HIDDEN,
        CHAPTER_FLAG_ENABLED, CHAPTER_SEGMENT_UID, CHAPTER_SEGMENT_EDITION_UID,
        CHAPTER_PHYSICAL_EQUIV, CHAPTER_TRACK, CHAPTER_DISPLAY, CHAPTER_ATOM,
    ]).mand().multi(),
    Descriptor::uint(CHAPTER_UID, "ChapterUID").mand(),
    Descriptor::uint(CHAPTER_TIME_START, "ChapterTimeStart").mand(),
    Descriptor::uint(CHAPTER_TIME_END, "ChapterTimeEnd"),
    Descriptor::uint(CHAPTER_FLAG_HIDDEN, "ChapterFlagHidden").def_uint(0).range(0, 1).mand(),
    Descriptor::uint(CHAPTER_FLAG_ENABLED, "ChapterFlagEnabled").def_uint(1).range(0, 1).mand(),
    Descriptor::binary(CHAPTER_SEGMENT_UID, "ChapterSegmentUID").range(16, 16),
    Descriptor::uint(CHAPTER_SEGMENT_EDITION_UID, "ChapterSegmentEditionUID"),
    Descriptor::uint(CHAPTER_PHYSICAL_EQUIV, "ChapterPhysicalEquivalent"),
    Descriptor::master(CHAPTER_TRACK, "ChapterTrack", &[CHAPTER_TRACK_NUMBER]),
    Descriptor::uint(CHAPTER_TRACK_NUMBER, "ChapterTrackNumber").mand().multi(),
    Descriptor::master(CHAPTER_DISPLAY, "ChapterDisplay", &[
        CHAPTER_STRING, CHAPTER_LANGUAGE, CHAPTER_COUNTRY,
    ]).multi(),
    Descriptor::utf8(CHAPTER_STRING, "ChapterString").mand(),
    Descriptor::string(CHAPTER_LANGUAGE, "ChapterLanguage").def_str("eng").multi(),
    Descriptor::string(CHAPTER_COUNTRY, "ChapterCountry").multi(),

    // Tags (注册表名即 XML 标签名)
    Descriptor::master(TAGS, "Tags", &[TAG]),
    Descriptor::master(TAG, "Tag", &[TAG_TARGETS, TAG_SIMPLE]).mand().multi(),
    Descriptor::master(TAG_TARGETS, "Targets", &[
        TARGET_TYPE_VALUE, TARGET_TYPE, TAG_TRACK_UID, TAG_EDITION_UID, TAG_CHAPTER_UID,
        TAG_ATTACHMENT_UID,
    ]),
    Descriptor::uint(TARGET_TYPE_VALUE, "TargetTypeValue").def_uint(50).mand(),
    Descriptor::string(TARGET_TYPE, "TargetType"),
    Descriptor::uint(TAG_TRACK_UID, "TrackUID").def_uint(0).multi(),
    Descriptor::uint(TAG_EDITION_UID, "EditionUID").def_uint(0).multi(),
    Descriptor::uint(TAG_CHAPTER_UID, "ChapterUID").def_uint(0).multi(),
    Descriptor::uint(TAG_ATTACHMENT_UID, "AttachmentUID").def_uint(0).multi(),
    Descriptor::master(TAG_SIMPLE, "Simple", &[
        TAG_NAME, TAG_LANGUAGE, TAG_DEFAULT, TAG_STRING, TAG_BINARY, TAG_SIMPLE,
    ]).multi(),
    Descriptor::utf8(TAG_NAME, "Name").mand(),
    Descriptor::string(TAG_LANGUAGE, "TagLanguage").def_str("und").mand(),
    Descriptor::uint(TAG_DEFAULT, "DefaultLanguage").def_uint(1).range(0, 1).mand(),
    Descriptor::utf8(TAG_STRING, "String"),
    Descriptor::binary(TAG_BINARY, "Binary"),

    // Attachments
    Descriptor::master(ATTACHMENTS, "Attachments", &[ATTACHED_FILE]),
    Descriptor::master(ATTACHED_FILE, "AttachedFile", &[
        FILE_DESCRIPTION, FILE_NAME, FILE_MIME_TYPE, FILE_DATA, FILE_UID,
    ]).mand().multi(),
    Descriptor::utf8(FILE_DESCRIPTION, "FileDescription"),
    Descriptor::utf8(FILE_NAME, "FileName").mand(),
    Descriptor::string(FILE_MIME_TYPE, "FileMimeType").mand(),
    Descriptor::binary(FILE_DATA, "FileData").mand(),
    Descriptor::uint(FILE_UID, "FileUID").mand(),
];

/// 未知元素的合成描述符 (dummy binary)
pub static DUMMY: Descriptor = Descriptor::binary(0, "(unknown)");

/// 顶层虚拟上下文 (EBML 头部与 Segment 的父级)
pub static ROOT: Descriptor = Descriptor::master(0, "(root)", &[EBML, SEGMENT]);

/// 全局元素 ID (任何上下文均合法)
pub static GLOBAL_IDS: &[u32] = &[VOID, CRC32];

/// 按 ID 查找描述符
pub fn by_id(id: u32) -> Option<&'static Descriptor> {
    DESCRIPTORS.iter().find(|d| d.id == id)
}

/// 按调试名查找描述符
pub fn by_name(name: &str) -> Option<&'static Descriptor> {
    DESCRIPTORS.iter().find(|d| d.name == name)
}

/// 在语义上下文栈中查找子元素
///
/// 查找顺序: 栈顶上下文 → 逐层父上下文 → 全局元素.
/// 返回 (描述符, 在栈中的深度); 深度 0 表示栈顶直接子元素,
/// 未知 ID 返回 None (调用方以 DUMMY 跳过).
pub fn lookup(context_stack: &[&'static Descriptor], id: u32) -> Option<(&'static Descriptor, usize)> {
    for (depth, ctx) in context_stack.iter().rev().enumerate() {
        if ctx.allows_child(id) {
            return by_id(id).map(|d| (d, depth));
        }
    }
    if GLOBAL_IDS.contains(&id) {
        return by_id(id).map(|d| (d, 0));
    }
    None
}
