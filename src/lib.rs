//! # Taowa (套娃)
//!
//! 纯 Rust 实现的 Matroska 封装工具, 对标 mkvmerge.
//!
//! Taowa 把各类基本流与字幕文件封装为结构良好的 Matroska 文件:
//! - **EBML 引擎**: 变长整数编码、类型化元素树、两阶段渲染与原地回填
//! - **码流解析**: AC-3, E-AC-3, DTS, AAC, FLAC, Vorbis, HEVC, VC-1
//! - **封装管线**: Packetizer → Cluster 调度器 → Segment 组装器
//! - **元数据**: 章节 (XML/简单格式/CUE)、标签、附件、SeekHead 与 Cues 索引
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use taowa::ebml::{Element, ids};
//!
//! let mut info = Element::new(ids::INFO)?;
//! info.get_child(ids::MUXING_APP).set_str("taowa")?;
//! let bytes = info.render_complete(true)?;
//! println!("Info 元素: {} 字节", bytes.len());
//! # Ok::<(), taowa::core::MuxError>(())
//! ```

/// 核心类型与工具 (错误、位读取、时间戳)
pub use taowa_core as core;

/// EBML 元素模型与序列化引擎
pub use taowa_ebml as ebml;

/// 码流解析器
pub use taowa_codec as codec;

/// 封装管线
pub use taowa_mux as mux;
