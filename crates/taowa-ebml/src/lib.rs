//! # taowa-ebml
//!
//! EBML (Extensible Binary Meta Language) 元素模型与序列化引擎.
//!
//! Matroska 文件即一棵 EBML 元素树. 本 crate 提供:
//! - 变长整数 (VINT) 编解码, 含"未知大小"哨兵值
//! - 带类型的叶子值 (整数/浮点/字符串/日期/二进制)
//! - 静态元素注册表 (ID、名称、类型、语义上下文、默认值)
//! - 有序 master 元素树与 get-or-create 子元素访问
//! - 两阶段渲染 (先自底向上计算大小, 再自顶向下写出)
//! - 预留头部的原地重写 (SeekHead、Segment 大小、Duration 回填)
//! - 章节/标签/SegmentInfo 的 XML 双向转换

pub mod element;
pub mod leaf;
pub mod reader;
pub mod registry;
pub mod render;
pub mod vint;
pub mod xml;

pub use element::{Element, Payload};
pub use leaf::LeafValue;
pub use reader::{parse_all, parse_element};
pub use registry::{Descriptor, ElementKind, ids};
pub use render::{make_void_total, render_into_reserved};
pub use vint::VintValue;
pub use xml::{XmlFlavor, parse_xml, write_xml};
