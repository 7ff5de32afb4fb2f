//! 章节/标签/SegmentInfo 的 XML 双向转换.
//!
//! 模式即注册表 (§registry) 加上少量逐元素格式提示:
//! - master → 子节点递归映射
//! - 整数 → 十进制文本, 按描述符 bounds 校验范围
//! - 字符串 → 文本内容 (UTF-8)
//! - 时间码 → `[HH:]MM:SS[.fraction]`, 小数最多 9 位, 存为无符号纳秒
//! - binary → `format` 属性选 ascii / hex / base64 (默认 base64);
//!   `@文件名` 从同目录文件读取; bounds 校验字节长度
//!
//! 未知元素名带文档字节偏移报错; 唯一性与必需子元素规则在整树
//! 加载并 fix_mandatory 之后统一校验.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use log::debug;
use taowa_core::{MuxError, MuxResult, random, timestamp};

use crate::element::Element;
use crate::leaf::LeafValue;
use crate::registry::{self, DefaultValue, Descriptor, ElementKind, ids};

/// 转换器风格 (根元素与修正钩子)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlFlavor {
    /// `<Chapters>` 章节文档
    Chapters,
    /// `<Tags>` 标签文档
    Tags,
    /// `<Info>` SegmentInfo 文档
    SegmentInfo,
}

impl XmlFlavor {
    /// 根元素名
    pub fn root_name(self) -> &'static str {
        match self {
            Self::Chapters => "Chapters",
            Self::Tags => "Tags",
            Self::SegmentInfo => "Info",
        }
    }

    fn root_id(self) -> u32 {
        match self {
            Self::Chapters => ids::CHAPTERS,
            Self::Tags => ids::TAGS,
            Self::SegmentInfo => ids::INFO,
        }
    }
}

/// 需要按时间码文本处理的元素
fn is_timecode(id: u32) -> bool {
    matches!(id, ids::CHAPTER_TIME_START | ids::CHAPTER_TIME_END)
}

// ============================================================
// XML → EBML
// ============================================================

/// 解析 XML 文本为 EBML 元素树
///
/// `base_dir` 为 `@文件名` 形式 binary 内容的查找目录.
pub fn parse_xml(flavor: XmlFlavor, text: &str, base_dir: Option<&Path>) -> MuxResult<Element> {
    let doc = roxmltree::Document::parse(text).map_err(|e| MuxError::Schema {
        path: flavor.root_name().to_owned(),
        offset: doc_error_offset(text, &e),
        message: format!("XML 语法错误: {e}"),
    })?;

    let root_node = doc.root_element();
    if root_node.tag_name().name() != flavor.root_name() {
        return Err(MuxError::Schema {
            path: root_node.tag_name().name().to_owned(),
            offset: root_node.range().start,
            message: format!("根元素必须是 <{}>", flavor.root_name()),
        });
    }

    let root_desc = registry::by_id(flavor.root_id()).expect("根元素已注册");
    let mut root = parse_node(&root_node, root_desc, flavor.root_name(), base_dir)?;

    fix_tree(flavor, &mut root)?;
    root.fix_mandatory();
    validate_tree(&root, flavor.root_name())?;
    Ok(root)
}

fn doc_error_offset(text: &str, e: &roxmltree::Error) -> usize {
    let pos = e.pos();
    // roxmltree 报行列, 换算为字节偏移
    text.lines()
        .take(pos.row.saturating_sub(1) as usize)
        .map(|l| l.len() + 1)
        .sum::<usize>()
        + pos.col.saturating_sub(1) as usize
}

fn parse_node(
    node: &roxmltree::Node,
    desc: &'static Descriptor,
    path: &str,
    base_dir: Option<&Path>,
) -> MuxResult<Element> {
    let mut element = Element::from_descriptor(desc);

    // binary 元素允许 format 属性, 其余属性一概拒绝
    for attr in node.attributes() {
        if desc.kind == ElementKind::Binary && attr.name() == "format" {
            continue;
        }
        return Err(MuxError::Schema {
            path: path.to_owned(),
            offset: node.range().start,
            message: format!("无效属性 '{}'", attr.name()),
        });
    }

    match desc.kind {
        ElementKind::Master => {
            for child_node in node.children() {
                if !child_node.is_element() {
                    continue;
                }
                let child_name = child_node.tag_name().name();
                let child_path = format!("{path}/{child_name}");
                let child_desc = desc
                    .children
                    .iter()
                    .filter_map(|&id| registry::by_id(id))
                    .find(|d| d.name == child_name)
                    .ok_or_else(|| MuxError::Schema {
                        path: child_path.clone(),
                        offset: child_node.range().start,
                        message: format!("<{path}> 下不支持元素 <{child_name}>"),
                    })?;
                let child = parse_node(&child_node, child_desc, &child_path, base_dir)?;
                element.push(child);
            }
        }
        kind => {
            let content: String = node
                .children()
                .filter(|n| n.is_text())
                .map(|n| n.text().unwrap_or(""))
                .collect();
            let value = parse_leaf_content(node, desc, kind, &content, path, base_dir)?;
            element.set(value)?;
        }
    }
    Ok(element)
}

fn parse_leaf_content(
    node: &roxmltree::Node,
    desc: &'static Descriptor,
    kind: ElementKind,
    content: &str,
    path: &str,
    base_dir: Option<&Path>,
) -> MuxResult<LeafValue> {
    let schema_err = |message: String| MuxError::Schema {
        path: path.to_owned(),
        offset: node.range().start,
        message,
    };
    let check_bounds = |value: i64, what: &str| -> MuxResult<()> {
        if let Some((lo, hi)) = desc.bounds {
            if value < lo {
                return Err(schema_err(format!("{what}小于允许的最小值 {lo}: {value}")));
            }
            if value > hi {
                return Err(schema_err(format!("{what}大于允许的最大值 {hi}: {value}")));
            }
        }
        Ok(())
    };

    let trimmed = content.trim();
    match kind {
        ElementKind::UInt => {
            if is_timecode(desc.id) {
                let ns = timestamp::parse_timestamp(trimmed)
                    .map_err(|e| schema_err(format!("无效的时间码: {e}")))?;
                check_bounds(ns, "时间码")?;
                Ok(LeafValue::UInt(ns as u64))
            } else {
                let v: u64 = trimmed
                    .parse()
                    .map_err(|_| schema_err(format!("期望无符号整数, 实为 '{trimmed}'")))?;
                check_bounds(v.min(i64::MAX as u64) as i64, "值")?;
                Ok(LeafValue::UInt(v))
            }
        }
        ElementKind::SInt => {
            let v: i64 = trimmed
                .parse()
                .map_err(|_| schema_err(format!("期望整数, 实为 '{trimmed}'")))?;
            check_bounds(v, "值")?;
            Ok(LeafValue::SInt(v))
        }
        ElementKind::Float => {
            let v: f64 = trimmed
                .parse()
                .map_err(|_| schema_err(format!("期望浮点数, 实为 '{trimmed}'")))?;
            Ok(LeafValue::Float(v))
        }
        ElementKind::String => Ok(LeafValue::String(content.to_owned())),
        ElementKind::Utf8 => Ok(LeafValue::Utf8(content.to_owned())),
        ElementKind::Date => {
            let v: i64 = trimmed
                .parse()
                .map_err(|_| schema_err(format!("期望纪元纳秒整数, 实为 '{trimmed}'")))?;
            Ok(LeafValue::Date(v))
        }
        ElementKind::Binary => {
            let data = parse_binary_content(node, trimmed, path, base_dir)?;
            check_bounds(data.len() as i64, "长度")?;
            Ok(LeafValue::Binary(Bytes::from(data)))
        }
        ElementKind::Master => unreachable!("调用方已分流 master"),
    }
}

fn parse_binary_content(
    node: &roxmltree::Node,
    content: &str,
    path: &str,
    base_dir: Option<&Path>,
) -> MuxResult<Vec<u8>> {
    let schema_err = |message: String| MuxError::Schema {
        path: path.to_owned(),
        offset: node.range().start,
        message,
    };

    // @文件名: 从旁路文件读取原始字节
    if let Some(file_name) = content.strip_prefix('@') {
        if file_name.is_empty() {
            return Err(schema_err("'@' 之后缺少文件名".into()));
        }
        let full = match base_dir {
            Some(dir) => dir.join(file_name),
            None => Path::new(file_name).to_path_buf(),
        };
        return std::fs::read(&full)
            .map_err(|e| schema_err(format!("无法读取文件 '{}': {e}", full.display())));
    }

    let format = node.attribute("format").unwrap_or("base64").to_lowercase();
    match format.as_str() {
        "ascii" => Ok(content.as_bytes().to_vec()),
        "hex" => {
            let digits: String = content
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .replace("0x", "")
                .replace("0X", "");
            if digits.chars().any(|c| !c.is_ascii_hexdigit()) {
                return Err(schema_err("十六进制内容含非法字符".into()));
            }
            if digits.len() % 2 != 0 {
                return Err(schema_err("十六进制内容长度必须为偶数".into()));
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
        "base64" => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            BASE64
                .decode(compact.as_bytes())
                .map_err(|_| schema_err("无效的 Base64 内容".into()))
        }
        other => Err(schema_err(format!("无效的 format 属性 '{other}'"))),
    }
}

// ============================================================
// 修正钩子与校验
// ============================================================

fn fix_tree(flavor: XmlFlavor, root: &mut Element) -> MuxResult<()> {
    match flavor {
        XmlFlavor::Chapters => {
            fix_chapters(root);
            Ok(())
        }
        XmlFlavor::Tags => validate_tags(root),
        XmlFlavor::SegmentInfo => Ok(()),
    }
}

/// 章节修正: 缺失的 ChapterTimeStart=0、空 ChapterString、
/// ChapterLanguage=eng 与随机 ChapterUID/EditionUID
fn fix_chapters(element: &mut Element) {
    let id = element.id();
    if id == ids::CHAPTER_ATOM {
        if element.find_child(ids::CHAPTER_TIME_START).is_none() {
            element.get_child(ids::CHAPTER_TIME_START).set_uint(0).expect("uint 元素");
        }
        if element.find_child(ids::CHAPTER_UID).is_none() {
            element
                .get_child(ids::CHAPTER_UID)
                .set_uint(random::random_u64())
                .expect("uint 元素");
        }
    }
    if id == ids::EDITION_ENTRY && element.find_child(ids::EDITION_UID).is_none() {
        element
            .get_child(ids::EDITION_UID)
            .set_uint(random::random_u64())
            .expect("uint 元素");
    }
    if id == ids::CHAPTER_DISPLAY {
        if element.find_child(ids::CHAPTER_STRING).is_none() {
            element.get_child(ids::CHAPTER_STRING).set_str("").expect("utf8 元素");
        }
        if element.find_child(ids::CHAPTER_LANGUAGE).is_none() {
            element.get_child(ids::CHAPTER_LANGUAGE).set_str("eng").expect("string 元素");
        }
    }
    if element.is_master() {
        for child in element.children_mut() {
            fix_chapters(child);
        }
    }
}

/// 标签校验: 每个 Tag 必须有 Simple; Simple 必须有 Name,
/// 且 String 与 Binary 恰有其一 (或含嵌套 Simple)
fn validate_tags(element: &Element) -> MuxResult<()> {
    let tag_err = |message: String| MuxError::Schema {
        path: "Tags".to_owned(),
        offset: 0,
        message,
    };
    for tag in element.children() {
        if tag.id() != ids::TAG {
            continue;
        }
        if tag.find_child(ids::TAG_SIMPLE).is_none() {
            return Err(tag_err("<Tag> 缺少 <Simple> 子元素".into()));
        }
        for simple in tag.children().iter().filter(|c| c.id() == ids::TAG_SIMPLE) {
            validate_simple(simple, &tag_err)?;
        }
    }
    Ok(())
}

fn validate_simple(
    simple: &Element,
    tag_err: &dyn Fn(String) -> MuxError,
) -> MuxResult<()> {
    if simple.find_child(ids::TAG_NAME).is_none() {
        return Err(tag_err("<Simple> 缺少 <Name> 子元素".into()));
    }
    let has_string = simple.find_child(ids::TAG_STRING).is_some();
    let has_binary = simple.find_child(ids::TAG_BINARY).is_some();
    let has_nested = simple.find_child(ids::TAG_SIMPLE).is_some();
    if has_string && has_binary {
        return Err(tag_err(
            "<Simple> 之下 <String> 与 <Binary> 只能二选一".into(),
        ));
    }
    if !has_string && !has_binary && !has_nested {
        return Err(tag_err(
            "<Simple> 必须包含 <String> 或 <Binary> 子元素".into(),
        ));
    }
    for nested in simple.children().iter().filter(|c| c.id() == ids::TAG_SIMPLE) {
        validate_simple(nested, tag_err)?;
    }
    Ok(())
}

/// 整树加载后的唯一性与必需子元素校验
fn validate_tree(element: &Element, path: &str) -> MuxResult<()> {
    if !element.is_master() {
        return Ok(());
    }
    let desc = element.descriptor();
    for &child_id in desc.children {
        let child_desc = registry::by_id(child_id).expect("子元素表均已注册");
        let count = element
            .children()
            .iter()
            .filter(|c| c.id() == child_id)
            .count();
        if child_desc.unique && count > 1 {
            return Err(MuxError::Schema {
                path: format!("{path}/{}", child_desc.name),
                offset: 0,
                message: format!("<{}> 在 <{path}> 下出现了 {count} 次, 只允许一次", child_desc.name),
            });
        }
        if child_desc.mandatory && child_desc.default == DefaultValue::None && count == 0 {
            return Err(MuxError::Schema {
                path: format!("{path}/{}", child_desc.name),
                offset: 0,
                message: format!("<{path}> 缺少必需的子元素 <{}>", child_desc.name),
            });
        }
    }
    for child in element.children() {
        validate_tree(child, &format!("{path}/{}", child.descriptor().name))?;
    }
    Ok(())
}

// ============================================================
// EBML → XML
// ============================================================

/// 将元素树序列化为 XML 文本
pub fn write_xml(flavor: XmlFlavor, root: &Element) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\"?>\n");
    out.push_str(&format!(
        "<!-- <!DOCTYPE {0} SYSTEM \"matroska{1}.dtd\"> -->\n",
        flavor.root_name(),
        flavor.root_name().to_lowercase(),
    ));
    write_node(&mut out, root, 0);
    out
}

fn write_node(out: &mut String, element: &Element, depth: usize) {
    let indent = "  ".repeat(depth);
    let name = element.descriptor().name;
    match element.value() {
        None => {
            out.push_str(&format!("{indent}<{name}>\n"));
            for child in element.children() {
                write_node(out, child, depth + 1);
            }
            out.push_str(&format!("{indent}</{name}>\n"));
        }
        Some(value) => {
            let (text, format_attr) = format_leaf(element.id(), value);
            match format_attr {
                Some(fmt) => out.push_str(&format!(
                    "{indent}<{name} format=\"{fmt}\">{}</{name}>\n",
                    escape_xml(&text)
                )),
                None => out.push_str(&format!(
                    "{indent}<{name}>{}</{name}>\n",
                    escape_xml(&text)
                )),
            }
        }
    }
}

fn format_leaf(id: u32, value: &LeafValue) -> (String, Option<&'static str>) {
    match value {
        LeafValue::UInt(v) if is_timecode(id) => {
            (timestamp::format_timestamp(*v as i64, 9), None)
        }
        LeafValue::UInt(v) => (v.to_string(), None),
        LeafValue::SInt(v) => (v.to_string(), None),
        LeafValue::Float(v) => (v.to_string(), None),
        LeafValue::String(s) | LeafValue::Utf8(s) => (s.clone(), None),
        LeafValue::Date(v) => (v.to_string(), None),
        LeafValue::Binary(data) => {
            let pure_ascii = data
                .iter()
                .all(|&b| b == b'\n' || b == b'\r' || (b' '..0x7F).contains(&b));
            if pure_ascii {
                (
                    String::from_utf8(data.to_vec()).expect("纯 ASCII"),
                    Some("ascii"),
                )
            } else {
                let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
                debug!("binary 元素以 hex 输出, {} 字节", data.len());
                (hex, Some("hex"))
            }
        }
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
