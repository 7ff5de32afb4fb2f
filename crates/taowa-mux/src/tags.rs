//! 标签加载.
//!
//! 全局标签与轨道标签都来自 `<Tags>` XML 文档; 轨道标签在加载后
//! 为每个 Tag 注入指向目标轨道 UID 的 Targets.

use std::path::Path;

use taowa_core::MuxResult;
use taowa_ebml::{Element, XmlFlavor, ids, parse_xml};

/// 加载全局标签 XML
pub fn load_tags(path: &str) -> MuxResult<Element> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);
    parse_xml(XmlFlavor::Tags, &text, Path::new(path).parent())
}

/// 加载轨道标签 XML 并绑定到指定轨道 UID
pub fn load_track_tags(path: &str, track_uid: u64) -> MuxResult<Element> {
    let mut tags = load_tags(path)?;
    for tag in tags.children_mut() {
        if tag.id() != ids::TAG {
            continue;
        }
        let targets = tag.get_child(ids::TAG_TARGETS);
        targets.get_child(ids::TAG_TRACK_UID).set_uint(track_uid)?;
        tag.sort();
    }
    Ok(tags)
}

/// 合并两棵 Tags 树 (全局 + 各轨道)
pub fn merge_tags(mut base: Element, extra: Element) -> Element {
    for child in extra.children() {
        base.push(child.clone());
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use taowa_ebml::parse_xml;

    const TAGS_XML: &str =
        "<Tags><Tag><Simple><Name>ARTIST</Name><String>Someone</String></Simple></Tag></Tags>";

    #[test]
    fn test_轨道标签绑定() {
        let mut tags = parse_xml(XmlFlavor::Tags, TAGS_XML, None).unwrap();
        for tag in tags.children_mut() {
            if tag.id() == ids::TAG {
                let targets = tag.get_child(ids::TAG_TARGETS);
                targets.get_child(ids::TAG_TRACK_UID).set_uint(42).unwrap();
            }
        }
        let tag = tags.find_child(ids::TAG).unwrap();
        let uid = tag
            .find_child(ids::TAG_TARGETS)
            .unwrap()
            .find_child(ids::TAG_TRACK_UID)
            .unwrap()
            .as_uint()
            .unwrap();
        assert_eq!(uid, 42);
    }

    #[test]
    fn test_合并() {
        let a = parse_xml(XmlFlavor::Tags, TAGS_XML, None).unwrap();
        let b = parse_xml(XmlFlavor::Tags, TAGS_XML, None).unwrap();
        let merged = merge_tags(a, b);
        assert_eq!(
            merged
                .children()
                .iter()
                .filter(|c| c.id() == ids::TAG)
                .count(),
            2
        );
    }
}
