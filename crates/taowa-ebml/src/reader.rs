//! EBML 元素树解析.
//!
//! 从字节缓冲区解析回元素树, 供往返校验与诊断工具使用.
//! 未注册的 ID 解析为 dummy 元素并整体跳过; 未知大小的 master
//! 延伸到首个"非本级子元素"的 ID 或数据末尾.

use bytes::Bytes;
use log::debug;
use taowa_core::{MuxError, MuxResult};

use crate::element::Element;
use crate::leaf::LeafValue;
use crate::registry::{self, Descriptor, ElementKind};
use crate::vint::{self, VintValue};

/// 解析缓冲区中的全部顶层元素 (EBML 头部、Segment)
pub fn parse_all(buf: &[u8]) -> MuxResult<Vec<Element>> {
    let mut elements = Vec::new();
    let mut pos = 0usize;
    let stack: Vec<&'static Descriptor> = vec![&registry::ROOT];
    while pos < buf.len() {
        let (element, consumed) = parse_element(&buf[pos..], &stack)
            .map_err(|e| annotate_offset(e, pos as u64))?;
        pos += consumed;
        elements.push(element);
    }
    Ok(elements)
}

/// 从缓冲区头部解析一个元素, 返回 (元素, 消耗字节数)
///
/// `context_stack` 为当前 master 上下文链 (底为根), 用于按语义
/// 上下文解析子元素与终止未知大小的枚举.
pub fn parse_element(
    buf: &[u8],
    context_stack: &[&'static Descriptor],
) -> MuxResult<(Element, usize)> {
    let (id, id_len) = vint::read_id(buf)?;
    let (size, size_len) = vint::read_size(&buf[id_len..])?;
    let head_len = id_len + size_len;

    let desc = match registry::lookup(context_stack, id) {
        Some((d, _)) => d,
        None => {
            // 未知元素: 以 dummy 保留字节原样跳过
            let data_len = size.known().ok_or_else(|| {
                MuxError::malformed_at_unknown(format!("未知元素 {id:#X} 声明未知大小"))
            })? as usize;
            if buf.len() < head_len + data_len {
                return Err(MuxError::UnexpectedEof);
            }
            debug!("跳过未知元素 {id:#X}, {data_len} 字节");
            let data = Bytes::copy_from_slice(&buf[head_len..head_len + data_len]);
            return Ok((Element::dummy(id, data), head_len + data_len));
        }
    };

    match desc.kind {
        ElementKind::Master => {
            let mut element = Element::from_descriptor(desc);
            let mut stack = context_stack.to_vec();
            stack.push(desc);

            let mut pos = head_len;
            match size {
                VintValue::Known(data_len) => {
                    let end = head_len + data_len as usize;
                    if buf.len() < end {
                        return Err(MuxError::UnexpectedEof);
                    }
                    while pos < end {
                        let (child, consumed) = parse_element(&buf[pos..end], &stack)
                            .map_err(|e| annotate_offset(e, pos as u64))?;
                        element.push(child);
                        pos += consumed;
                    }
                }
                VintValue::Unknown => {
                    // 延伸到首个非子元素 ID 或 EOF
                    while pos < buf.len() {
                        let Ok((next_id, _)) = vint::read_id(&buf[pos..]) else {
                            break;
                        };
                        match registry::lookup(&stack, next_id) {
                            Some((_, 0)) => {}
                            _ => break,
                        }
                        let (child, consumed) = parse_element(&buf[pos..], &stack)
                            .map_err(|e| annotate_offset(e, pos as u64))?;
                        element.push(child);
                        pos += consumed;
                    }
                }
            }
            Ok((element, pos))
        }
        kind => {
            let data_len = size.known().ok_or_else(|| {
                MuxError::malformed_at_unknown(format!("叶子元素 {} 声明未知大小", desc.name))
            })? as usize;
            if buf.len() < head_len + data_len {
                return Err(MuxError::UnexpectedEof);
            }
            let value = LeafValue::parse(kind, &buf[head_len..head_len + data_len])?;
            let mut element = Element::from_descriptor(desc);
            element.set(value)?;
            Ok((element, head_len + data_len))
        }
    }
}

/// 为无偏移的格式错误补充偏移量
fn annotate_offset(e: MuxError, offset: u64) -> MuxError {
    match e {
        MuxError::MalformedInput {
            message,
            offset: None,
        } => MuxError::MalformedInput {
            message,
            offset: Some(offset),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ids;

    #[test]
    fn test_渲染解析往返() {
        let mut info = Element::new(ids::INFO).unwrap();
        info.get_child(ids::TIMECODE_SCALE).set_uint(1_000_000).unwrap();
        info.get_child(ids::MUXING_APP).set_str("taowa").unwrap();
        info.get_child(ids::WRITING_APP).set_str("taowa 0.1").unwrap();
        info.get_child(ids::DURATION).set_float(1234.5).unwrap();

        let buf = info.render_complete(true).unwrap();
        let stack: Vec<&'static Descriptor> = vec![registry::by_id(ids::SEGMENT).unwrap()];
        let (parsed, consumed) = parse_element(&buf, &stack).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_往返后默认值标志() {
        let mut entry = Element::new(ids::TRACK_ENTRY).unwrap();
        entry.get_child(ids::FLAG_LACING).set_uint(1).unwrap();
        entry.get_child(ids::TRACK_NUMBER).set_uint(2).unwrap();

        let buf = entry.render_complete(true).unwrap();
        let stack: Vec<&'static Descriptor> = vec![registry::by_id(ids::TRACKS).unwrap()];
        let (parsed, _) = parse_element(&buf, &stack).unwrap();

        // is_default 当且仅当值等于声明默认值
        assert!(parsed.find_child(ids::FLAG_LACING).unwrap().is_default_value());
        assert!(!parsed.find_child(ids::TRACK_NUMBER).unwrap().is_default_value());
    }

    #[test]
    fn test_未知元素解析为_dummy() {
        // 上下文内未注册的 2 字节 ID + 3 字节数据
        let buf = [0x6B, 0x6B, 0x83, 1, 2, 3];
        let stack: Vec<&'static Descriptor> = vec![registry::by_id(ids::INFO).unwrap()];
        let (parsed, consumed) = parse_element(&buf, &stack).unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(parsed.id(), 0x6B6B);
        assert_eq!(parsed.descriptor().name, "(unknown)");
    }

    #[test]
    fn test_未知大小_cluster_枚举到下一个簇() {
        // Cluster (未知大小 0xFF) { Timecode=0 } Cluster (已知大小) { Timecode=5 }
        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x1F, 0x43, 0xB6, 0x75, 0xFF]);
        buf.extend_from_slice(&[0xE7, 0x81, 0x00]);
        let mut second = Element::new(ids::CLUSTER).unwrap();
        second.get_child(ids::CLUSTER_TIMECODE).set_uint(5).unwrap();
        buf.extend_from_slice(&second.render_complete(true).unwrap());

        let stack: Vec<&'static Descriptor> = vec![registry::by_id(ids::SEGMENT).unwrap()];
        let (first, consumed) = parse_element(&buf, &stack).unwrap();
        // 枚举止于下一个 Cluster ID (父级子元素), 而非字节数
        assert_eq!(consumed, 8);
        assert_eq!(first.children().len(), 1);
        assert_eq!(
            first.find_child(ids::CLUSTER_TIMECODE).unwrap().as_uint().unwrap(),
            0
        );

        let (next, _) = parse_element(&buf[consumed..], &stack).unwrap();
        assert_eq!(
            next.find_child(ids::CLUSTER_TIMECODE).unwrap().as_uint().unwrap(),
            5
        );
    }

    #[test]
    fn test_顶层解析() {
        let mut ebml = Element::new(ids::EBML).unwrap();
        ebml.fix_mandatory();
        let mut buf = ebml.render_complete(true).unwrap();

        let mut segment = Element::new(ids::SEGMENT).unwrap();
        let mut info = Element::new(ids::INFO).unwrap();
        info.get_child(ids::MUXING_APP).set_str("taowa").unwrap();
        segment.push(info);
        buf.extend_from_slice(&segment.render_complete(true).unwrap());

        let elements = parse_all(&buf).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id(), ids::EBML);
        assert_eq!(elements[1].id(), ids::SEGMENT);
    }

    #[test]
    fn test_数据截断报错() {
        let mut info = Element::new(ids::INFO).unwrap();
        info.get_child(ids::MUXING_APP).set_str("taowa").unwrap();
        let buf = info.render_complete(true).unwrap();
        let stack: Vec<&'static Descriptor> = vec![registry::by_id(ids::SEGMENT).unwrap()];
        assert!(matches!(
            parse_element(&buf[..buf.len() - 1], &stack),
            Err(MuxError::UnexpectedEof)
        ));
    }
}
