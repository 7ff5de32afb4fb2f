//! 两阶段渲染.
//!
//! master 的大小头部必须先于其字节写出, 且"仅在非默认值时写出"的
//! 子元素必须在父元素大小确定前定型, 因此渲染分两阶段:
//! 1. `update_size()` 自底向上递归计算大小, 备忘每个元素的总大小
//! 2. `render()` 自顶向下写出头部和数据
//!
//! 预留了头部空间的元素 (Segment 大小、SeekHead、Duration 回填)
//! 可通过 `render_into_reserved` 原地重写, 多余空间以 Void 填充.

use taowa_core::{MuxError, MuxResult};

use crate::element::{Element, Payload};
use crate::vint;

impl Element {
    /// 此元素在当前策略下是否会被写出
    ///
    /// emit_defaults = false 时, 等于声明默认值的叶子被省略.
    pub fn will_render(&self, emit_defaults: bool) -> bool {
        emit_defaults || !self.is_default_value()
    }

    /// 第一阶段: 递归计算并备忘数据大小, 返回元素总大小 (头部 + 数据)
    pub fn update_size(&mut self, emit_defaults: bool) -> u64 {
        let default_size = self.descriptor().default_size;
        let data_len = match &mut self.payload {
            Payload::Master(children) => {
                let mut sum = 0u64;
                for child in children.iter_mut() {
                    if child.will_render(emit_defaults) {
                        sum += child.update_size(emit_defaults);
                    }
                }
                sum
            }
            Payload::Leaf(value) => value.data_len(default_size),
            Payload::Dummy { data, .. } => data.len() as u64,
        };
        self.cached_data_len = data_len;
        self.total_len()
    }

    /// 备忘大小下的元素总大小 (须先调用 update_size)
    ///
    /// update_size 在树未变化时是幂等的.
    pub fn total_len(&self) -> u64 {
        let head = vint::id_len(self.id()) as u64
            + vint::size_len(self.cached_data_len).max(self.size_length) as u64;
        head + self.cached_data_len
    }

    /// 第二阶段: 按备忘大小写出头部和数据
    pub fn render(&self, buf: &mut Vec<u8>, emit_defaults: bool) -> MuxResult<()> {
        vint::write_id(buf, self.id());
        vint::write_size(buf, self.cached_data_len, self.size_length)?;
        match self.payload() {
            Payload::Master(children) => {
                for child in children {
                    if child.will_render(emit_defaults) {
                        child.render(buf, emit_defaults)?;
                    }
                }
            }
            Payload::Leaf(value) => value.render(buf, self.cached_data_len),
            Payload::Dummy { data, .. } => buf.extend_from_slice(data),
        }
        Ok(())
    }

    /// 一次完成两阶段渲染
    pub fn render_complete(&mut self, emit_defaults: bool) -> MuxResult<Vec<u8>> {
        self.update_size(emit_defaults);
        let mut buf = Vec::with_capacity(self.total_len() as usize);
        self.render(&mut buf, emit_defaults)?;
        Ok(buf)
    }

}

/// 在预留空间内重写元素
///
/// 返回恰好 `reserved` 字节: 元素的新渲染结果, 剩余空间以 Void 填充.
/// 剩余恰为 1 字节时加宽元素自身的大小字段消化掉它.
/// 新头部超出预留空间时报 `ReservedSpaceTooSmall`.
pub fn render_into_reserved(
    element: &mut Element,
    reserved: u64,
    emit_defaults: bool,
) -> MuxResult<Vec<u8>> {
    element.update_size(emit_defaults);
    let mut total = element.total_len();
    if total > reserved {
        return Err(MuxError::ReservedSpaceTooSmall {
            needed: total,
            reserved,
        });
    }

    // 剩余 1 字节无法容纳最小的 Void (2 字节), 将元素大小字段加宽 1 字节
    if reserved - total == 1 {
        element.size_length = vint::size_len(element.cached_data_len).max(element.size_length) + 1;
        total = element.total_len();
        if total > reserved {
            return Err(MuxError::ReservedSpaceTooSmall {
                needed: total,
                reserved,
            });
        }
    }

    let mut buf = Vec::with_capacity(reserved as usize);
    element.render(&mut buf, emit_defaults)?;

    let leftover = reserved - total;
    if leftover > 0 {
        let mut void = make_void_total(leftover)?;
        void.update_size(emit_defaults);
        void.render(&mut buf, emit_defaults)?;
    }

    debug_assert_eq!(buf.len() as u64, reserved);
    Ok(buf)
}

/// 构造总大小 (头部 + 数据) 恰为 `total` 字节的 Void 元素
pub fn make_void_total(total: u64) -> MuxResult<Element> {
    if total < 2 {
        return Err(MuxError::Internal(format!(
            "Void 总大小至少 2 字节, 请求 {total}"
        )));
    }
    // id 1 字节 + 大小 VINT n 字节 + 数据
    let mut size_vint_len = 1usize;
    loop {
        let data_len = total - 1 - size_vint_len as u64;
        if vint::size_len(data_len) <= size_vint_len {
            let mut void = Element::void(data_len as usize);
            void.size_length = size_vint_len;
            return Ok(void);
        }
        size_vint_len += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leaf::LeafValue;
    use crate::registry::ids;

    #[test]
    fn test_叶子渲染_最小宽度() {
        let mut e = Element::with_value(ids::TRACK_NUMBER, LeafValue::UInt(1)).unwrap();
        let buf = e.render_complete(true).unwrap();
        // D7 81 01
        assert_eq!(buf, vec![0xD7, 0x81, 0x01]);
    }

    #[test]
    fn test_master_大小为子元素之和() {
        let mut seek = Element::new(ids::SEEK).unwrap();
        seek.get_child(ids::SEEK_ID)
            .set_binary(vec![0x15, 0x49, 0xA9, 0x66])
            .unwrap();
        seek.get_child(ids::SEEK_POSITION).set_uint(0x1000).unwrap();
        let total = seek.update_size(true);
        let children_total: u64 = seek
            .children()
            .iter()
            .map(|c| c.total_len())
            .sum();
        assert_eq!(total, 2 + 1 + children_total);

        let buf = seek.render_complete(true).unwrap();
        assert_eq!(buf.len() as u64, total);
        assert_eq!(&buf[..2], &[0x4D, 0xBB]);
    }

    #[test]
    fn test_update_size_幂等() {
        let mut info = Element::new(ids::INFO).unwrap();
        info.get_child(ids::MUXING_APP).set_str("taowa").unwrap();
        let first = info.update_size(true);
        let second = info.update_size(true);
        assert_eq!(first, second);
    }

    #[test]
    fn test_默认值省略() {
        let mut entry = Element::new(ids::TRACK_ENTRY).unwrap();
        entry.get_child(ids::FLAG_LACING).set_uint(1).unwrap();
        entry.get_child(ids::TRACK_NUMBER).set_uint(1).unwrap();

        let with_defaults = entry.render_complete(true).unwrap();
        let without = entry.render_complete(false).unwrap();
        // FlagLacing=1 等于默认值, emit_defaults=false 时被省略
        assert!(with_defaults.len() > without.len());
    }

    #[test]
    fn test_预留宽度渲染() {
        let mut e = Element::with_value(ids::SEEK_POSITION, LeafValue::UInt(5)).unwrap();
        e.size_length = 4;
        let buf = e.render_complete(true).unwrap();
        // 53AC + 4 字节大小 VINT + 1 字节数据
        assert_eq!(buf.len(), 2 + 4 + 1);
        assert_eq!(&buf[2..6], &[0x10, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_void_总大小精确() {
        for total in [2u64, 3, 100, 127, 128, 129, 10_000] {
            let mut void = make_void_total(total).unwrap();
            let buf = void.render_complete(true).unwrap();
            assert_eq!(buf.len() as u64, total, "请求 {total}");
            assert_eq!(buf[0], 0xEC);
        }
        assert!(make_void_total(1).is_err());
    }

    #[test]
    fn test_预留空间重写_精确填充() {
        let reserved = 64u64;
        let mut seek_head = Element::new(ids::SEEK_HEAD).unwrap();
        let i = seek_head.get_next_child(ids::SEEK, None);
        let seek = &mut seek_head.children_mut()[i];
        seek.get_child(ids::SEEK_ID)
            .set_binary(vec![0x15, 0x49, 0xA9, 0x66])
            .unwrap();
        seek.get_child(ids::SEEK_POSITION).set_uint(0x123).unwrap();

        let buf = render_into_reserved(&mut seek_head, reserved, true).unwrap();
        assert_eq!(buf.len() as u64, reserved);
        // 尾部为 Void 填充
        let tail_offset = seek_head.total_len() as usize;
        assert_eq!(buf[tail_offset], 0xEC);
    }

    #[test]
    fn test_预留空间重写_剩一字节() {
        // 构造 reserved = total + 1 的场景
        let mut e = Element::with_value(ids::SEEK_POSITION, LeafValue::UInt(5)).unwrap();
        e.update_size(true);
        let reserved = e.total_len() + 1;
        let buf = render_into_reserved(&mut e, reserved, true).unwrap();
        assert_eq!(buf.len() as u64, reserved);
    }

    #[test]
    fn test_预留空间不足报错() {
        let mut e =
            Element::with_value(ids::SEEK_POSITION, LeafValue::UInt(0x11223344)).unwrap();
        e.update_size(true);
        let too_small = e.total_len() - 1;
        assert!(matches!(
            render_into_reserved(&mut e, too_small, true),
            Err(MuxError::ReservedSpaceTooSmall { .. })
        ));
    }
}
