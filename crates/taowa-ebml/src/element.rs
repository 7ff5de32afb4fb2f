//! EBML 元素树.
//!
//! 元素是带描述符的标签变体: 叶子 (带类型值)、master (有序子元素表)
//! 或 dummy (未注册 ID 的原始字节). 子元素位置有意义 — 部分工具和
//! 规范依赖首个出现的子元素, 因此 master 保持插入顺序,
//! `sort()` 仅在渲染前按规范顺序稳定排序.

use bytes::Bytes;
use taowa_core::{MuxError, MuxResult};

use crate::leaf::LeafValue;
use crate::registry::{self, DefaultValue, Descriptor, ElementKind, ids};

/// 元素负载
#[derive(Debug, Clone)]
pub enum Payload {
    /// 叶子值
    Leaf(LeafValue),
    /// 有序子元素表
    Master(Vec<Element>),
    /// 未注册元素的原始字节 (按 dummy binary 跳过)
    Dummy { id: u32, data: Bytes },
}

/// EBML 元素
#[derive(Debug, Clone)]
pub struct Element {
    desc: &'static Descriptor,
    pub(crate) payload: Payload,
    /// 值是否被显式设置 (区别于携带默认值)
    value_set: bool,
    /// 数据大小 VINT 的最小宽度 (0 = 最小编码, 预留重写空间时加宽)
    pub(crate) size_length: usize,
    /// update_size 备忘的数据部分字节数
    pub(crate) cached_data_len: u64,
}

impl Element {
    /// 按注册表创建元素, 叶子携带声明的默认值 (value_set = false)
    pub fn new(id: u32) -> MuxResult<Self> {
        let desc = registry::by_id(id)
            .ok_or_else(|| MuxError::Internal(format!("未注册的元素 ID {id:#X}")))?;
        Ok(Self::from_descriptor(desc))
    }

    /// 从描述符创建元素
    pub fn from_descriptor(desc: &'static Descriptor) -> Self {
        let payload = match desc.kind {
            ElementKind::Master => Payload::Master(Vec::new()),
            kind => Payload::Leaf(default_leaf_value(kind, desc.default)),
        };
        Self {
            desc,
            payload,
            value_set: false,
            size_length: 0,
            cached_data_len: 0,
        }
    }

    /// 创建带显式值的叶子元素
    pub fn with_value(id: u32, value: LeafValue) -> MuxResult<Self> {
        let mut e = Self::new(id)?;
        e.set(value)?;
        Ok(e)
    }

    /// 创建未注册 ID 的 dummy 元素
    pub fn dummy(id: u32, data: Bytes) -> Self {
        Self {
            desc: &registry::DUMMY,
            payload: Payload::Dummy { id, data },
            value_set: true,
            size_length: 0,
            cached_data_len: 0,
        }
    }

    /// 创建指定数据长度的 Void 元素 (预留空间, 可稍后原地覆盖)
    pub fn void(data_len: usize) -> Self {
        let mut e = Self::new(ids::VOID).expect("Void 已注册");
        e.set(LeafValue::Binary(Bytes::from(vec![0u8; data_len])))
            .expect("Void 为 binary 类型");
        e
    }

    /// 元素描述符
    pub fn descriptor(&self) -> &'static Descriptor {
        self.desc
    }

    /// 元素 ID (dummy 返回其实际线上 ID)
    pub fn id(&self) -> u32 {
        match &self.payload {
            Payload::Dummy { id, .. } => *id,
            _ => self.desc.id,
        }
    }

    /// 元素负载
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// 是否为 master 元素
    pub fn is_master(&self) -> bool {
        matches!(self.payload, Payload::Master(_))
    }

    // ========================
    // 叶子值访问
    // ========================

    /// 设置叶子值 (类型必须与描述符一致), 置位 value_set
    pub fn set(&mut self, value: LeafValue) -> MuxResult<()> {
        match &mut self.payload {
            Payload::Leaf(slot) => {
                if value.kind() != self.desc.kind {
                    return Err(MuxError::Internal(format!(
                        "元素 {} 期望 {:?}, 传入 {:?}",
                        self.desc.name,
                        self.desc.kind,
                        value.kind()
                    )));
                }
                *slot = value;
                self.value_set = true;
                Ok(())
            }
            _ => Err(MuxError::Internal(format!(
                "元素 {} 不是叶子元素",
                self.desc.name
            ))),
        }
    }

    /// 设置无符号整数值
    pub fn set_uint(&mut self, v: u64) -> MuxResult<()> {
        self.set(LeafValue::UInt(v))
    }

    /// 设置有符号整数值
    pub fn set_sint(&mut self, v: i64) -> MuxResult<()> {
        self.set(LeafValue::SInt(v))
    }

    /// 设置浮点值
    pub fn set_float(&mut self, v: f64) -> MuxResult<()> {
        self.set(LeafValue::Float(v))
    }

    /// 设置字符串值 (按描述符类型选 ASCII 或 UTF-8)
    pub fn set_str(&mut self, v: &str) -> MuxResult<()> {
        let value = match self.desc.kind {
            ElementKind::String => LeafValue::String(v.to_owned()),
            _ => LeafValue::Utf8(v.to_owned()),
        };
        self.set(value)
    }

    /// 设置二进制值
    pub fn set_binary(&mut self, v: impl Into<Bytes>) -> MuxResult<()> {
        self.set(LeafValue::Binary(v.into()))
    }

    /// 设置日期值 (2001 纪元纳秒)
    pub fn set_date(&mut self, ns: i64) -> MuxResult<()> {
        self.set(LeafValue::Date(ns))
    }

    /// 叶子值 (master 元素返回 None)
    pub fn value(&self) -> Option<&LeafValue> {
        match &self.payload {
            Payload::Leaf(v) => Some(v),
            _ => None,
        }
    }

    fn leaf(&self) -> MuxResult<&LeafValue> {
        self.value().ok_or_else(|| {
            MuxError::Internal(format!("元素 {} 不是叶子元素", self.desc.name))
        })
    }

    /// 取无符号整数值
    pub fn as_uint(&self) -> MuxResult<u64> {
        self.leaf()?.as_uint()
    }

    /// 取有符号整数值
    pub fn as_sint(&self) -> MuxResult<i64> {
        self.leaf()?.as_sint()
    }

    /// 取浮点值
    pub fn as_float(&self) -> MuxResult<f64> {
        self.leaf()?.as_float()
    }

    /// 取字符串值
    pub fn as_str(&self) -> MuxResult<&str> {
        self.leaf()?.as_str()
    }

    /// 取二进制值
    pub fn as_binary(&self) -> MuxResult<&Bytes> {
        self.leaf()?.as_binary()
    }

    /// 值是否被显式设置
    pub fn is_value_set(&self) -> bool {
        self.value_set
    }

    /// 值是否等于描述符声明的默认值
    ///
    /// 无声明默认值的元素恒为 false. 等于默认值的叶子在
    /// emit_defaults = false 时可省略渲染.
    pub fn is_default_value(&self) -> bool {
        let Payload::Leaf(value) = &self.payload else {
            return false;
        };
        match (self.desc.default, value) {
            (DefaultValue::UInt(d), LeafValue::UInt(v)) => *v == d,
            (DefaultValue::Float(d), LeafValue::Float(v)) => *v == d,
            (DefaultValue::Str(d), LeafValue::String(v) | LeafValue::Utf8(v)) => v == d,
            _ => false,
        }
    }

    // ========================
    // master 子元素操作
    // ========================

    /// 子元素表 (非 master 返回空切片)
    pub fn children(&self) -> &[Element] {
        match &self.payload {
            Payload::Master(c) => c,
            _ => &[],
        }
    }

    /// 可变子元素表
    pub fn children_mut(&mut self) -> &mut Vec<Element> {
        match &mut self.payload {
            Payload::Master(c) => c,
            _ => panic!("children_mut 只能在 master 元素上调用"),
        }
    }

    /// 追加子元素
    pub fn push(&mut self, child: Element) -> &mut Element {
        let children = self.children_mut();
        children.push(child);
        children.last_mut().expect("刚刚追加")
    }

    /// 查找首个指定 ID 的子元素
    pub fn find_child(&self, id: u32) -> Option<&Element> {
        self.children().iter().find(|c| c.id() == id)
    }

    /// 查找首个指定 ID 的可变子元素
    pub fn find_child_mut(&mut self, id: u32) -> Option<&mut Element> {
        self.children_mut().iter_mut().find(|c| c.id() == id)
    }

    /// 获取首个指定 ID 的子元素, 不存在则以默认值创建 (get-or-create)
    pub fn get_child(&mut self, id: u32) -> &mut Element {
        let pos = self.children().iter().position(|c| c.id() == id);
        match pos {
            Some(i) => &mut self.children_mut()[i],
            None => self.push(Element::new(id).expect("已注册的子元素 ID")),
        }
    }

    /// 获取 `prev` 之后下一个指定 ID 的子元素的下标
    ///
    /// 不存在时在末个同类之后 (实现为表尾) 追加一个并返回其下标.
    /// `prev` 为 None 表示取首个.
    pub fn get_next_child(&mut self, id: u32, prev: Option<usize>) -> usize {
        let start = prev.map_or(0, |p| p + 1);
        let found = self
            .children()
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, c)| c.id() == id)
            .map(|(i, _)| i);
        match found {
            Some(i) => i,
            None => {
                self.push(Element::new(id).expect("已注册的子元素 ID"));
                self.children().len() - 1
            }
        }
    }

    /// 移除指定下标的子元素
    pub fn remove(&mut self, index: usize) -> Element {
        self.children_mut().remove(index)
    }

    /// 移除全部指定 ID 的子元素
    pub fn remove_all(&mut self, id: u32) {
        self.children_mut().retain(|c| c.id() != id);
    }

    /// 按描述符声明顺序稳定排序子元素
    ///
    /// Cluster 例外: SimpleBlock 与 BlockGroup 共享排序键,
    /// 块保持进入顺序 (即簇内时间顺序).
    pub fn sort(&mut self) {
        let desc = self.desc;
        if let Payload::Master(children) = &mut self.payload {
            children.sort_by_key(|c| {
                let mut id = c.id();
                if desc.id == ids::CLUSTER && id == ids::BLOCK_GROUP {
                    id = ids::SIMPLE_BLOCK;
                }
                desc.child_order(id)
            });
        }
    }

    /// 递归注入缺失的"必需且有默认值"子元素
    pub fn fix_mandatory(&mut self) {
        let desc = self.desc;
        if !self.is_master() {
            return;
        }
        for &child_id in desc.children {
            let child_desc = registry::by_id(child_id).expect("子元素表均已注册");
            if child_desc.mandatory
                && child_desc.default != DefaultValue::None
                && self.find_child(child_id).is_none()
            {
                self.push(Element::from_descriptor(child_desc));
            }
        }
        for child in self.children_mut() {
            child.fix_mandatory();
        }
    }
}

/// 元素相等: 同 ID、同类型值 (二进制/字符串逐字节, 数值按值,
/// 日期按纪元纳秒), master 按位置逐个比较子元素.
impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        if self.id() != other.id() {
            return false;
        }
        match (&self.payload, &other.payload) {
            (Payload::Leaf(a), Payload::Leaf(b)) => a == b,
            (Payload::Master(a), Payload::Master(b)) => a == b,
            (Payload::Dummy { data: a, .. }, Payload::Dummy { data: b, .. }) => a == b,
            _ => false,
        }
    }
}

fn default_leaf_value(kind: ElementKind, default: DefaultValue) -> LeafValue {
    match (kind, default) {
        (ElementKind::UInt, DefaultValue::UInt(v)) => LeafValue::UInt(v),
        (ElementKind::UInt, _) => LeafValue::UInt(0),
        (ElementKind::SInt, _) => LeafValue::SInt(0),
        (ElementKind::Float, DefaultValue::Float(v)) => LeafValue::Float(v),
        (ElementKind::Float, _) => LeafValue::Float(0.0),
        (ElementKind::String, DefaultValue::Str(v)) => LeafValue::String(v.to_owned()),
        (ElementKind::String, _) => LeafValue::String(String::new()),
        (ElementKind::Utf8, DefaultValue::Str(v)) => LeafValue::Utf8(v.to_owned()),
        (ElementKind::Utf8, _) => LeafValue::Utf8(String::new()),
        (ElementKind::Date, _) => LeafValue::Date(0),
        (ElementKind::Binary, _) => LeafValue::Binary(Bytes::new()),
        (ElementKind::Master, _) => unreachable!("master 无叶子默认值"),
    }
}
