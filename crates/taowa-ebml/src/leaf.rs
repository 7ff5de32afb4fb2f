//! 带类型的 EBML 叶子值.
//!
//! 整数按渲染时的最小宽度编码 (除非元素声明了更宽的默认宽度);
//! 浮点固定 4 或 8 字节; 字符串不以 NUL 结尾, 但读取时剥除尾部 NUL;
//! 日期为自 2001-01-01T00:00:00 UTC 起的带符号 8 字节纳秒数.

use bytes::Bytes;
use taowa_core::{MuxError, MuxResult};

use crate::registry::ElementKind;

/// 叶子元素的值
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    /// 无符号整数, 大端 1-8 字节
    UInt(u64),
    /// 有符号整数, 大端补码 1-8 字节
    SInt(i64),
    /// IEEE 754 大端浮点, 4 或 8 字节
    Float(f64),
    /// 8 位 ASCII 字符串
    String(String),
    /// UTF-8 字符串
    Utf8(String),
    /// 自 2001-01-01T00:00:00 UTC 起的纳秒数
    Date(i64),
    /// 原始字节
    Binary(Bytes),
}

impl LeafValue {
    /// 值对应的元素类型
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::UInt(_) => ElementKind::UInt,
            Self::SInt(_) => ElementKind::SInt,
            Self::Float(_) => ElementKind::Float,
            Self::String(_) => ElementKind::String,
            Self::Utf8(_) => ElementKind::Utf8,
            Self::Date(_) => ElementKind::Date,
            Self::Binary(_) => ElementKind::Binary,
        }
    }

    /// 渲染所需的数据字节数
    ///
    /// `min_size` 为元素声明的最小宽度 (0 表示最小编码).
    pub fn data_len(&self, min_size: usize) -> u64 {
        let natural = match self {
            Self::UInt(v) => uint_len(*v),
            Self::SInt(v) => sint_len(*v),
            // 浮点默认 8 字节, 除非声明为 4
            Self::Float(_) => {
                if min_size == 4 {
                    return 4;
                } else {
                    8
                }
            }
            Self::String(s) | Self::Utf8(s) => s.len(),
            Self::Date(_) => 8,
            Self::Binary(b) => b.len(),
        };
        natural.max(min_size) as u64
    }

    /// 按给定宽度渲染数据部分
    pub fn render(&self, buf: &mut Vec<u8>, data_len: u64) {
        match self {
            Self::UInt(v) => {
                buf.extend_from_slice(&v.to_be_bytes()[8 - data_len as usize..]);
            }
            Self::SInt(v) => {
                buf.extend_from_slice(&v.to_be_bytes()[8 - data_len as usize..]);
            }
            Self::Float(v) => {
                if data_len == 4 {
                    buf.extend_from_slice(&(*v as f32).to_be_bytes());
                } else {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
            }
            Self::String(s) | Self::Utf8(s) => {
                buf.extend_from_slice(s.as_bytes());
                // 声明宽度大于内容时以 NUL 填充
                for _ in s.len() as u64..data_len {
                    buf.push(0);
                }
            }
            Self::Date(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Self::Binary(b) => buf.extend_from_slice(b),
        }
    }

    /// 从数据字节解析指定类型的值
    pub fn parse(kind: ElementKind, data: &[u8]) -> MuxResult<Self> {
        match kind {
            ElementKind::UInt => {
                if data.len() > 8 {
                    return Err(MuxError::malformed_at_unknown(format!(
                        "无符号整数长度 {} 超过 8 字节",
                        data.len()
                    )));
                }
                let mut v = 0u64;
                for &b in data {
                    v = (v << 8) | u64::from(b);
                }
                Ok(Self::UInt(v))
            }
            ElementKind::SInt => {
                if data.len() > 8 {
                    return Err(MuxError::malformed_at_unknown(format!(
                        "有符号整数长度 {} 超过 8 字节",
                        data.len()
                    )));
                }
                let mut v = 0i64;
                if let Some((&first, rest)) = data.split_first() {
                    // 首字节决定符号, 先符号扩展再逐字节左移
                    v = i64::from(first as i8);
                    for &b in rest {
                        v = (v << 8) | i64::from(b);
                    }
                }
                Ok(Self::SInt(v))
            }
            ElementKind::Float => match data.len() {
                0 => Ok(Self::Float(0.0)),
                4 => Ok(Self::Float(f64::from(f32::from_be_bytes(
                    data.try_into().expect("长度已验证"),
                )))),
                8 => Ok(Self::Float(f64::from_be_bytes(
                    data.try_into().expect("长度已验证"),
                ))),
                n => Err(MuxError::malformed_at_unknown(format!(
                    "浮点数长度 {n} 无效, 应为 4 或 8 字节"
                ))),
            },
            ElementKind::String => {
                let stripped = strip_trailing_nul(data);
                if !stripped.is_ascii() {
                    return Err(MuxError::malformed_at_unknown("字符串含非 ASCII 字节"));
                }
                Ok(Self::String(
                    String::from_utf8(stripped.to_vec()).expect("ASCII 必为合法 UTF-8"),
                ))
            }
            ElementKind::Utf8 => {
                let stripped = strip_trailing_nul(data);
                let s = String::from_utf8(stripped.to_vec())
                    .map_err(|_| MuxError::malformed_at_unknown("字符串不是合法 UTF-8"))?;
                Ok(Self::Utf8(s))
            }
            ElementKind::Date => {
                if data.len() != 8 {
                    return Err(MuxError::malformed_at_unknown(format!(
                        "日期长度 {} 无效, 应为 8 字节",
                        data.len()
                    )));
                }
                Ok(Self::Date(i64::from_be_bytes(
                    data.try_into().expect("长度已验证"),
                )))
            }
            ElementKind::Binary => Ok(Self::Binary(Bytes::copy_from_slice(data))),
            ElementKind::Master => Err(MuxError::Internal(
                "master 元素没有叶子值".into(),
            )),
        }
    }

    /// 取无符号整数值
    pub fn as_uint(&self) -> MuxResult<u64> {
        match self {
            Self::UInt(v) => Ok(*v),
            other => Err(type_mismatch("uint", other)),
        }
    }

    /// 取有符号整数值
    pub fn as_sint(&self) -> MuxResult<i64> {
        match self {
            Self::SInt(v) => Ok(*v),
            other => Err(type_mismatch("sint", other)),
        }
    }

    /// 取浮点值
    pub fn as_float(&self) -> MuxResult<f64> {
        match self {
            Self::Float(v) => Ok(*v),
            other => Err(type_mismatch("float", other)),
        }
    }

    /// 取字符串值 (ASCII 或 UTF-8)
    pub fn as_str(&self) -> MuxResult<&str> {
        match self {
            Self::String(s) | Self::Utf8(s) => Ok(s),
            other => Err(type_mismatch("string", other)),
        }
    }

    /// 取二进制值
    pub fn as_binary(&self) -> MuxResult<&Bytes> {
        match self {
            Self::Binary(b) => Ok(b),
            other => Err(type_mismatch("binary", other)),
        }
    }

    /// 取日期值 (纳秒)
    pub fn as_date(&self) -> MuxResult<i64> {
        match self {
            Self::Date(v) => Ok(*v),
            other => Err(type_mismatch("date", other)),
        }
    }
}

fn type_mismatch(expected: &str, got: &LeafValue) -> MuxError {
    MuxError::Internal(format!("元素值类型不符: 期望 {expected}, 实为 {:?}", got.kind()))
}

fn strip_trailing_nul(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &data[..end]
}

/// 无符号整数的最小编码字节数
pub const fn uint_len(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(8)
    }
}

/// 有符号整数的最小编码字节数 (补码)
pub const fn sint_len(value: i64) -> usize {
    let mut len = 1;
    while len < 8 {
        let bits = 8 * len;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        if value >= min && value <= max {
            return len;
        }
        len += 1;
    }
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_最小宽度() {
        assert_eq!(uint_len(0), 1);
        assert_eq!(uint_len(255), 1);
        assert_eq!(uint_len(256), 2);
        assert_eq!(uint_len(u64::MAX), 8);
    }

    #[test]
    fn test_sint_最小宽度() {
        assert_eq!(sint_len(0), 1);
        assert_eq!(sint_len(127), 1);
        assert_eq!(sint_len(128), 2);
        assert_eq!(sint_len(-128), 1);
        assert_eq!(sint_len(-129), 2);
    }

    #[test]
    fn test_uint_渲染与解析() {
        let v = LeafValue::UInt(0x012345);
        let mut buf = Vec::new();
        v.render(&mut buf, v.data_len(0));
        assert_eq!(buf, vec![0x01, 0x23, 0x45]);
        assert_eq!(LeafValue::parse(ElementKind::UInt, &buf).unwrap(), v);
    }

    #[test]
    fn test_uint_声明宽度() {
        let v = LeafValue::UInt(5);
        let mut buf = Vec::new();
        v.render(&mut buf, v.data_len(4));
        assert_eq!(buf, vec![0, 0, 0, 5]);
    }

    #[test]
    fn test_sint_负数往返() {
        for value in [-1i64, -256, -65536, 127, -32768] {
            let v = LeafValue::SInt(value);
            let mut buf = Vec::new();
            v.render(&mut buf, v.data_len(0));
            assert_eq!(
                LeafValue::parse(ElementKind::SInt, &buf).unwrap(),
                v,
                "值 {value}"
            );
        }
    }

    #[test]
    fn test_float_4_字节() {
        let v = LeafValue::Float(48000.0);
        let mut buf = Vec::new();
        v.render(&mut buf, v.data_len(4));
        assert_eq!(buf.len(), 4);
        assert_eq!(LeafValue::parse(ElementKind::Float, &buf).unwrap(), v);
    }

    #[test]
    fn test_字符串剥除尾部_nul() {
        let parsed = LeafValue::parse(ElementKind::String, b"abc\x00\x00").unwrap();
        assert_eq!(parsed, LeafValue::String("abc".into()));
    }

    #[test]
    fn test_ascii_校验() {
        assert!(LeafValue::parse(ElementKind::String, "中文".as_bytes()).is_err());
        assert!(LeafValue::parse(ElementKind::Utf8, "中文".as_bytes()).is_ok());
    }

    #[test]
    fn test_日期固定_8_字节() {
        let v = LeafValue::Date(-123_456_789);
        let mut buf = Vec::new();
        v.render(&mut buf, v.data_len(0));
        assert_eq!(buf.len(), 8);
        assert_eq!(LeafValue::parse(ElementKind::Date, &buf).unwrap(), v);
        assert!(LeafValue::parse(ElementKind::Date, &buf[..4]).is_err());
    }

    #[test]
    fn test_类型访问器() {
        assert_eq!(LeafValue::UInt(7).as_uint().unwrap(), 7);
        assert!(LeafValue::UInt(7).as_str().is_err());
        assert_eq!(LeafValue::Utf8("hi".into()).as_str().unwrap(), "hi");
    }
}
