//! 统一错误类型定义.
//!
//! 所有 Taowa crate 共用的错误类型, 支持跨模块传播.
//! 按错误来源分为五类: 输入格式错误、XML 模式违规、同步/引用错误、
//! I/O 错误和内部不变量错误.

use thiserror::Error;

/// Taowa 统一错误类型
#[derive(Debug, Error)]
pub enum MuxError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的编解码器
    #[error("不支持的编解码器: {0}")]
    UnsupportedCodec(String),

    /// 不支持的参数组合
    #[error("不支持的参数: {0}")]
    UnsupportedParameter(String),

    /// 输入数据损坏 (带文件内字节偏移, 如果已知)
    #[error("输入数据损坏: {message}{}", fmt_offset(.offset))]
    MalformedInput {
        message: String,
        offset: Option<u64>,
    },

    /// 数据在预期位置之前结束
    #[error("数据意外结束")]
    UnexpectedEof,

    /// 数据不足, 需要更多输入 (解析器缓冲未满一帧)
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// VINT 首字节为零 (宽度标记溢出)
    #[error("VINT 宽度标记溢出: 首字节为零")]
    VintWidthOverflow,

    /// VINT 超过配置允许的最大宽度
    #[error("VINT 宽度 {actual} 超过允许的最大宽度 {max}")]
    VintTooWide { actual: u8, max: u8 },

    /// XML 模式违规 (未知元素、越界、缺少必需子元素等)
    #[error("XML 错误 ({path}, 偏移 {offset}): {message}")]
    Schema {
        path: String,
        offset: usize,
        message: String,
    },

    /// 块引用无法在保留窗口内解析
    #[error("无法解析的块引用: 轨道 {track}, 时间戳 {timestamp_ns} ns")]
    UnresolvedReference { track: u64, timestamp_ns: i64 },

    /// NALU 长度前缀宽度不足, 携带可修复问题的最小宽度
    #[error("NALU 长度前缀宽度不足, 此轨道至少需要 {required} 字节")]
    NaluSizeLengthTooSmall { required: u8 },

    /// 拼接轨道时 codec private 数据不一致
    #[error("codec private 数据不一致: {0}")]
    CodecPrivateMismatch(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 预留空间不足以容纳重写后的元素头 (内部不变量, 视为 bug)
    #[error("预留空间不足: 需要 {needed} 字节, 预留 {reserved} 字节")]
    ReservedSpaceTooSmall { needed: u64, reserved: u64 },

    /// 块引用跨越了保留窗口 (内部不变量, 视为 bug)
    #[error("块引用超出 Cluster 保留窗口: 轨道 {0}")]
    ClusterReferenceBeyondRetention(u64),

    /// 用户中止
    #[error("操作已取消")]
    Cancelled,

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Taowa 统一 Result 类型
pub type MuxResult<T> = Result<T, MuxError>;

fn fmt_offset(offset: &Option<u64>) -> String {
    match offset {
        Some(o) => format!(" (偏移 {o})"),
        None => String::new(),
    }
}

impl MuxError {
    /// 构造带偏移的输入格式错误
    pub fn malformed(message: impl Into<String>, offset: u64) -> Self {
        Self::MalformedInput {
            message: message.into(),
            offset: Some(offset),
        }
    }

    /// 构造无偏移的输入格式错误
    pub fn malformed_at_unknown(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
            offset: None,
        }
    }

    /// 是否属于 "需要更多数据" 一类的可恢复错误
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NeedMoreData | Self::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_错误显示_带偏移() {
        let e = MuxError::malformed("坏的同步字", 1234);
        assert_eq!(format!("{e}"), "输入数据损坏: 坏的同步字 (偏移 1234)");
    }

    #[test]
    fn test_错误显示_无偏移() {
        let e = MuxError::malformed_at_unknown("坏的同步字");
        assert_eq!(format!("{e}"), "输入数据损坏: 坏的同步字");
    }

    #[test]
    fn test_可恢复判断() {
        assert!(MuxError::NeedMoreData.is_recoverable());
        assert!(MuxError::Eof.is_recoverable());
        assert!(!MuxError::UnexpectedEof.is_recoverable());
    }

    #[test]
    fn test_io_错误转换() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no");
        let e: MuxError = io.into();
        assert!(matches!(e, MuxError::Io(_)));
    }
}
