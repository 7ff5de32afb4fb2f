//! 纳秒时间戳工具.
//!
//! 整个管线以带符号 64 位纳秒为时间单位; 写盘时由 TimecodeScale 换算.
//! 本模块提供时间码文本的格式化与解析, 供 XML 章节、SRT 读取器
//! 和命令行 `--sync`/`--split` 参数共用.

use crate::{MuxError, MuxResult};

/// 每秒纳秒数
pub const NS_PER_SECOND: i64 = 1_000_000_000;

/// 每毫秒纳秒数
pub const NS_PER_MS: i64 = 1_000_000;

/// 表示"未定义"的时间戳值
pub const NO_TIMESTAMP: i64 = i64::MIN;

/// 格式化纳秒时间戳为 `HH:MM:SS.nnnnnnnnn`
///
/// `precision` 为小数位数 (0..=9), 0 时省略小数点.
pub fn format_timestamp(timestamp_ns: i64, precision: usize) -> String {
    let precision = precision.min(9);
    let total_seconds = timestamp_ns / NS_PER_SECOND;
    let mut result = format!(
        "{:02}:{:02}:{:02}",
        total_seconds / 3600,
        (total_seconds / 60) % 60,
        total_seconds % 60,
    );
    if precision > 0 {
        let decimals = format!(".{:09}", timestamp_ns % NS_PER_SECOND);
        result.push_str(&decimals[..precision + 1]);
    }
    result
}

/// 解析 `[HH:]MM:SS[.fraction]` 形式的时间码为纳秒
///
/// 小数部分最多 9 位 (纳秒精度), 不足时按尾补零处理.
pub fn parse_timestamp(text: &str) -> MuxResult<i64> {
    let text = text.trim();
    let (integral, fraction) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text, None),
    };

    let parts: Vec<&str> = integral.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(MuxError::InvalidArgument(format!(
            "无效的时间码 '{text}': 应为 [HH:]MM:SS[.fraction]"
        )));
    }

    let mut seconds: i64 = 0;
    for part in &parts {
        let value: i64 = part
            .parse()
            .map_err(|_| MuxError::InvalidArgument(format!("无效的时间码分量 '{part}'")))?;
        if value < 0 {
            return Err(MuxError::InvalidArgument(format!(
                "时间码分量不能为负: '{part}'"
            )));
        }
        seconds = seconds * 60 + value;
    }

    let mut ns = seconds * NS_PER_SECOND;
    if let Some(fraction) = fraction {
        if fraction.is_empty() || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(MuxError::InvalidArgument(format!(
                "无效的时间码小数部分 '{fraction}': 最多 9 位数字"
            )));
        }
        let mut padded = fraction.to_owned();
        while padded.len() < 9 {
            padded.push('0');
        }
        ns += padded.parse::<i64>().expect("已验证为纯数字");
    }
    Ok(ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_格式化_完整精度() {
        assert_eq!(format_timestamp(90_500_000_000, 9), "00:01:30.500000000");
        assert_eq!(format_timestamp(3_661_000_000_123, 9), "01:01:01.000000123");
    }

    #[test]
    fn test_格式化_截断精度() {
        assert_eq!(format_timestamp(90_500_000_000, 3), "00:01:30.500");
        assert_eq!(format_timestamp(90_500_000_000, 0), "00:01:30");
    }

    #[test]
    fn test_解析_完整形式() {
        assert_eq!(parse_timestamp("00:01:30.500000000").unwrap(), 90_500_000_000);
        assert_eq!(parse_timestamp("01:01:01").unwrap(), 3_661_000_000_000);
    }

    #[test]
    fn test_解析_省略小时() {
        assert_eq!(parse_timestamp("01:30").unwrap(), 90_000_000_000);
        assert_eq!(parse_timestamp("01:30.5").unwrap(), 90_500_000_000);
    }

    #[test]
    fn test_解析_短小数补零() {
        assert_eq!(parse_timestamp("00:00:01.5").unwrap(), 1_500_000_000);
        assert_eq!(parse_timestamp("00:00:01.123").unwrap(), 1_123_000_000);
    }

    #[test]
    fn test_解析_拒绝非法输入() {
        assert!(parse_timestamp("90").is_err());
        assert!(parse_timestamp("a:b:c").is_err());
        assert!(parse_timestamp("00:00:01.1234567890").is_err());
        assert!(parse_timestamp("00:-1:00").is_err());
    }

    #[test]
    fn test_往返() {
        let ns = 12_345_678_901_234;
        assert_eq!(parse_timestamp(&format_timestamp(ns, 9)).unwrap(), ns);
    }
}
