//! 比特流读取器.
//!
//! 码流头部解析 (AC-3, DTS, HEVC, VC-1, AAC) 的共用基础设施.
//! 按大端位序读取 (MSB first), 并提供 HEVC 所需的指数哥伦布解码.

use crate::{MuxError, MuxResult};

/// 比特流读取器
///
/// 内部维护一个 64 位缓存字, 按需从数据中补充整字节.
///
/// # 示例
/// ```
/// use taowa_core::BitReader;
///
/// let data = [0b1011_0001, 0b0101_0101];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(br.read_bits(12).unwrap(), 0b0001_0101_0101);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 下一个待装入缓存的字节下标
    next_byte: usize,
    /// 缓存字, 有效位左对齐
    cache: u64,
    /// 缓存中的有效位数
    cached_bits: u32,
}

impl<'a> BitReader<'a> {
    /// 创建新的比特流读取器
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            next_byte: 0,
            cache: 0,
            cached_bits: 0,
        }
    }

    /// 剩余可读位数
    pub fn bits_remaining(&self) -> usize {
        (self.data.len() - self.next_byte) * 8 + self.cached_bits as usize
    }

    /// 已消耗的位数
    pub fn bits_consumed(&self) -> usize {
        self.data.len() * 8 - self.bits_remaining()
    }

    /// 当前字节位置 (向下取整)
    pub fn byte_position(&self) -> usize {
        self.bits_consumed() / 8
    }

    fn refill(&mut self) {
        while self.cached_bits <= 56 && self.next_byte < self.data.len() {
            self.cache |= u64::from(self.data[self.next_byte]) << (56 - self.cached_bits);
            self.cached_bits += 8;
            self.next_byte += 1;
        }
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> MuxResult<bool> {
        Ok(self.read_bits(1)? != 0)
    }

    /// 读取 N 个位 (最多 64 位), 返回值的低 N 位有效
    pub fn read_bits(&mut self, n: u32) -> MuxResult<u64> {
        if n == 0 {
            return Ok(0);
        }
        if n > 64 {
            return Err(MuxError::InvalidArgument(format!(
                "read_bits: n={n} 超过 64 位"
            )));
        }
        if (n as usize) > self.bits_remaining() {
            return Err(MuxError::UnexpectedEof);
        }

        let mut value = 0u64;
        let mut left = n;
        while left > 0 {
            self.refill();
            let take = left.min(self.cached_bits);
            let chunk = self.cache >> (64 - take);
            value = (value << take) | chunk;
            self.cache <<= take;
            self.cached_bits -= take;
            left -= take;
        }
        Ok(value)
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, mut n: u32) -> MuxResult<()> {
        while n > 0 {
            let step = n.min(64);
            self.read_bits(step)?;
            n -= step;
        }
        Ok(())
    }

    /// 读取无符号指数哥伦布编码 ue(v)
    ///
    /// HEVC 参数集解析使用. 前导零计数 + 1 位分隔 + 同长尾部.
    pub fn read_ue(&mut self) -> MuxResult<u64> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 63 {
                return Err(MuxError::malformed_at_unknown("指数哥伦布编码前导零过多"));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let tail = self.read_bits(leading_zeros)?;
        Ok((1u64 << leading_zeros) - 1 + tail)
    }

    /// 读取有符号指数哥伦布编码 se(v)
    pub fn read_se(&mut self) -> MuxResult<i64> {
        let ue = self.read_ue()?;
        // 映射: 0 -> 0, 1 -> 1, 2 -> -1, 3 -> 2, 4 -> -2, ...
        let half = ue.div_ceil(2) as i64;
        if ue % 2 == 1 { Ok(half) } else { Ok(-half) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_逐位读取() {
        let data = [0b1010_0000];
        let mut br = BitReader::new(&data);
        assert!(br.read_bit().unwrap());
        assert!(!br.read_bit().unwrap());
        assert!(br.read_bit().unwrap());
        assert!(!br.read_bit().unwrap());
    }

    #[test]
    fn test_跨字节读取() {
        let data = [0xAB, 0xCD, 0xEF];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(12).unwrap(), 0xABC);
        assert_eq!(br.read_bits(12).unwrap(), 0xDEF);
        assert_eq!(br.bits_remaining(), 0);
    }

    #[test]
    fn test_读取_64_位() {
        let data = [0xFF; 8];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(64).unwrap(), u64::MAX);
    }

    #[test]
    fn test_越界报错() {
        let data = [0x00];
        let mut br = BitReader::new(&data);
        assert!(br.read_bits(9).is_err());
    }

    #[test]
    fn test_跳过与位置() {
        let data = [0x12, 0x34, 0x56];
        let mut br = BitReader::new(&data);
        br.skip_bits(10).unwrap();
        assert_eq!(br.bits_consumed(), 10);
        assert_eq!(br.byte_position(), 1);
    }

    #[test]
    fn test_指数哥伦布_无符号() {
        // 码字: 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        let data = [0b1_010_011_0, 0b0100_0000];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_ue().unwrap(), 0);
        assert_eq!(br.read_ue().unwrap(), 1);
        assert_eq!(br.read_ue().unwrap(), 2);
        assert_eq!(br.read_ue().unwrap(), 3);
    }

    #[test]
    fn test_指数哥伦布_有符号() {
        // ue 序列 0, 1, 2 对应 se 序列 0, 1, -1
        let data = [0b1_010_011_0];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_se().unwrap(), 0);
        assert_eq!(br.read_se().unwrap(), 1);
        assert_eq!(br.read_se().unwrap(), -1);
    }
}
