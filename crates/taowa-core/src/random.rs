//! 伪随机 UID 生成.
//!
//! SegmentUID、TrackUID、ChapterUID 等需要全局不易碰撞的随机值,
//! 不要求密码学强度. xorshift64* 以启动时间和进程内计数器播种.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static STATE: AtomicU64 = AtomicU64::new(0);

fn seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E37_79B9_7F4A_7C15);
    nanos | 1
}

/// 生成一个非零随机 u64
pub fn random_u64() -> u64 {
    let mut current = STATE.load(Ordering::Relaxed);
    if current == 0 {
        current = seed();
    }
    // xorshift64*
    let mut x = current;
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    STATE.store(x, Ordering::Relaxed);
    let value = x.wrapping_mul(0x2545_F491_4F6C_DD1D);
    if value == 0 { 1 } else { value }
}

/// 生成随机字节序列 (SegmentUID 等 16 字节 UID)
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let chunk = random_u64().to_be_bytes();
        let take = (len - out.len()).min(8);
        out.extend_from_slice(&chunk[..take]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_非零且变化() {
        let a = random_u64();
        let b = random_u64();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_字节长度() {
        assert_eq!(random_bytes(16).len(), 16);
        assert_eq!(random_bytes(3).len(), 3);
        assert_ne!(random_bytes(16), random_bytes(16));
    }
}
