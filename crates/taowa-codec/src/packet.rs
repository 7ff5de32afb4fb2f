//! 封装数据包 (Packet).
//!
//! Packetizer 产出、Cluster 调度器消费的一帧数据. 时间戳一律为
//! 绝对纳秒; 调度器在渲染时换算为簇内相对增量. 负载所有权随
//! 入队转移, 渲染完成后随 Cluster 一起释放.

use bytes::Bytes;

/// 表示 "无引用" 的时间戳哨兵
pub const NO_REFERENCE: i64 = i64::MIN;

/// 封装数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 帧数据
    pub data: Bytes,
    /// 绝对时间戳 (纳秒)
    pub timestamp_ns: i64,
    /// 线上显式时长 (纳秒), None 表示使用轨道默认时长
    pub duration_ns: Option<i64>,
    /// 实际时长提示 (纳秒, 不上线); 线上时长被省略时
    /// 仍用于总时长统计
    pub duration_hint_ns: i64,
    /// 所属轨道的线上编号 (TrackNumber)
    pub track: u64,
    /// 是否为关键帧
    pub key_frame: bool,
    /// 后向引用帧的绝对时间戳 (纳秒), NO_REFERENCE 表示无
    pub bref_ns: i64,
    /// 前向引用帧的绝对时间戳 (纳秒), NO_REFERENCE 表示无
    pub fref_ns: i64,
    /// 可丢弃标志 (SimpleBlock discardable 位)
    pub discardable: bool,
    /// 引用优先级 (BlockGroup ReferencePriority)
    pub reference_priority: u64,
}

impl Packet {
    /// 创建关键帧数据包
    pub fn key_frame(track: u64, timestamp_ns: i64, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            timestamp_ns,
            duration_ns: None,
            duration_hint_ns: 0,
            track,
            key_frame: true,
            bref_ns: NO_REFERENCE,
            fref_ns: NO_REFERENCE,
            discardable: false,
            reference_priority: 0,
        }
    }

    /// 创建带后向引用的数据包 (P 帧)
    pub fn with_bref(track: u64, timestamp_ns: i64, bref_ns: i64, data: impl Into<Bytes>) -> Self {
        Self {
            key_frame: false,
            bref_ns,
            ..Self::key_frame(track, timestamp_ns, data)
        }
    }

    /// 是否携带任何引用
    pub fn has_references(&self) -> bool {
        self.bref_ns != NO_REFERENCE || self.fref_ns != NO_REFERENCE
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_关键帧构造() {
        let p = Packet::key_frame(1, 0, vec![1u8, 2, 3]);
        assert!(p.key_frame);
        assert!(!p.has_references());
        assert_eq!(p.size(), 3);
    }

    #[test]
    fn test_引用构造() {
        let p = Packet::with_bref(1, 40_000_000, 0, vec![0u8]);
        assert!(!p.key_frame);
        assert!(p.has_references());
        assert_eq!(p.bref_ns, 0);
        assert_eq!(p.fref_ns, NO_REFERENCE);
    }
}
