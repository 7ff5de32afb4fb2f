//! Cluster 调度器.
//!
//! 接收所有 Packetizer 交来的多路 Packet 流, 按时间跨度与数据量
//! 切簇, 并保证每个 Block 的引用目标 (bref/fref) 在写出时均已
//! 落盘或位于同簇之内. 簇内块保持到达顺序 (单轨内即时间顺序,
//! 跨轨为入队交织顺序).
//!
//! 块时间戳在线上是相对簇时间戳的带符号 16 位增量, 这把簇的
//! 跨度限制在约 ±32.7 秒; 切簇阈值取防御性的 30 秒, 保证任何
//! 合法引用都能表示.

use std::collections::{HashMap, VecDeque};

use log::debug;
use taowa_codec::Packet;
use taowa_codec::packet::NO_REFERENCE;
use taowa_core::{MuxError, MuxResult};
use taowa_ebml::{Element, ids, vint};

bitflags::bitflags! {
    /// 块头标志位
    ///
    /// KEYFRAME 与 DISCARDABLE 仅对 SimpleBlock 有意义;
    /// 花边位在 BlockGroup 的 Block 中同样有效.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        /// 关键帧 (仅 SimpleBlock)
        const KEYFRAME = 0x80;
        /// 不可见帧
        const INVISIBLE = 0x08;
        /// Xiph 花边
        const LACING_XIPH = 0x02;
        /// 定长花边
        const LACING_FIXED = 0x04;
        /// EBML 花边
        const LACING_EBML = 0x06;
        /// 可丢弃 (仅 SimpleBlock)
        const DISCARDABLE = 0x01;
    }
}

/// Cue 生成策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CueStrategy {
    /// 不生成
    None,
    /// 仅关键帧
    #[default]
    IFrames,
    /// 全部块
    All,
    /// 稀疏 (关键帧, 但至少间隔 2 秒)
    Sparse,
}

/// 调度器配置
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// TimecodeScale (纳秒)
    pub timecode_scale: u64,
    /// 单簇最大时间跨度 (纳秒)
    pub max_span_ns: i64,
    /// 单簇最大数据量 (字节)
    pub max_size: usize,
    /// 背压阈值: 在途数据超过该值时 `is_full` 置位
    pub max_buffered_bytes: usize,
    /// 引用保留窗口 (簇数)
    pub retention_clusters: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timecode_scale: 1_000_000,
            // 防御性切簇: 远在线上 ±32767ms 界限之内
            max_span_ns: 30_000 * 1_000_000,
            max_size: 64 * 1024 * 1024,
            max_buffered_bytes: 128 * 1024 * 1024,
            retention_clusters: 2,
        }
    }
}

/// 渲染完成的簇
#[derive(Debug)]
pub struct RenderedCluster {
    /// 完整的簇字节 (含元素头)
    pub bytes: Vec<u8>,
    /// 簇时间戳 (纳秒)
    pub timestamp_ns: i64,
    /// 簇内最晚的块结束时间 (时间戳 + 时长, 纳秒), Duration 回填用
    pub end_ns: i64,
    /// 应写入 Cues 的条目
    pub cue_entries: Vec<CueEntry>,
}

/// 一条 Cue 索引项 (簇内)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueEntry {
    /// 块时间戳 (纳秒)
    pub time_ns: i64,
    /// 轨道编号
    pub track: u64,
    /// 簇内块序号 (1 起)
    pub block_number: u64,
}

struct QueuedPacket {
    /// 全局入队序号 (稳定顺序)
    id: u64,
    packet: Packet,
}

struct WrittenPacket {
    track: u64,
    timestamp_ns: i64,
    cluster_index: u64,
}

/// Cluster 调度器
pub struct ClusterScheduler {
    config: SchedulerConfig,
    /// 当前开放簇的数据包 (到达顺序)
    open: Vec<QueuedPacket>,
    open_base_ns: i64,
    open_max_ns: i64,
    open_bytes: usize,
    /// 全局入队计数, 提供稳定顺序
    next_id: u64,
    /// 已渲染簇计数
    cluster_index: u64,
    /// 上一个簇的完整字节数 (PrevSize)
    prev_cluster_size: Option<u64>,
    /// 保留窗口内已写出的包 (引用解析)
    written: VecDeque<WrittenPacket>,
    /// 每轨道的 Cue 策略
    cue_strategies: HashMap<u64, CueStrategy>,
    /// 每轨道最近一次生成 Cue 的时间 (Sparse 用)
    last_cue_ns: HashMap<u64, i64>,
    /// 渲染完成、等待落盘的簇 (顺序即写出顺序)
    pending: Vec<RenderedCluster>,
}

impl ClusterScheduler {
    /// 创建调度器
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            open: Vec::new(),
            open_base_ns: 0,
            open_max_ns: 0,
            open_bytes: 0,
            next_id: 0,
            cluster_index: 0,
            prev_cluster_size: None,
            written: VecDeque::new(),
            cue_strategies: HashMap::new(),
            last_cue_ns: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// 配置某轨道的 Cue 策略
    pub fn set_cue_strategy(&mut self, track: u64, strategy: CueStrategy) {
        self.cue_strategies.insert(track, strategy);
    }

    /// 背压信号: 在途数据是否超限 (调用方应暂缓读取)
    pub fn is_full(&self) -> bool {
        self.open_bytes > self.config.max_buffered_bytes
    }

    /// 入队一个数据包
    ///
    /// 导致当前簇关闭时, 渲染结果排入待落盘队列,
    /// 由 `take_rendered` 取走.
    pub fn add_packet(&mut self, packet: Packet) -> MuxResult<()> {
        if !self.open.is_empty() {
            let span = packet
                .timestamp_ns
                .max(self.open_max_ns)
                .saturating_sub(self.open_base_ns.min(packet.timestamp_ns));
            if span > self.config.max_span_ns
                || self.open_bytes + packet.size() > self.config.max_size
            {
                self.render_open()?;
            }
        }

        if self.open.is_empty() {
            self.open_base_ns = packet.timestamp_ns;
            self.open_max_ns = packet.timestamp_ns;
        } else {
            self.open_base_ns = self.open_base_ns.min(packet.timestamp_ns);
            self.open_max_ns = self.open_max_ns.max(packet.timestamp_ns);
        }
        self.open_bytes += packet.size();
        let id = self.next_id;
        self.next_id += 1;
        self.open.push(QueuedPacket { id, packet });
        Ok(())
    }

    /// 关闭并渲染当前簇 (收尾时调用)
    pub fn flush(&mut self) -> MuxResult<()> {
        if !self.open.is_empty() {
            self.render_open()?;
        }
        Ok(())
    }

    /// 取走全部渲染完成的簇 (顺序即写出顺序)
    pub fn take_rendered(&mut self) -> Vec<RenderedCluster> {
        std::mem::take(&mut self.pending)
    }

    fn render_open(&mut self) -> MuxResult<()> {
        let scale = self.config.timecode_scale as i64;
        let cluster_ts = self
            .open
            .iter()
            .map(|q| q.packet.timestamp_ns)
            .min()
            .expect("渲染时簇非空");
        let cluster_scaled = cluster_ts / scale;

        let mut cluster = Element::new(ids::CLUSTER)?;
        cluster
            .get_child(ids::CLUSTER_TIMECODE)
            .set_uint(cluster_scaled as u64)?;
        if let Some(prev) = self.prev_cluster_size {
            cluster.get_child(ids::CLUSTER_PREV_SIZE).set_uint(prev)?;
        }

        let mut cue_entries = Vec::new();
        let mut end_ns = cluster_ts;
        let packets = std::mem::take(&mut self.open);
        for (index, queued) in packets.iter().enumerate() {
            let p = &queued.packet;
            let delta = p.timestamp_ns / scale - cluster_scaled;
            if !(i16::MIN as i64..=i16::MAX as i64).contains(&delta) {
                return Err(MuxError::Internal(format!(
                    "簇内块时间增量 {delta} 超出带符号 16 位范围"
                )));
            }
            let block_number = index as u64 + 1;

            let simple = !p.has_references() && p.duration_ns.is_none()
                && p.reference_priority == 0;
            if simple {
                let mut flags = BlockFlags::empty();
                if p.key_frame {
                    flags |= BlockFlags::KEYFRAME;
                }
                if p.discardable {
                    flags |= BlockFlags::DISCARDABLE;
                }
                let body = block_binary(p.track, delta as i16, flags, &p.data)?;
                cluster
                    .push(Element::new(ids::SIMPLE_BLOCK)?)
                    .set_binary(body)?;
            } else {
                let mut group = Element::new(ids::BLOCK_GROUP)?;
                let body = block_binary(p.track, delta as i16, BlockFlags::empty(), &p.data)?;
                group.push(Element::new(ids::BLOCK)?).set_binary(body)?;
                if let Some(duration) = p.duration_ns {
                    group
                        .get_child(ids::BLOCK_DURATION)
                        .set_uint((duration / scale) as u64)?;
                }
                if p.reference_priority > 0 {
                    group
                        .get_child(ids::REFERENCE_PRIORITY)
                        .set_uint(p.reference_priority)?;
                }
                for reference in [p.bref_ns, p.fref_ns] {
                    if reference == NO_REFERENCE {
                        continue;
                    }
                    self.resolve_reference(&packets[..index], p.track, reference)?;
                    let ref_delta = reference / scale - p.timestamp_ns / scale;
                    group
                        .push(Element::new(ids::REFERENCE_BLOCK)?)
                        .set_sint(ref_delta)?;
                }
                cluster.push(group);
            }

            end_ns = end_ns.max(p.timestamp_ns + p.duration_ns.unwrap_or(p.duration_hint_ns));
            if self.wants_cue(p.track, p.timestamp_ns, p.key_frame) {
                cue_entries.push(CueEntry {
                    time_ns: p.timestamp_ns,
                    track: p.track,
                    block_number,
                });
            }
        }

        cluster.sort();
        let bytes = cluster.render_complete(true)?;
        debug!(
            "渲染簇 #{}: 时间戳 {}ms, {} 块 (序号 {}..), {} 字节",
            self.cluster_index,
            cluster_scaled,
            packets.len(),
            packets.first().map(|q| q.id).unwrap_or(0),
            bytes.len()
        );

        // 更新保留窗口
        for queued in packets {
            self.written.push_back(WrittenPacket {
                track: queued.packet.track,
                timestamp_ns: queued.packet.timestamp_ns,
                cluster_index: self.cluster_index,
            });
        }
        let min_kept = self
            .cluster_index
            .saturating_sub(self.config.retention_clusters - 1);
        while let Some(front) = self.written.front() {
            if front.cluster_index >= min_kept {
                break;
            }
            self.written.pop_front();
        }

        self.cluster_index += 1;
        self.prev_cluster_size = Some(bytes.len() as u64);
        self.open_bytes = 0;
        self.pending.push(RenderedCluster {
            bytes,
            timestamp_ns: cluster_ts,
            end_ns,
            cue_entries,
        });
        Ok(())
    }

    /// 校验引用目标确实存在于同簇较早位置或保留窗口内
    fn resolve_reference(
        &self,
        earlier_in_cluster: &[QueuedPacket],
        track: u64,
        timestamp_ns: i64,
    ) -> MuxResult<()> {
        let in_cluster = earlier_in_cluster
            .iter()
            .any(|q| q.packet.track == track && q.packet.timestamp_ns == timestamp_ns);
        if in_cluster {
            return Ok(());
        }
        let in_window = self
            .written
            .iter()
            .any(|w| w.track == track && w.timestamp_ns == timestamp_ns);
        if in_window {
            return Ok(());
        }
        // 保留窗口里曾有更老的簇则说明引用跨度超限, 属内部不变量破坏
        if self.cluster_index >= self.config.retention_clusters {
            return Err(MuxError::ClusterReferenceBeyondRetention(track));
        }
        Err(MuxError::UnresolvedReference {
            track,
            timestamp_ns,
        })
    }

    fn wants_cue(&mut self, track: u64, timestamp_ns: i64, key_frame: bool) -> bool {
        match self.cue_strategies.get(&track).copied().unwrap_or_default() {
            CueStrategy::None => false,
            CueStrategy::All => true,
            CueStrategy::IFrames => key_frame,
            CueStrategy::Sparse => {
                if !key_frame {
                    return false;
                }
                let last = self.last_cue_ns.get(&track).copied();
                let wanted = last.is_none_or(|l| timestamp_ns - l >= 2_000_000_000);
                if wanted {
                    self.last_cue_ns.insert(track, timestamp_ns);
                }
                wanted
            }
        }
    }
}

/// 组装块的二进制负载: VINT 轨道号 + 大端 int16 时间增量 + 标志 + 数据
fn block_binary(track: u64, delta: i16, flags: BlockFlags, data: &[u8]) -> MuxResult<Vec<u8>> {
    let mut body = Vec::with_capacity(4 + data.len());
    vint::write_size(&mut body, track, 0)?;
    body.extend_from_slice(&delta.to_be_bytes());
    body.push(flags.bits());
    body.extend_from_slice(data);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taowa_codec::Packet;

    fn key(track: u64, ts_ms: i64, size: usize) -> Packet {
        Packet::key_frame(track, ts_ms * 1_000_000, vec![0xAAu8; size])
    }

    fn drain_one(sched: &mut ClusterScheduler) -> RenderedCluster {
        let mut rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 1, "\u{671f}\u{671b}\u{6070}\u{597d}\u{4e00}\u{4e2a}\u{7c07}");
        rendered.remove(0)
    }

    #[test]
    fn test_单簇_简单块() {
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        for i in 0..10 {
            sched.add_packet(key(1, i * 32, 16)).unwrap();
        }
        assert!(sched.take_rendered().is_empty());
        sched.flush().unwrap();
        let rendered = drain_one(&mut sched);
        assert_eq!(rendered.timestamp_ns, 0);
        // Cluster ID
        assert_eq!(&rendered.bytes[..4], &[0x1F, 0x43, 0xB6, 0x75]);
        // 默认策略 iframes: 每个关键帧一条 cue
        assert_eq!(rendered.cue_entries.len(), 10);
        assert_eq!(rendered.cue_entries[3].block_number, 4);
    }

    #[test]
    fn test_时间跨度切簇() {
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        sched.add_packet(key(1, 0, 8)).unwrap();
        sched.add_packet(key(1, 29_000, 8)).unwrap();
        // 超过 30s 防御阈值, 触发切簇
        sched.add_packet(key(1, 31_000, 8)).unwrap();
        let rendered = drain_one(&mut sched);
        assert_eq!(rendered.timestamp_ns, 0);
        sched.flush().unwrap();
        let last = drain_one(&mut sched);
        assert_eq!(last.timestamp_ns, 31_000 * 1_000_000);
    }

    #[test]
    fn test_数据量切簇() {
        let mut config = SchedulerConfig::default();
        config.max_size = 1000;
        let mut sched = ClusterScheduler::new(config);
        sched.add_packet(key(1, 0, 600)).unwrap();
        sched.add_packet(key(1, 32, 600)).unwrap();
        assert_eq!(sched.take_rendered().len(), 1);
    }

    #[test]
    fn test_块组与引用增量() {
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        // I(0) P(80, bref 0) B(40, bref 0, fref 80)
        sched.add_packet(key(1, 0, 8)).unwrap();
        sched
            .add_packet(Packet::with_bref(1, 80_000_000, 0, vec![1u8]))
            .unwrap();
        let mut b = Packet::with_bref(1, 40_000_000, 0, vec![2u8]);
        b.fref_ns = 80_000_000;
        sched.add_packet(b).unwrap();

        sched.flush().unwrap();
        let rendered = drain_one(&mut sched);
        // 解析回元素树验证引用增量
        let segment = taowa_ebml::registry::by_id(ids::SEGMENT).unwrap();
        let stack = vec![segment];
        let (cluster, _) = taowa_ebml::parse_element(&rendered.bytes, &stack).unwrap();

        let groups: Vec<_> = cluster
            .children()
            .iter()
            .filter(|c| c.id() == ids::BLOCK_GROUP)
            .collect();
        assert_eq!(groups.len(), 2);
        // P: 引用 0ms, 块 80ms → 增量 -80
        let p_refs: Vec<i64> = groups[0]
            .children()
            .iter()
            .filter(|c| c.id() == ids::REFERENCE_BLOCK)
            .map(|c| c.as_sint().unwrap())
            .collect();
        assert_eq!(p_refs, vec![-80]);
        // B: 引用 0ms 与 80ms, 块 40ms → 增量 -40 与 +40
        let b_refs: Vec<i64> = groups[1]
            .children()
            .iter()
            .filter(|c| c.id() == ids::REFERENCE_BLOCK)
            .map(|c| c.as_sint().unwrap())
            .collect();
        assert_eq!(b_refs, vec![-40, 40]);
    }

    #[test]
    fn test_跨簇引用在保留窗口内解析() {
        let mut config = SchedulerConfig::default();
        config.max_size = 20;
        let mut sched = ClusterScheduler::new(config);
        sched.add_packet(key(1, 0, 16)).unwrap();
        // 触发切簇后引用上一簇
        sched
            .add_packet(Packet::with_bref(1, 40_000_000, 0, vec![3u8; 16]))
            .unwrap();
        sched.flush().unwrap();
        assert_eq!(sched.take_rendered().len(), 2);
    }

    #[test]
    fn test_无法解析的引用报错() {
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        sched
            .add_packet(Packet::with_bref(1, 40_000_000, 7_000_000, vec![1u8]))
            .unwrap();
        assert!(matches!(
            sched.flush(),
            Err(MuxError::UnresolvedReference { track: 1, .. })
        ));
    }

    #[test]
    fn test_块时长写入() {
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        let mut p = key(1, 0, 8);
        p.duration_ns = Some(32_000_000);
        sched.add_packet(p).unwrap();
        sched.flush().unwrap();
        let rendered = drain_one(&mut sched);

        let segment = taowa_ebml::registry::by_id(ids::SEGMENT).unwrap();
        let (cluster, _) =
            taowa_ebml::parse_element(&rendered.bytes, &vec![segment]).unwrap();
        let group = cluster.find_child(ids::BLOCK_GROUP).unwrap();
        assert_eq!(
            group
                .find_child(ids::BLOCK_DURATION)
                .unwrap()
                .as_uint()
                .unwrap(),
            32
        );
    }

    #[test]
    fn test_cue_策略() {
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        sched.set_cue_strategy(1, CueStrategy::None);
        sched.set_cue_strategy(2, CueStrategy::IFrames);
        sched.add_packet(key(1, 0, 8)).unwrap();
        sched.add_packet(key(2, 0, 8)).unwrap();
        sched.flush().unwrap();
        let rendered = drain_one(&mut sched);
        assert_eq!(rendered.cue_entries.len(), 1);
        assert_eq!(rendered.cue_entries[0].track, 2);
    }

    #[test]
    fn test_prev_size_链() {
        let mut config = SchedulerConfig::default();
        config.max_size = 10;
        let mut sched = ClusterScheduler::new(config);
        sched.add_packet(key(1, 0, 8)).unwrap();
        sched.add_packet(key(1, 32, 8)).unwrap();
        sched.flush().unwrap();
        let rendered = sched.take_rendered();
        assert_eq!(rendered.len(), 2);

        let segment = taowa_ebml::registry::by_id(ids::SEGMENT).unwrap();
        let (c2, _) = taowa_ebml::parse_element(&rendered[1].bytes, &vec![segment]).unwrap();
        assert_eq!(
            c2.find_child(ids::CLUSTER_PREV_SIZE)
                .unwrap()
                .as_uint()
                .unwrap(),
            rendered[0].bytes.len() as u64
        );
    }

    #[test]
    fn test_背压信号() {
        let mut config = SchedulerConfig::default();
        config.max_buffered_bytes = 100;
        config.max_size = usize::MAX;
        let mut sched = ClusterScheduler::new(config);
        assert!(!sched.is_full());
        sched.add_packet(key(1, 0, 200)).unwrap();
        assert!(sched.is_full());
    }
}
