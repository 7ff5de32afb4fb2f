//! Segment 组装器.
//!
//! 产出的文件布局:
//! ```text
//! EBML Header
//! Segment {                  [大小字段预留 8 字节, 收尾回填]
//!   SeekHead                 [预留空间, 收尾原地重写]
//!   Info                     [Duration 占位, 收尾原地重写]
//!   Tracks
//!   Chapters? Attachments? Tags?
//!   Cluster...
//!   Cues
//!   SeekHead#2?              [预留空间不足时]
//! }
//! ```
//!
//! 收尾顺序: 渲染 Cues → 重写 SeekHead → 重写 Info → 回填
//! Segment 大小. 中止路径在最后一个完整簇边界截断, 跳过全部回填.

use log::{debug, info};
use taowa_core::{MuxError, MuxResult, random, timestamp::NS_PER_SECOND};
use taowa_ebml::{Element, ids, render_into_reserved, vint};

use crate::cluster::{CueEntry, RenderedCluster};
use crate::io::IoContext;

/// SeekHead 预留空间 (6 个条目富余)
const SEEK_HEAD_RESERVATION: u64 = 160;

/// Segment 级选项
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// 标题
    pub title: Option<String>,
    /// MuxingApp
    pub muxing_app: String,
    /// WritingApp
    pub writing_app: String,
    /// TimecodeScale (纳秒)
    pub timecode_scale: u64,
    /// SegmentUID (16 字节), None 时随机生成
    pub segment_uid: Option<Vec<u8>>,
    /// 上一分段 UID (`--link`)
    pub prev_uid: Option<Vec<u8>>,
    /// 下一分段 UID (`--link`)
    pub next_uid: Option<Vec<u8>>,
    /// 分段链接: 为 NextUID 预留位置, 收尾时填入或抹掉
    pub link: bool,
    /// 写入当前时间为 DateUTC
    pub write_date: bool,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        let app = format!("taowa {}", env!("CARGO_PKG_VERSION"));
        Self {
            title: None,
            muxing_app: app.clone(),
            writing_app: app,
            timecode_scale: 1_000_000,
            segment_uid: None,
            prev_uid: None,
            next_uid: None,
            link: false,
            write_date: true,
        }
    }
}

struct CollectedCue {
    entry: CueEntry,
    cluster_position: u64,
}

/// Segment 组装器
pub struct SegmentWriter {
    io: IoContext,
    opts: SegmentOptions,
    /// Segment 大小 VINT 在文件中的偏移
    segment_size_pos: u64,
    /// Segment 数据区起始偏移 (SeekPosition/CueClusterPosition 的基准)
    payload_start: u64,
    seekhead_pos: u64,
    info_pos: u64,
    info_reserved: u64,
    info: Element,
    /// (元素 ID, 相对数据区的偏移), 收尾写入 SeekHead
    seek_entries: Vec<(u32, u64)>,
    cues: Vec<CollectedCue>,
    /// 收尾时写出的章节/标签 (中途学得的值)
    late_chapters: Option<Element>,
    late_tags: Option<Element>,
    /// 最后写出的簇之后的文件偏移 (中止截断点)
    last_cluster_end: u64,
    max_end_ns: i64,
    clusters_written: u64,
    prologue_done: bool,
    segment_uid: Vec<u8>,
}

impl SegmentWriter {
    /// 创建组装器
    pub fn new(io: IoContext, opts: SegmentOptions) -> Self {
        let segment_uid = opts
            .segment_uid
            .clone()
            .unwrap_or_else(|| random::random_bytes(16));
        Self {
            io,
            opts,
            segment_size_pos: 0,
            payload_start: 0,
            seekhead_pos: 0,
            info_pos: 0,
            info_reserved: 0,
            info: Element::new(ids::INFO).expect("Info 已注册"),
            seek_entries: Vec::new(),
            cues: Vec::new(),
            late_chapters: None,
            late_tags: None,
            last_cluster_end: 0,
            max_end_ns: 0,
            clusters_written: 0,
            prologue_done: false,
            segment_uid,
        }
    }

    /// 本分段的 SegmentUID (`--link` 链接下一分段用)
    pub fn segment_uid(&self) -> &[u8] {
        &self.segment_uid
    }

    /// 写出文件头部: EBML 头、Segment 开头、SeekHead 预留、
    /// Info、Tracks 与可选的章节/附件/标签
    pub fn write_prologue(
        &mut self,
        track_entries: Vec<Element>,
        chapters: Option<Element>,
        attachments: Option<Element>,
        tags: Option<Element>,
    ) -> MuxResult<()> {
        // EBML 头
        let mut ebml = Element::new(ids::EBML)?;
        ebml.fix_mandatory();
        ebml.get_child(ids::DOC_TYPE).set_str("matroska")?;
        ebml.get_child(ids::DOC_TYPE_VERSION).set_uint(4)?;
        ebml.get_child(ids::DOC_TYPE_READ_VERSION).set_uint(2)?;
        let bytes = ebml.render_complete(true)?;
        self.io.write_all(&bytes)?;

        // Segment 开头: ID + 预留 8 字节的大小字段 (先写未知大小)
        let mut head = Vec::new();
        vint::write_id(&mut head, ids::SEGMENT);
        self.io.write_all(&head)?;
        self.segment_size_pos = self.io.position()?;
        let mut size_vint = Vec::new();
        vint::write_unknown_size(&mut size_vint, 8);
        self.io.write_all(&size_vint)?;
        self.payload_start = self.io.position()?;

        // SeekHead 预留空间
        self.seekhead_pos = self.io.position()?;
        let mut void = taowa_ebml::make_void_total(SEEK_HEAD_RESERVATION)?;
        let bytes = void.render_complete(true)?;
        self.io.write_all(&bytes)?;

        // Info
        self.build_info()?;
        self.info_pos = self.io.position()?;
        let bytes = self.info.render_complete(true)?;
        self.info_reserved = bytes.len() as u64;
        self.record_seek_entry(ids::INFO)?;
        self.io.write_all(&bytes)?;

        // Tracks
        self.record_seek_entry(ids::TRACKS)?;
        let mut tracks = Element::new(ids::TRACKS)?;
        for entry in track_entries {
            tracks.push(entry);
        }
        let bytes = tracks.render_complete(true)?;
        self.io.write_all(&bytes)?;

        // 开头就已知的章节/附件/标签
        if let Some(mut chapters) = chapters {
            self.record_seek_entry(ids::CHAPTERS)?;
            let bytes = chapters.render_complete(true)?;
            self.io.write_all(&bytes)?;
        }
        if let Some(mut attachments) = attachments {
            self.record_seek_entry(ids::ATTACHMENTS)?;
            let bytes = attachments.render_complete(true)?;
            self.io.write_all(&bytes)?;
        }
        if let Some(mut tags) = tags {
            self.record_seek_entry(ids::TAGS)?;
            let bytes = tags.render_complete(true)?;
            self.io.write_all(&bytes)?;
        }

        self.last_cluster_end = self.io.position()?;
        self.prologue_done = true;
        debug!("Segment 头部完成, 数据区自偏移 {}", self.payload_start);
        Ok(())
    }

    fn build_info(&mut self) -> MuxResult<()> {
        let info = &mut self.info;
        info.get_child(ids::TIMECODE_SCALE)
            .set_uint(self.opts.timecode_scale)?;
        info.get_child(ids::MUXING_APP)
            .set_str(&self.opts.muxing_app.clone())?;
        info.get_child(ids::WRITING_APP)
            .set_str(&self.opts.writing_app.clone())?;
        if let Some(title) = self.opts.title.clone() {
            info.get_child(ids::TITLE).set_str(&title)?;
        }
        info.get_child(ids::SEGMENT_UID)
            .set_binary(self.segment_uid.clone())?;
        if let Some(prev) = self.opts.prev_uid.clone() {
            info.get_child(ids::PREV_UID).set_binary(prev)?;
        }
        if let Some(next) = self.opts.next_uid.clone() {
            info.get_child(ids::NEXT_UID).set_binary(next)?;
        } else if self.opts.link {
            // 链接分段: 先占位, 收尾时填入真实 UID 或抹掉
            info.get_child(ids::NEXT_UID).set_binary(vec![0u8; 16])?;
        }
        if self.opts.write_date {
            info.get_child(ids::DATE_UTC)
                .set_date(matroska_date_now())?;
        }
        // Duration 占位 (定宽 8 字节浮点), 收尾原地重写
        info.get_child(ids::DURATION).set_float(0.0)?;
        info.sort();
        Ok(())
    }

    fn record_seek_entry(&mut self, id: u32) -> MuxResult<()> {
        let position = self.io.position()? - self.payload_start;
        self.seek_entries.push((id, position));
        Ok(())
    }

    /// 写出一个渲染完成的簇
    pub fn write_cluster(&mut self, rendered: RenderedCluster) -> MuxResult<()> {
        if !self.prologue_done {
            return Err(MuxError::Internal("头部未写出即写簇".into()));
        }
        let cluster_position = self.io.position()? - self.payload_start;
        // 首个簇进 SeekHead 供快速定位
        if self.clusters_written == 0 {
            self.seek_entries.push((ids::CLUSTER, cluster_position));
        }
        self.io.write_all(&rendered.bytes)?;
        self.last_cluster_end = self.io.position()?;
        self.max_end_ns = self.max_end_ns.max(rendered.end_ns);
        self.clusters_written += 1;
        for entry in rendered.cue_entries {
            self.cues.push(CollectedCue {
                entry,
                cluster_position,
            });
        }
        Ok(())
    }

    /// 填入下一分段的 UID (`--link` 分割时在开出下一文件前调用)
    pub fn set_next_uid(&mut self, uid: Vec<u8>) -> MuxResult<()> {
        self.info.get_child(ids::NEXT_UID).set_binary(uid)?;
        Ok(())
    }

    /// 抹掉 NextUID 占位 (链上最后一个分段)
    pub fn clear_next_uid(&mut self) {
        if self.opts.link && self.opts.next_uid.is_none() {
            self.info.remove_all(ids::NEXT_UID);
        }
    }

    /// 收尾时追加章节 (中途学得的值)
    pub fn set_late_chapters(&mut self, chapters: Element) {
        self.late_chapters = Some(chapters);
    }

    /// 收尾时追加标签
    pub fn set_late_tags(&mut self, tags: Element) {
        self.late_tags = Some(tags);
    }

    /// 已写出的簇数
    pub fn clusters_written(&self) -> u64 {
        self.clusters_written
    }

    /// 收尾: Cues → 迟到的章节/标签 → SeekHead → Info → Segment 大小
    pub fn finalize(mut self) -> MuxResult<()> {
        // Cues
        if !self.cues.is_empty() {
            self.record_seek_entry(ids::CUES)?;
            let mut cues = self.render_cues()?;
            let bytes = cues.render_complete(true)?;
            self.io.write_all(&bytes)?;
        }

        // 迟到的章节/标签 (在 Cues 之后, SeekHead 仍能索引)
        if let Some(mut chapters) = self.late_chapters.take() {
            self.record_seek_entry(ids::CHAPTERS)?;
            let bytes = chapters.render_complete(true)?;
            self.io.write_all(&bytes)?;
        }
        if let Some(mut tags) = self.late_tags.take() {
            self.record_seek_entry(ids::TAGS)?;
            let bytes = tags.render_complete(true)?;
            self.io.write_all(&bytes)?;
        }

        // SeekHead: 预留空间装不下时在末尾补第二个
        let mut seekhead = self.render_seekhead(&self.seek_entries.clone())?;
        match render_into_reserved(&mut seekhead, SEEK_HEAD_RESERVATION, true) {
            Ok(bytes) => self.io.overwrite_at(self.seekhead_pos, &bytes)?,
            Err(MuxError::ReservedSpaceTooSmall { .. }) => {
                let second_pos = self.io.position()? - self.payload_start;
                let bytes = seekhead.render_complete(true)?;
                self.io.write_all(&bytes)?;
                info!("SeekHead 预留空间不足, 已在末尾追加第二个 SeekHead");
                let mut first =
                    self.render_seekhead(&[(ids::SEEK_HEAD, second_pos)])?;
                let bytes = render_into_reserved(&mut first, SEEK_HEAD_RESERVATION, true)?;
                self.io.overwrite_at(self.seekhead_pos, &bytes)?;
            }
            Err(e) => return Err(e),
        }

        // Info: 填入真实 Duration 后原地重写
        let duration_scaled =
            self.max_end_ns as f64 / self.opts.timecode_scale as f64;
        self.info.get_child(ids::DURATION).set_float(duration_scaled)?;
        let bytes = render_into_reserved(&mut self.info, self.info_reserved, true)?;
        self.io.overwrite_at(self.info_pos, &bytes)?;

        // Segment 大小
        let end = self.io.position()?;
        let payload_size = end - self.payload_start;
        let mut size_vint = Vec::new();
        vint::write_size(&mut size_vint, payload_size, 8)?;
        self.io.overwrite_at(self.segment_size_pos, &size_vint)?;

        info!(
            "收尾完成: {} 个簇, 数据区 {} 字节, 时长 {:.3}s",
            self.clusters_written,
            payload_size,
            self.max_end_ns as f64 / NS_PER_SECOND as f64
        );
        Ok(())
    }

    /// 中止: 在最后一个完整簇边界截断, 跳过 Cues 与回填
    pub fn abort(mut self) -> MuxResult<()> {
        let end = self.last_cluster_end;
        self.io.truncate(end)?;
        info!("已中止, 文件截断到 {} 字节", end);
        Err(MuxError::Cancelled)
    }

    fn render_cues(&self) -> MuxResult<Element> {
        let scale = self.opts.timecode_scale as i64;
        let mut cues = Element::new(ids::CUES)?;
        for collected in &self.cues {
            let mut point = Element::new(ids::CUE_POINT)?;
            point
                .get_child(ids::CUE_TIME)
                .set_uint((collected.entry.time_ns / scale) as u64)?;
            let positions = point.get_child(ids::CUE_TRACK_POSITIONS);
            positions
                .get_child(ids::CUE_TRACK)
                .set_uint(collected.entry.track)?;
            positions
                .get_child(ids::CUE_CLUSTER_POSITION)
                .set_uint(collected.cluster_position)?;
            if collected.entry.block_number != 1 {
                positions
                    .get_child(ids::CUE_BLOCK_NUMBER)
                    .set_uint(collected.entry.block_number)?;
            }
            cues.push(point);
        }
        Ok(cues)
    }

    fn render_seekhead(&self, entries: &[(u32, u64)]) -> MuxResult<Element> {
        let mut seekhead = Element::new(ids::SEEK_HEAD)?;
        let mut prev = None;
        for &(id, position) in entries {
            let index = seekhead.get_next_child(ids::SEEK, prev);
            let seek = &mut seekhead.children_mut()[index];
            let mut id_bytes = Vec::new();
            vint::write_id(&mut id_bytes, id);
            seek.get_child(ids::SEEK_ID).set_binary(id_bytes)?;
            seek.get_child(ids::SEEK_POSITION).set_uint(position)?;
            prev = Some(index);
        }
        Ok(seekhead)
    }
}

/// 当前时间的 Matroska DateUTC (2001-01-01 纪元纳秒)
fn matroska_date_now() -> i64 {
    // 2001-01-01 与 1970-01-01 相差 978307200 秒
    const EPOCH_OFFSET_SECONDS: i64 = 978_307_200;
    let unix_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    unix_ns - EPOCH_OFFSET_SECONDS * NS_PER_SECOND
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterScheduler, SchedulerConfig};
    use taowa_codec::Packet;
    use taowa_ebml::parse_all;

    fn audio_track_entry() -> Element {
        use taowa_codec::CodecId;
        use taowa_core::TrackType;
        let mut spec = crate::track::TrackSpec::new(1, TrackType::Audio, CodecId::Ac3);
        spec.audio = Some(crate::track::AudioParams {
            sample_rate: 48_000.0,
            output_sample_rate: None,
            channels: 2,
            bit_depth: None,
        });
        spec.default_duration_ns = Some(32_000_000);
        spec.to_element().unwrap()
    }

    fn write_simple_file() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mkv");
        let io = IoContext::open_write(path.to_str().unwrap()).unwrap();
        let mut writer = SegmentWriter::new(io, SegmentOptions::default());
        writer
            .write_prologue(vec![audio_track_entry()], None, None, None)
            .unwrap();
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        for i in 0..10i64 {
            let mut p = Packet::key_frame(1, i * 32_000_000, vec![0x55u8; 64]);
            p.duration_ns = Some(32_000_000);
            sched.add_packet(p).unwrap();
        }
        sched.flush().unwrap();
        for rendered in sched.take_rendered() {
            writer.write_cluster(rendered).unwrap();
        }
        writer.finalize().unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_文件布局与回填() {
        let data = write_simple_file();
        // 首字节为 EBML 头 ID
        assert_eq!(&data[..4], &[0x1A, 0x45, 0xDF, 0xA3]);

        let elements = parse_all(&data).unwrap();
        assert_eq!(elements.len(), 2);
        let segment = &elements[1];
        assert_eq!(segment.id(), ids::SEGMENT);

        // Segment 级元素齐备且顺序正确: SeekHead, Info, Tracks, Cluster, Cues
        let child_ids: Vec<u32> = segment
            .children()
            .iter()
            .map(|c| c.id())
            .filter(|&id| id != ids::VOID)
            .collect();
        let seekhead_idx = child_ids.iter().position(|&id| id == ids::SEEK_HEAD).unwrap();
        let info_idx = child_ids.iter().position(|&id| id == ids::INFO).unwrap();
        let tracks_idx = child_ids.iter().position(|&id| id == ids::TRACKS).unwrap();
        let cluster_idx = child_ids.iter().position(|&id| id == ids::CLUSTER).unwrap();
        let cues_idx = child_ids.iter().position(|&id| id == ids::CUES).unwrap();
        assert!(seekhead_idx < info_idx);
        assert!(info_idx < tracks_idx);
        assert!(tracks_idx < cluster_idx);
        assert!(cluster_idx < cues_idx);

        // Duration 已回填: 10 帧 × 32ms = 320ms
        let info = segment.find_child(ids::INFO).unwrap();
        let duration = info.find_child(ids::DURATION).unwrap().as_float().unwrap();
        assert!((duration - 320.0).abs() < 0.001);

        // SegmentUID 16 字节
        assert_eq!(
            info.find_child(ids::SEGMENT_UID).unwrap().as_binary().unwrap().len(),
            16
        );

        // Cues 索引了关键帧
        let cues = segment.find_child(ids::CUES).unwrap();
        assert_eq!(cues.children().len(), 10);
        let first_point = &cues.children()[0];
        assert_eq!(
            first_point.find_child(ids::CUE_TIME).unwrap().as_uint().unwrap(),
            0
        );

        // SeekHead 的 SeekPosition 指向正确的元素
        let seekhead = segment.find_child(ids::SEEK_HEAD).unwrap();
        assert!(seekhead.children().len() >= 4);
    }

    #[test]
    fn test_seek_position_指向正确() {
        let data = write_simple_file();
        let elements = parse_all(&data).unwrap();
        let segment = &elements[1];

        // 计算数据区起始: EBML 头大小 + Segment ID (4) + 大小字段 (8)
        let (_, ebml_len) =
            taowa_ebml::parse_element(&data, &vec![&taowa_ebml::registry::ROOT]).unwrap();
        let payload_start = ebml_len + 4 + 8;

        let seekhead = segment.find_child(ids::SEEK_HEAD).unwrap();
        for seek in seekhead.children() {
            let id_bytes = seek.find_child(ids::SEEK_ID).unwrap().as_binary().unwrap();
            let position = seek
                .find_child(ids::SEEK_POSITION)
                .unwrap()
                .as_uint()
                .unwrap() as usize;
            let absolute = payload_start + position;
            // 目标位置的字节应与 SeekID 一致
            assert_eq!(
                &data[absolute..absolute + id_bytes.len()],
                &id_bytes[..],
                "SeekID {id_bytes:02X?} 的位置错误"
            );
        }
    }

    #[test]
    fn test_中止截断() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aborted.mkv");
        let io = IoContext::open_write(path.to_str().unwrap()).unwrap();
        let mut writer = SegmentWriter::new(io, SegmentOptions::default());
        writer
            .write_prologue(vec![audio_track_entry()], None, None, None)
            .unwrap();
        let mut sched = ClusterScheduler::new(SchedulerConfig::default());
        sched
            .add_packet(Packet::key_frame(1, 0, vec![0u8; 32]))
            .unwrap();
        sched.flush().unwrap();
        let mut cluster_bytes = 0;
        for rendered in sched.take_rendered() {
            cluster_bytes += rendered.bytes.len();
            writer.write_cluster(rendered).unwrap();
        }
        assert!(matches!(writer.abort(), Err(MuxError::Cancelled)));

        let data = std::fs::read(&path).unwrap();
        // 文件以最后一个簇结尾, 无 Cues
        assert!(data.len() > cluster_bytes);
        let elements = parse_all(&data).unwrap();
        let segment = &elements[1];
        assert!(segment.find_child(ids::CUES).is_none());
        assert!(segment.find_child(ids::CLUSTER).is_some());
    }
}
