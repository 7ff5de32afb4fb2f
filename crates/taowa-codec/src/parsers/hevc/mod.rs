//! HEVC / H.265 基本流解析.
//!
//! 接受 Annex-B 字节流 (00 00 01 / 00 00 00 01 起始码) 或外部配置
//! 宽度的长度前缀 NAL 流. 收集 VPS/SPS/PPS, 从激活的 SPS 导出
//! 图像尺寸、PAR 与默认帧时长; 以 first_slice_segment_in_pic_flag
//! 切分访问单元; 输出为指定宽度长度前缀的 NAL 序列.

pub mod nal;
pub mod sps;

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use log::debug;
use taowa_core::{MuxError, MuxResult, Rational};

use crate::frame::Frame;
use nal::{NalUnit, find_start_code, nal_type, write_length_prefixed};
use sps::HevcSps;

const MAX_BUFFER: usize = 8 * 1024 * 1024;

/// HEVC 基本流解析器
pub struct HevcEsParser {
    unparsed: Vec<u8>,
    /// 输入为长度前缀形式时的前缀宽度 (None = Annex-B)
    input_size_length: Option<usize>,
    /// 输出 NAL 长度前缀宽度
    nalu_size_length: usize,

    vps_list: Vec<Vec<u8>>,
    sps_list: Vec<Vec<u8>>,
    pps_list: Vec<Vec<u8>>,
    active_sps: Option<HevcSps>,

    /// 待附着到下一个访问单元的 NAL (参数集、前缀 SEI)
    pending: Vec<NalUnit>,
    /// 当前访问单元
    au: Vec<NalUnit>,
    au_keyframe: bool,

    timestamps: VecDeque<i64>,
    last_timestamp: Option<i64>,
    frames: Vec<Frame>,
    /// 帧间隔统计 (最频繁间隔即实际默认时长)
    duration_counts: HashMap<i64, u64>,
    forced_default_duration: Option<i64>,
    container_default_duration: Option<i64>,
    /// 头部就绪前跳过的非关键帧数
    skipped_frames: u64,
    seen_keyframe: bool,
}

impl Default for HevcEsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HevcEsParser {
    /// 创建解析器 (默认 Annex-B 输入, 4 字节输出前缀)
    pub fn new() -> Self {
        Self {
            unparsed: Vec::new(),
            input_size_length: None,
            nalu_size_length: 4,
            vps_list: Vec::new(),
            sps_list: Vec::new(),
            pps_list: Vec::new(),
            active_sps: None,
            pending: Vec::new(),
            au: Vec::new(),
            au_keyframe: false,
            timestamps: VecDeque::new(),
            last_timestamp: None,
            frames: Vec::new(),
            duration_counts: HashMap::new(),
            forced_default_duration: None,
            container_default_duration: None,
            skipped_frames: 0,
            seen_keyframe: false,
        }
    }

    /// 配置输入为长度前缀形式 (宽度 1..=4)
    pub fn set_input_size_length(&mut self, width: usize) -> MuxResult<()> {
        if !(1..=4).contains(&width) {
            return Err(MuxError::InvalidArgument(format!(
                "NALU 长度前缀宽度 {width} 无效, 应为 1..=4"
            )));
        }
        self.input_size_length = Some(width);
        Ok(())
    }

    /// 配置输出 NAL 长度前缀宽度
    pub fn set_nalu_size_length(&mut self, width: usize) {
        self.nalu_size_length = width;
    }

    /// 输出 NAL 长度前缀宽度
    pub fn nalu_size_length(&self) -> usize {
        self.nalu_size_length
    }

    /// 用户强制的默认帧时长 (优先于码流导出值)
    pub fn force_default_duration(&mut self, duration_ns: i64) {
        self.forced_default_duration = Some(duration_ns);
    }

    /// 容器提示的场时长 (隔行内容按半帧处理)
    pub fn set_container_default_duration(&mut self, duration_ns: i64) {
        self.container_default_duration = Some(duration_ns);
    }

    /// 注入外部时间戳 (按帧顺序消费)
    pub fn add_timestamp(&mut self, timestamp_ns: i64) {
        self.timestamps.push_back(timestamp_ns);
    }

    /// 参数集是否齐备 (可生成 codec private)
    pub fn headers_ready(&self) -> bool {
        !self.sps_list.is_empty() && !self.pps_list.is_empty()
    }

    /// 激活的 SPS 参数
    pub fn sps(&self) -> Option<&HevcSps> {
        self.active_sps.as_ref()
    }

    /// 像素宽高比
    pub fn par(&self) -> Option<Rational> {
        self.active_sps.as_ref().map(|s| s.par)
    }

    /// 头部就绪前跳过的帧数
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames
    }

    /// 当前默认帧时长: 强制值 > 码流 VUI > 容器提示
    pub fn default_duration(&self) -> Option<i64> {
        self.forced_default_duration
            .or_else(|| self.active_sps.as_ref().and_then(|s| s.frame_duration_ns))
            .or(self.container_default_duration)
    }

    /// 统计意义上最常出现的帧间隔
    pub fn most_frequent_duration(&self) -> Option<i64> {
        self.duration_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(duration, _)| *duration)
    }

    /// 吞入字节并返回完成的访问单元
    pub fn add_bytes(&mut self, data: &[u8]) -> MuxResult<Vec<Frame>> {
        self.unparsed.extend_from_slice(data);
        match self.input_size_length {
            None => self.consume_annex_b()?,
            Some(width) => self.consume_length_prefixed(width)?,
        }
        if self.unparsed.len() > MAX_BUFFER {
            return Err(MuxError::malformed_at_unknown("HEVC: 缓冲超限"));
        }
        Ok(std::mem::take(&mut self.frames))
    }

    /// 吐出尾部 NAL 与最后一个访问单元
    pub fn flush(&mut self) -> MuxResult<Vec<Frame>> {
        if self.input_size_length.is_none() {
            // Annex-B 尾巴: 去掉前导起始码后即最后一个 NAL
            let tail = std::mem::take(&mut self.unparsed);
            if let Some((pos, len)) = find_start_code(&tail) {
                let body = &tail[pos + len..];
                if body.len() >= 2 {
                    let nal = NalUnit::parse(body.to_vec())?;
                    self.handle_nal(nal)?;
                }
            }
        } else {
            self.unparsed.clear();
        }
        self.finish_au()?;
        Ok(std::mem::take(&mut self.frames))
    }

    fn consume_annex_b(&mut self) -> MuxResult<()> {
        loop {
            let Some((first_pos, first_len)) = find_start_code(&self.unparsed) else {
                return Ok(());
            };
            let body_start = first_pos + first_len;
            let Some((next_rel, _)) = find_start_code(&self.unparsed[body_start..]) else {
                // 最后一个 NAL 未定界, 留待更多数据或 flush
                if first_pos > 0 {
                    self.unparsed.drain(..first_pos);
                }
                return Ok(());
            };
            let nal_bytes = self.unparsed[body_start..body_start + next_rel].to_vec();
            self.unparsed.drain(..body_start + next_rel);
            if nal_bytes.len() >= 2 {
                let nal = NalUnit::parse(nal_bytes)?;
                self.handle_nal(nal)?;
            }
        }
    }

    fn consume_length_prefixed(&mut self, width: usize) -> MuxResult<()> {
        loop {
            if self.unparsed.len() < width {
                return Ok(());
            }
            let mut size = 0usize;
            for &b in &self.unparsed[..width] {
                size = (size << 8) | usize::from(b);
            }
            if self.unparsed.len() < width + size {
                return Ok(());
            }
            let nal_bytes = self.unparsed[width..width + size].to_vec();
            self.unparsed.drain(..width + size);
            if nal_bytes.len() >= 2 {
                let nal = NalUnit::parse(nal_bytes)?;
                self.handle_nal(nal)?;
            }
        }
    }

    fn handle_nal(&mut self, nal: NalUnit) -> MuxResult<()> {
        match nal.nal_type {
            nal_type::VPS => {
                store_param_set(&mut self.vps_list, &nal.data);
                self.pending.push(nal);
            }
            nal_type::SPS => {
                if store_param_set(&mut self.sps_list, &nal.data) {
                    let parsed = sps::parse_sps(&nal.data)?;
                    debug!(
                        "HEVC: SPS {}x{}, PAR {}, 帧时长 {:?}",
                        parsed.width, parsed.height, parsed.par, parsed.frame_duration_ns
                    );
                    self.active_sps = Some(parsed);
                }
                self.pending.push(nal);
            }
            nal_type::PPS => {
                store_param_set(&mut self.pps_list, &nal.data);
                self.pending.push(nal);
            }
            nal_type::AUD | nal_type::EOS | nal_type::EOB | nal_type::FILLER => {}
            nal_type::PREFIX_SEI => self.pending.push(nal),
            nal_type::SUFFIX_SEI => {
                if self.au.is_empty() {
                    self.pending.push(nal);
                } else {
                    self.au.push(nal);
                }
            }
            _ if nal.is_vcl() => {
                if nal.is_first_slice_in_pic() && self.au.iter().any(|n| n.is_vcl()) {
                    self.finish_au()?;
                }
                if self.au.is_empty() || !self.au.iter().any(|n| n.is_vcl()) {
                    self.au_keyframe = nal.is_random_access();
                }
                let mut pending = std::mem::take(&mut self.pending);
                self.au.append(&mut pending);
                self.au.push(nal);
            }
            other => {
                debug!("HEVC: 忽略未处理的 NAL 类型 {other}");
            }
        }
        Ok(())
    }

    fn finish_au(&mut self) -> MuxResult<()> {
        if !self.au.iter().any(|n| n.is_vcl()) {
            return Ok(());
        }
        let nals = std::mem::take(&mut self.au);
        let keyframe = self.au_keyframe;

        if !self.headers_ready() || (!self.seen_keyframe && !keyframe) {
            // 头部未齐备或流未到首个关键帧, 丢弃
            self.skipped_frames += 1;
            return Ok(());
        }
        self.seen_keyframe = true;

        let mut data = Vec::new();
        for nal in &nals {
            write_length_prefixed(&mut data, &nal.data, self.nalu_size_length)?;
        }

        let duration = self.default_duration();
        let timestamp = self
            .timestamps
            .pop_front()
            .or_else(|| {
                self.last_timestamp
                    .map(|prev| prev + duration.unwrap_or(0))
            })
            .unwrap_or(0);
        if let Some(prev) = self.last_timestamp {
            let delta = timestamp - prev;
            if delta > 0 {
                *self.duration_counts.entry(delta).or_insert(0) += 1;
            }
        }
        let bref = if keyframe { None } else { self.last_timestamp };
        self.last_timestamp = Some(timestamp);

        self.frames.push(Frame {
            data: Bytes::from(data),
            timestamp_ns: Some(timestamp),
            duration_ns: duration,
            key_frame: keyframe,
            bref_ns: bref,
            params_changed: false,
        });
        Ok(())
    }

    /// 生成 HEVCC codec private (携带收集到的 VPS/SPS/PPS)
    pub fn hevcc(&self) -> MuxResult<Vec<u8>> {
        let sps = self
            .active_sps
            .as_ref()
            .ok_or_else(|| MuxError::malformed_at_unknown("HEVC: 没有可用的 SPS"))?;
        if self.pps_list.is_empty() {
            return Err(MuxError::malformed_at_unknown("HEVC: 没有可用的 PPS"));
        }

        let mut out = Vec::with_capacity(128);
        out.push(1); // configurationVersion
        out.push((sps.ptl.profile_space << 6) | (u8::from(sps.ptl.tier_flag) << 5) | sps.ptl.profile_idc);
        out.extend_from_slice(&sps.ptl.compatibility_flags.to_be_bytes());
        out.extend_from_slice(&sps.ptl.constraint_flags.to_be_bytes()[2..]);
        out.push(sps.ptl.level_idc);
        out.extend_from_slice(&0xF000u16.to_be_bytes()); // min_spatial_segmentation_idc
        out.push(0xFC); // parallelismType
        out.push(0xFC | (sps.chroma_format_idc as u8 & 0x3));
        out.push(0xF8 | ((sps.bit_depth_luma - 8) as u8 & 0x7));
        out.push(0xF8 | ((sps.bit_depth_chroma - 8) as u8 & 0x7));
        out.extend_from_slice(&[0, 0]); // avgFrameRate
        out.push(
            ((sps.max_sub_layers & 0x7) << 3)
                | (u8::from(sps.temporal_id_nesting) << 2)
                | ((self.nalu_size_length - 1) as u8 & 0x3),
        );

        let arrays: [(u8, &Vec<Vec<u8>>); 3] = [
            (nal_type::VPS, &self.vps_list),
            (nal_type::SPS, &self.sps_list),
            (nal_type::PPS, &self.pps_list),
        ];
        let present: Vec<_> = arrays.iter().filter(|(_, list)| !list.is_empty()).collect();
        out.push(present.len() as u8);
        for (kind, list) in present {
            out.push(0x80 | kind); // array_completeness=1
            out.extend_from_slice(&(list.len() as u16).to_be_bytes());
            for nal in list.iter() {
                out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
                out.extend_from_slice(nal);
            }
        }
        Ok(out)
    }
}

/// 去重存储参数集, 返回是否为新条目
fn store_param_set(list: &mut Vec<Vec<u8>>, data: &[u8]) -> bool {
    if list.iter().any(|existing| existing == data) {
        return false;
    }
    list.push(data.to_vec());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_code() -> Vec<u8> {
        vec![0x00, 0x00, 0x01]
    }

    fn make_vps() -> Vec<u8> {
        let mut v = vec![(nal_type::VPS << 1), 0x01];
        v.extend_from_slice(&[0x0C; 30]);
        v
    }

    fn make_pps() -> Vec<u8> {
        let mut v = vec![(nal_type::PPS << 1), 0x01];
        v.extend_from_slice(&[0x44; 14]);
        v
    }

    fn make_idr_slice(len: usize) -> Vec<u8> {
        let mut v = vec![(nal_type::IDR_W_RADL << 1), 0x01, 0x80];
        v.resize(len, 0x55);
        v
    }

    fn annex_b_stream(slices: usize) -> Vec<u8> {
        let mut stream = Vec::new();
        for nal in [make_vps(), sps::tests::make_sps_rbsp(), make_pps()] {
            stream.extend_from_slice(&start_code());
            stream.extend_from_slice(&nal);
        }
        for _ in 0..slices {
            stream.extend_from_slice(&start_code());
            stream.extend_from_slice(&make_idr_slice(100));
        }
        stream
    }

    #[test]
    fn test_annex_b_切分与时长() {
        let mut parser = HevcEsParser::new();
        let mut frames = parser.add_bytes(&annex_b_stream(5)).unwrap();
        frames.extend(parser.flush().unwrap());

        assert_eq!(frames.len(), 5);
        assert!(parser.headers_ready());
        // SPS VUI: 25fps
        assert_eq!(parser.default_duration(), Some(40_000_000));
        assert!(frames.iter().all(|f| f.key_frame));
        // 时间戳按默认时长推进
        assert_eq!(frames[0].timestamp_ns, Some(0));
        assert_eq!(frames[1].timestamp_ns, Some(40_000_000));
    }

    #[test]
    fn test_首帧含参数集() {
        let mut parser = HevcEsParser::new();
        let mut frames = parser.add_bytes(&annex_b_stream(2)).unwrap();
        frames.extend(parser.flush().unwrap());
        // 首帧: VPS+SPS+PPS+切片 各带 4 字节长度前缀
        let expected_first = 4 * 4 + make_vps().len() + sps::tests::make_sps_rbsp().len()
            + make_pps().len()
            + 100;
        assert_eq!(frames[0].data.len(), expected_first);
        // 次帧只有切片
        assert_eq!(frames[1].data.len(), 4 + 100);
    }

    #[test]
    fn test_长度前缀输入() {
        let mut parser = HevcEsParser::new();
        parser.set_input_size_length(4).unwrap();
        let mut stream = Vec::new();
        for nal in [
            make_vps(),
            sps::tests::make_sps_rbsp(),
            make_pps(),
            make_idr_slice(64),
            make_idr_slice(64),
        ] {
            stream.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            stream.extend_from_slice(&nal);
        }
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            frames.extend(parser.add_bytes(chunk).unwrap());
        }
        frames.extend(parser.flush().unwrap());
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_外部时间戳优先() {
        let mut parser = HevcEsParser::new();
        parser.add_timestamp(1_000_000);
        parser.add_timestamp(34_000_000);
        let mut frames = parser.add_bytes(&annex_b_stream(2)).unwrap();
        frames.extend(parser.flush().unwrap());
        assert_eq!(frames[0].timestamp_ns, Some(1_000_000));
        assert_eq!(frames[1].timestamp_ns, Some(34_000_000));
    }

    #[test]
    fn test_hevcc_构造() {
        let mut parser = HevcEsParser::new();
        let _ = parser.add_bytes(&annex_b_stream(1)).unwrap();
        let hevcc = parser.hevcc().unwrap();
        assert_eq!(hevcc[0], 1);
        // profile_idc = 1 (Main)
        assert_eq!(hevcc[1] & 0x1F, 1);
        // lengthSizeMinusOne = 3
        assert_eq!(hevcc[21] & 0x3, 3);
        // 3 个参数集数组
        assert_eq!(hevcc[22], 3);
    }

    #[test]
    fn test_头部未就绪跳帧() {
        let mut parser = HevcEsParser::new();
        let mut stream = Vec::new();
        // 切片在参数集之前出现
        stream.extend_from_slice(&start_code());
        stream.extend_from_slice(&make_idr_slice(50));
        stream.extend_from_slice(&annex_b_stream(1));
        let mut frames = parser.add_bytes(&stream).unwrap();
        frames.extend(parser.flush().unwrap());
        assert_eq!(frames.len(), 1);
        assert_eq!(parser.skipped_frames(), 1);
    }

    #[test]
    fn test_最频繁帧间隔() {
        let mut parser = HevcEsParser::new();
        for ts in [0i64, 40, 80, 120, 125, 165] {
            parser.add_timestamp(ts * 1_000_000);
        }
        let mut frames = parser.add_bytes(&annex_b_stream(6)).unwrap();
        frames.extend(parser.flush().unwrap());
        assert_eq!(frames.len(), 6);
        assert_eq!(parser.most_frequent_duration(), Some(40_000_000));
    }
}
