//! VC-1 (SMPTE 421M) 基本流解析.
//!
//! 字节流以 0x000001 起始码定界, 标记字节 0x0A..0x0F 区分包类型.
//! 仅支持 advanced profile. 帧包开启一个访问单元, 其后的切片/场/
//! 未知包并入该单元作为帧后附加数据, 直到下一个帧标记.
//! 无外部时间戳时按序列头的帧率推算; pulldown 以半帧为单位修正.

use std::collections::VecDeque;

use bytes::Bytes;
use log::debug;
use taowa_core::timestamp::NS_PER_SECOND;
use taowa_core::{BitReader, MuxError, MuxResult, Rational};

/// 包标记 (0x000001 前缀 + 标记字节)
pub mod marker {
    pub const END_OF_SEQ: u32 = 0x0000_010A;
    pub const SLICE: u32 = 0x0000_010B;
    pub const FIELD: u32 = 0x0000_010C;
    pub const FRAME: u32 = 0x0000_010D;
    pub const ENTRYPOINT: u32 = 0x0000_010E;
    pub const SEQHDR: u32 = 0x0000_010F;
}

/// 标记字节是否为合法的 VC-1 包标记
pub fn is_marker(value: u32) -> bool {
    (value & 0xFFFF_FF00) == 0x0000_0100 && (0x0A..=0x0F).contains(&(value & 0xFF))
}

const MAX_BUFFER: usize = 8 * 1024 * 1024;

/// 帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
    B,
    Bi,
    PSkipped,
}

/// advanced profile 序列头
#[derive(Debug, Clone, Copy)]
pub struct SequenceHeader {
    pub level: u8,
    pub chroma_format: u8,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub pulldown: bool,
    pub interlace: bool,
    pub tf_counter: bool,
    pub psf_mode: bool,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub par: Option<Rational>,
    pub framerate: Option<Rational>,
    pub hrd_param_flag: bool,
    pub hrd_num_leaky_buckets: u32,
}

/// 帧头
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub repeat_frame: u32,
    pub top_field_first: bool,
    pub repeat_first_field: bool,
}

/// 一个完整的 VC-1 访问单元
#[derive(Debug, Clone)]
pub struct Vc1Frame {
    pub data: Bytes,
    pub header: FrameHeader,
    pub timestamp_ns: i64,
    pub duration_ns: i64,
    /// 单元内是否含序列头 (关键帧判定之外还影响引用语义)
    pub contains_sequence_header: bool,
    /// 单元内是否含场包
    pub contains_field: bool,
}

impl Vc1Frame {
    /// 是否为关键帧
    pub fn key_frame(&self) -> bool {
        matches!(self.header.frame_type, FrameType::I)
    }
}

/// 预定义 PAR 表 (SMPTE 421M 表 41)
const PAR_TABLE: [(u32, u32); 13] = [
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
];

const FRAMERATE_NR: [u32; 5] = [24, 25, 30, 50, 60];
const FRAMERATE_DR: [u32; 2] = [1000, 1001];

/// 解析序列头 (输入含 4 字节标记)
pub fn parse_sequence_header(buf: &[u8]) -> MuxResult<SequenceHeader> {
    let mut bc = BitReader::new(buf);
    bc.skip_bits(32)?; // 标记

    let profile = bc.read_bits(2)?;
    if profile != 3 {
        return Err(MuxError::UnsupportedCodec(format!(
            "VC-1: 仅支持 advanced profile, 实为 profile {profile}"
        )));
    }

    let level = bc.read_bits(3)? as u8;
    let chroma_format = bc.read_bits(2)? as u8;
    bc.skip_bits(3 + 5 + 1)?; // frame_rtq, bit_rtq, postproc
    let pixel_width = ((bc.read_bits(12)? as u32) + 1) << 1;
    let pixel_height = ((bc.read_bits(12)? as u32) + 1) << 1;
    let pulldown = bc.read_bit()?;
    let interlace = bc.read_bit()?;
    let tf_counter = bc.read_bit()?;
    bc.skip_bits(1)?; // f_inter_p
    bc.skip_bits(1)?; // reserved
    let psf_mode = bc.read_bit()?;

    let mut display_width = None;
    let mut display_height = None;
    let mut par = None;
    let mut framerate = None;

    if bc.read_bit()? {
        // display_info
        display_width = Some(bc.read_bits(14)? as u32 + 1);
        display_height = Some(bc.read_bits(14)? as u32 + 1);

        if bc.read_bit()? {
            // aspect_ratio
            let idx = bc.read_bits(4)? as usize;
            if (1..=13).contains(&idx) {
                let (n, d) = PAR_TABLE[idx - 1];
                par = Some(Rational::new(n, d));
            } else if idx == 15 {
                let n = bc.read_bits(8)? as u32;
                let d = bc.read_bits(8)? as u32;
                if n != 0 && d != 0 {
                    par = Some(Rational::new(n, d));
                }
            }
        }

        if bc.read_bit()? {
            // framerate
            if bc.read_bit()? {
                // framerateexp
                let exp = bc.read_bits(16)? as u32;
                framerate = Some(Rational::new(exp + 1, 32));
            } else {
                let nr = bc.read_bits(8)? as usize;
                let dr = bc.read_bits(4)? as usize;
                if (1..=5).contains(&nr) && (1..=2).contains(&dr) {
                    framerate = Some(Rational::new(
                        FRAMERATE_NR[nr - 1] * 1000,
                        FRAMERATE_DR[dr - 1],
                    ));
                }
            }
        }

        if bc.read_bit()? {
            // color_format
            bc.skip_bits(24)?;
        }
    }

    let hrd_param_flag = bc.read_bit()?;
    let mut hrd_num_leaky_buckets = 0;
    if hrd_param_flag {
        hrd_num_leaky_buckets = bc.read_bits(5)? as u32;
        bc.skip_bits(4 + 4)?;
        bc.skip_bits(hrd_num_leaky_buckets * 32)?;
    }

    Ok(SequenceHeader {
        level,
        chroma_format,
        pixel_width,
        pixel_height,
        pulldown,
        interlace,
        tf_counter,
        psf_mode,
        display_width,
        display_height,
        par,
        framerate,
        hrd_param_flag,
        hrd_num_leaky_buckets,
    })
}

/// 解析帧头 (输入含 4 字节标记)
pub fn parse_frame_header(buf: &[u8], seqhdr: &SequenceHeader) -> MuxResult<FrameHeader> {
    let mut bc = BitReader::new(buf);
    bc.skip_bits(32)?;

    if seqhdr.interlace {
        // fcm: 0 | 10 | 11
        if bc.read_bit()? {
            bc.skip_bits(1)?;
        }
    }

    // ptype 变长码: 0=P, 10=B, 110=I, 1110=BI, 1111=跳过的 P
    let mut ones = 0u32;
    while ones < 4 && bc.read_bit()? {
        ones += 1;
    }
    let frame_type = match ones {
        0 => FrameType::P,
        1 => FrameType::B,
        2 => FrameType::I,
        3 => FrameType::Bi,
        _ => {
            return Ok(FrameHeader {
                frame_type: FrameType::PSkipped,
                repeat_frame: 0,
                top_field_first: false,
                repeat_first_field: false,
            });
        }
    };

    if seqhdr.tf_counter {
        bc.skip_bits(8)?;
    }

    let mut repeat_frame = 0;
    let mut top_field_first = false;
    let mut repeat_first_field = false;
    if seqhdr.pulldown {
        if !seqhdr.interlace || seqhdr.psf_mode {
            repeat_frame = bc.read_bits(2)? as u32;
        } else {
            top_field_first = bc.read_bit()?;
            repeat_first_field = bc.read_bit()?;
        }
    }

    Ok(FrameHeader {
        frame_type,
        repeat_frame,
        top_field_first,
        repeat_first_field,
    })
}

/// VC-1 基本流解析器
pub struct Vc1EsParser {
    unparsed: Vec<u8>,
    seqhdr: Option<SequenceHeader>,
    raw_seqhdr: Option<Vec<u8>>,
    raw_entrypoint: Option<Vec<u8>>,
    seqhdr_changed: bool,

    current: Option<(FrameHeader, Vec<u8>)>,
    pre_extra: Vec<Vec<u8>>,
    post_extra: Vec<Vec<u8>>,
    frames: Vec<Vc1Frame>,

    timestamps: VecDeque<i64>,
    previous_timestamp: i64,
    num_timestamps: i64,
    num_repeated_fields: i64,
    default_duration: i64,
    default_duration_forced: bool,
}

impl Default for Vc1EsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Vc1EsParser {
    /// 创建解析器 (缺省 25fps 推算)
    pub fn new() -> Self {
        Self {
            unparsed: Vec::new(),
            seqhdr: None,
            raw_seqhdr: None,
            raw_entrypoint: None,
            seqhdr_changed: false,
            current: None,
            pre_extra: Vec::new(),
            post_extra: Vec::new(),
            frames: Vec::new(),
            timestamps: VecDeque::new(),
            previous_timestamp: 0,
            num_timestamps: 0,
            num_repeated_fields: 0,
            default_duration: NS_PER_SECOND / 25,
            default_duration_forced: false,
        }
    }

    /// 用户强制默认帧时长
    pub fn force_default_duration(&mut self, duration_ns: i64) {
        self.default_duration = duration_ns;
        self.default_duration_forced = true;
    }

    /// 当前默认帧时长
    pub fn default_duration(&self) -> i64 {
        self.default_duration
    }

    /// 注入外部时间戳
    pub fn add_timestamp(&mut self, timestamp_ns: i64) {
        self.timestamps.push_back(timestamp_ns);
    }

    /// 已解析的序列头
    pub fn seqhdr(&self) -> Option<&SequenceHeader> {
        self.seqhdr.as_ref()
    }

    /// 原始序列头字节 (codec private 用)
    pub fn raw_seqhdr(&self) -> Option<&[u8]> {
        self.raw_seqhdr.as_deref()
    }

    /// 原始 entrypoint 字节
    pub fn raw_entrypoint(&self) -> Option<&[u8]> {
        self.raw_entrypoint.as_deref()
    }

    /// 吞入字节并返回完成的访问单元
    pub fn add_bytes(&mut self, data: &[u8]) -> MuxResult<Vec<Vc1Frame>> {
        self.unparsed.extend_from_slice(data);

        // 扫描 0x000001 标记, 切出包
        loop {
            let Some(first) = find_marker(&self.unparsed, 0) else {
                break;
            };
            let Some(next) = find_marker(&self.unparsed, first + 4) else {
                if first > 0 {
                    self.unparsed.drain(..first);
                }
                break;
            };
            let packet = self.unparsed[first..next].to_vec();
            self.unparsed.drain(..next);
            self.handle_packet(packet)?;
        }

        if self.unparsed.len() > MAX_BUFFER {
            return Err(MuxError::malformed_at_unknown("VC-1: 缓冲超限"));
        }
        Ok(std::mem::take(&mut self.frames))
    }

    /// 吐出尾包与最后一个访问单元
    pub fn flush(&mut self) -> MuxResult<Vec<Vc1Frame>> {
        let tail = std::mem::take(&mut self.unparsed);
        if tail.len() >= 4 && is_marker(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]])) {
            self.handle_packet(tail)?;
        }
        self.flush_frame();
        Ok(std::mem::take(&mut self.frames))
    }

    /// 序列头自上次查询以来是否变化
    pub fn take_seqhdr_changed(&mut self) -> bool {
        std::mem::take(&mut self.seqhdr_changed)
    }

    fn handle_packet(&mut self, packet: Vec<u8>) -> MuxResult<()> {
        let marker = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]);
        match marker {
            marker::SEQHDR => self.handle_sequence_header(packet)?,
            marker::ENTRYPOINT => {
                if self.raw_entrypoint.is_none() {
                    self.raw_entrypoint = Some(packet.clone());
                }
                self.pre_extra.push(packet);
            }
            marker::FRAME => {
                self.flush_frame();
                let Some(seqhdr) = self.seqhdr else {
                    debug!("VC-1: 序列头之前的帧被丢弃");
                    return Ok(());
                };
                let header = parse_frame_header(&packet, &seqhdr)?;
                self.current = Some((header, packet));
            }
            marker::END_OF_SEQ => {}
            // 切片、场与未知标记并入当前帧作为帧后附加数据
            _ => self.post_extra.push(packet),
        }
        Ok(())
    }

    fn handle_sequence_header(&mut self, packet: Vec<u8>) -> MuxResult<()> {
        self.flush_frame();

        let seqhdr = parse_sequence_header(&packet)?;
        self.seqhdr_changed = self
            .raw_seqhdr
            .as_ref()
            .map(|prev| prev != &packet)
            .unwrap_or(true);
        self.seqhdr = Some(seqhdr);
        self.raw_seqhdr = Some(packet.clone());
        self.pre_extra.push(packet);

        if !self.default_duration_forced {
            if let Some(fr) = seqhdr.framerate {
                if fr.is_valid() {
                    self.default_duration = NS_PER_SECOND * i64::from(fr.den) / i64::from(fr.num);
                }
            }
        }
        Ok(())
    }

    fn flush_frame(&mut self) {
        let Some((header, frame_data)) = self.current.take() else {
            return;
        };

        let mut contains_sequence_header = false;
        let mut contains_field = false;
        let mut data = Vec::new();
        for extra in self.pre_extra.drain(..) {
            if u32::from_be_bytes([extra[0], extra[1], extra[2], extra[3]]) == marker::SEQHDR {
                contains_sequence_header = true;
            }
            data.extend_from_slice(&extra);
        }
        data.extend_from_slice(&frame_data);
        for extra in self.post_extra.drain(..) {
            if u32::from_be_bytes([extra[0], extra[1], extra[2], extra[3]]) == marker::FIELD {
                contains_field = true;
            }
            data.extend_from_slice(&extra);
        }

        // 计算时间戳: 外部提供优先, 否则按帧率外推 (重复场折半)
        let calculated = self.previous_timestamp
            + (self.num_timestamps + self.num_repeated_fields) * self.default_duration
            - self.num_repeated_fields * self.default_duration / 2;
        let timestamp = match self.timestamps.pop_front() {
            Some(provided) => {
                self.previous_timestamp = provided;
                self.num_timestamps = 0;
                self.num_repeated_fields = 0;
                provided
            }
            None => calculated,
        };

        self.num_timestamps += 1 + i64::from(header.repeat_frame);
        let interlace = self.seqhdr.map(|s| s.interlace).unwrap_or(false);
        if interlace && header.repeat_first_field && !contains_field {
            self.num_repeated_fields += 1;
        }

        self.frames.push(Vc1Frame {
            data: Bytes::from(data),
            header,
            timestamp_ns: timestamp,
            duration_ns: self.default_duration,
            contains_sequence_header,
            contains_field,
        });
    }
}

fn find_marker(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < from + 4 {
        return None;
    }
    (from..buf.len() - 3).find(|&i| {
        buf[i] == 0
            && buf[i + 1] == 0
            && buf[i + 2] == 1
            && (0x0A..=0x0F).contains(&buf[i + 3])
    })
}
