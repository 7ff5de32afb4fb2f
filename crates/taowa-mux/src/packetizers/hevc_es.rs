//! HEVC 基本流 Packetizer.
//!
//! 参数集就绪后由 SPS 定型 codec private (hevcC)、图像尺寸与
//! 显示尺寸; 实际默认时长在首次排空时按最频繁帧间隔修正;
//! 容器给出场时长提示时按半帧处理隔行内容.

use log::{debug, info};
use taowa_codec::parsers::hevc::HevcEsParser;
use taowa_codec::{CodecId, Packet};
use taowa_codec::packet::NO_REFERENCE;
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::Element;

use crate::cluster::ClusterScheduler;
use crate::packetizer::{self, Packetizer, PacketizerInput, SyncState, TrackOptions};
use crate::track::{TrackSpec, VideoParams};

/// HEVC 基本流 Packetizer
pub struct HevcEsPacketizer {
    spec: TrackSpec,
    opts: TrackOptions,
    sync: SyncState,
    parser: HevcEsParser,
    /// 读取器预喂期间切出的帧, 在首次 process 时排出
    primed_frames: Vec<taowa_codec::Frame>,
    first_frame: bool,
    default_duration_forced: bool,
}

impl HevcEsPacketizer {
    /// 创建
    pub fn new(track_number: u64, opts: TrackOptions) -> MuxResult<Self> {
        let spec = TrackSpec::new(track_number, TrackType::Video, CodecId::Hevc);
        let mut parser = HevcEsParser::new();
        if let Some(width) = opts.nalu_size_length {
            parser.set_nalu_size_length(width);
        }
        let mut default_duration_forced = false;
        if let Some(dd) = opts.default_duration_ns {
            parser.force_default_duration(dd);
            default_duration_forced = true;
        }
        let sync = SyncState::new(&opts);
        Ok(Self {
            spec,
            opts,
            sync,
            parser,
            primed_frames: Vec::new(),
            first_frame: true,
            default_duration_forced,
        })
    }

    /// 读取器在 set_headers 之前预喂数据 (探测参数集);
    /// 切出的帧暂存, 首次 process 时按序排出.
    pub fn prime(&mut self, data: &[u8]) -> MuxResult<()> {
        let frames = self.parser.add_bytes(data)?;
        self.primed_frames.extend(frames);
        Ok(())
    }

    /// 参数集是否就绪
    pub fn headers_ready(&self) -> bool {
        self.parser.headers_ready()
    }

    /// 解析器内部状态 (读取器预喂头部、配置输入形式用)
    pub fn parser_mut(&mut self) -> &mut HevcEsParser {
        &mut self.parser
    }

    /// 容器提示的场时长 (隔行按半帧)
    pub fn set_container_default_field_duration(&mut self, duration_ns: i64) {
        self.parser.set_container_default_duration(duration_ns / 2);
    }

    /// 参数集就绪后定型轨道头
    fn finalize_headers(&mut self) -> MuxResult<()> {
        let hevcc = self.parser.hevcc()?;
        self.spec.codec_private = Some(hevcc.into());

        let sps = self
            .parser
            .sps()
            .ok_or_else(|| taowa_core::MuxError::malformed_at_unknown("HEVC: 没有可用的 SPS"))?;
        let (mut display_width, mut display_height) = sps.display_dimensions();
        if let Some((w, h)) = self.opts.display_dimensions {
            display_width = w;
            display_height = h;
        } else if let Some(ratio) = self.opts.aspect_ratio {
            display_width = (sps.height as f64 * ratio) as u64;
            display_height = sps.height;
        }
        if (display_width, display_height) != (sps.width, sps.height) {
            info!("HEVC: 显示尺寸 {display_width}x{display_height}");
        }
        self.spec.video = Some(VideoParams {
            pixel_width: sps.width,
            pixel_height: sps.height,
            display_width: Some(display_width),
            display_height: Some(display_height),
            interlaced: false,
        });
        if let Some(language) = &self.opts.language {
            self.spec.language = language.clone();
        }
        if let Some(name) = &self.opts.track_name {
            self.spec.name = Some(name.clone());
        }
        if let Some(flag) = self.opts.flag_default {
            self.spec.flag_default = flag;
        }
        self.spec.default_duration_ns = self.parser.default_duration();
        Ok(())
    }

    /// 首帧就绪时修正实际默认时长 (最频繁帧间隔)
    fn handle_actual_default_duration(&mut self) {
        if self.default_duration_forced {
            if let Some(actual) = self.parser.most_frequent_duration() {
                if Some(actual) != self.spec.default_duration_ns {
                    debug!("HEVC: 码流实际帧间隔 {actual}ns 与用户指定值不同, 以用户为准");
                }
            }
            return;
        }
        if let Some(actual) = self.parser.most_frequent_duration() {
            if actual > 0 && Some(actual) != self.spec.default_duration_ns {
                debug!("HEVC: 按最频繁帧间隔修正默认时长为 {actual}ns");
                self.spec.default_duration_ns = Some(actual);
            }
        }
    }

    fn emit_frames(
        &mut self,
        frames: Vec<taowa_codec::Frame>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        for frame in frames {
            if self.first_frame {
                if self.parser.skipped_frames() > 0 {
                    info!(
                        "HEVC: 此轨道不以关键帧开始, 已跳过前 {} 帧",
                        self.parser.skipped_frames()
                    );
                }
                self.first_frame = false;
            }
            let timestamp = self.sync.scale(frame.timestamp_ns.unwrap_or(0))
                + self.opts.sync_displacement_ns;
            if timestamp < 0 {
                continue;
            }
            let mut packet = Packet {
                data: frame.data,
                timestamp_ns: timestamp,
                duration_ns: if self.opts.use_durations {
                    frame.duration_ns.map(|d| self.sync.scale(d))
                } else {
                    None
                },
                duration_hint_ns: frame.duration_ns.map(|d| self.sync.scale(d)).unwrap_or(0),
                track: self.spec.number,
                key_frame: frame.key_frame,
                bref_ns: NO_REFERENCE,
                fref_ns: NO_REFERENCE,
                discardable: false,
                reference_priority: 0,
            };
            if let Some(bref) = frame.bref_ns {
                packet.bref_ns = self.sync.scale(bref) + self.opts.sync_displacement_ns;
            }
            packetizer::enqueue(&self.spec, sched, packet)?;
        }
        Ok(())
    }
}

impl Packetizer for HevcEsPacketizer {
    fn spec(&self) -> &TrackSpec {
        &self.spec
    }

    fn set_headers(&mut self) -> MuxResult<Element> {
        self.finalize_headers()?;
        self.spec.to_element()
    }

    fn process(
        &mut self,
        input: PacketizerInput<'_>,
        sched: &mut ClusterScheduler,
    ) -> MuxResult<()> {
        if let Some(ts) = input.timestamp_ns {
            self.parser.add_timestamp(ts);
        }
        let primed = std::mem::take(&mut self.primed_frames);
        self.emit_frames(primed, sched)?;
        let frames = self.parser.add_bytes(input.data)?;
        self.emit_frames(frames, sched)
    }

    fn flush(&mut self, sched: &mut ClusterScheduler) -> MuxResult<()> {
        let primed = std::mem::take(&mut self.primed_frames);
        self.emit_frames(primed, sched)?;
        let frames = self.parser.flush()?;
        self.handle_actual_default_duration();
        self.emit_frames(frames, sched)
    }

    /// HEVC 特例: codec private 不同但其余参数一致时, 解析器可以
    /// 合并双方的参数集, 拼接仍然可行
    fn can_connect_to(&self, other: &TrackSpec) -> crate::packetizer::ConnectCheck {
        match crate::packetizer::check_connection(self.spec(), other) {
            crate::packetizer::ConnectCheck::MaybeCodecPrivate(_) => {
                crate::packetizer::ConnectCheck::Ok
            }
            result => result,
        }
    }
}
