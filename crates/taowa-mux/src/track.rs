//! 输出轨道模型.
//!
//! TrackSpec 汇集一条输出轨道的全部参数, 在首个 Cluster 之前
//! 定型并渲染为 Tracks 下的 TrackEntry.

use bytes::Bytes;
use taowa_codec::CodecId;
use taowa_core::{MuxResult, TrackType};
use taowa_ebml::{Element, ids};

use crate::compression::Compression;

/// 音频参数子集
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    /// 采样率 (Hz)
    pub sample_rate: f64,
    /// 输出采样率 (SBR 等上采样场景)
    pub output_sample_rate: Option<f64>,
    /// 声道数
    pub channels: u64,
    /// 位深
    pub bit_depth: Option<u64>,
}

/// 视频参数子集
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    /// 编码像素宽度
    pub pixel_width: u64,
    /// 编码像素高度
    pub pixel_height: u64,
    /// 显示宽度 (PAR 换算或用户指定)
    pub display_width: Option<u64>,
    /// 显示高度
    pub display_height: Option<u64>,
    /// 是否隔行
    pub interlaced: bool,
}

/// 一条输出轨道
#[derive(Debug, Clone)]
pub struct TrackSpec {
    /// 线上轨道编号 (TrackNumber)
    pub number: u64,
    /// 稳定轨道 UID
    pub uid: u64,
    /// 轨道类型
    pub track_type: TrackType,
    /// 编解码格式
    pub codec: CodecId,
    /// codec private 数据
    pub codec_private: Option<Bytes>,
    /// 默认帧时长 (纳秒)
    pub default_duration_ns: Option<i64>,
    /// 语言代码 (ISO 639-2)
    pub language: String,
    /// 轨道名称
    pub name: Option<String>,
    /// 默认轨道标志
    pub flag_default: bool,
    /// 强制显示标志
    pub flag_forced: bool,
    /// 启用标志
    pub flag_enabled: bool,
    /// 是否允许花边
    pub lacing: bool,
    /// 音频参数
    pub audio: Option<AudioParams>,
    /// 视频参数
    pub video: Option<VideoParams>,
    /// 内容压缩
    pub compression: Option<Compression>,
    /// 携带 BlockAdditions 的轨道的最大附加 ID
    pub max_block_addition_id: Option<u64>,
}

impl TrackSpec {
    /// 以缺省标志构造
    pub fn new(number: u64, track_type: TrackType, codec: CodecId) -> Self {
        Self {
            number,
            uid: taowa_core::random::random_u64(),
            track_type,
            codec,
            codec_private: None,
            default_duration_ns: None,
            language: "eng".to_owned(),
            name: None,
            flag_default: true,
            flag_forced: false,
            flag_enabled: true,
            lacing: false,
            audio: None,
            video: None,
            compression: None,
            max_block_addition_id: None,
        }
    }

    /// 渲染为 TrackEntry 元素
    pub fn to_element(&self) -> MuxResult<Element> {
        let mut entry = Element::new(ids::TRACK_ENTRY)?;
        entry.get_child(ids::TRACK_NUMBER).set_uint(self.number)?;
        entry.get_child(ids::TRACK_UID).set_uint(self.uid)?;
        entry
            .get_child(ids::TRACK_TYPE)
            .set_uint(self.track_type.wire_value())?;
        entry
            .get_child(ids::FLAG_ENABLED)
            .set_uint(self.flag_enabled.into())?;
        entry
            .get_child(ids::FLAG_DEFAULT)
            .set_uint(self.flag_default.into())?;
        entry
            .get_child(ids::FLAG_FORCED)
            .set_uint(self.flag_forced.into())?;
        entry.get_child(ids::FLAG_LACING).set_uint(self.lacing.into())?;
        if let Some(dd) = self.default_duration_ns {
            entry.get_child(ids::DEFAULT_DURATION).set_uint(dd as u64)?;
        }
        if let Some(max_id) = self.max_block_addition_id {
            entry.get_child(ids::MAX_BLOCK_ADDITION_ID).set_uint(max_id)?;
        }
        if let Some(name) = &self.name {
            entry.get_child(ids::TRACK_NAME).set_str(name)?;
        }
        entry.get_child(ids::LANGUAGE).set_str(&self.language)?;
        entry
            .get_child(ids::CODEC_ID)
            .set_str(self.codec.matroska_id())?;
        if let Some(private) = &self.codec_private {
            entry
                .get_child(ids::CODEC_PRIVATE)
                .set_binary(private.clone())?;
        }

        if let Some(video) = &self.video {
            let v = entry.get_child(ids::VIDEO);
            v.get_child(ids::PIXEL_WIDTH).set_uint(video.pixel_width)?;
            v.get_child(ids::PIXEL_HEIGHT).set_uint(video.pixel_height)?;
            if let Some(dw) = video.display_width {
                v.get_child(ids::DISPLAY_WIDTH).set_uint(dw)?;
            }
            if let Some(dh) = video.display_height {
                v.get_child(ids::DISPLAY_HEIGHT).set_uint(dh)?;
            }
            if video.interlaced {
                v.get_child(ids::FLAG_INTERLACED).set_uint(1)?;
            }
        }

        if let Some(audio) = &self.audio {
            let a = entry.get_child(ids::AUDIO);
            a.get_child(ids::SAMPLING_FREQUENCY)
                .set_float(audio.sample_rate)?;
            if let Some(osr) = audio.output_sample_rate {
                a.get_child(ids::OUTPUT_SAMPLING_FREQUENCY).set_float(osr)?;
            }
            a.get_child(ids::CHANNELS).set_uint(audio.channels)?;
            if let Some(depth) = audio.bit_depth {
                a.get_child(ids::BIT_DEPTH).set_uint(depth)?;
            }
        }

        if let Some(compression) = &self.compression {
            let encodings = entry.get_child(ids::CONTENT_ENCODINGS);
            let encoding = encodings.get_child(ids::CONTENT_ENCODING);
            encoding.get_child(ids::CONTENT_ENCODING_ORDER).set_uint(0)?;
            encoding.get_child(ids::CONTENT_ENCODING_SCOPE).set_uint(1)?;
            encoding.get_child(ids::CONTENT_ENCODING_TYPE).set_uint(0)?;
            let comp = encoding.get_child(ids::CONTENT_COMPRESSION);
            comp.get_child(ids::CONTENT_COMP_ALGO)
                .set_uint(compression.wire_algo())?;
        }

        entry.sort();
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_音频轨道渲染() {
        let mut spec = TrackSpec::new(1, TrackType::Audio, CodecId::Ac3);
        spec.audio = Some(AudioParams {
            sample_rate: 48_000.0,
            output_sample_rate: None,
            channels: 2,
            bit_depth: None,
        });
        let entry = spec.to_element().unwrap();
        assert_eq!(entry.find_child(ids::TRACK_NUMBER).unwrap().as_uint().unwrap(), 1);
        assert_eq!(entry.find_child(ids::TRACK_TYPE).unwrap().as_uint().unwrap(), 2);
        assert_eq!(
            entry.find_child(ids::CODEC_ID).unwrap().as_str().unwrap(),
            "A_AC3"
        );
        let audio = entry.find_child(ids::AUDIO).unwrap();
        assert_eq!(
            audio
                .find_child(ids::SAMPLING_FREQUENCY)
                .unwrap()
                .as_float()
                .unwrap(),
            48_000.0
        );
        assert_eq!(audio.find_child(ids::CHANNELS).unwrap().as_uint().unwrap(), 2);
    }

    #[test]
    fn test_视频轨道渲染() {
        let mut spec = TrackSpec::new(2, TrackType::Video, CodecId::Hevc);
        spec.codec_private = Some(Bytes::from_static(&[1, 2, 3]));
        spec.default_duration_ns = Some(40_000_000);
        spec.video = Some(VideoParams {
            pixel_width: 1920,
            pixel_height: 1080,
            display_width: Some(1920),
            display_height: Some(1080),
            interlaced: false,
        });
        let entry = spec.to_element().unwrap();
        assert_eq!(
            entry
                .find_child(ids::DEFAULT_DURATION)
                .unwrap()
                .as_uint()
                .unwrap(),
            40_000_000
        );
        let video = entry.find_child(ids::VIDEO).unwrap();
        assert_eq!(
            video.find_child(ids::PIXEL_WIDTH).unwrap().as_uint().unwrap(),
            1920
        );
        // 子元素按规范顺序排序
        assert_eq!(entry.children()[0].id(), ids::TRACK_NUMBER);
    }

    #[test]
    fn test_压缩轨道渲染() {
        let mut spec = TrackSpec::new(3, TrackType::Buttons, CodecId::VobBtn);
        spec.compression = Some(Compression::Zlib);
        let entry = spec.to_element().unwrap();
        let algo = entry
            .find_child(ids::CONTENT_ENCODINGS)
            .unwrap()
            .find_child(ids::CONTENT_ENCODING)
            .unwrap()
            .find_child(ids::CONTENT_COMPRESSION)
            .unwrap()
            .find_child(ids::CONTENT_COMP_ALGO)
            .unwrap()
            .as_uint()
            .unwrap();
        assert_eq!(algo, 0);
    }
}
