//! Matroska 轨道类型.

use std::fmt;

/// 轨道类型
///
/// 数值与 Matroska TrackType 元素的线上取值一致.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// 视频轨道
    Video,
    /// 音频轨道
    Audio,
    /// 复合轨道 (音视频交织, DV 等)
    Complex,
    /// 字幕轨道
    Subtitles,
    /// 按钮轨道 (DVD/VobBtn)
    Buttons,
}

impl TrackType {
    /// Matroska TrackType 元素的线上取值
    pub const fn wire_value(self) -> u64 {
        match self {
            Self::Video => 1,
            Self::Audio => 2,
            Self::Complex => 3,
            Self::Subtitles => 17,
            Self::Buttons => 18,
        }
    }

    /// 从线上取值解析
    pub const fn from_wire_value(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Video),
            2 => Some(Self::Audio),
            3 => Some(Self::Complex),
            17 => Some(Self::Subtitles),
            18 => Some(Self::Buttons),
            _ => None,
        }
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "视频",
            Self::Audio => "音频",
            Self::Complex => "复合",
            Self::Subtitles => "字幕",
            Self::Buttons => "按钮",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_线上取值往返() {
        for t in [
            TrackType::Video,
            TrackType::Audio,
            TrackType::Complex,
            TrackType::Subtitles,
            TrackType::Buttons,
        ] {
            assert_eq!(TrackType::from_wire_value(t.wire_value()), Some(t));
        }
        assert_eq!(TrackType::from_wire_value(99), None);
    }
}
