//! 编解码格式标识与 Matroska CodecID 字符串映射.

use std::fmt;

/// 编解码格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// AC-3 (Dolby Digital)
    Ac3,
    /// E-AC-3 (Dolby Digital Plus)
    Eac3,
    /// DTS / DTS-HD
    Dts,
    /// MPEG-2/4 AAC
    Aac,
    /// FLAC
    Flac,
    /// Vorbis
    Vorbis,
    /// MP3 (MPEG-1/2 Audio Layer III)
    Mp3,
    /// PCM (小端整数)
    Pcm,
    /// HEVC / H.265
    Hevc,
    /// VC-1 (SMPTE 421M, advanced profile)
    Vc1,
    /// 文本字幕 (SRT/SSA 等, UTF-8)
    TextUtf8,
    /// SSA/ASS 字幕
    TextAss,
    /// VobSub 字幕
    VobSub,
    /// DVD 按钮 (VobBtn)
    VobBtn,
}

impl CodecId {
    /// Matroska CodecID 字符串
    pub const fn matroska_id(self) -> &'static str {
        match self {
            Self::Ac3 => "A_AC3",
            Self::Eac3 => "A_EAC3",
            Self::Dts => "A_DTS",
            Self::Aac => "A_AAC",
            Self::Flac => "A_FLAC",
            Self::Vorbis => "A_VORBIS",
            Self::Mp3 => "A_MPEG/L3",
            Self::Pcm => "A_PCM/INT/LIT",
            Self::Hevc => "V_MPEGH/ISO/HEVC",
            Self::Vc1 => "V_MS/VFW/FOURCC",
            Self::TextUtf8 => "S_TEXT/UTF8",
            Self::TextAss => "S_TEXT/ASS",
            Self::VobSub => "S_VOBSUB",
            Self::VobBtn => "B_VOBBTN",
        }
    }

    /// 是否为音频格式
    pub const fn is_audio(self) -> bool {
        matches!(
            self,
            Self::Ac3 | Self::Eac3 | Self::Dts | Self::Aac | Self::Flac | Self::Vorbis
                | Self::Mp3 | Self::Pcm
        )
    }

    /// 是否为视频格式
    pub const fn is_video(self) -> bool {
        matches!(self, Self::Hevc | Self::Vc1)
    }

    /// 是否为字幕格式
    pub const fn is_subtitle(self) -> bool {
        matches!(self, Self::TextUtf8 | Self::TextAss | Self::VobSub)
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.matroska_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matroska_id_映射() {
        assert_eq!(CodecId::Ac3.matroska_id(), "A_AC3");
        assert_eq!(CodecId::Hevc.matroska_id(), "V_MPEGH/ISO/HEVC");
        assert_eq!(CodecId::TextUtf8.matroska_id(), "S_TEXT/UTF8");
    }

    #[test]
    fn test_类别判断() {
        assert!(CodecId::Dts.is_audio());
        assert!(CodecId::Hevc.is_video());
        assert!(CodecId::TextAss.is_subtitle());
        assert!(!CodecId::VobBtn.is_audio());
    }
}
