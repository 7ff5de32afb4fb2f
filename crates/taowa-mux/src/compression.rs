//! 轨道内容压缩 (ContentEncoding).
//!
//! 写出路径: 块负载在进入调度器之前按轨道配置压缩.
//! 当前支持 zlib; VobBtn 轨道默认开启.

use std::io::Write;

use flate2::Compression as ZlibLevel;
use flate2::write::ZlibEncoder;
use taowa_core::MuxResult;

/// 压缩算法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// zlib (ContentCompAlgo = 0)
    Zlib,
}

impl Compression {
    /// ContentCompAlgo 线上取值
    pub const fn wire_algo(self) -> u64 {
        match self {
            Self::Zlib => 0,
        }
    }

    /// 按命令行取值解析 ("zlib" / "none")
    pub fn from_option(value: &str) -> Option<Option<Self>> {
        match value {
            "zlib" => Some(Some(Self::Zlib)),
            "none" => Some(None),
            _ => None,
        }
    }

    /// 压缩一块负载
    pub fn compress(self, data: &[u8]) -> MuxResult<Vec<u8>> {
        match self {
            Self::Zlib => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    ZlibLevel::default(),
                );
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    #[test]
    fn test_zlib_压缩可还原() {
        let data = vec![0x41u8; 4096];
        let compressed = Compression::Zlib.compress(&data).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut restored = Vec::new();
        decoder.read_to_end(&mut restored).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn test_命令行取值() {
        assert_eq!(
            Compression::from_option("zlib"),
            Some(Some(Compression::Zlib))
        );
        assert_eq!(Compression::from_option("none"), Some(None));
        assert_eq!(Compression::from_option("lzo"), None);
    }
}
