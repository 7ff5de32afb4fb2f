//! 附件.
//!
//! `--attach-file` 的文件成为 AttachedFile; MIME 类型未指定时按
//! 扩展名猜测.

use std::path::Path;

use taowa_core::{MuxResult, random};
use taowa_ebml::{Element, ids};

/// 一个待附加的文件
#[derive(Debug, Clone)]
pub struct Attachment {
    /// 文件路径
    pub path: String,
    /// MIME 类型 (None 时按扩展名猜测)
    pub mime_type: Option<String>,
    /// 描述
    pub description: Option<String>,
}

/// 按扩展名猜测 MIME 类型
pub fn guess_mime_type(path: &str) -> &'static str {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "ttf" => "application/x-truetype-font",
        "otf" => "application/vnd.ms-opentype",
        "srt" => "text/plain",
        "xml" => "text/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// 构造 Attachments 元素
pub fn build_attachments(attachments: &[Attachment]) -> MuxResult<Element> {
    let mut root = Element::new(ids::ATTACHMENTS)?;
    for attachment in attachments {
        let data = std::fs::read(&attachment.path)?;
        let file_name = Path::new(&attachment.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&attachment.path)
            .to_owned();
        let mime = attachment
            .mime_type
            .clone()
            .unwrap_or_else(|| guess_mime_type(&attachment.path).to_owned());

        let mut file = Element::new(ids::ATTACHED_FILE)?;
        file.get_child(ids::FILE_NAME).set_str(&file_name)?;
        file.get_child(ids::FILE_MIME_TYPE).set_str(&mime)?;
        if let Some(description) = &attachment.description {
            file.get_child(ids::FILE_DESCRIPTION).set_str(description)?;
        }
        file.get_child(ids::FILE_DATA).set_binary(data)?;
        file.get_child(ids::FILE_UID)
            .set_uint(random::random_u64())?;
        file.sort();
        root.push(file);
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mime_猜测() {
        assert_eq!(guess_mime_type("cover.jpg"), "image/jpeg");
        assert_eq!(guess_mime_type("font.TTF"), "application/x-truetype-font");
        assert_eq!(guess_mime_type("unknown.bin"), "application/octet-stream");
    }

    #[test]
    fn test_构造附件元素() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cover.png");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&[0x89, b'P', b'N', b'G']).unwrap();

        let attachments = build_attachments(&[Attachment {
            path: path.to_str().unwrap().to_owned(),
            mime_type: None,
            description: Some("封面".to_owned()),
        }])
        .unwrap();

        let file = attachments.find_child(ids::ATTACHED_FILE).unwrap();
        assert_eq!(
            file.find_child(ids::FILE_NAME).unwrap().as_str().unwrap(),
            "cover.png"
        );
        assert_eq!(
            file.find_child(ids::FILE_MIME_TYPE).unwrap().as_str().unwrap(),
            "image/png"
        );
        assert_eq!(
            file.find_child(ids::FILE_DATA).unwrap().as_binary().unwrap().len(),
            4
        );
        assert!(file.find_child(ids::FILE_UID).unwrap().as_uint().unwrap() > 0);
    }
}
