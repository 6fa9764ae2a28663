use std::path::Path;

use image::ImageFormat;

use crate::common::SNIFF_LEN;

pub trait PathExt {
    fn ext_lower(&self) -> String;

    /// Path rendered with forward slashes, suitable for storage keys and zip entries.
    fn to_slash_string(&self) -> String;
}

impl PathExt for Path {
    fn ext_lower(&self) -> String {
        self.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default()
    }

    fn to_slash_string(&self) -> String {
        self.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Joins key segments with a single `/`, ignoring empty segments.
pub fn join_key<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .filter_map(|s| {
            let trimmed = s.as_ref().trim_matches('/').to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Image format guessed from the leading bytes of a file.
pub fn sniff_image_format(head: &[u8]) -> Option<ImageFormat> {
    image::guess_format(&head[..head.len().min(SNIFF_LEN)]).ok()
}

/// MIME type from already-read leading bytes, falling back to the extension of `path`.
pub fn content_type_for(path: &Path, head: &[u8]) -> String {
    if let Some(format) = sniff_image_format(head) {
        return format.to_mime_type().to_string();
    }

    let mime = match path.ext_lower().as_str() {
        "json" => "application/json",
        "zip" => "application/zip",
        "pto" | "txt" => "text/plain; charset=utf-8",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    };
    mime.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_join_key_skips_empty_segments() {
        assert_eq!(join_key(["", "vr360/", "/abc", "1/f0_0.jpg"]), "vr360/abc/1/f0_0.jpg");
        assert_eq!(join_key(["", ""]), "");
    }

    #[test]
    fn test_to_slash_string() {
        let path: PathBuf = ["3", "f0_1.jpg"].iter().collect();
        assert_eq!(path.to_slash_string(), "3/f0_1.jpg");
    }

    #[test]
    fn test_sniff_png_header() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(sniff_image_format(&png_magic), Some(ImageFormat::Png));
        assert_eq!(sniff_image_format(b"plain text"), None);
    }

    #[test]
    fn test_content_type_falls_back_to_extension() {
        let json = Path::new("pano/config.json");
        assert_eq!(content_type_for(json, b"{\"type\":\"multires\"}"), "application/json");
        assert_eq!(
            content_type_for(Path::new("blob.bin"), &[1u8, 2, 3]),
            "application/octet-stream"
        );

        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        assert_eq!(content_type_for(Path::new("1/f0_0.jpg"), &jpeg_magic), "image/jpeg");
    }
}
