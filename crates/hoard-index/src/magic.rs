//! Magic-number MIME detection for non-schema blobs.

/// Known file-header prefixes.
const TABLE: &[(&[u8], &str)] = &[
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
    (b"BM", "image/bmp"),
    (b"%PDF", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b\x08", "application/gzip"),
    (b"BZh", "application/bzip2"),
    (b"fLaC\x00\x00\x00\x22", "audio/flac"),
    (b"ID3", "audio/mpeg"),
    (b"OggS", "application/ogg"),
    (b"\x7fELF", "application/x-elf"),
    (b"<!DOCTYPE html", "text/html"),
    (b"<html", "text/html"),
    (b"<?xml", "text/xml"),
];

/// MIME type from a content prefix, or `None` if unrecognized.
pub fn mime_type(header: &[u8]) -> Option<&'static str> {
    TABLE
        .iter()
        .find(|(prefix, _)| header.starts_with(prefix))
        .map(|(_, mime)| *mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_types() {
        assert_eq!(mime_type(b"\xff\xd8\xff\xe0rest"), Some("image/jpeg"));
        assert_eq!(mime_type(b"%PDF-1.4"), Some("application/pdf"));
        assert_eq!(mime_type(b"GIF89a..."), Some("image/gif"));
    }

    #[test]
    fn test_unknown_returns_none() {
        assert_eq!(mime_type(b"just some text"), None);
        assert_eq!(mime_type(b""), None);
    }
}
