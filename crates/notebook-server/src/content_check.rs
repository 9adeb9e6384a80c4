//! Validation of uploaded background files.
//!
//! Every check here runs on the in-memory payload before anything touches
//! the asset directory or the catalog.

use notebook_store::AssetKind;

use crate::error::ServerError;

/// Longest accepted client file name, in characters.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Bytes inspected by the security scan.
pub const SCAN_WINDOW: usize = 1024;

/// Leading bytes of executables, scripts and archives.
const FORBIDDEN_PREFIXES: &[(&[u8], &str)] = &[
    (b"MZ", "Windows executable"),
    (b"\x7fELF", "ELF executable"),
    (b"\xca\xfe\xba\xbe", "Java class file"),
    (b"\xfe\xed\xfa", "Mach-O executable"),
    (b"#!", "script"),
    (b"%PDF", "PDF document"),
    (b"PK", "ZIP archive"),
    (b"Rar!", "RAR archive"),
    (b"7z\xbc\xaf\x27\x1c", "7z archive"),
    (b"\x1f\x8b", "gzip archive"),
];

/// Script fragments, matched against the lower-cased scan window.
const FORBIDDEN_PATTERNS: &[(&[u8], &str)] = &[
    (b"<?php", "PHP script"),
    (b"<script", "JavaScript"),
    (b"javascript:", "JavaScript URL"),
    (b"vbscript:", "VBScript"),
    (b"onload=", "HTML event handler"),
    (b"onclick=", "HTML event handler"),
];

/// A validated upload, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedUpload {
    /// Sanitized client file name.
    pub original_name: String,
    /// Lower-cased extension.
    pub extension: String,
    pub kind: AssetKind,
}

/// Reduce a client file name to ASCII letters, digits, `_`, `-` and `.`.
///
/// Path separators and whitespace runs become `_`; leading and trailing
/// dots and underscores are stripped so the result cannot name a hidden
/// file or a parent directory.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_whitespace() || c == '/' || c == '\\' {
            pending_sep = true;
            continue;
        }
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        }
    }
    out.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Kind implied by the extension of `name`, if it is allowed.
pub fn kind_for_name(name: &str) -> Option<(String, AssetKind)> {
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    AssetKind::from_extension(&ext).map(|kind| (ext, kind))
}

/// Reject payloads that look like executables, archives or scripts.
pub fn security_scan(data: &[u8]) -> Result<(), ServerError> {
    let window = &data[..data.len().min(SCAN_WINDOW)];

    for (prefix, what) in FORBIDDEN_PREFIXES {
        if window.starts_with(prefix) {
            return Err(ServerError::Rejected(format!("{what} detected")));
        }
    }

    let lowered = window.to_ascii_lowercase();
    for (pattern, what) in FORBIDDEN_PATTERNS {
        if contains(&lowered, pattern) {
            return Err(ServerError::Rejected(format!("{what} detected")));
        }
    }

    Ok(())
}

/// Media kind recognised from the header, if any.
pub fn detect_kind(data: &[u8]) -> Option<AssetKind> {
    if data.starts_with(b"\x89PNG")
        || data.starts_with(b"\xff\xd8")
        || data.starts_with(b"GIF87a")
        || data.starts_with(b"GIF89a")
        || (data.starts_with(b"RIFF") && data.get(8..12) == Some(&b"WEBP"[..]))
    {
        return Some(AssetKind::Image);
    }

    // ISO base media (mp4, mov): box size then `ftyp`.
    if data.get(4..8) == Some(&b"ftyp"[..]) {
        return Some(AssetKind::Video);
    }
    let head = &data[..data.len().min(64)];
    if data.starts_with(b"\x1a\x45\xdf\xa3") || contains(head, b"webm") {
        return Some(AssetKind::Video);
    }

    None
}

/// Run every upload check in order: name length, extension allow-list,
/// size, security scan, then header against declared kind.
pub fn check_upload(
    file_name: &str,
    data: &[u8],
    max_size: usize,
) -> Result<CheckedUpload, ServerError> {
    if file_name.trim().is_empty() {
        return Err(ServerError::BadRequest("No file selected".to_string()));
    }
    if file_name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(ServerError::BadRequest("File name too long".to_string()));
    }

    let (extension, kind) = kind_for_name(file_name).ok_or_else(|| {
        ServerError::BadRequest(format!(
            "Unsupported file type, allowed: {}",
            AssetKind::IMAGE_EXTENSIONS
                .iter()
                .chain(AssetKind::VIDEO_EXTENSIONS.iter())
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;

    if data.is_empty() {
        return Err(ServerError::BadRequest("File is empty".to_string()));
    }
    if data.len() > max_size {
        return Err(ServerError::PayloadTooLarge { max: max_size });
    }

    security_scan(data)?;

    match detect_kind(data) {
        Some(detected) if detected == kind => {}
        Some(detected) => {
            return Err(ServerError::Rejected(format!(
                "File content is {} but extension .{extension} declares {}",
                detected.as_str(),
                kind.as_str()
            )))
        }
        None => {
            return Err(ServerError::Rejected(format!(
                "Unrecognised {} file header",
                kind.as_str()
            )))
        }
    }

    // Names that sanitize to nothing useful (e.g. entirely non-ASCII) get a
    // neutral stand-in that keeps the extension.
    let sanitized = sanitize_file_name(file_name);
    let original_name = match kind_for_name(&sanitized) {
        Some((_, k)) if k == kind && !sanitized.starts_with('.') => sanitized,
        _ => format!("background.{extension}"),
    };

    Ok(CheckedUpload {
        original_name,
        extension,
        kind,
    })
}

/// Content type used when serving a stored file.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const MP4: &[u8] = b"\0\0\0\x20ftypisom\0\0\x02\0isomiso2";

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_file_name("my beach.png"), "my_beach.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_file_name("..hidden.jpg"), "hidden.jpg");
        assert_eq!(sanitize_file_name("背景.png"), "png");
    }

    #[test]
    fn test_accepts_matching_headers() {
        let png = check_upload("Beach.PNG", PNG, 1024).unwrap();
        assert_eq!(png.kind, AssetKind::Image);
        assert_eq!(png.extension, "png");
        assert_eq!(png.original_name, "Beach.PNG");

        let mp4 = check_upload("clip.mp4", MP4, 1024).unwrap();
        assert_eq!(mp4.kind, AssetKind::Video);
    }

    #[test]
    fn test_non_ascii_name_falls_back() {
        let checked = check_upload("背景.png", PNG, 1024).unwrap();
        assert_eq!(checked.original_name, "background.png");
    }

    #[test]
    fn test_rejections() {
        assert!(matches!(
            check_upload("evil.exe", b"MZ\x90\0", 1024),
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            check_upload("evil.png", b"MZ\x90\0", 1024),
            Err(ServerError::Rejected(_))
        ));
        assert!(matches!(
            check_upload("empty.png", b"", 1024),
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            check_upload("big.png", PNG, 4),
            Err(ServerError::PayloadTooLarge { .. })
        ));
        assert!(matches!(
            check_upload("clip.mp4", PNG, 1024),
            Err(ServerError::Rejected(_))
        ));
        assert!(matches!(
            check_upload("plain.png", b"hello world", 1024),
            Err(ServerError::Rejected(_))
        ));
        let long = format!("{}.png", "a".repeat(300));
        assert!(matches!(
            check_upload(&long, PNG, 1024),
            Err(ServerError::BadRequest(_))
        ));
    }

    #[test]
    fn test_script_patterns_are_case_insensitive() {
        let mut data = PNG.to_vec();
        data.extend_from_slice(b"<SCRIPT>alert(1)</SCRIPT>");
        assert!(security_scan(&data).is_err());
        assert!(security_scan(PNG).is_ok());
    }

    #[test]
    fn test_detect_kind() {
        assert_eq!(detect_kind(b"RIFF\0\0\0\0WEBPVP8 "), Some(AssetKind::Image));
        assert_eq!(detect_kind(b"RIFF\0\0\0\0WAVEfmt "), None);
        assert_eq!(detect_kind(b"\x1a\x45\xdf\xa3\x9f\x42\x86\x81"), Some(AssetKind::Video));
        assert_eq!(detect_kind(b"\0\0\0\x14ftypqt  "), Some(AssetKind::Video));
    }

    #[test]
    fn test_mime() {
        assert_eq!(mime_for_extension("JPG"), "image/jpeg");
        assert_eq!(mime_for_extension("mov"), "video/quicktime");
        assert_eq!(mime_for_extension("bin"), "application/octet-stream");
    }
}
