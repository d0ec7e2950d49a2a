use std::path::{Component, Path};

use crate::StorageError;

/// Maximum length of a sanitized file name.
const MAX_NAME_LEN: usize = 200;

/// Validates that an object key is a safe relative path.
///
/// Rejects:
/// - Empty keys
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_object_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".into()));
    }

    let path = Path::new(key);

    if path.is_absolute() {
        return Err(StorageError::InvalidKey(format!(
            "absolute key not allowed: {key}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(StorageError::InvalidKey(format!(
                    "parent directory traversal not allowed: {key}"
                )));
            }
            Component::Prefix(_) => {
                return Err(StorageError::InvalidKey(format!(
                    "path prefix not allowed: {key}"
                )));
            }
            Component::RootDir => {
                return Err(StorageError::InvalidKey(format!(
                    "absolute key not allowed: {key}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Validates a bucket name: non-empty, a single path component, no traversal.
pub fn validate_bucket_name(bucket: &str) -> Result<(), StorageError> {
    if bucket.is_empty() {
        return Err(StorageError::InvalidBucket("empty bucket".into()));
    }
    if bucket == "." || bucket == ".." {
        return Err(StorageError::InvalidBucket(format!(
            "reserved name: {bucket}"
        )));
    }
    if bucket.contains('/') || bucket.contains('\\') {
        return Err(StorageError::InvalidBucket(format!(
            "separator in bucket name: {bucket}"
        )));
    }
    Ok(())
}

/// Reduces an untrusted file name to a safe single component.
///
/// Strips any directory part, keeps only alphanumerics plus `. _ - ` and
/// spaces, and caps the length while preserving the extension. Returns
/// `"file"` if nothing safe remains.
pub fn sanitize_file_name(name: &str) -> String {
    // Drop everything up to the last separator.
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let mut cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();

    // A name of only dots would collapse into traversal-ish garbage.
    if cleaned.chars().all(|c| c == '.' || c == ' ') {
        cleaned.clear();
    }

    if cleaned.is_empty() {
        return "file".into();
    }

    if cleaned.len() > MAX_NAME_LEN {
        let (stem, ext) = match cleaned.rfind('.') {
            Some(i) if i > 0 => cleaned.split_at(i),
            _ => (cleaned.as_str(), ""),
        };
        let keep = MAX_NAME_LEN.saturating_sub(ext.len());
        let stem: String = stem.chars().take(keep).collect();
        cleaned = format!("{stem}{ext}");
    }

    cleaned
}

/// Builds the per-chat object key layout: `users/<chat>/<name>`.
pub fn user_key(chat_id: i64, file_name: &str) -> String {
    format!("users/{chat_id}/{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        assert!(validate_object_key("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_object_key("../../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_nested_parent_dir_traversal() {
        assert!(validate_object_key("sub/../../../escape").is_err());
    }

    #[test]
    fn rejects_absolute_key() {
        assert!(validate_object_key("/tmp/malicious").is_err());
    }

    #[test]
    fn accepts_simple_key() {
        assert!(validate_object_key("movie.mkv").is_ok());
    }

    #[test]
    fn accepts_nested_key() {
        assert!(validate_object_key("users/42/movie.mkv").is_ok());
    }

    #[test]
    fn accepts_dotfile_key() {
        assert!(validate_object_key(".hidden/notes.txt").is_ok());
    }

    #[test]
    fn bucket_rejects_separators() {
        assert!(validate_bucket_name("a/b").is_err());
        assert!(validate_bucket_name("a\\b").is_err());
    }

    #[test]
    fn bucket_rejects_reserved() {
        assert!(validate_bucket_name("").is_err());
        assert!(validate_bucket_name(".").is_err());
        assert!(validate_bucket_name("..").is_err());
    }

    #[test]
    fn bucket_accepts_plain_name() {
        assert!(validate_bucket_name("media").is_ok());
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\x\\movie.mkv"), "movie.mkv");
    }

    #[test]
    fn sanitize_drops_unsafe_chars() {
        assert_eq!(sanitize_file_name("a<b>|c?.txt"), "abc.txt");
    }

    #[test]
    fn sanitize_keeps_normal_names() {
        assert_eq!(sanitize_file_name("Holiday Video 2024.mp4"), "Holiday Video 2024.mp4");
    }

    #[test]
    fn sanitize_empty_falls_back() {
        assert_eq!(sanitize_file_name("<<<>>>"), "file");
        assert_eq!(sanitize_file_name("..."), "file");
    }

    #[test]
    fn sanitize_caps_length_keeps_extension() {
        let long = format!("{}.mp4", "x".repeat(300));
        let out = sanitize_file_name(&long);
        assert!(out.len() <= 200);
        assert!(out.ends_with(".mp4"));
    }

    #[test]
    fn user_key_layout() {
        assert_eq!(user_key(42, "movie.mkv"), "users/42/movie.mkv");
    }
}
