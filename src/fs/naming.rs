//! Filename generation for units and artifacts.

use crate::error::{Error, Result};
use crate::job::JobId;

/// Longest artifact stem derived from a title, in characters.
const MAX_TITLE_CHARS: usize = 120;

/// Validate a filename, rejecting traversal and separators.
///
/// Other problematic characters are replaced with `_`.
pub fn sanitize_filename(name: &str) -> Result<String> {
    if name.contains("..") {
        return Err(Error::InvalidFilename(format!(
            "Path traversal detected: '{}'",
            name
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidFilename(format!(
            "Path separators not allowed in filename: '{}'",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidFilename(format!(
            "Null bytes not allowed in filename: '{}'",
            name
        )));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.trim().is_empty() {
        return Err(Error::InvalidFilename(
            "Filename cannot be empty or whitespace-only".to_string(),
        ));
    }

    Ok(sanitized)
}

/// Turn a free-form media title into a filename stem.
///
/// Unlike [`sanitize_filename`] this never rejects: separators and dots runs
/// are replaced, whitespace is collapsed and the result is truncated.
/// Returns `None` when nothing usable is left.
pub fn title_to_stem(title: &str) -> Option<String> {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = replaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace("..", "_");

    let trimmed: String = collapsed
        .trim_matches(|c: char| c == '.' || c == ' ')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let trimmed = trimmed.trim_end().to_string();

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        None
    } else {
        Some(trimmed)
    }
}

/// File name of a downloaded unit inside the job's unit directory.
pub fn unit_file_name(sequence_index: u32, ext: &str) -> String {
    format!("unit_{:05}.{}", sequence_index, ext)
}

/// File name of the assembled artifact.
pub fn artifact_file_name(title: Option<&str>, id: &JobId, ext: &str) -> Result<String> {
    let stem = title
        .and_then(title_to_stem)
        .unwrap_or_else(|| id.to_string());
    sanitize_filename(&format!("{}.{}", stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_valid() {
        assert_eq!(sanitize_filename("normal.mp4").unwrap(), "normal.mp4");
        assert_eq!(sanitize_filename("file:name.ts").unwrap(), "file_name.ts");
    }

    #[test]
    fn test_sanitize_filename_rejects() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("path/to/file.txt").is_err());
        assert!(sanitize_filename("file\0name.txt").is_err());
        assert!(sanitize_filename("   ").is_err());
    }

    #[test]
    fn test_title_to_stem() {
        assert_eq!(
            title_to_stem("Episode 1/2: The  Return").as_deref(),
            Some("Episode 1_2_ The Return")
        );
        assert_eq!(title_to_stem("../../etc").as_deref(), Some("____etc"));
        assert_eq!(title_to_stem(" ... "), None);
        assert_eq!(title_to_stem("///"), None);

        let long = "x".repeat(500);
        assert_eq!(title_to_stem(&long).unwrap().chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_unit_file_name() {
        assert_eq!(unit_file_name(7, "ts"), "unit_00007.ts");
    }

    #[test]
    fn test_artifact_file_name() {
        let id = JobId::new();
        assert_eq!(
            artifact_file_name(Some("My clip"), &id, "mp4").unwrap(),
            "My clip.mp4"
        );
        assert_eq!(
            artifact_file_name(None, &id, "ts").unwrap(),
            format!("{}.ts", id)
        );
    }
}
