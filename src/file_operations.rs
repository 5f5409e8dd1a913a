use std::fs;
use std::io;
use std::path::Path;

/// Characters that are invalid in filenames on at least one supported host
const FORBIDDEN_CHARACTERS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Sanitizes a string for use in filenames by removing problematic characters
///
/// Removes characters that are invalid or problematic in filenames across platforms:
/// - Path separators: / \
/// - Reserved characters: : * ? " < > |
/// - Control characters
/// - Trim leading/trailing whitespace and dots
///
/// Applying the function twice yields the same result as applying it once.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| !FORBIDDEN_CHARACTERS.contains(c) && !c.is_control())
        .collect();

    // Trim whitespace and dots from start/end
    sanitized
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

/// Formats the canonical artifact filename for one episode and quality tier
///
/// The result follows `{slug}_ep{episode}_{quality}p{ext}`, where `ext`
/// includes its leading dot (or is empty). Whole-series downloads have no
/// episode number and use `{slug}_all_{quality}p{ext}` instead.
///
/// # Examples
///
/// ```
/// use episode_courier::format_artifact_name;
///
/// assert_eq!(format_artifact_name("bleach", Some("5"), 720, ".mp4"), "bleach_ep5_720p.mp4");
/// assert_eq!(format_artifact_name("bleach", None, 360, ".mkv"), "bleach_all_360p.mkv");
/// ```
pub fn format_artifact_name(
    series_slug: &str,
    episode_number: Option<&str>,
    quality: u32,
    extension: &str,
) -> String {
    let episode_part = match episode_number {
        Some(number) => format!("ep{}", sanitize_filename(number)),
        None => "all".to_string(),
    };

    format!(
        "{}_{}_{}p{}",
        sanitize_filename(series_slug),
        episode_part,
        quality,
        extension
    )
}

/// Moves a file to its destination, falling back to copy-and-delete when a
/// plain rename crosses filesystem boundaries
pub(crate) fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if source == destination {
        return Ok(());
    }

    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Normal Title"), "Normal Title");
        assert_eq!(sanitize_filename("Title: With Colon"), "Title With Colon");
        assert_eq!(sanitize_filename("Path/With\\Slashes"), "PathWithSlashes");
        assert_eq!(sanitize_filename("  Spaces  "), "Spaces");
        assert_eq!(sanitize_filename("...dots..."), "dots");
        assert_eq!(sanitize_filename("a<b>c|d?e*f\"g"), "abcdefg");
    }

    #[test]
    fn test_sanitize_filename_is_idempotent() {
        let inputs = [
            "Bleach: Thousand-Year Blood War",
            " ./..weird/..name.. ",
            "tab\tand\nnewline",
            ". : .",
            "***",
            "",
            "already_clean",
            "ünïcödé ✓ / ok",
        ];

        for input in inputs {
            let once = sanitize_filename(input);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "sanitize not idempotent for {:?}", input);
            assert!(
                !once.contains(FORBIDDEN_CHARACTERS),
                "forbidden character left in {:?}",
                once
            );
        }
    }

    #[test]
    fn test_format_artifact_name() {
        assert_eq!(
            format_artifact_name("bleach", Some("5"), 1080, ".mp4"),
            "bleach_ep5_1080p.mp4"
        );
        assert_eq!(
            format_artifact_name("one-piece", Some("12.5"), 360, ".mkv"),
            "one-piece_ep12.5_360p.mkv"
        );
        assert_eq!(format_artifact_name("bleach", None, 720, ""), "bleach_all_720p");
    }

    #[test]
    fn test_move_file_renames_within_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.mp4");
        let destination = dir.path().join("destination.mp4");
        fs::write(&source, b"data").unwrap();

        move_file(&source, &destination).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).unwrap(), b"data");
    }
}
