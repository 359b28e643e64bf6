//! Target file selection.
//!
//! A swarm can carry samples, subtitles, and readme clutter alongside the
//! actual video. Selection picks the largest member whose extension is on
//! the video allow-list; an explicit index override skips the list entirely.

use thiserror::Error;

use crate::swarm::SwarmFile;

/// Extensions treated as streamable video.
const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "avi", "webm", "m4v"];

/// Errors produced during target file selection.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("No video file found among {member_count} swarm members")]
    NoVideoFile { member_count: usize },

    #[error("File index {index} out of bounds ({member_count} members)")]
    IndexOutOfBounds { index: usize, member_count: usize },
}

/// The single member file this session streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFile {
    /// Zero-based index within the swarm's file list.
    pub index: usize,
    /// File name including extension.
    pub name: String,
    /// Total size in bytes.
    pub length: u64,
}

impl TargetFile {
    /// Returns the Content-Type header value for this file.
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.name)
    }
}

impl From<SwarmFile> for TargetFile {
    fn from(file: SwarmFile) -> Self {
        Self {
            index: file.index,
            name: file.name,
            length: file.length,
        }
    }
}

/// Selects the largest member with a video extension.
///
/// Ties on length resolve to the lower index, which keeps selection
/// deterministic for any member ordering.
///
/// # Errors
///
/// - `MediaError::NoVideoFile` - No member matches the video allow-list
pub fn select_target(files: &[SwarmFile]) -> Result<TargetFile, MediaError> {
    files
        .iter()
        .filter(|file| is_video(&file.name))
        .max_by(|a, b| a.length.cmp(&b.length).then(b.index.cmp(&a.index)))
        .cloned()
        .map(TargetFile::from)
        .ok_or(MediaError::NoVideoFile {
            member_count: files.len(),
        })
}

/// Selects a member by explicit index, bypassing the video allow-list.
///
/// # Errors
///
/// - `MediaError::IndexOutOfBounds` - Index does not name a member
pub fn target_by_index(files: &[SwarmFile], index: usize) -> Result<TargetFile, MediaError> {
    files
        .get(index)
        .cloned()
        .map(TargetFile::from)
        .ok_or(MediaError::IndexOutOfBounds {
            index,
            member_count: files.len(),
        })
}

/// Resolves the target, honoring an explicit index override.
///
/// # Errors
///
/// - `MediaError::NoVideoFile` - No override and no member matches the allow-list
/// - `MediaError::IndexOutOfBounds` - Override does not name a member
pub fn resolve_target(
    files: &[SwarmFile],
    index_override: Option<usize>,
) -> Result<TargetFile, MediaError> {
    match index_override {
        Some(index) => target_by_index(files, index),
        None => select_target(files),
    }
}

/// Checks whether a file name carries a video extension.
pub fn is_video(name: &str) -> bool {
    extension_of(name)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Returns the Content-Type for a file name.
///
/// Unknown extensions fall back to `application/octet-stream`, which
/// players handle by sniffing the container themselves.
pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("mp4") => "video/mp4",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("webm") => "video/webm",
        Some("m4v") => "video/x-m4v",
        _ => "application/octet-stream",
    }
}

fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(index: usize, name: &str, length: u64) -> SwarmFile {
        SwarmFile {
            index,
            name: name.to_string(),
            length,
        }
    }

    #[test]
    fn test_selects_largest_video() {
        let files = vec![
            member(0, "readme.txt", 1_024),
            member(1, "sample.mp4", 50_000_000),
            member(2, "movie.mkv", 5_000_000_000),
        ];

        let target = select_target(&files).unwrap();
        assert_eq!(target.index, 2);
        assert_eq!(target.name, "movie.mkv");
        assert_eq!(target.length, 5_000_000_000);
    }

    #[test]
    fn test_selection_ignores_non_video_members() {
        // The subtitle archive is the largest member but not a video
        let files = vec![
            member(0, "subs.zip", 900_000_000),
            member(1, "movie.mp4", 700_000_000),
        ];

        let target = select_target(&files).unwrap();
        assert_eq!(target.name, "movie.mp4");
    }

    #[test]
    fn test_selection_is_case_insensitive() {
        let files = vec![member(0, "MOVIE.MKV", 1_000)];
        assert_eq!(select_target(&files).unwrap().index, 0);
    }

    #[test]
    fn test_no_video_file_error() {
        let files = vec![member(0, "notes.txt", 10), member(1, "cover.jpg", 20)];

        let err = select_target(&files).unwrap_err();
        assert!(matches!(err, MediaError::NoVideoFile { member_count: 2 }));
    }

    #[test]
    fn test_tie_resolves_to_lower_index() {
        let files = vec![
            member(0, "part 1.mkv", 5_000),
            member(1, "part2.mkv", 5_000),
        ];

        assert_eq!(select_target(&files).unwrap().index, 0);
    }

    #[test]
    fn test_index_override_bypasses_allow_list() {
        let files = vec![member(0, "data.iso", 4_000_000_000)];

        let target = resolve_target(&files, Some(0)).unwrap();
        assert_eq!(target.name, "data.iso");
        assert_eq!(target.content_type(), "application/octet-stream");
    }

    #[test]
    fn test_index_override_out_of_bounds() {
        let files = vec![member(0, "movie.mp4", 1_000)];

        let err = resolve_target(&files, Some(3)).unwrap_err();
        assert!(matches!(
            err,
            MediaError::IndexOutOfBounds {
                index: 3,
                member_count: 1
            }
        ));
    }

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("a.avi"), "video/x-msvideo");
        assert_eq!(content_type_for("a.webm"), "video/webm");
        assert_eq!(content_type_for("a.m4v"), "video/x-m4v");
        assert_eq!(content_type_for("a.srt"), "application/octet-stream");
        assert_eq!(content_type_for("noextension"), "application/octet-stream");
    }
}
