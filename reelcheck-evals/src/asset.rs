//! Video asset loading.
//!
//! An asset is a directory produced by the ingestion pipeline:
//!
//! ```text
//! <videos_root>/<video_id>/
//! ├── metadata.json      {"duration_seconds": .., "frame_count": .., ...}
//! ├── transcript.txt
//! ├── transcript.json    optional, {"text": .., "segments": [{start, end, text}]}
//! ├── frames/            *.jpg | *.jpeg | *.png, sorted by name
//! └── evaluations/       written by save_evaluation
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

pub const METADATA_FILE: &str = "metadata.json";
pub const TRANSCRIPT_FILE: &str = "transcript.txt";
pub const TRANSCRIPT_SEGMENTS_FILE: &str = "transcript.json";
pub const FRAMES_DIR: &str = "frames";
pub const EVALUATIONS_DIR: &str = "evaluations";

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_seconds: f64,
    pub frame_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    /// Any other keys the ingestion pipeline wrote, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One timed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct SegmentFile {
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
    #[serde(default)]
    language: Option<String>,
}

/// Transcript text plus optional timing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transcript {
    pub text: String,
    pub segments: Option<Vec<TranscriptSegment>>,
    pub language: Option<String>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            segments: None,
            language: None,
        }
    }

    /// Whitespace-separated word count of the plain text.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// `[MM:SS - MM:SS] text` lines, if segments were loaded.
    pub fn timestamped(&self) -> Option<String> {
        let segments = self.segments.as_ref()?;
        Some(
            segments
                .iter()
                .map(|s| {
                    format!(
                        "[{} - {}] {}",
                        format_timestamp(s.start),
                        format_timestamp(s.end),
                        s.text.trim()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Text handed to prompts. With `timestamped` the timed lines follow
    /// the full text.
    pub fn prompt_text(&self, timestamped: bool) -> String {
        match (timestamped, self.timestamped()) {
            (true, Some(lines)) if !lines.is_empty() => {
                format!("{}\n\n### Timestamped segments\n{}", self.text, lines)
            }
            _ => self.text.clone(),
        }
    }
}

fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// A loaded video asset. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct VideoAsset {
    pub id: String,
    pub root: PathBuf,
    /// Frame files in lexicographic order.
    pub frames: Vec<PathBuf>,
    pub transcript: Transcript,
    pub metadata: VideoMetadata,
}

impl VideoAsset {
    /// Load `<videos_root>/<video_id>`.
    ///
    /// # Errors
    ///
    /// `AssetNotFound` if the directory, `metadata.json`, `transcript.txt`,
    /// or `frames/` is missing, or `frames/` holds no images.
    /// `InvalidAsset` if `metadata.json` cannot be parsed.
    pub async fn load(video_id: &str, videos_root: &Path) -> Result<Self> {
        let root = videos_root.join(video_id);
        let not_found = |missing: PathBuf| Error::AssetNotFound {
            video_id: video_id.to_string(),
            missing,
        };

        if !is_dir(&root).await {
            return Err(not_found(root));
        }

        let metadata_path = root.join(METADATA_FILE);
        let raw_metadata = read_if_exists(&metadata_path)
            .await?
            .ok_or_else(|| not_found(metadata_path.clone()))?;
        let metadata: VideoMetadata =
            serde_json::from_str(&raw_metadata).map_err(|e| Error::InvalidAsset {
                video_id: video_id.to_string(),
                reason: format!("{}: {e}", metadata_path.display()),
            })?;

        let transcript_path = root.join(TRANSCRIPT_FILE);
        let text = read_if_exists(&transcript_path)
            .await?
            .ok_or_else(|| not_found(transcript_path.clone()))?;
        let mut transcript = Transcript::new(text);

        let segments_path = root.join(TRANSCRIPT_SEGMENTS_FILE);
        if let Some(raw) = read_if_exists(&segments_path).await? {
            match serde_json::from_str::<SegmentFile>(&raw) {
                Ok(file) => {
                    transcript.segments = Some(file.segments);
                    transcript.language = file.language;
                }
                Err(e) => warn!(
                    video_id,
                    path = %segments_path.display(),
                    error = %e,
                    "ignoring unreadable transcript segments"
                ),
            }
        }

        let frames_dir = root.join(FRAMES_DIR);
        if !is_dir(&frames_dir).await {
            return Err(not_found(frames_dir));
        }
        let frames = list_frames(&frames_dir).await?;
        if frames.is_empty() {
            return Err(not_found(frames_dir.join("*.jpg")));
        }

        debug!(
            video_id,
            frames = frames.len(),
            words = transcript.word_count(),
            "loaded video asset"
        );

        Ok(Self {
            id: video_id.to_string(),
            root,
            frames,
            transcript,
            metadata,
        })
    }

    /// Directory evaluation artifacts are written to.
    pub fn evaluations_dir(&self) -> PathBuf {
        self.root.join(EVALUATIONS_DIR)
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Read a file, mapping "not found" to `None`.
async fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image && entry.file_type().await?.is_file() {
            frames.push(path);
        }
    }
    frames.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(frames)
}

/// MIME type for a frame file, from its extension.
pub fn frame_media_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_asset;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn loads_complete_asset() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid1", 3);
        std::fs::write(dir.path().join("vid1/frames/notes.txt"), "skip me").unwrap();

        let asset = VideoAsset::load("vid1", dir.path()).await.unwrap();
        assert_eq!(asset.id, "vid1");
        assert_eq!(asset.frames.len(), 3);
        assert!(asset.frames[0].ends_with("frame_0001.jpg"));
        assert!(asset.frames[2].ends_with("frame_0003.jpg"));
        assert_eq!(asset.metadata.frame_count, 3);
        assert_eq!(asset.metadata.source_type.as_deref(), Some("upload"));
        assert_eq!(asset.metadata.extra["title"], "Clip");
        assert_eq!(asset.transcript.word_count(), 4);
        assert!(asset.transcript.segments.is_none());
        assert_eq!(asset.evaluations_dir(), dir.path().join("vid1/evaluations"));
    }

    #[tokio::test]
    async fn frames_sort_lexicographically() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 0);
        for name in ["b.png", "a.jpg", "c.JPEG"] {
            std::fs::write(dir.path().join("vid/frames").join(name), b"x").unwrap();
        }
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();
        let names: Vec<_> = asset
            .frames
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png", "c.JPEG"]);
    }

    #[tokio::test]
    async fn missing_pieces_are_asset_not_found() {
        let dir = TempDir::new().unwrap();

        let err = VideoAsset::load("ghost", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { ref missing, .. } if missing.ends_with("ghost")));

        for (name, remove) in [
            ("no-meta", "metadata.json"),
            ("no-transcript", "transcript.txt"),
        ] {
            write_asset(dir.path(), name, 2);
            std::fs::remove_file(dir.path().join(name).join(remove)).unwrap();
            let err = VideoAsset::load(name, dir.path()).await.unwrap_err();
            assert!(
                matches!(err, Error::AssetNotFound { ref missing, .. } if missing.ends_with(remove)),
                "{name}: {err}"
            );
        }

        write_asset(dir.path(), "no-frames", 2);
        std::fs::remove_dir_all(dir.path().join("no-frames/frames")).unwrap();
        let err = VideoAsset::load("no-frames", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { .. }));

        write_asset(dir.path(), "empty-frames", 0);
        let err = VideoAsset::load("empty-frames", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::AssetNotFound { .. }));
    }

    #[tokio::test]
    async fn unparseable_metadata_is_invalid_asset() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 1);
        std::fs::write(dir.path().join("vid/metadata.json"), r#"{"frame_count": 1}"#).unwrap();
        let err = VideoAsset::load("vid", dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAsset { .. }));
    }

    #[tokio::test]
    async fn segments_render_with_timestamps() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 1);
        std::fs::write(
            dir.path().join("vid/transcript.json"),
            r#"{"text": "hi", "language": "en", "segments": [
                {"start": 0.0, "end": 4.2, "text": " Hello"},
                {"start": 65.0, "end": 125.9, "text": "World "}
            ]}"#,
        )
        .unwrap();

        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();
        assert_eq!(asset.transcript.language.as_deref(), Some("en"));
        assert_eq!(
            asset.transcript.timestamped().unwrap(),
            "[00:00 - 00:04] Hello\n[01:05 - 02:05] World"
        );
        let prompt = asset.transcript.prompt_text(true);
        assert!(prompt.starts_with("hello there general audience"));
        assert!(prompt.contains("[01:05 - 02:05] World"));
        assert_eq!(
            asset.transcript.prompt_text(false),
            "hello there general audience"
        );
    }

    #[tokio::test]
    async fn bad_segments_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        write_asset(dir.path(), "vid", 1);
        std::fs::write(dir.path().join("vid/transcript.json"), "not json").unwrap();
        let asset = VideoAsset::load("vid", dir.path()).await.unwrap();
        assert!(asset.transcript.segments.is_none());
    }

    #[test]
    fn media_type_follows_extension() {
        assert_eq!(frame_media_type(Path::new("a.PNG")), "image/png");
        assert_eq!(frame_media_type(Path::new("a.jpg")), "image/jpeg");
    }
}
