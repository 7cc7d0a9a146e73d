//! Shared fixtures for reelcheck-evals integration tests

use std::path::{Path, PathBuf};
use std::time::Duration;

use reelcheck_evals::{FrameSelection, Rubric, RunSettings, SamplingStrategy};

/// Writes `<videos_root>/<video_id>` with metadata, transcript and frames.
#[allow(dead_code)]
pub fn write_asset(videos_root: &Path, video_id: &str, frame_count: usize) -> PathBuf {
    let root = videos_root.join(video_id);
    let frames = root.join("frames");
    std::fs::create_dir_all(&frames).unwrap();
    std::fs::write(
        root.join("metadata.json"),
        format!(r#"{{"duration_seconds": 120.0, "frame_count": {frame_count}, "source_type": "upload"}}"#),
    )
    .unwrap();
    std::fs::write(
        root.join("transcript.txt"),
        "Welcome back friends, today we count to ten together.",
    )
    .unwrap();
    for i in 1..=frame_count {
        std::fs::write(frames.join(format!("frame_{i:04}.jpg")), [0xFF, 0xD8, i as u8]).unwrap();
    }
    root
}

/// Run settings with every frame kept.
#[allow(dead_code)]
pub fn settings(max_frames: usize) -> RunSettings {
    RunSettings {
        rubric: Rubric::new("content_rating", "## Rubric\nRate age-appropriateness."),
        selection: FrameSelection::new(SamplingStrategy::Even, max_frames),
        timeout: Duration::from_secs(30),
        timestamped_transcript: false,
    }
}

/// Number of `.json` artifacts under the asset's evaluations directory.
#[allow(dead_code)]
pub fn artifact_count(asset_root: &Path) -> usize {
    match std::fs::read_dir(asset_root.join("evaluations")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}
