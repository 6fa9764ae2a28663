use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ffmpeg::{extract_frame, probe};
use crate::background::pool::run_pool;
use crate::common::FRAME_EXTRACT_CONCURRENCY;
use crate::config::FfmpegConfig;

/// One extracted still frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// 1-based, matches the `snapshot-{index}.png` file name
    pub index: usize,
    pub timestamp: String,
    pub path: PathBuf,
}

/// Millisecond offsets of `count` evenly spaced samples, starting at zero.
pub fn sample_offsets_ms(duration_secs: f64, count: usize) -> Vec<u64> {
    if count == 0 {
        return Vec::new();
    }
    let step = (duration_secs * 1000.0 / count as f64).trunc().max(0.0) as u64;
    (0..count as u64).map(|i| i * step).collect()
}

/// `HH:MM:SS.mmm`
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1000 % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// Height of the extracted frames: the stream height, capped at `max_height`.
/// A stream reporting no height gets the cap.
pub fn target_height(stream_height: u32, max_height: u32) -> u32 {
    if stream_height == 0 {
        max_height
    } else {
        stream_height.min(max_height)
    }
}

/// Extracts `count` evenly spaced frames of `source` into `out_dir`.
///
/// Frames that fail to extract are logged and left out, so the returned set may be
/// shorter than `count`. It is ordered by index.
pub async fn sample_frames(
    tools: &FfmpegConfig,
    max_height: u32,
    source: &Path,
    count: usize,
    out_dir: &Path,
) -> Result<Vec<Sample>> {
    if count == 0 {
        bail!("frame count must be at least 1");
    }

    let probed = probe(&tools.ffprobe, source).await?;
    let height = target_height(probed.height, max_height);

    tokio::fs::create_dir_all(out_dir)
        .await
        .context(format!("failed to create frame directory {:?}", out_dir))?;

    let samples: Vec<Sample> = sample_offsets_ms(probed.duration, count)
        .into_iter()
        .enumerate()
        .map(|(i, ms)| Sample {
            index: i + 1,
            timestamp: format_timestamp(ms),
            path: out_dir.join(format!("snapshot-{}.png", i + 1)),
        })
        .collect();

    info!(
        "Sampling {} frames from {:?} ({:.3}s, height {})",
        count, source, probed.duration, height
    );

    let ffmpeg = Arc::new(tools.ffmpeg.clone());
    let source = Arc::new(source.to_path_buf());
    let drained = run_pool(samples, FRAME_EXTRACT_CONCURRENCY, move |sample: Sample| {
        let ffmpeg = ffmpeg.clone();
        let source = source.clone();
        async move {
            extract_frame(&ffmpeg, &source, &sample.timestamp, height, &sample.path).await?;
            Ok(sample)
        }
    })
    .await;

    if drained.failed > 0 {
        warn!("{} of {} frames could not be extracted", drained.failed, count);
    }

    let mut frames = drained.succeeded;
    frames.sort_by_key(|s| s.index);
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sixty_seconds_twelve_frames() {
        let offsets = sample_offsets_ms(60.0, 12);
        let stamps: Vec<String> = offsets.into_iter().map(format_timestamp).collect();
        assert_eq!(stamps.len(), 12);
        assert_eq!(stamps[0], "00:00:00.000");
        assert_eq!(stamps[1], "00:00:05.000");
        assert_eq!(stamps[11], "00:00:55.000");
    }

    #[test]
    fn test_offsets_strictly_increase_from_zero() {
        for (duration, count) in [(1.0, 3), (7.77, 10), (3600.5, 240), (0.5, 4)] {
            let offsets = sample_offsets_ms(duration, count);
            assert_eq!(offsets.len(), count);
            assert_eq!(offsets[0], 0);
            assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{:?}", offsets);
            assert!(*offsets.last().unwrap() < (duration * 1000.0) as u64);
        }
        assert!(sample_offsets_ms(10.0, 0).is_empty());
    }

    #[test]
    fn test_step_truncates() {
        assert_eq!(sample_offsets_ms(10.0, 3), vec![0, 3333, 6666]);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "00:00:00.000");
        assert_eq!(format_timestamp(3_723_045), "01:02:03.045");
        assert_eq!(format_timestamp(59_999), "00:00:59.999");
    }

    #[test]
    fn test_target_height() {
        assert_eq!(target_height(1080, 720), 720);
        assert_eq!(target_height(480, 720), 480);
        assert_eq!(target_height(0, 720), 720);
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sample_frames_skips_failed_extractions() {
        let bin = TempDir::new().expect("Failed to create temp dir");
        let tools = FfmpegConfig {
            ffprobe: fake_tool(
                bin.path(),
                "ffprobe",
                r#"echo '{"streams":[{"width":1920,"height":1080}],"format":{"duration":"60.000000"}}'"#,
            ),
            ffmpeg: fake_tool(
                bin.path(),
                "ffmpeg",
                r#"for last; do :; done
case "$*" in *00:00:15.000*) echo "decode error at 15s" >&2; exit 1;; esac
case "$*" in *scale=-2:720*) ;; *) echo "unexpected scale" >&2; exit 1;; esac
printf 'png' > "$last""#,
            ),
        };

        let work = TempDir::new().expect("Failed to create temp dir");
        let source = work.path().join("clip.mp4");
        std::fs::write(&source, b"not really a video").unwrap();
        let out = work.path().join("snap");

        let frames = sample_frames(&tools, 720, &source, 12, &out).await.unwrap();

        assert_eq!(frames.len(), 11);
        assert!(frames.iter().all(|f| f.path.is_file()));
        assert!(frames.windows(2).all(|w| w[0].index < w[1].index));
        assert!(!frames.iter().any(|f| f.timestamp == "00:00:15.000"));
        assert_eq!(frames[0].path, out.join("snapshot-1.png"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_failure_aborts() {
        let bin = TempDir::new().expect("Failed to create temp dir");
        let tools = FfmpegConfig {
            ffprobe: fake_tool(bin.path(), "ffprobe", "echo 'Invalid data found' >&2; exit 1"),
            ffmpeg: fake_tool(bin.path(), "ffmpeg", "exit 0"),
        };
        let work = TempDir::new().expect("Failed to create temp dir");
        let err = sample_frames(&tools, 720, &work.path().join("x.mp4"), 4, work.path())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid data found"));
    }
}
