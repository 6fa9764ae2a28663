//! Thin wrappers over the `ffprobe` / `ffmpeg` binaries.
//!
//! A non-zero exit turns into an error whose message is the tool's stderr.

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

// ────────────────────────────────────────────────────────────────
// Probe
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    /// Seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Duration and first video stream dimensions of `path`.
pub async fn probe(ffprobe: &str, path: &Path) -> Result<VideoProbe> {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "format=duration:stream=width,height",
        "-of",
        "json",
        "-i",
    ])
    .arg(path);

    let stdout = run(cmd, ffprobe)
        .await
        .context(format!("failed to probe {:?}", path))?;
    parse_probe(&stdout).context(format!("unexpected ffprobe output for {:?}", path))
}

pub fn parse_probe(stdout: &[u8]) -> Result<VideoProbe> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;
    let raw = output
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| anyhow!("ffprobe reported no duration"))?;
    let duration = parse_duration(&raw)?;
    let (width, height) = output
        .streams
        .first()
        .map(|s| (s.width, s.height))
        .unwrap_or((0, 0));
    Ok(VideoProbe {
        duration,
        width,
        height,
    })
}

/// Accepts plain seconds (`60.000000`) and sexagesimal (`0:01:00.000000`).
pub fn parse_duration(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let seconds = if raw.contains(':') {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() > 3 {
            bail!("invalid duration {:?}", raw);
        }
        parts.iter().try_fold(0f64, |acc, part| {
            part.parse::<f64>()
                .map(|v| acc * 60.0 + v)
                .map_err(|_| anyhow!("invalid duration {:?}", raw))
        })?
    } else {
        raw.parse::<f64>()
            .map_err(|_| anyhow!("invalid duration {:?}", raw))?
    };

    if !seconds.is_finite() || seconds < 0.0 {
        bail!("invalid duration {:?}", raw);
    }
    Ok(seconds)
}

// ────────────────────────────────────────────────────────────────
// Frame extraction
// ────────────────────────────────────────────────────────────────

/// Writes the single frame at `timestamp` to `output`, scaled to `height` (width keeps
/// the aspect ratio and stays even).
pub async fn extract_frame(
    ffmpeg: &str,
    source: &Path,
    timestamp: &str,
    height: u32,
    output: &Path,
) -> Result<()> {
    let scale_filter = format!("scale=-2:{}", height);
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-v", "error", "-hide_banner", "-nostdin", "-y", "-ss", timestamp, "-i"])
        .arg(source)
        .args(["-frames:v", "1", "-vf", &scale_filter])
        .arg(output);

    run(cmd, ffmpeg)
        .await
        .context(format!("failed to extract frame at {} into {:?}", timestamp, output))?;
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Low-level
// ────────────────────────────────────────────────────────────────

/// Runs `cmd` to completion and returns its stdout.
pub(crate) async fn run(mut cmd: Command, program: &str) -> Result<Vec<u8>> {
    debug!("Running {:?}", cmd.as_std());
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("failed to spawn {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            bail!("{} exited with {}", program, output.status);
        }
        bail!("{}", stderr);
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("60.000000").unwrap(), 60.0);
        assert_eq!(parse_duration("0:01:00.000000").unwrap(), 60.0);
        assert_eq!(parse_duration("1:02:03.5").unwrap(), 3723.5);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("1:2:3:4").is_err());
    }

    #[test]
    fn test_parse_probe() {
        let raw = br#"{
            "programs": [],
            "streams": [{ "width": 1920, "height": 1080 }],
            "format": { "duration": "12.480000" }
        }"#;
        assert_eq!(
            parse_probe(raw).unwrap(),
            VideoProbe {
                duration: 12.48,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn test_parse_probe_without_duration_fails() {
        let raw = br#"{ "streams": [], "format": {} }"#;
        let err = parse_probe(raw).unwrap_err();
        assert!(err.to_string().contains("no duration"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_message_is_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo 'moov atom not found' >&2; exit 1"]);
        let err = run(cmd, "ffprobe").await.unwrap_err();
        assert_eq!(err.to_string(), "moov atom not found");
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let cmd = Command::new("definitely-not-a-real-ffprobe");
        let err = run(cmd, "definitely-not-a-real-ffprobe").await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
