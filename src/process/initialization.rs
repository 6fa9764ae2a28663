//! Startup tasks: logger, external tool check, temp folder.

use anyhow::{Context, Result};
use env_logger::fmt::style::{AnsiColor, Style};
use env_logger::{Builder, WriteStyle};
use log::kv::Key;
use log::{error, info, warn};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use uuid::Uuid;

use crate::config::{FfmpegConfig, NonaConfig};

// ────────────────────────────────────────────────────────────────
// Tool checks
// ────────────────────────────────────────────────────────────────

/// Logs the versions of the configured `ffmpeg` and `ffprobe`. Missing tools are not fatal.
pub fn check_ffmpeg_and_ffprobe(conf: &FfmpegConfig) {
    for command in [&conf.ffmpeg, &conf.ffprobe] {
        match Command::new(command).arg("-version").output() {
            Ok(output) if output.status.success() => {
                let version_info = String::from_utf8_lossy(&output.stdout);
                let version_number = version_info
                    .lines()
                    .next()
                    .unwrap_or("Unknown version")
                    .split_whitespace()
                    .nth(2)
                    .unwrap_or("Unknown");
                info!("{} version: {}", command, version_number);
            }
            Ok(_) => {
                error!(
                    "`{}` was found, but it returned an error. Please ensure it's correctly installed.",
                    command
                );
            }
            Err(_) => {
                error!(
                    "`{}` is not installed or not available in PATH. Video splitting will fail.",
                    command
                );
            }
        }
    }
}

/// `nona` prints its usage and exits non-zero without arguments, so only spawning is checked.
pub fn check_nona(conf: &NonaConfig) {
    match Command::new(&conf.bin).output() {
        Ok(_) => info!(
            "{} found, gpu remapping {}",
            conf.bin,
            if conf.use_gpu { "on" } else { "off" }
        ),
        Err(_) => error!(
            "`{}` is not installed or not available in PATH. Panorama tiling will fail.",
            conf.bin
        ),
    }
}

// ────────────────────────────────────────────────────────────────
// Folders
// ────────────────────────────────────────────────────────────────

pub fn initialize_folder(temp: &Path) -> Result<()> {
    std::fs::create_dir_all(temp).context(format!("failed to create temp folder {:?}", temp))
}

/// Removes workspaces and archives a previous run left behind.
///
/// Only uuid-named entries are touched; anything else in the folder is left alone.
pub fn clear_stale_workspaces(temp: &Path) -> usize {
    let entries = match std::fs::read_dir(temp) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list temp folder {:?}: {}", temp, e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if Uuid::parse_str(stem).is_err() {
            continue;
        }
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => error!("Failed to remove stale {:?}: {}", path, e),
        }
    }
    if removed > 0 {
        info!("Cleared {} stale workspace entries from {:?}", removed, temp);
    }
    removed
}

// ────────────────────────────────────────────────────────────────
// Logger
// ────────────────────────────────────────────────────────────────

/// Installs the global logger: INFO and up, WARN and up for rocket, `RUST_LOG` on top.
pub fn initialize_logger() {
    let grey = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));
    let cyan = Style::new().fg_color(Some(AnsiColor::Cyan.into()));

    let result = Builder::new()
        .write_style(WriteStyle::Auto)
        .format(move |buf, record| {
            let ts = buf.timestamp();
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "{grey}{}{grey:#} {level_style}{}{level_style:#} {grey}{}{grey:#}",
                ts,
                record.level(),
                record.target(),
            )?;

            // `duration` key, printed as "12.34 ms" in a fixed-width column
            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| {
                    let s = format!("{}", v);
                    if let Some(idx) = s.find(|c: char| c.is_alphabetic()) {
                        let (num, unit) = (&s[..idx], &s[idx..]);
                        if let Ok(val) = num.parse::<f32>() {
                            return format!("{:.2} {}", val, unit);
                        }
                    }
                    s
                })
                .unwrap_or_default();
            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{cyan}{:>10}{cyan:#}", dur_raw)
            };

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();
            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }
            Ok(())
        })
        .filter(None, log::LevelFilter::Info)
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .parse_env("RUST_LOG")
        .try_init();

    if let Err(e) = result {
        eprintln!("Logger already initialized: {}", e);
    }
}
