pub mod initialization;

use anyhow::Result;

use crate::config::AppConfig;
use initialization::{
    check_ffmpeg_and_ffprobe, check_nona, clear_stale_workspaces, initialize_folder,
    initialize_logger,
};

/// Startup work that has to happen before rocket launches.
pub fn initialize(config: &AppConfig) -> Result<()> {
    initialize_logger();
    check_ffmpeg_and_ffprobe(&config.ffmpeg);
    check_nona(&config.nona);
    initialize_folder(&config.temp_path)?;
    clear_stale_workspaces(&config.temp_path);
    Ok(())
}
