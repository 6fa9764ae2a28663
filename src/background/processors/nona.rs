use anyhow::{Context, Result, bail};
use log::{debug, info};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::ffmpeg::run;
use crate::config::NonaConfig;

pub const FACE_COUNT: usize = 6;

const PTO_FILE: &str = "cubic.pto";
const FACE_PREFIX: &str = "face";

/// Yaw/pitch of each cube face, in output order: front, back, up, down, left, right.
const FACE_ORIENTATION: [(i32, i32); FACE_COUNT] =
    [(0, 0), (180, 0), (0, -90), (0, 90), (90, 0), (-90, 0)];

/// Hugin project remapping one equirectangular image onto six 90° faces of `cube` px.
pub fn pto_script(source_name: &str, width: u32, height: u32, haov: f64, cube: u32) -> String {
    let mut script = String::new();
    let _ = writeln!(script, "p E0 R0 f0 h{cube} w{cube} n\"TIFF_m\" u0 v90");
    let _ = writeln!(script, "m g1 i0 m2 p0.00784314");
    for (yaw, pitch) in FACE_ORIENTATION {
        let _ = writeln!(
            script,
            "i a0 b0 c0 d0 e0 f4 h{height} w{width} n\"{source_name}\" r0 v{haov} p{pitch} y{yaw}"
        );
    }
    let _ = writeln!(script, "v");
    let _ = writeln!(script, "*");
    script
}

pub fn face_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}{:04}.tif", FACE_PREFIX, index))
}

pub fn pto_path(dir: &Path) -> PathBuf {
    dir.join(PTO_FILE)
}

/// Writes `cubic.pto` into `dir` and renders the six faces with `nona`.
///
/// Returns the face paths in face order.
pub async fn render_faces(
    conf: &NonaConfig,
    dir: &Path,
    source: &Path,
    haov: f64,
    cube: u32,
) -> Result<Vec<PathBuf>> {
    let (width, height) = image::image_dimensions(source)
        .context(format!("failed to read dimensions of {:?}", source))?;

    let pto = pto_path(dir);
    let script = pto_script(&source.to_string_lossy(), width, height, haov, cube);
    tokio::fs::write(&pto, script)
        .await
        .context(format!("failed to write {:?}", pto))?;
    debug!("Wrote {:?} for {}x{} source, cube {}", pto, width, height, cube);

    info!("Generating cube faces...");
    let mut cmd = Command::new(&conf.bin);
    cmd.arg(if conf.use_gpu { "-g" } else { "-d" })
        .arg("-o")
        .arg(dir.join(FACE_PREFIX))
        .arg(&pto);
    let stdout = run(cmd, &conf.bin).await.context("nona failed")?;
    let stdout = String::from_utf8_lossy(&stdout);
    if !stdout.trim().is_empty() {
        debug!("{}", stdout.trim());
    }

    let faces: Vec<PathBuf> = (0..FACE_COUNT).map(|i| face_path(dir, i)).collect();
    if let Some(missing) = faces.iter().find(|f| !f.is_file()) {
        bail!("nona did not produce {:?}", missing);
    }
    Ok(faces)
}

/// Stand-in `nona` that copies six `size` px faces, pre-rendered into `dir`, to the
/// requested output prefix.
#[cfg(all(test, unix))]
pub(crate) fn fake_nona(dir: &Path, size: u32) -> NonaConfig {
    use std::os::unix::fs::PermissionsExt;

    let fixtures = dir.join("fixtures");
    std::fs::create_dir_all(&fixtures).unwrap();
    for i in 0..FACE_COUNT {
        image::RgbImage::from_fn(size, size, |x, y| {
            image::Rgb([(x * 7) as u8, (y * 5) as u8, (i * 40) as u8])
        })
        .save(face_path(&fixtures, i))
        .unwrap();
    }

    // nona -d -o {prefix} cubic.pto
    let bin = dir.join("nona");
    let script = format!(
        "#!/bin/sh\nfor i in 0 1 2 3 4 5; do cp '{}'/face000$i.tif \"${{3}}000$i.tif\" || exit 1; done\n",
        fixtures.display()
    );
    std::fs::write(&bin, script).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

    NonaConfig {
        bin: bin.to_string_lossy().into_owned(),
        use_gpu: false,
    }
}
