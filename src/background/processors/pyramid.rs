//! Cube-face tile pyramid for an equirectangular panorama.
//!
//! `nona` remaps the panorama onto six cube faces; each face is then cut into a
//! multi-resolution JPEG pyramid laid out for the Pannellum `multires` viewer:
//!
//! ```text
//! {level}/{face}{row}_{col}.jpg    level 1 is the coarsest
//! fallback/{face}.jpg              1024 x 1024 per face
//! ```

use anyhow::{Context, Result, bail};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, RgbImage};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use super::nona::{self, FACE_COUNT};
use crate::common::{
    FACE_LETTERS, FALLBACK_SIZE, JPEG_QUALITY, MAX_TILE_SIZE, SNIFF_LEN, TILE_EXTENSION,
    spawn_cpu,
};
use crate::config::NonaConfig;
use crate::utils::sniff_image_format;

// ────────────────────────────────────────────────────────────────
// Geometry
// ────────────────────────────────────────────────────────────────

/// Cube edge for a panorama `width` px wide covering `haov` degrees, rounded down to a
/// multiple of 8.
pub fn cube_size(width: u32, haov: f64) -> u32 {
    let edge = (360.0 / haov) * width as f64 / PI;
    (8.0 * (edge / 8.0).floor()) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidGeometry {
    pub cube_size: u32,
    pub tile_size: u32,
    pub tiles_per_axis: u32,
    pub levels: u32,
}

/// Horizontal angle of view must lie in `(0, 360]` degrees.
pub fn validate_haov(haov: f64) -> Result<()> {
    if !(haov > 0.0 && haov <= 360.0) {
        bail!("horizontal angle of view must be in (0, 360], got {}", haov);
    }
    Ok(())
}

impl PyramidGeometry {
    pub fn new(width: u32, haov: f64) -> Result<Self> {
        validate_haov(haov)?;
        let cube = cube_size(width, haov);
        if cube == 0 {
            bail!("panorama {} px wide is too small to tile", width);
        }
        Ok(Self::from_cube(cube, MAX_TILE_SIZE))
    }

    /// Geometry for a known cube edge and tile limit. `cube` must be non-zero.
    pub fn from_cube(cube: u32, max_tile: u32) -> Self {
        let tile = max_tile.min(cube).max(1);
        let tiles_per_axis = cube.div_ceil(tile);

        let ratio = cube as f64 / tile as f64;
        let mut levels = ratio.log2().ceil() as i32 + 1;
        if levels >= 2 && (cube as f64 / 2f64.powi(levels - 2)).round() as u32 == tile {
            levels -= 1;
        }

        Self {
            cube_size: cube,
            tile_size: tile,
            tiles_per_axis,
            levels: levels.max(1) as u32,
        }
    }

    /// Edge of one face at `level` (1 = coarsest, `levels` = full cube size).
    pub fn level_size(&self, level: u32) -> u32 {
        self.cube_size >> (self.levels - level)
    }

    pub fn tiles_at(&self, level: u32) -> u32 {
        self.level_size(level).div_ceil(self.tile_size)
    }
}

// ────────────────────────────────────────────────────────────────
// Viewer descriptor
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PannellumConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "multiRes")]
    pub multi_res: MultiResConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiResConfig {
    pub base_path: String,
    pub path: String,
    pub fallback_path: String,
    pub extension: String,
    pub tile_resolution: u32,
    pub max_level: u32,
    pub cube_resolution: u32,
}

impl PannellumConfig {
    pub fn multires(geometry: &PyramidGeometry) -> Self {
        Self {
            kind: "multires".to_string(),
            multi_res: MultiResConfig {
                base_path: String::new(),
                path: "/%l/%s%y_%x".to_string(),
                fallback_path: "/fallback/%s".to_string(),
                extension: TILE_EXTENSION.to_string(),
                tile_resolution: geometry.tile_size,
                max_level: geometry.levels,
                cube_resolution: geometry.cube_size,
            },
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.multi_res.base_path = base_path.into();
        self
    }
}

// ────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("uploaded file is not a recognised image")]
pub struct UnrecognisedImage;

/// Streams an uploaded panorama into `dir` as `source.{ext}`, with the extension taken
/// from the sniffed image format.
pub async fn materialize_source<R>(mut reader: R, dir: &Path) -> Result<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = reader
            .read(&mut head[filled..])
            .await
            .context("failed to read uploaded panorama")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let Some(format) = sniff_image_format(&head) else {
        return Err(UnrecognisedImage.into());
    };
    let ext = format.extensions_str().first().copied().unwrap_or("img");
    let path = dir.join(format!("source.{}", ext));

    let file = tokio::fs::File::create(&path)
        .await
        .context(format!("failed to create {:?}", path))?;
    let mut writer = tokio::io::BufWriter::new(file);
    writer.write_all(&head).await?;
    tokio::io::copy(&mut reader, &mut writer)
        .await
        .context(format!("failed to write panorama to {:?}", path))?;
    writer.flush().await?;
    Ok(path)
}

/// Builds the whole pyramid for `source` inside `dir` and returns its descriptor with an
/// empty `basePath`.
pub async fn build_pyramid(
    conf: &NonaConfig,
    dir: &Path,
    source: &Path,
    haov: f64,
) -> Result<PannellumConfig> {
    let (width, _) = image::image_dimensions(source)
        .context(format!("failed to read dimensions of {:?}", source))?;
    let geometry = PyramidGeometry::new(width, haov)?;
    info!(
        "Cube {} px, tile {} px, {} levels",
        geometry.cube_size, geometry.tile_size, geometry.levels
    );

    let faces = nona::render_faces(conf, dir, source, haov, geometry.cube_size).await?;

    let out = dir.to_path_buf();
    let tile_faces = faces.clone();
    let tiles = spawn_cpu(move || {
        let tiles = generate_tiles(&tile_faces, &geometry, &out)?;
        generate_fallback(&tile_faces, &out)?;
        Ok(tiles)
    })
    .await?;
    info!("Wrote {} tiles", tiles);

    for path in faces.iter().chain(std::iter::once(&nona::pto_path(dir))) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove {:?}: {}", path, e);
        }
    }

    Ok(PannellumConfig::multires(&geometry))
}

/// Cuts every face into its tile pyramid, faces in parallel. Returns the tile count.
pub fn generate_tiles(faces: &[PathBuf], geometry: &PyramidGeometry, out: &Path) -> Result<usize> {
    info!("Generating tiles...");
    if faces.len() != FACE_COUNT {
        bail!("expected {} cube faces, got {}", FACE_COUNT, faces.len());
    }
    let counts = faces
        .par_iter()
        .zip(FACE_LETTERS.par_iter())
        .map(|(face, letter)| tile_face(face, letter, geometry, out))
        .collect::<Result<Vec<usize>>>()?;
    Ok(counts.into_iter().sum())
}

fn tile_face(face: &Path, letter: &str, geometry: &PyramidGeometry, out: &Path) -> Result<usize> {
    let mut img = image::open(face).context(format!("failed to decode face {:?}", face))?;
    let tile = geometry.tile_size;
    let mut written = 0;

    for level in (1..=geometry.levels).rev() {
        let size = geometry.level_size(level);
        if img.width() != size || img.height() != size {
            img = img.resize_exact(size, size, FilterType::Lanczos3);
        }

        let level_dir = out.join(level.to_string());
        std::fs::create_dir_all(&level_dir)
            .context(format!("failed to create {:?}", level_dir))?;

        let tiles = geometry.tiles_at(level);
        for row in 0..tiles {
            for col in 0..tiles {
                let (x, y) = (col * tile, row * tile);
                let width = tile.min(size.saturating_sub(x));
                let height = tile.min(size.saturating_sub(y));
                if width == 0 || height == 0 {
                    continue;
                }
                let path = level_dir.join(format!("{}{}_{}.{}", letter, row, col, TILE_EXTENSION));
                save_jpeg(&img.crop_imm(x, y, width, height).to_rgb8(), &path)?;
                written += 1;
            }
        }
    }
    Ok(written)
}

/// One `FALLBACK_SIZE` square image per face under `fallback/`.
pub fn generate_fallback(faces: &[PathBuf], out: &Path) -> Result<()> {
    info!("Generating fallback...");
    let dir = out.join("fallback");
    std::fs::create_dir_all(&dir).context(format!("failed to create {:?}", dir))?;

    faces
        .par_iter()
        .zip(FACE_LETTERS.par_iter())
        .try_for_each(|(face, letter)| {
            let img: DynamicImage =
                image::open(face).context(format!("failed to decode face {:?}", face))?;
            let resized = img.resize_exact(FALLBACK_SIZE, FALLBACK_SIZE, FilterType::Lanczos3);
            save_jpeg(
                &resized.to_rgb8(),
                &dir.join(format!("{}.{}", letter, TILE_EXTENSION)),
            )
        })
}

fn save_jpeg(img: &RgbImage, path: &Path) -> Result<()> {
    let file = File::create(path).context(format!("failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY)
        .encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
        .context(format!("failed to encode {:?}", path))?;
    Ok(())
}
