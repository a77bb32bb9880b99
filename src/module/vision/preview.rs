//! PNG previews of scans and classification results.
//!
use image::{Rgb, RgbImage};

use super::classifier::Labels;
use super::ScanCube;
use crate::module::define;
use crate::module::error::HyscanResult;
use crate::module::util::path;

const PALETTE: [[u8; 3]; 8] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [188, 189, 34],
];

/// Value at quantile `q` of the finite values.
fn percentile(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f32).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn stretch(cube: &ScanCube, band: usize) -> Vec<u8> {
    let band = band.min(cube.bands().saturating_sub(1));
    let values: Vec<f32> = cube
        .view()
        .index_axis(ndarray::Axis(2), band)
        .iter()
        .copied()
        .collect();
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let (lo, hi) = (percentile(&sorted, 0.02), percentile(&sorted, 0.98));
    let span = if hi > lo { hi - lo } else { 1.0 };
    values
        .iter()
        .map(|v| {
            if v.is_finite() {
                (((v - lo) / span).clamp(0.0, 1.0) * 255.0) as u8
            } else {
                0
            }
        })
        .collect()
}

/// False-color composite of three bands, each stretched to its 2-98 % range.
pub fn false_color(cube: &ScanCube) -> RgbImage {
    let (h, w) = (cube.height(), cube.width());
    let channels: Vec<Vec<u8>> = define::defaults::PREVIEW_BANDS
        .iter()
        .map(|&b| stretch(cube, b))
        .collect();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let i = y as usize * w + x as usize;
        Rgb([channels[0][i], channels[1][i], channels[2][i]])
    })
}

/// Color per class code, black for unlabeled.
pub fn class_color(code: u16) -> Rgb<u8> {
    match code {
        0 => Rgb([0, 0, 0]),
        k => Rgb(PALETTE[(k as usize - 1) % PALETTE.len()]),
    }
}

/// Class map image. Pixels past the end of `labels` stay black.
pub fn class_map(labels: &Labels, height: usize, width: usize) -> RgbImage {
    RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let i = y as usize * width + x as usize;
        class_color(labels.codes.get(i).copied().unwrap_or(0))
    })
}

/// Write the previews of one scan. Returns the written paths.
pub fn save_previews(
    dir: &str,
    name: &str,
    cube: &ScanCube,
    labels: Option<&Labels>,
) -> HyscanResult<Vec<String>> {
    let mut written = vec![];
    let rgb = path::join(&[dir, &format!("{}_rgb.png", name)]);
    false_color(cube).save(&rgb)?;
    written.push(rgb);
    if let Some(labels) = labels {
        let classes = path::join(&[dir, &format!("{}_classes.png", name)]);
        class_map(labels, cube.height(), cube.width()).save(&classes)?;
        written.push(classes);
    }
    log::debug!("Previews written: {:?}", written);
    Ok(written)
}
