//! Connected regions of classified pixels.
//!
//! Components are 4-connected and numbered in raster order of their first
//! pixel. Only components of at least `min_region_size` pixels get an id, so
//! ids within a class run 1..=n with no gaps.

use std::collections::HashMap;

use ndarray::{Array2, ArrayView2};
use ndarray_npy::write_npy;

use super::classifier::Labels;
use super::ScanCube;
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::util::path;

/// One surviving region.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: i32,
    pub pixel_count: usize,
    /// (row, col) in raster order.
    pub coords: Vec<(usize, usize)>,
    /// Spectra at `coords`, pixels x bands.
    pub pixels: Array2<f32>,
}

/// Regions of one class plus its region map.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassRegions {
    pub class: String,
    pub map: Array2<i32>,
    pub regions: Vec<Region>,
    /// Components dropped for being too small.
    pub discarded: usize,
}

fn find_root(parent: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while parent[current] != current {
        parent[current] = parent[parent[current]];
        current = parent[current];
    }
    current
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find_root(parent, a), find_root(parent, b));
    if ra != rb {
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi] = lo;
    }
}

/// 4-connected components of a mask, as coordinate lists in discovery order.
pub fn connected_components(mask: ArrayView2<bool>) -> Vec<Vec<(usize, usize)>> {
    let (h, w) = mask.dim();
    let mut provisional = Array2::<usize>::zeros((h, w));
    // Label 0 is background
    let mut parent = vec![0usize];

    for r in 0..h {
        for c in 0..w {
            if !mask[[r, c]] {
                continue;
            }
            let up = if r > 0 { provisional[[r - 1, c]] } else { 0 };
            let left = if c > 0 { provisional[[r, c - 1]] } else { 0 };
            provisional[[r, c]] = match (up, left) {
                (0, 0) => {
                    let label = parent.len();
                    parent.push(label);
                    label
                }
                (l, 0) | (0, l) => l,
                (u, l) => {
                    union(&mut parent, u, l);
                    u.min(l)
                }
            };
        }
    }

    let mut order: HashMap<usize, usize> = HashMap::new();
    let mut components: Vec<Vec<(usize, usize)>> = vec![];
    for r in 0..h {
        for c in 0..w {
            let label = provisional[[r, c]];
            if label == 0 {
                continue;
            }
            let root = find_root(&mut parent, label);
            let index = *order.entry(root).or_insert_with(|| {
                components.push(vec![]);
                components.len() - 1
            });
            components[index].push((r, c));
        }
    }
    components
}

/// Split classified pixels into per-class regions.
///
/// `targets` empty means every class present in `labels`. A target the
/// classifier never produced yields an all-zero map.
pub fn extract_regions(
    labels: &Labels,
    cube: &ScanCube,
    targets: &[String],
    min_region_size: usize,
) -> HyscanResult<Vec<ClassRegions>> {
    let (h, w) = (cube.height(), cube.width());
    if labels.len() != h * w {
        return Err(HyscanError::DimensionMismatch {
            what: "label count".to_string(),
            expected: h * w,
            found: labels.len(),
        });
    }
    let codes = ArrayView2::from_shape((h, w), &labels.codes)?;
    let targets = if targets.is_empty() {
        labels.present()
    } else {
        targets.to_vec()
    };

    let mut out = Vec::with_capacity(targets.len());
    for class in targets {
        let mut map = Array2::<i32>::zeros((h, w));
        let mut regions = vec![];
        let mut discarded = 0;
        if let Some(code) = labels.code_of(&class) {
            let mask = codes.mapv(|c| c == code);
            for coords in connected_components(mask.view()) {
                if coords.len() < min_region_size {
                    discarded += 1;
                    continue;
                }
                let id = regions.len() as i32 + 1;
                let mut pixels = Array2::<f32>::zeros((coords.len(), cube.bands()));
                for (i, &(r, c)) in coords.iter().enumerate() {
                    map[[r, c]] = id;
                    pixels.row_mut(i).assign(&cube.spectrum(r, c));
                }
                regions.push(Region {
                    id,
                    pixel_count: coords.len(),
                    coords,
                    pixels,
                });
            }
        } else {
            log::warn!("Class {} is not known to the classifier", class);
        }
        log::info!(
            "{}: {} regions kept, {} below {} pixels",
            class,
            regions.len(),
            discarded,
            min_region_size
        );
        out.push(ClassRegions {
            class,
            map,
            regions,
            discarded,
        });
    }
    Ok(out)
}

/// Files written by an export, and the ones that failed.
#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<String>,
    pub failures: Vec<(String, HyscanError)>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Keep class names usable as path components.
///
/// Other characters become `%XX` per UTF-8 byte, `%` included, so two
/// distinct class names never share a directory.
fn file_stem(class: &str) -> String {
    let mut stem = String::with_capacity(class.len());
    for c in class.chars() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            stem.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                stem.push_str(&format!("%{:02X}", b));
            }
        }
    }
    stem
}

pub fn map_path(out_dir: &str, class: &str) -> String {
    let stem = file_stem(class);
    path::join(&[
        out_dir,
        &format!("{}_regions", stem),
        &format!("{}_region_map.npy", stem),
    ])
}

pub fn region_path(out_dir: &str, class: &str, id: i32) -> String {
    let stem = file_stem(class);
    path::join(&[
        out_dir,
        &format!("{}_regions", stem),
        &format!("{}_region_{}.npy", stem, id),
    ])
}

/// Write each region array and each class map below `out_dir`.
///
/// A failing file is recorded and the rest of the batch still runs.
pub fn export(classes: &[ClassRegions], out_dir: &str) -> ExportReport {
    let mut report = ExportReport::default();
    for class in classes {
        let dir = path::join(&[out_dir, &format!("{}_regions", file_stem(&class.class))]);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::error!("Cannot create {}: {}", dir, e);
            report.failures.push((dir, e.into()));
            continue;
        }
        for region in &class.regions {
            let file = region_path(out_dir, &class.class, region.id);
            record(&mut report, file, |f| write_npy(f, &region.pixels));
        }
        let file = map_path(out_dir, &class.class);
        record(&mut report, file, |f| write_npy(f, &class.map));
    }
    log::info!(
        "Exported {} region files to {} ({} failed)",
        report.written.len(),
        out_dir,
        report.failures.len()
    );
    report
}

fn record<F>(report: &mut ExportReport, file: String, write: F)
where
    F: FnOnce(&str) -> Result<(), ndarray_npy::WriteNpyError>,
{
    match write(&file) {
        Ok(()) => report.written.push(file),
        Err(e) => {
            log::error!("Failed to export {}: {}", file, e);
            report.failures.push((file, e.into()));
        }
    }
}
