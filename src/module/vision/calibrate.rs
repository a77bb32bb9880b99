//! Radiometric calibration.
//!
//! Reference capture reduces a black or white frame to one spectrum by
//! averaging a central patch. Reflectance correction then maps a raw scan to
//! `(scan - black) / (white - black)` per band.

use std::fmt;
use std::path::Path;
use std::{thread, time};

use ndarray::{s, Array1, ArrayView1, Axis};
use ndarray_npy::{read_npy, write_npy};

use super::ScanCube;
use crate::module::define;
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::state::CameraSlot;
use crate::module::util::init::ScanProperty;
use crate::module::util::path;

/// Which reference frame is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Black,
    White,
}

impl ReferenceKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReferenceKind::Black => define::path::BLACK_REFERENCE,
            ReferenceKind::White => define::path::WHITE_REFERENCE,
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Black => write!(f, "black"),
            ReferenceKind::White => write!(f, "white"),
        }
    }
}

/// Square pixel patch used for averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub row: usize,
    pub col: usize,
    pub side: usize,
    /// True when the cube was too small for the requested size.
    pub clipped: bool,
}

impl Patch {
    pub fn pixels(&self) -> usize {
        self.side * self.side
    }
}

/// Averaged reference spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSpectrum {
    pub kind: ReferenceKind,
    pub values: Array1<f32>,
    pub patch: Patch,
}

/// Central patch of roughly `pixels` pixels that fits in `height` x `width`.
pub fn central_patch(height: usize, width: usize, pixels: usize) -> Patch {
    let (cy, cx) = (height / 2, width / 2);
    let max_radius = cx.min(cy).min(width - cx).min(height - cy);
    let max_side = if height == 0 || width == 0 {
        0
    } else {
        (max_radius * 2).max(1)
    };
    let requested = ((pixels as f64).sqrt() as usize).max(1);

    let clipped = requested > max_side;
    let side = if clipped {
        log::warn!(
            "Reference patch of {} pixels does not fit {}x{}, using {} pixels",
            pixels,
            height,
            width,
            max_side * max_side
        );
        max_side
    } else {
        requested
    };
    let half = side / 2;
    Patch {
        row: cy - half,
        col: cx - half,
        side,
        clipped,
    }
}

/// Average the central patch of a cube into one value per band.
///
/// A cube without pixels has no patch to average and is rejected.
pub fn reference_spectrum(
    cube: &ScanCube,
    kind: ReferenceKind,
    pixels: usize,
) -> HyscanResult<ReferenceSpectrum> {
    if cube.pixel_count() == 0 {
        return Err(HyscanError::EmptyCube(format!("{} reference", kind)));
    }
    let patch = central_patch(cube.height(), cube.width(), pixels);
    let view = cube.view();
    let region = view.slice(s![
        patch.row..patch.row + patch.side,
        patch.col..patch.col + patch.side,
        ..
    ]);
    let mut acc = Array1::<f64>::zeros(cube.bands());
    for line in region.outer_iter() {
        for px in line.outer_iter() {
            acc.zip_mut_with(&px, |a, &v| *a += v as f64);
        }
    }
    let n = patch.pixels() as f64;
    let values = acc.mapv(|v| (v / n) as f32);
    log::info!(
        "{} reference from {} pixels at ({}, {})",
        kind,
        patch.pixels(),
        patch.row,
        patch.col
    );
    Ok(ReferenceSpectrum {
        kind,
        values,
        patch,
    })
}

/// Capture a reference frame and persist both the raw cube and its spectrum.
///
/// Aborts without writing anything when no camera is connected.
pub fn capture_reference(
    camera: &mut CameraSlot,
    kind: ReferenceKind,
    property: &ScanProperty,
) -> HyscanResult<ReferenceSpectrum> {
    let cam = camera.as_mut().ok_or(HyscanError::CameraAbsent)?;
    cam.set_defaults()?;
    cam.open_stream()?;
    cam.start_acquire(true)?;
    thread::sleep(time::Duration::from_millis(property.conf.camera.settle_ms));
    let raw = cam.stop_acquire()?;
    let cube = ScanCube::from_raw(raw, property.conf.camera.band_count)?;
    let spectrum = reference_spectrum(&cube, kind, property.conf.calibration.patch_pixels)?;

    let raw_path = path::join(&[
        &property.path.dir.calibration,
        &format!("{}_raw_{}.npy", kind, path::timestamp()),
    ]);
    write_npy(&raw_path, &cube.view())?;
    save_reference(&property.path.reference(kind), &spectrum.values)?;
    log::info!("Calibrated {} reference ({})", kind, raw_path);
    Ok(spectrum)
}

pub fn save_reference(path: &str, values: &Array1<f32>) -> HyscanResult<()> {
    write_npy(path, values)?;
    Ok(())
}

/// Load a stored reference spectrum.
pub fn load_reference(path: &str) -> HyscanResult<Array1<f32>> {
    if !Path::new(path).is_file() {
        return Err(HyscanError::ReferenceMissing(path.into()));
    }
    Ok(read_npy(path)?)
}

/// Summary statistics of a reflectance cube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    /// Values left out of the statistics (NaN or infinite).
    pub non_finite: usize,
}

/// Reflectance cube with diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflectance {
    pub cube: ScanCube,
    pub stats: CubeStats,
    /// Bands whose white - black fell below the precision threshold.
    pub low_precision_bands: Vec<usize>,
}

impl Reflectance {
    pub fn precision_warning(&self) -> bool {
        !self.low_precision_bands.is_empty()
    }
}

/// Apply black/white correction to a scan.
///
/// Band counts of all three inputs must agree. A near-zero denominator only
/// produces a warning; the division is carried out regardless.
pub fn calibrate(
    scan: &ScanCube,
    white: ArrayView1<f32>,
    black: ArrayView1<f32>,
    precision_threshold: f32,
) -> HyscanResult<Reflectance> {
    for (what, len) in [("white reference", white.len()), ("black reference", black.len())] {
        if len != scan.bands() {
            return Err(HyscanError::DimensionMismatch {
                what: what.to_string(),
                expected: scan.bands(),
                found: len,
            });
        }
    }

    let denominator = &white - &black;
    let low_precision_bands: Vec<usize> = denominator
        .iter()
        .enumerate()
        .filter(|(_, d)| **d < precision_threshold)
        .map(|(i, _)| i)
        .collect();
    if !low_precision_bands.is_empty() {
        let min = denominator.iter().copied().fold(f32::INFINITY, f32::min);
        log::warn!(
            "White and black references nearly equal in {} bands (min difference {:e})",
            low_precision_bands.len(),
            min
        );
    }

    let corrected = (&scan.view() - &black) / &denominator;
    let cube = ScanCube::from_array(corrected);
    let stats = cube_stats(&cube);
    log::info!(
        "Reflectance range {:.4} - {:.4}, mean {:.4} +- {:.4}",
        stats.min,
        stats.max,
        stats.mean,
        stats.stddev
    );
    Ok(Reflectance {
        cube,
        stats,
        low_precision_bands,
    })
}

fn cube_stats(cube: &ScanCube) -> CubeStats {
    let (mut n, mut sum, mut sum_sq) = (0usize, 0f64, 0f64);
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    let mut non_finite = 0;
    for &v in cube.view().iter() {
        if !v.is_finite() {
            non_finite += 1;
            continue;
        }
        let v = v as f64;
        n += 1;
        sum += v;
        sum_sq += v * v;
        min = min.min(v);
        max = max.max(v);
    }
    if n == 0 {
        return CubeStats {
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
            stddev: f64::NAN,
            non_finite,
        };
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    CubeStats {
        min,
        max,
        mean,
        stddev: var.sqrt(),
        non_finite,
    }
}

/// Calibrate a scan against the stored references and persist the result.
///
/// Nothing is written when the inputs do not line up.
pub fn calibrate_stored(
    scan: &ScanCube,
    property: &ScanProperty,
    name: &str,
) -> HyscanResult<Reflectance> {
    let white = load_reference(&property.path.reference(ReferenceKind::White))?;
    let black = load_reference(&property.path.reference(ReferenceKind::Black))?;
    let reflectance = calibrate(
        scan,
        white.view(),
        black.view(),
        property.conf.calibration.precision_threshold,
    )?;
    let out = path::join(&[
        &property.path.dir.calibrated,
        &format!("{}_calibrated.npy", name),
    ]);
    write_npy(&out, &reflectance.cube.view())?;
    log::info!("Calibrated scan saved to {}", out);
    Ok(reflectance)
}

/// Mean spectrum over all pixels, used for quick diagnostics.
pub fn mean_spectrum(cube: &ScanCube) -> Option<Array1<f32>> {
    cube.view()
        .into_shape((cube.pixel_count(), cube.bands()))
        .ok()?
        .mean_axis(Axis(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::device::sim::SimulatedCamera;
    use crate::module::device::HyperspectralCamera;
    use crate::module::util::init::testing;
    use ndarray::{arr1, Array3};

    #[test]
    fn patch_fits_large_cube() {
        let p = central_patch(100, 100, 500);
        assert_eq!(p.side, 22);
        assert_eq!((p.row, p.col), (39, 39));
        assert!(!p.clipped);
    }

    #[test]
    fn patch_is_clipped_on_small_cube() {
        let p = central_patch(10, 10, 500);
        assert!(p.clipped);
        assert!(p.pixels() <= 100);
        assert!(p.row + p.side <= 10 && p.col + p.side <= 10);
    }

    #[test]
    fn patch_on_degenerate_cube() {
        let p = central_patch(1, 7, 500);
        assert_eq!(p.side, 1);
        assert_eq!(p.row, 0);
        assert!(p.col < 7);
    }

    #[test]
    fn patch_on_empty_cube_has_no_pixels() {
        let p = central_patch(0, 5, 500);
        assert_eq!(p.pixels(), 0);
        assert!(p.clipped);
    }

    #[test]
    fn empty_cube_has_no_reference() {
        let empty = ScanCube::from_array(Array3::zeros((0, 5, 3)));
        assert!(matches!(
            reference_spectrum(&empty, ReferenceKind::White, 500),
            Err(HyscanError::EmptyCube(_))
        ));
    }

    #[test]
    fn reference_averages_patch() {
        let raw = Array3::from_shape_fn((10, 10, 3), |(r, c, b)| (r + c) as f32 + b as f32 * 10.0);
        let reference =
            reference_spectrum(&ScanCube::from_array(raw), ReferenceKind::White, 500).unwrap();
        assert_eq!(reference.values.len(), 3);
        // Symmetric patch around the center of a 0..18 ramp
        assert!((reference.values[0] - 9.0).abs() < 1e-5);
        assert!((reference.values[2] - 29.0).abs() < 1e-5);
    }

    #[test]
    fn calibrate_maps_references_to_zero_and_one() {
        let scan = ScanCube::from_array(Array3::from_shape_fn((2, 2, 2), |(r, _, b)| {
            if r == 0 {
                10.0 + b as f32
            } else {
                110.0 + b as f32
            }
        }));
        let black = arr1(&[10.0f32, 11.0]);
        let white = arr1(&[110.0f32, 111.0]);
        let res = calibrate(&scan, white.view(), black.view(), 1e-6).unwrap();
        assert!(!res.precision_warning());
        assert_eq!(res.cube.view()[[0, 1, 0]], 0.0);
        assert_eq!(res.cube.view()[[1, 0, 1]], 1.0);
        assert!((res.stats.mean - 0.5).abs() < 1e-9);
        assert_eq!(res.stats.non_finite, 0);
    }

    #[test]
    fn calibrate_is_deterministic() {
        let scan = ScanCube::from_array(Array3::from_shape_fn((4, 3, 5), |(r, c, b)| {
            (r * 7 + c * 3 + b) as f32 * 0.37
        }));
        let black = Array1::from_elem(5, 0.1f32);
        let white = Array1::from_shape_fn(5, |b| 3.0 + b as f32);
        let a = calibrate(&scan, white.view(), black.view(), 1e-6).unwrap();
        let b = calibrate(&scan, white.view(), black.view(), 1e-6).unwrap();
        let bits = |r: &Reflectance| r.cube.view().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
    }

    #[test]
    fn band_mismatch_fails_without_output() {
        let tmp = tempfile::tempdir().unwrap();
        let property = testing::property(tmp.path());
        save_reference(&property.path.reference(ReferenceKind::White), &Array1::ones(3)).unwrap();
        save_reference(&property.path.reference(ReferenceKind::Black), &Array1::zeros(3)).unwrap();
        let scan = ScanCube::from_array(Array3::zeros((2, 2, 4)));
        let res = calibrate_stored(&scan, &property, "scan_x");
        assert!(matches!(res, Err(HyscanError::DimensionMismatch { .. })));
        assert_eq!(
            std::fs::read_dir(&property.path.dir.calibrated).unwrap().count(),
            0
        );
    }

    #[test]
    fn near_zero_denominator_warns_but_stays_finite() {
        let scan = ScanCube::from_array(Array3::from_elem((3, 3, 2), 5e-9f32));
        let black = arr1(&[0.0f32, 0.0]);
        let white = arr1(&[1e-8f32, 1.0]);
        let res = calibrate(&scan, white.view(), black.view(), 1e-6).unwrap();
        assert_eq!(res.low_precision_bands, vec![0]);
        assert!(res.cube.view().iter().all(|v| v.is_finite()));
        assert_eq!(res.stats.non_finite, 0);
    }

    #[test]
    fn missing_reference_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let property = testing::property(tmp.path());
        let scan = ScanCube::from_array(Array3::zeros((1, 1, 8)));
        assert!(matches!(
            calibrate_stored(&scan, &property, "scan_y"),
            Err(HyscanError::ReferenceMissing(_))
        ));
    }

    #[test]
    fn capture_without_camera_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let property = testing::property(tmp.path());
        let mut slot: CameraSlot = None;
        let res = capture_reference(&mut slot, ReferenceKind::Black, &property);
        assert!(matches!(res, Err(HyscanError::CameraAbsent)));
        assert_eq!(
            std::fs::read_dir(&property.path.dir.calibration).unwrap().count(),
            0
        );
    }

    #[test]
    fn capture_of_empty_frame_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let property = testing::property(tmp.path());
        let cam: Box<dyn HyperspectralCamera> = Box::new(SimulatedCamera::new(0, 10, 8));
        let mut slot: CameraSlot = Some(cam);
        let res = capture_reference(&mut slot, ReferenceKind::White, &property);
        assert!(matches!(res, Err(HyscanError::EmptyCube(_))));
        assert_eq!(
            std::fs::read_dir(&property.path.dir.calibration).unwrap().count(),
            0
        );
    }

    #[test]
    fn capture_persists_raw_and_spectrum() {
        let tmp = tempfile::tempdir().unwrap();
        let property = testing::property(tmp.path());
        let cam: Box<dyn HyperspectralCamera> = Box::new(SimulatedCamera::new(12, 10, 8));
        let mut slot: CameraSlot = Some(cam);
        let reference = capture_reference(&mut slot, ReferenceKind::White, &property).unwrap();
        assert_eq!(reference.values.len(), 8);
        assert!(reference.patch.clipped);
        let stored = load_reference(&property.path.reference(ReferenceKind::White)).unwrap();
        assert_eq!(stored, reference.values);
        // raw cube + spectrum
        assert_eq!(
            std::fs::read_dir(&property.path.dir.calibration).unwrap().count(),
            2
        );
    }

    #[test]
    fn mean_spectrum_of_constant_cube() {
        let cube = ScanCube::from_array(Array3::from_elem((2, 3, 4), 2.0f32));
        assert_eq!(mean_spectrum(&cube).unwrap(), Array1::from_elem(4, 2.0f32));
    }
}
