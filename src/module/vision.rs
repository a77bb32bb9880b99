//! Processing related to spectral information.
//!
//! Every stage takes a `ScanCube` by value or reference and produces a new
//! one; a cube is never modified in place once it leaves the camera.

pub mod calibrate;
pub mod classifier;
pub mod preview;
pub mod region;

use ndarray::{s, Array3, ArrayView1, ArrayView3, Axis};

use crate::module::error::{HyscanError, HyscanResult};

/// Spectral image, rows x columns x bands.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCube {
    data: Array3<f32>,
}

impl ScanCube {
    /// Wrap a raw cube, moving the band axis last.
    ///
    /// The axis whose length equals `bands` is the spectral one. When more
    /// than one matches, the last axis wins.
    pub fn from_raw(raw: Array3<f32>, bands: usize) -> HyscanResult<Self> {
        let shape = raw.shape().to_vec();
        let data = if shape[2] == bands {
            raw
        } else if shape[1] == bands {
            raw.permuted_axes([0, 2, 1])
        } else if shape[0] == bands {
            raw.permuted_axes([1, 2, 0])
        } else {
            return Err(HyscanError::BandAxis { shape, bands });
        };
        // Standard layout keeps row-major pixel order for flattening
        Ok(Self {
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// Wrap an array already laid out as rows x columns x bands.
    pub fn from_array(data: Array3<f32>) -> Self {
        Self {
            data: data.as_standard_layout().into_owned(),
        }
    }

    pub fn height(&self) -> usize {
        self.data.dim().0
    }

    pub fn width(&self) -> usize {
        self.data.dim().1
    }

    pub fn bands(&self) -> usize {
        self.data.dim().2
    }

    pub fn pixel_count(&self) -> usize {
        self.height() * self.width()
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// Spectrum of one pixel.
    pub fn spectrum(&self, row: usize, col: usize) -> ArrayView1<'_, f32> {
        self.data.slice(s![row, col, ..])
    }

    /// Keep the rows between two fractions of the height.
    ///
    /// Fractions are clamped to 0..=1; an empty selection keeps the cube unchanged.
    pub fn crop_rows(self, top: f32, bottom: f32) -> Self {
        let h = self.height();
        let y1 = ((top.clamp(0.0, 1.0) * h as f32) as usize).min(h);
        let y2 = ((bottom.clamp(0.0, 1.0) * h as f32) as usize).min(h);
        if y2 <= y1 || (y1 == 0 && y2 == h) {
            if y2 <= y1 {
                log::warn!("Empty crop {}..{} ignored", top, bottom);
            }
            return self;
        }
        log::debug!("Cropping rows {}..{} of {}", y1, y2, h);
        Self {
            data: self.data.slice_axis(Axis(0), (y1..y2).into()).to_owned(),
        }
    }
}
