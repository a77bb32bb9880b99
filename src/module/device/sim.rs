//! Simulated line-scan camera.
//!
//! Produces a deterministic cube whose spectra vary by column band, so the
//! whole pipeline can run on a bench without hardware.

use ndarray::Array3;

use super::{CameraDriver, CameraError, HyperspectralCamera};

/// Driver exposing one simulated camera.
pub struct SimulatedDriver {
    lines: usize,
    width: usize,
    bands: usize,
}

impl SimulatedDriver {
    pub fn new(lines: usize, width: usize, bands: usize) -> Self {
        Self {
            lines,
            width,
            bands,
        }
    }
}

impl CameraDriver for SimulatedDriver {
    fn discover(&self) -> Result<Vec<Box<dyn HyperspectralCamera>>, CameraError> {
        Ok(vec![Box::new(SimulatedCamera::new(
            self.lines, self.width, self.bands,
        ))])
    }
}

/// Simulated FX-style camera state.
#[derive(Debug)]
pub struct SimulatedCamera {
    lines: usize,
    width: usize,
    bands: usize,
    stream_open: bool,
    acquiring: bool,
    preview: bool,
    closed: bool,
}

impl SimulatedCamera {
    pub fn new(lines: usize, width: usize, bands: usize) -> Self {
        Self {
            lines,
            width,
            bands,
            stream_open: false,
            acquiring: false,
            preview: false,
            closed: false,
        }
    }

    /// Three vertical material stripes over a dark floor.
    fn render(&self) -> Array3<f32> {
        let width = self.width.max(1);
        let bands = self.bands.max(1) as f32;
        Array3::from_shape_fn((self.lines, self.width, self.bands), |(_, x, b)| {
            let stripe = (x * 3 / width) as f32;
            let slope = (b as f32 / bands) * (stripe + 1.0);
            100.0 + 800.0 * slope
        })
    }
}

impl HyperspectralCamera for SimulatedCamera {
    fn name(&self) -> String {
        format!("simulated-{}x{}", self.width, self.bands)
    }

    fn set_defaults(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::NotConnected);
        }
        self.preview = false;
        Ok(())
    }

    fn open_stream(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::NotConnected);
        }
        self.stream_open = true;
        Ok(())
    }

    fn start_acquire(&mut self, preview: bool) -> Result<(), CameraError> {
        if !self.stream_open {
            return Err(CameraError::Acquisition("stream not open".to_string()));
        }
        self.acquiring = true;
        self.preview = preview;
        Ok(())
    }

    fn stop_acquire(&mut self) -> Result<Array3<f32>, CameraError> {
        if !self.acquiring {
            return Err(CameraError::Acquisition("not acquiring".to_string()));
        }
        self.acquiring = false;
        self.stream_open = false;
        Ok(self.render())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::NotConnected);
        }
        self.acquiring = false;
        self.stream_open = false;
        self.closed = true;
        Ok(())
    }

    fn is_acquiring(&self) -> bool {
        self.acquiring
    }
}
