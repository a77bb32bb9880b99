//! Provide Camera Control.
//!
//! The camera SDK itself is an external collaborator. This module only
//! defines the capability the pipeline calls into, driver discovery, and the
//! close sequence used at shutdown.
pub mod sim;

use ndarray::Array3;
use thiserror::Error;

use crate::module::define;
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::util::conf::Config;

/// Errors reported by the camera or its acknowledgement path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera not connected")]
    NotConnected,

    #[error("acknowledgement failure: {0}")]
    AckFailure(String),

    #[error("acquisition failed: {0}")]
    Acquisition(String),
}

/// Line-scan hyperspectral camera capability.
///
/// Cubes returned by `stop_acquire` are lines x pixels x bands, or any
/// permutation the driver prefers; `ScanCube::from_raw` sorts the axes out.
pub trait HyperspectralCamera: Send {
    fn name(&self) -> String;
    fn set_defaults(&mut self) -> Result<(), CameraError>;
    fn open_stream(&mut self) -> Result<(), CameraError>;
    fn start_acquire(&mut self, preview: bool) -> Result<(), CameraError>;
    fn stop_acquire(&mut self) -> Result<Array3<f32>, CameraError>;
    fn close(&mut self) -> Result<(), CameraError>;
    /// Whether an acquisition is running and needs stopping.
    fn is_acquiring(&self) -> bool;
}

/// Enumerates attached cameras.
pub trait CameraDriver: Send + Sync {
    fn discover(&self) -> Result<Vec<Box<dyn HyperspectralCamera>>, CameraError>;
}

/// Driver for rigs without a camera attached.
pub struct NoCamera;

impl CameraDriver for NoCamera {
    fn discover(&self) -> Result<Vec<Box<dyn HyperspectralCamera>>, CameraError> {
        Ok(vec![])
    }
}

/// Select the driver named in the config.
pub fn driver(conf: &Config) -> Box<dyn CameraDriver> {
    match conf.camera.driver.as_str() {
        "simulated" => Box::new(sim::SimulatedDriver::new(
            conf.camera.sim_lines,
            conf.camera.sim_width,
            conf.camera.band_count,
        )),
        "none" => Box::new(NoCamera),
        other => {
            log::warn!("Unknown camera driver '{}', running without camera", other);
            Box::new(NoCamera)
        }
    }
}

/// Discover exactly one camera.
///
/// Several cameras is not a supported setup and fails instead of picking one.
pub fn discover(driver: &dyn CameraDriver) -> HyscanResult<Box<dyn HyperspectralCamera>> {
    let mut found = driver.discover()?;
    match found.len() {
        0 => Err(HyscanError::CameraAbsent),
        1 => {
            let cam = found.remove(0);
            log::info!("Camera found: {}", cam.name());
            Ok(cam)
        }
        n => Err(HyscanError::MultipleCameras(n)),
    }
}

/// How hard `close` tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    Graceful,
    Force,
}

/// Stop any running acquisition and close the camera.
///
/// `NotConnected` means the device is already gone, which counts as closed.
/// Ack failures are retried; if they persist the error is returned, unless
/// `mode` is `Force`, in which case the camera is dropped anyway.
pub fn close(cam: &mut dyn HyperspectralCamera, mode: CloseMode) -> Result<(), CameraError> {
    if cam.is_acquiring() {
        if let Err(e) = cam.stop_acquire() {
            log::warn!("Stopping acquisition before close failed: {}", e);
        }
    }
    let mut last = None;
    for attempt in 1..=define::defaults::CLOSE_ATTEMPTS {
        match cam.close() {
            Ok(()) => return Ok(()),
            Err(CameraError::NotConnected) => {
                log::info!("Camera reported not connected, treating as closed");
                return Ok(());
            }
            Err(e) => {
                log::warn!("Camera close attempt {} failed: {}", attempt, e);
                last = Some(e);
            }
        }
    }
    match (mode, last) {
        (CloseMode::Force, Some(e)) => {
            log::warn!("Forcing camera close despite: {}", e);
            Ok(())
        }
        (_, Some(e)) => Err(e),
        (_, None) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stubborn {
        failures: u32,
        error: CameraError,
        closes: u32,
    }

    impl HyperspectralCamera for Stubborn {
        fn name(&self) -> String {
            "stubborn".to_string()
        }
        fn set_defaults(&mut self) -> Result<(), CameraError> {
            Ok(())
        }
        fn open_stream(&mut self) -> Result<(), CameraError> {
            Ok(())
        }
        fn start_acquire(&mut self, _preview: bool) -> Result<(), CameraError> {
            Ok(())
        }
        fn stop_acquire(&mut self) -> Result<Array3<f32>, CameraError> {
            Ok(Array3::zeros((1, 1, 1)))
        }
        fn close(&mut self) -> Result<(), CameraError> {
            self.closes += 1;
            if self.closes <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
        fn is_acquiring(&self) -> bool {
            false
        }
    }

    struct Many(usize);

    impl CameraDriver for Many {
        fn discover(&self) -> Result<Vec<Box<dyn HyperspectralCamera>>, CameraError> {
            Ok((0..self.0)
                .map(|_| {
                    Box::new(sim::SimulatedCamera::new(2, 2, 4)) as Box<dyn HyperspectralCamera>
                })
                .collect())
        }
    }

    #[test]
    fn discover_requires_exactly_one() {
        assert!(matches!(discover(&Many(0)), Err(HyscanError::CameraAbsent)));
        assert!(discover(&Many(1)).is_ok());
        assert!(matches!(
            discover(&Many(2)),
            Err(HyscanError::MultipleCameras(2))
        ));
    }

    #[test]
    fn not_connected_counts_as_closed() {
        let mut cam = Stubborn {
            failures: 10,
            error: CameraError::NotConnected,
            closes: 0,
        };
        assert!(close(&mut cam, CloseMode::Graceful).is_ok());
        assert_eq!(cam.closes, 1);
    }

    #[test]
    fn ack_failure_is_retried() {
        let mut cam = Stubborn {
            failures: 2,
            error: CameraError::AckFailure("busy".to_string()),
            closes: 0,
        };
        assert!(close(&mut cam, CloseMode::Graceful).is_ok());
        assert_eq!(cam.closes, 3);
    }

    #[test]
    fn persistent_ack_failure_blocks_unless_forced() {
        let mut cam = Stubborn {
            failures: 100,
            error: CameraError::AckFailure("busy".to_string()),
            closes: 0,
        };
        assert_eq!(
            close(&mut cam, CloseMode::Graceful),
            Err(CameraError::AckFailure("busy".to_string()))
        );
        assert!(close(&mut cam, CloseMode::Force).is_ok());
    }
}
