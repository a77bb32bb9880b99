//! Path Operations Module
//!
//! This module handles path operations for directories and files.

use std::path::PathBuf;

/// Join Paths
///
/// This function takes a slice of strings as input and joins them into a single path string.
/// It uses the PathBuf type to handle platform-specific separators and conversions.
pub fn join(paths: &[&str]) -> String {
    let mut path: PathBuf = PathBuf::new();
    for p in paths {
        path.push(p);
    }
    path.to_string_lossy().into_owned()
}

/// Timestamp used in scan and reference file names.
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub mod dir {
    //! Directory Operations Submodule
    //!
    //! This submodule provides functions for directory operations.

    use std::fs;
    use std::path::Path;

    use super::{ScanDir, ScanPath};
    use crate::module::define;
    use crate::module::error::HyscanResult;

    /// Create Directory from Path List
    ///
    /// This function takes a slice of strings as input and creates a directory with the joined path.
    /// It returns the joined path if the directory creation succeeds.
    pub fn create_dir_from_path_list(paths: &[&str]) -> HyscanResult<String> {
        let path = super::join(paths);
        fs::create_dir_all(Path::new(&path))?;
        Ok(path)
    }

    /// Create Application Subdirectories and Paths
    ///
    /// Creates the data directory and one subdirectory per artifact kind,
    /// returning a `ScanPath` with all of them.
    pub fn create_app_sub_dir(data_dir: &str) -> HyscanResult<ScanPath> {
        let data = create_dir_from_path_list(&[data_dir])?;
        Ok(ScanPath {
            dir: ScanDir {
                log: create_dir_from_path_list(&[&data, define::path::LOG_DIR])?,
                calibration: create_dir_from_path_list(&[&data, define::path::CALIBRATION_DIR])?,
                scan: create_dir_from_path_list(&[&data, define::path::SCAN_DIR])?,
                calibrated: create_dir_from_path_list(&[&data, define::path::CALIBRATED_DIR])?,
                region: create_dir_from_path_list(&[&data, define::path::REGION_DIR])?,
                preview: create_dir_from_path_list(&[&data, define::path::PREVIEW_DIR])?,
                data,
            },
        })
    }
}

/// Paths of Resources
///
/// This struct represents the paths of the resources used by the application.
#[derive(Debug, Clone)]
pub struct ScanPath {
    /// Directories Paths
    pub dir: ScanDir,
}

/// Paths of Directories
#[derive(Debug, Clone)]
pub struct ScanDir {
    /// Data Directory Path
    pub data: String,
    /// Log Directory Path
    pub log: String,
    /// Reference Spectra Directory Path
    pub calibration: String,
    /// Raw Scan Directory Path
    pub scan: String,
    /// Reflectance Cube Directory Path
    pub calibrated: String,
    /// Region Export Directory Path
    pub region: String,
    /// Preview Image Directory Path
    pub preview: String,
}

impl ScanPath {
    /// Path of a stored reference spectrum.
    pub fn reference(&self, kind: crate::module::vision::calibrate::ReferenceKind) -> String {
        join(&[&self.dir.calibration, kind.file_name()])
    }

    /// Resolve a path from the config against the data directory.
    pub fn resolve(&self, relative: &str) -> String {
        if std::path::Path::new(relative).is_absolute() {
            relative.to_string()
        } else {
            join(&[&self.dir.data, relative])
        }
    }
}
