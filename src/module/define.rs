//! Module for Constants and Paths Definitions
//!
//! This module defines various constants and paths used throughout the application.

/// System Constants
pub mod system {
    /// Name of the system
    pub const NAME: &str = "hyscan";
}

/// File Paths
pub mod path {

    // Default Data Directory
    pub const DATA_DIR: &str = "./hyscan_data";

    // Log Directory
    pub const LOG_DIR: &str = "log";

    // Reference Spectra and Raw Reference Cubes
    pub const CALIBRATION_DIR: &str = "calibration";

    // Raw Scan Cubes
    pub const SCAN_DIR: &str = "scans";

    // Reflectance Cubes
    pub const CALIBRATED_DIR: &str = "calibrated";

    // Region Maps and Exported Regions
    pub const REGION_DIR: &str = "regions";

    // Preview Images
    pub const PREVIEW_DIR: &str = "previews";

    // Configuration File
    pub const CONF_FILE: &str = "conf.toml";

    // Reference Spectrum Files
    pub const BLACK_REFERENCE: &str = "black.npy";
    pub const WHITE_REFERENCE: &str = "white.npy";
}

/// Defaults used when the config leaves a value out.
pub mod defaults {
    // Bands reported by the line-scan sensor
    pub const BAND_COUNT: usize = 224;

    // Approximate pixel count of the reference patch
    pub const PATCH_PIXELS: usize = 500;

    // Regions below this pixel count are discarded
    pub const MIN_REGION_SIZE: usize = 100;

    // White minus black below this raises a precision warning
    pub const PRECISION_THRESHOLD: f32 = 1e-6;

    // Acquisition settle interval for references (ms)
    pub const SETTLE_MS: u64 = 1000;

    // Close attempts before an ack failure is reported
    pub const CLOSE_ATTEMPTS: u32 = 3;

    // False-color preview bands (r, g, b)
    pub const PREVIEW_BANDS: [usize; 3] = [120, 70, 40];
}

/// Motion controller command vocabulary.
pub mod command {
    pub const START_SCAN: &str = "start_scan";
    pub const STOP_SCAN: &str = "stop_scan";
    pub const LENGTH: &str = "length";
    pub const SPEED: &str = "speed";
    pub const INFORMATION: &str = "information";

    // Inclusive bounds of the parameterized verbs
    pub const LENGTH_RANGE: (f64, f64) = (0.0, 1.0);
    pub const SPEED_RANGE: (f64, f64) = (0.010, 0.200);
}
