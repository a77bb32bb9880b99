//! Config Handler.

use serde::{Deserialize, Serialize};

use crate::module::define;

/// Provides TOML config file handling.
pub mod toml {

    use super::DEFAULT_CONFIG;
    use crate::module::define;
    use crate::module::error::{HyscanError, HyscanResult};
    use std::fs::File;
    use std::io::prelude::*;
    use std::path::Path;

    /// Loads a configuration file from the given directory.
    /// If not found, generates a default config file.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file is located or should be created.
    ///
    pub fn load(dir: &str) -> HyscanResult<super::Config> {
        // Check if the config file exists
        let path = Path::new(dir).join(define::path::CONF_FILE);

        if !path.is_file() {
            // Create the default config if it doesn't exist
            let config = default()?;
            save(dir, &config)?;
            log::info!("Default config written to {}", path.display());
        }

        // Load the config
        let conf_str: String = std::fs::read_to_string(&path)?;
        toml::from_str(&conf_str)
            .map_err(|e| HyscanError::Config(format!("Failed to parse TOML: {}", e)))
    }

    /// Saves a configuration file to the given directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file should be saved.
    /// * `conf` - The configuration data to be saved.
    ///
    pub fn save(dir: &str, conf: &super::Config) -> HyscanResult<()> {
        let toml_str = toml::to_string(conf).map_err(|e| HyscanError::Config(e.to_string()))?;
        let path = crate::module::util::path::join(&[dir, define::path::CONF_FILE]);
        let mut file = File::create(path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }

    /// The embedded default configuration.
    pub fn default() -> HyscanResult<super::Config> {
        toml::from_str(DEFAULT_CONFIG).map_err(|e| HyscanError::Config(e.to_string()))
    }
}

/// Represents the configuration data structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub system: System,
    pub controller: Controller,
    pub camera: Camera,
    pub calibration: Calibration,
    pub classifier: Classifier,
    pub regions: Regions,
    pub pipeline: Pipeline,
}

/// Represents system-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct System {
    pub data_dir: String,
    pub log_level: String,
}

/// Motion controller endpoint.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Controller {
    pub bind: String,
    pub idle_poll_ms: u64,
    pub read_timeout_ms: u64,
}

/// Represents camera-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Camera {
    pub driver: String,
    #[serde(default = "default_band_count")]
    pub band_count: usize,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    pub sim_lines: usize,
    pub sim_width: usize,
}

/// Reference capture and reflectance parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Calibration {
    #[serde(default = "default_patch_pixels")]
    pub patch_pixels: usize,
    #[serde(default = "default_precision_threshold")]
    pub precision_threshold: f32,
}

/// Classifier artifacts and inference parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Classifier {
    pub model: String,
    pub scaler_mean: String,
    pub scaler_scale: String,
    pub labels: String,
    pub pixel_limit: usize,
    pub batch_size: usize,
    pub confidence_threshold: f32,
    pub intra_threads: i16,
}

/// Region extraction parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Regions {
    #[serde(default = "default_min_region_size")]
    pub min_region_size: usize,
    #[serde(default)]
    pub target_classes: Vec<String>,
}

/// Scan pipeline switches.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Pipeline {
    pub visualize: bool,
    pub crop_top: f32,
    pub crop_bottom: f32,
    pub save_previews: bool,
}

// Fallbacks for keys missing from older config files
fn default_band_count() -> usize {
    define::defaults::BAND_COUNT
}

fn default_settle_ms() -> u64 {
    define::defaults::SETTLE_MS
}

fn default_patch_pixels() -> usize {
    define::defaults::PATCH_PIXELS
}

fn default_precision_threshold() -> f32 {
    define::defaults::PRECISION_THRESHOLD
}

fn default_min_region_size() -> usize {
    define::defaults::MIN_REGION_SIZE
}

// Default configuration data in TOML format
const DEFAULT_CONFIG: &str = r#"
[system]
  data_dir = './hyscan_data' # Root of calibration, scans, regions and logs
  log_level = 'INFO' # Log level ('ERROR', 'WARN', 'INFO', 'DEBUG')

[controller]
  bind = '0.0.0.0:8765' # WebSocket endpoint the motion controller connects to
  idle_poll_ms = 20 # Sleep between queue polls while idle
  read_timeout_ms = 500 # Transport read timeout, bounds shutdown latency

[camera]
  driver = 'simulated' # Camera driver ('simulated', 'none')
  band_count = 224 # Spectral bands of the sensor
  settle_ms = 1000 # Acquisition time for reference frames
  sim_lines = 64 # Lines per simulated acquisition
  sim_width = 64 # Spatial pixels per simulated line

[calibration]
  patch_pixels = 500 # Approximate pixel count of the central reference patch
  precision_threshold = 1e-6 # Warn when white - black drops below this

[classifier]
  model = 'model/pixel_model.onnx' # ONNX model, relative to data_dir
  scaler_mean = 'model/pixel_scaler.npy' # Feature scaler mean
  scaler_scale = 'model/pixel_scale.npy' # Feature scaler scale (unit scale if missing)
  labels = 'model/label_classes.json' # Label encoder classes
  pixel_limit = 0 # Classify only the leading N pixels (0 = all)
  batch_size = 65536 # Pixels per inference batch
  confidence_threshold = 0.0 # Below this the pixel stays unlabeled (0 = off)
  intra_threads = 4 # ONNX runtime intra-op threads

[regions]
  min_region_size = 100 # Regions smaller than this are discarded
  target_classes = [] # Classes to extract (empty = every class present)

[pipeline]
  visualize = false # Automation mode at startup
  crop_top = 0.0 # Fraction of rows dropped from the top before classification
  crop_bottom = 1.0 # Fraction of rows kept up to
  save_previews = true # Write PNG previews of each scan
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_load() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path().to_str().unwrap();
        let res = toml::load(dir).unwrap();
        assert_eq!(res.camera.band_count, 224);
        assert_eq!(res.regions.min_region_size, 100);
        assert_eq!(res.calibration.patch_pixels, 500);
        assert!(std::path::Path::new(dir).join("conf.toml").is_file());
    }

    #[test]
    fn run_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let dir = dir.path().to_str().unwrap();
        let mut conf = toml::default().unwrap();
        conf.regions.min_region_size = 42;
        conf.regions.target_classes = vec!["grass".to_string()];
        toml::save(dir, &conf).unwrap();
        let res = toml::load(dir).unwrap();
        assert_eq!(res.regions.min_region_size, 42);
        assert_eq!(res.regions.target_classes, vec!["grass".to_string()]);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let conf = toml::default().unwrap();
        let mut text = ::toml::to_string(&conf).unwrap();
        for key in ["patch_pixels", "min_region_size", "band_count", "target_classes"] {
            text = text
                .lines()
                .filter(|l| !l.starts_with(key))
                .collect::<Vec<_>>()
                .join("\n");
        }
        std::fs::write(dir.path().join("conf.toml"), text).unwrap();
        let res = toml::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(res.calibration.patch_pixels, 500);
        assert_eq!(res.regions.min_region_size, 100);
        assert_eq!(res.camera.band_count, 224);
        assert!(res.regions.target_classes.is_empty());
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conf.toml"), "[system\n").unwrap();
        assert!(toml::load(dir.path().to_str().unwrap()).is_err());
    }
}
