//! This module is responsible for preparing the resources needed by the application, such as directories, configurations, logs, etc.
//!

pub mod resource {
    use super::ScanProperty;
    use crate::module::error::HyscanResult;

    /// Initialize the application resources and return a ScanProperty instance containing paths and configurations.
    ///
    /// The config is looked up in `data_dir`; its own `system.data_dir` then
    /// decides where artifacts go.
    pub fn init(data_dir: &str) -> HyscanResult<ScanProperty> {
        // Bootstrap directory holding conf.toml
        crate::module::util::path::dir::create_dir_from_path_list(&[data_dir])?;
        let conf = crate::module::util::conf::toml::load(data_dir)?;

        // Prepare the app data directory tree
        let paths = crate::module::util::path::dir::create_app_sub_dir(&conf.system.data_dir)?;

        Ok(ScanProperty { path: paths, conf })
    }
}

/// This struct represents the properties of the app, such as paths and configurations.
///
#[derive(Debug, Clone)]
pub struct ScanProperty {
    pub path: crate::module::util::path::ScanPath, // The paths of the app resources
    pub conf: crate::module::util::conf::Config,   // The configurations of the app
}
