//! This module provides miscellaneous utilities.

// Import the submodules for configuration, initialization, notifications and paths
pub mod conf; // Configuration module
pub mod init; // Initialization module
pub mod notify; // UI notification bridge
pub mod path; // Path module
