//! This module contains all the sub-modules of the project.

pub mod com; // Communication module: Motion controller protocol, command queue and transport.
pub mod define; // Definition module: Contains definitions and constants used throughout the project.
pub mod device; // Device module: Camera capability, drivers and the close sequence.
pub mod drive; // Drive module: Handles the motion controller protocol thread.
pub mod error; // Error module: Crate-wide error type.
pub mod pilot; // Pilot module: Motion phase state machine and scan cycle executor.
pub mod state; // State module: State shared between the UI, protocol loop and workers.
pub mod util; // Utility module: Provides various utility functions and helpers.
pub mod vision; // Vision module: Calibration, classification and region extraction.
