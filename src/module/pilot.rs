//! This module synchronizes motion phases with camera actions.
//!
//! Status reports from the motion controller drive `MotionPhaseState`. The
//! transition function only decides what to do; `dispatch` hands the
//! resulting actions to a `ScanActions` executor.

pub mod scan; // Camera / calibration / classification executor

use std::fmt;

use crate::module::com::StatusReport;

/// Motion phases reported by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionStatus {
    Homing,
    Accelerating,
    Scanning,
    Waiting,
    Other(String),
}

impl MotionStatus {
    /// Convert a status string. Unknown strings are kept, not rejected.
    pub fn from_string(s: &str) -> MotionStatus {
        match s {
            "Homing" => MotionStatus::Homing,
            "Accelerating" => MotionStatus::Accelerating,
            "Scanning" => MotionStatus::Scanning,
            "Waiting" => MotionStatus::Waiting,
            other => MotionStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionStatus::Homing => write!(f, "Homing"),
            MotionStatus::Accelerating => write!(f, "Accelerating"),
            MotionStatus::Scanning => write!(f, "Scanning"),
            MotionStatus::Waiting => write!(f, "Waiting"),
            MotionStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// What a status report asks the rig to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAction {
    CaptureWhite,
    StartAcquisition,
    CycleComplete,
    ExtractAndClassify,
    Telemetry(String),
}

/// Edge-detection state over consecutive status reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionPhaseState {
    pub previous: Option<MotionStatus>,
    pub current: Option<MotionStatus>,
    pub white_captured: bool,   // White reference taken in this cycle
    pub camera_scanning: bool,  // Acquisition started and not yet extracted
}

impl MotionPhaseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one status report.
    ///
    /// The white-reference edge is judged on the phases recorded before this
    /// report, so it fires on the report after Homing -> Accelerating was seen.
    pub fn apply(&mut self, report: &StatusReport, visualize: bool) -> Vec<PhaseAction> {
        let status = MotionStatus::from_string(&report.status);
        let mut actions = vec![];

        // Repeated Accelerating clears a stale capture flag
        if self.previous == Some(MotionStatus::Accelerating)
            && self.current == Some(MotionStatus::Accelerating)
        {
            self.white_captured = false;
        }
        if self.previous == Some(MotionStatus::Homing)
            && self.current == Some(MotionStatus::Accelerating)
            && !self.white_captured
        {
            self.white_captured = true;
            actions.push(PhaseAction::CaptureWhite);
        }

        self.previous = self.current.take();
        self.current = Some(status.clone());

        if visualize {
            if status == MotionStatus::Waiting {
                actions.push(PhaseAction::CycleComplete);
            }
            if !self.camera_scanning && status == MotionStatus::Scanning {
                self.camera_scanning = true;
                actions.push(PhaseAction::StartAcquisition);
            } else if self.camera_scanning && status != MotionStatus::Scanning {
                self.camera_scanning = false;
                actions.push(PhaseAction::ExtractAndClassify);
            }
        } else {
            actions.push(PhaseAction::Telemetry(report.summary()));
        }
        log::debug!("Phase {:?} -> {:?}: {:?}", self.previous, self.current, actions);
        actions
    }
}

/// Side effects of phase transitions.
pub trait ScanActions {
    /// Runs to completion before the next action is dispatched.
    fn capture_white_reference(&mut self);
    fn start_acquisition(&mut self);
    fn extract_and_classify(&mut self);
    fn cycle_complete(&mut self);
    fn telemetry(&mut self, text: &str);
}

/// Run actions in order.
pub fn dispatch(actions: Vec<PhaseAction>, exec: &mut dyn ScanActions) {
    for action in actions {
        match action {
            PhaseAction::CaptureWhite => exec.capture_white_reference(),
            PhaseAction::StartAcquisition => exec.start_acquisition(),
            PhaseAction::CycleComplete => exec.cycle_complete(),
            PhaseAction::ExtractAndClassify => exec.extract_and_classify(),
            PhaseAction::Telemetry(text) => exec.telemetry(&text),
        }
    }
}
