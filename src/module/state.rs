//! Process-wide shared state.
//!
//! Access list per field:
//! - `controller`: written by the protocol thread, read by the UI.
//! - `last_status`: written by the protocol thread, read by anyone.
//! - `visualize`: written by the UI, read by the protocol thread.
//! - `stop`: written by the UI at shutdown, read by the protocol thread and transport.
//! - `camera`: connected by the UI's connect worker; used by calibration and
//!   acquisition workers under the lock; released at shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::module::com::StatusReport;
use crate::module::device::{self, CameraError, CloseMode, HyperspectralCamera};
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::util::notify::{ConnectionState, Link, Notifier};

pub type CameraSlot = Option<Box<dyn HyperspectralCamera>>;

pub struct SharedState {
    controller: Mutex<ConnectionState>,
    last_status: Mutex<Option<StatusReport>>,
    visualize: AtomicBool,
    stop: Arc<AtomicBool>,
    camera: Mutex<CameraSlot>,
}

impl SharedState {
    pub fn new(visualize: bool) -> Self {
        Self {
            controller: Mutex::new(ConnectionState::Disconnected),
            last_status: Mutex::new(None),
            visualize: AtomicBool::new(visualize),
            stop: Arc::new(AtomicBool::new(false)),
            camera: Mutex::new(None),
        }
    }

    pub fn controller_state(&self) -> ConnectionState {
        *lock(&self.controller)
    }

    pub fn set_controller_state(&self, state: ConnectionState) {
        *lock(&self.controller) = state;
    }

    pub fn last_status(&self) -> Option<StatusReport> {
        lock(&self.last_status).clone()
    }

    pub fn set_last_status(&self, status: StatusReport) {
        *lock(&self.last_status) = Some(status);
    }

    pub fn visualize(&self) -> bool {
        self.visualize.load(Ordering::SeqCst)
    }

    pub fn set_visualize(&self, on: bool) {
        self.visualize.store(on, Ordering::SeqCst);
    }

    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Flag handed to transports so blocking reads can give up.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Exclusive access to the camera slot.
    pub fn camera(&self) -> MutexGuard<'_, CameraSlot> {
        lock(&self.camera)
    }

    pub fn has_camera(&self) -> bool {
        self.camera().is_some()
    }

    /// Install a freshly discovered camera, closing any previous one.
    pub fn install_camera(&self, cam: Box<dyn HyperspectralCamera>) {
        let mut slot = self.camera();
        if let Some(mut old) = slot.take() {
            if let Err(e) = device::close(old.as_mut(), CloseMode::Force) {
                log::warn!("Closing previous camera failed: {}", e);
            }
        }
        *slot = Some(cam);
    }
}

/// Poisoned locks still hold usable data here; a panicked worker must not
/// take the protocol loop down with it.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Discover and install the camera. Runs off the UI thread.
pub fn connect_camera(
    shared: &SharedState,
    driver: &dyn device::CameraDriver,
    notifier: &Notifier,
) -> HyscanResult<()> {
    notifier.set_connection_state(Link::Camera, ConnectionState::Connecting);
    match device::discover(driver) {
        Ok(cam) => {
            let name = cam.name();
            shared.install_camera(cam);
            notifier.set_connection_state(Link::Camera, ConnectionState::Connected);
            notifier.show_message(format!("Camera connected: {}", name));
            Ok(())
        }
        Err(e) => {
            notifier.set_connection_state(Link::Camera, ConnectionState::Disconnected);
            notifier.show_message(e.to_string());
            Err(e)
        }
    }
}

/// Release the camera, then stop the protocol loop.
///
/// Returns the camera's ack failure when it refuses to close and `mode` is
/// not `Force`. The camera stays installed and the protocol loop keeps
/// running so the caller can retry.
pub fn shutdown(shared: &SharedState, mode: CloseMode) -> HyscanResult<()> {
    {
        let mut slot = shared.camera();
        if let Some(cam) = slot.as_mut() {
            match device::close(cam.as_mut(), mode) {
                Ok(()) => log::info!("Camera released"),
                Err(e @ CameraError::AckFailure(_)) => {
                    log::warn!("Camera refused to close: {}", e);
                    return Err(HyscanError::Camera(e));
                }
                Err(e) => log::warn!("Camera close ended with: {}", e),
            }
            *slot = None;
        }
    }
    shared.request_stop();
    Ok(())
}
