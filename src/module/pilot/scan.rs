//! Scan cycle executor.
//!
//! White capture runs on the caller's thread. Acquisition start and the
//! extract chain run on worker threads so the protocol loop keeps reading.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ndarray_npy::write_npy;

use super::ScanActions;
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::state::SharedState;
use crate::module::util::init::ScanProperty;
use crate::module::util::notify::Notifier;
use crate::module::util::path;
use crate::module::vision::calibrate::{self, ReferenceKind, ReferenceSpectrum};
use crate::module::vision::classifier::PixelClassifier;
use crate::module::vision::{preview, region, ScanCube};

/// Outcome of one extract run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSummary {
    pub name: String,
    pub classified: usize,
    pub regions: usize,
    pub export_failures: usize,
}

/// Capture a reference and report the outcome to the UI.
pub fn capture(
    shared: &SharedState,
    property: &ScanProperty,
    notifier: &Notifier,
    kind: ReferenceKind,
) -> HyscanResult<ReferenceSpectrum> {
    let mut slot = shared.camera();
    match calibrate::capture_reference(&mut slot, kind, property) {
        Ok(spectrum) => {
            let mut text = format!("{} reference captured ({} bands)", kind, spectrum.values.len());
            if spectrum.patch.clipped {
                text.push_str(&format!(", patch clipped to {} pixels", spectrum.patch.pixels()));
            }
            notifier.show_message(text);
            Ok(spectrum)
        }
        Err(e) => {
            log::error!("{} reference capture failed: {}", kind, e);
            notifier.show_message(format!("{} reference failed: {}", kind, e));
            Err(e)
        }
    }
}

/// Stop acquisition and run the scan through calibration, classification
/// and region export.
pub fn process_scan(
    shared: &SharedState,
    property: &ScanProperty,
    classifier: Option<&PixelClassifier>,
    notifier: &Notifier,
) -> HyscanResult<ScanSummary> {
    let raw = {
        let mut slot = shared.camera();
        let cam = slot.as_mut().ok_or(HyscanError::CameraAbsent)?;
        cam.stop_acquire()?
    };
    let cube = ScanCube::from_raw(raw, property.conf.camera.band_count)?;
    let name = format!("scan_{}", path::timestamp());
    let raw_path = path::join(&[&property.path.dir.scan, &format!("{}.npy", name)]);
    write_npy(&raw_path, &cube.view())?;
    log::info!(
        "Raw scan {}x{}x{} saved to {}",
        cube.height(),
        cube.width(),
        cube.bands(),
        raw_path
    );

    let reflectance = calibrate::calibrate_stored(&cube, property, &name)?;
    if reflectance.precision_warning() {
        notifier.show_message(format!(
            "Low calibration precision in {} bands",
            reflectance.low_precision_bands.len()
        ));
    }
    if let Some(mean) = calibrate::mean_spectrum(&reflectance.cube) {
        log::debug!("Mean reflectance spectrum: {:?}", mean.to_vec());
    }
    let pipeline = &property.conf.pipeline;
    let cube = reflectance.cube.crop_rows(pipeline.crop_top, pipeline.crop_bottom);

    let labels = match classifier {
        Some(c) => {
            let limit = match property.conf.classifier.pixel_limit {
                0 => None,
                n => Some(n),
            };
            Some(c.classify(&cube, limit)?)
        }
        None => {
            notifier.show_message("Pixel classifier not loaded, scan saved unclassified");
            None
        }
    };

    let mut summary = ScanSummary {
        name: name.clone(),
        classified: labels.as_ref().map_or(0, |l| l.len()),
        regions: 0,
        export_failures: 0,
    };
    if let Some(labels) = labels.as_ref() {
        if labels.len() == cube.pixel_count() {
            let regions = region::extract_regions(
                labels,
                &cube,
                &property.conf.regions.target_classes,
                property.conf.regions.min_region_size,
            )?;
            let out_dir = path::join(&[&property.path.dir.region, &name]);
            let report = region::export(&regions, &out_dir);
            summary.regions = regions.iter().map(|c| c.regions.len()).sum();
            summary.export_failures = report.failures.len();
            if report.is_complete() {
                log::info!("{} region files exported for {}", report.written.len(), name);
            }
            for (file, e) in &report.failures {
                notifier.show_message(format!("Export failed for {}: {}", file, e));
            }
        } else {
            log::info!(
                "Partial classification ({} of {} pixels), regions skipped",
                labels.len(),
                cube.pixel_count()
            );
        }
    }

    if pipeline.save_previews {
        let dir = &property.path.dir.preview;
        if let Err(e) = preview::save_previews(dir, &name, &cube, labels.as_ref()) {
            log::warn!("Preview for {} failed: {}", name, e);
        }
    }
    let breakdown = labels
        .as_ref()
        .map(|l| {
            l.counts()
                .iter()
                .map(|(class, n)| format!("{} {}", class, n))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    notifier.show_message(format!(
        "{} processed: {} pixels classified, {} regions{}",
        summary.name,
        summary.classified,
        summary.regions,
        if breakdown.is_empty() {
            String::new()
        } else {
            format!(" ({})", breakdown)
        }
    ));
    Ok(summary)
}

/// `ScanActions` backed by the real camera and pipeline.
pub struct ScanPipeline {
    shared: Arc<SharedState>,
    property: ScanProperty,
    classifier: Option<Arc<PixelClassifier>>,
    notifier: Notifier,
    start_worker: Option<JoinHandle<HyscanResult<()>>>,
    workers: Vec<JoinHandle<()>>,
}

impl ScanPipeline {
    pub fn new(
        shared: Arc<SharedState>,
        property: ScanProperty,
        classifier: Option<Arc<PixelClassifier>>,
        notifier: Notifier,
    ) -> Self {
        Self {
            shared,
            property,
            classifier,
            notifier,
            start_worker: None,
            workers: vec![],
        }
    }

    /// Block until every spawned worker has finished.
    pub fn wait(&mut self) {
        if let Some(handle) = self.start_worker.take() {
            let _ = handle.join();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Scan worker panicked");
            }
        }
    }
}

impl ScanActions for ScanPipeline {
    fn capture_white_reference(&mut self) {
        let _ = capture(&self.shared, &self.property, &self.notifier, ReferenceKind::White);
    }

    fn start_acquisition(&mut self) {
        let shared = Arc::clone(&self.shared);
        let notifier = self.notifier.clone();
        self.start_worker = Some(thread::spawn(move || {
            let res = (|| -> HyscanResult<()> {
                let mut slot = shared.camera();
                let cam = slot.as_mut().ok_or(HyscanError::CameraAbsent)?;
                cam.set_defaults()?;
                cam.open_stream()?;
                cam.start_acquire(false)?;
                Ok(())
            })();
            match &res {
                Ok(()) => log::info!("Acquisition started"),
                Err(e) => {
                    log::error!("Acquisition start failed: {}", e);
                    notifier.show_message(format!("Acquisition start failed: {}", e));
                }
            }
            res
        }));
    }

    fn extract_and_classify(&mut self) {
        self.workers.retain(|h| !h.is_finished());
        let start = self.start_worker.take();
        let shared = Arc::clone(&self.shared);
        let property = self.property.clone();
        let classifier = self.classifier.clone();
        let notifier = self.notifier.clone();
        self.workers.push(thread::spawn(move || {
            if let Some(handle) = start {
                match handle.join() {
                    Ok(Ok(())) => {}
                    // Already reported by the start worker
                    Ok(Err(_)) => return,
                    Err(_) => {
                        log::error!("Acquisition start worker panicked");
                        return;
                    }
                }
            }
            if let Err(e) = process_scan(&shared, &property, classifier.as_deref(), &notifier) {
                log::error!("Scan processing failed: {}", e);
                notifier.show_message(format!("Scan processing failed: {}", e));
            }
        }));
    }

    fn cycle_complete(&mut self) {
        log::info!("Scan cycle complete");
        self.notifier.cycle_complete();
    }

    fn telemetry(&mut self, text: &str) {
        log::debug!("{}", text);
        self.notifier.telemetry_update(text);
    }
}
