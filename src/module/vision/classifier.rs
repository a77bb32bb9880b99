//! Per-pixel material classification.
//!
pub mod onnx {
    //! ONNX runtime backed spectral model.

    use ndarray::{Array2, ArrayView2, CowArray, Ix2};
    use ort::{
        environment::Environment, value::Value, ExecutionProvider, GraphOptimizationLevel,
        LoggingLevel, Session, SessionBuilder,
    };

    use super::SpectralModel;
    use crate::module::error::{HyscanError, HyscanResult};

    /// Pixel model session.
    pub struct OnnxModel {
        session: Session,
    }

    impl OnnxModel {
        pub fn load(model_path: &str, intra_threads: i16) -> HyscanResult<Self> {
            let environment = Environment::builder()
                .with_name("pixel_model")
                .with_log_level(LoggingLevel::Warning)
                .with_execution_providers([ExecutionProvider::CPU(Default::default())])
                .build()?
                .into_arc();
            let session = SessionBuilder::new(&environment)?
                .with_optimization_level(GraphOptimizationLevel::Level1)?
                .with_intra_threads(intra_threads)?
                .with_model_from_file(model_path)?;
            Ok(Self { session })
        }
    }

    impl SpectralModel for OnnxModel {
        fn predict_proba(&self, features: ArrayView2<f32>) -> HyscanResult<Array2<f32>> {
            let array = CowArray::from(features.to_owned().into_dyn());
            let tensor = vec![Value::from_array(self.session.allocator(), &array)?];
            let outs = self.session.run(tensor)?;
            let out = outs
                .first()
                .ok_or_else(|| HyscanError::Model("model produced no output".to_string()))?
                .try_extract::<f32>()?;
            let proba = out.view().to_owned().into_dimensionality::<Ix2>()?;
            Ok(proba)
        }
    }
}

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use ndarray_npy::read_npy;

use super::ScanCube;
use crate::module::error::{HyscanError, HyscanResult};
use crate::module::util::init::ScanProperty;

/// Anything that maps scaled spectra to class probabilities.
///
/// Input is pixels x bands, output is pixels x classes.
pub trait SpectralModel: Send + Sync {
    fn predict_proba(&self, features: ArrayView2<f32>) -> HyscanResult<Array2<f32>>;
}

/// Standard-score feature scaler.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaler {
    mean: Array1<f32>,
    scale: Array1<f32>,
}

impl Scaler {
    pub fn new(mean: Array1<f32>, scale: Array1<f32>) -> HyscanResult<Self> {
        if mean.len() != scale.len() {
            return Err(HyscanError::DimensionMismatch {
                what: "scaler scale".to_string(),
                expected: mean.len(),
                found: scale.len(),
            });
        }
        // Zero scale means a constant feature; leave it centered only
        let scale = scale.mapv(|v| if v == 0.0 { 1.0 } else { v });
        Ok(Self { mean, scale })
    }

    /// Scaler that only centers.
    pub fn centered(mean: Array1<f32>) -> Self {
        let scale = Array1::ones(mean.len());
        Self { mean, scale }
    }

    /// Load the mean, and the scale if one was stored.
    pub fn load(mean_path: &str, scale_path: &str) -> HyscanResult<Self> {
        let mean = read_vector(mean_path)?;
        if Path::new(scale_path).is_file() {
            Self::new(mean, read_vector(scale_path)?)
        } else {
            log::info!("No scaler scale at {}, using unit scale", scale_path);
            Ok(Self::centered(mean))
        }
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn transform(&self, pixels: ArrayView2<f32>) -> Array2<f32> {
        (&pixels - &self.mean) / &self.scale
    }
}

/// Float vectors may have been stored in either precision.
fn read_vector(path: &str) -> HyscanResult<Array1<f32>> {
    match read_npy::<_, Array1<f32>>(path) {
        Ok(v) => Ok(v),
        Err(_) => {
            let wide: Array1<f64> = read_npy(path)?;
            Ok(wide.mapv(|v| v as f32))
        }
    }
}

/// Ordered class names known to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Self {
        Self { classes }
    }

    /// Load a JSON list of class names.
    pub fn load(path: &str) -> HyscanResult<Self> {
        let file = File::open(path)?;
        let classes: Vec<String> = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self::new(classes))
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Classification result in row-major pixel order.
///
/// Code 0 is unlabeled, code k names `classes[k - 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    pub classes: Vec<String>,
    pub codes: Vec<u16>,
}

impl Labels {
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Class name of pixel `i`, `None` when unlabeled.
    pub fn label(&self, i: usize) -> Option<&str> {
        match self.codes.get(i) {
            Some(&code) if code > 0 => self.classes.get(code as usize - 1).map(|s| s.as_str()),
            _ => None,
        }
    }

    pub fn code_of(&self, class: &str) -> Option<u16> {
        self.classes
            .iter()
            .position(|c| c == class)
            .map(|i| i as u16 + 1)
    }

    /// Pixel count per class, in class order, including absent classes.
    pub fn counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> =
            self.classes.iter().map(|c| (c.clone(), 0)).collect();
        for name in (0..self.len()).filter_map(|i| self.label(i)) {
            if let Some((_, n)) = counts.iter_mut().find(|(c, _)| c == name) {
                *n += 1;
            }
        }
        counts
    }

    /// Classes with at least one pixel, in class order.
    pub fn present(&self) -> Vec<String> {
        self.counts()
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(c, _)| c)
            .collect()
    }
}

/// Scaler, encoder and model bundle.
pub struct PixelClassifier {
    scaler: Scaler,
    encoder: LabelEncoder,
    model: Box<dyn SpectralModel>,
    batch_size: usize,
    confidence_threshold: f32,
}

impl PixelClassifier {
    pub fn new(scaler: Scaler, encoder: LabelEncoder, model: Box<dyn SpectralModel>) -> Self {
        Self {
            scaler,
            encoder,
            model,
            batch_size: 65536,
            confidence_threshold: 0.0,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Load the three artifacts named in the configuration.
    pub fn load(property: &ScanProperty) -> HyscanResult<Self> {
        let conf = &property.conf.classifier;
        let model_path = property.path.resolve(&conf.model);
        let mean_path = property.path.resolve(&conf.scaler_mean);
        let labels_path = property.path.resolve(&conf.labels);
        for p in [&model_path, &mean_path, &labels_path] {
            if !Path::new(p).is_file() {
                log::warn!("Classifier artifact missing: {}", p);
                return Err(HyscanError::ClassifierUnavailable);
            }
        }
        let scaler = Scaler::load(&mean_path, &property.path.resolve(&conf.scaler_scale))?;
        let encoder = LabelEncoder::load(&labels_path)?;
        let model = onnx::OnnxModel::load(&model_path, conf.intra_threads)?;
        log::info!(
            "Pixel classifier loaded: {} bands, classes {:?}",
            scaler.len(),
            encoder.classes()
        );
        Ok(Self::new(scaler, encoder, Box::new(model))
            .with_batch_size(conf.batch_size)
            .with_confidence_threshold(conf.confidence_threshold))
    }

    /// Classify every pixel, or only the leading `limit` pixels.
    pub fn classify(&self, cube: &ScanCube, limit: Option<usize>) -> HyscanResult<Labels> {
        if self.scaler.len() != cube.bands() {
            return Err(HyscanError::DimensionMismatch {
                what: "classifier bands".to_string(),
                expected: self.scaler.len(),
                found: cube.bands(),
            });
        }
        let total = cube.pixel_count();
        let n = limit.map_or(total, |l| l.min(total));
        let view = cube.view();
        let pixels = view.into_shape((total, cube.bands()))?;

        let mut codes = Vec::with_capacity(n);
        let mut start = 0;
        while start < n {
            let end = (start + self.batch_size).min(n);
            let features = self.scaler.transform(pixels.slice(s![start..end, ..]));
            let proba = self.model.predict_proba(features.view())?;
            if proba.dim() != (end - start, self.encoder.len()) {
                return Err(HyscanError::DimensionMismatch {
                    what: "model output classes".to_string(),
                    expected: self.encoder.len(),
                    found: proba.ncols(),
                });
            }
            codes.extend(proba.axis_iter(Axis(0)).map(|p| self.decide(p.iter().copied())));
            start = end;
        }
        log::debug!("Classified {} of {} pixels", n, total);
        Ok(Labels {
            classes: self.encoder.classes().to_vec(),
            codes,
        })
    }

    fn decide(&self, proba: impl Iterator<Item = f32>) -> u16 {
        let best = proba
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            });
        match best {
            Some((i, p)) if p >= self.confidence_threshold => i as u16 + 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array3};

    /// Class "b" when the first scaled feature is positive.
    struct SignModel;

    impl SpectralModel for SignModel {
        fn predict_proba(&self, features: ArrayView2<f32>) -> HyscanResult<Array2<f32>> {
            Ok(Array2::from_shape_fn((features.nrows(), 2), |(i, k)| {
                let p = if features[[i, 0]] > 0.0 { 0.9 } else { 0.2 };
                if k == 1 {
                    p
                } else {
                    1.0 - p
                }
            }))
        }
    }

    fn classifier() -> PixelClassifier {
        PixelClassifier::new(
            Scaler::centered(arr1(&[1.0, 0.0])),
            LabelEncoder::new(vec!["a".to_string(), "b".to_string()]),
            Box::new(SignModel),
        )
    }

    fn cube() -> ScanCube {
        // Feature 0 equals the column index
        ScanCube::from_array(Array3::from_shape_fn((2, 3, 2), |(_, c, b)| {
            if b == 0 {
                c as f32
            } else {
                5.0
            }
        }))
    }

    #[test]
    fn classify_every_pixel() {
        let labels = classifier().classify(&cube(), None).unwrap();
        assert_eq!(labels.codes, vec![1, 1, 2, 1, 1, 2]);
        assert_eq!(labels.label(2), Some("b"));
        assert_eq!(labels.label(0), Some("a"));
        assert_eq!(labels.counts(), vec![("a".to_string(), 4), ("b".to_string(), 2)]);
    }

    #[test]
    fn batches_do_not_change_result() {
        let whole = classifier().classify(&cube(), None).unwrap();
        let batched = classifier()
            .with_batch_size(4)
            .classify(&cube(), None)
            .unwrap();
        assert_eq!(whole, batched);
    }

    #[test]
    fn leading_pixel_limit() {
        let labels = classifier().classify(&cube(), Some(4)).unwrap();
        assert_eq!(labels.codes, vec![1, 1, 2, 1]);
        let capped = classifier().classify(&cube(), Some(100)).unwrap();
        assert_eq!(capped.len(), 6);
    }

    #[test]
    fn low_confidence_is_unlabeled() {
        let labels = classifier()
            .with_confidence_threshold(0.85)
            .classify(&cube(), None)
            .unwrap();
        assert_eq!(labels.codes, vec![0, 0, 2, 0, 0, 2]);
        assert_eq!(labels.label(0), None);
        assert_eq!(labels.present(), vec!["b".to_string()]);
    }

    #[test]
    fn band_count_must_match_scaler() {
        let wide = ScanCube::from_array(Array3::zeros((1, 1, 3)));
        assert!(matches!(
            classifier().classify(&wide, None),
            Err(HyscanError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn scaler_standardizes() {
        let scaler = Scaler::new(arr1(&[1.0, 2.0]), arr1(&[2.0, 0.0])).unwrap();
        let out = scaler.transform(ndarray::arr2(&[[3.0, 5.0]]).view());
        assert_eq!(out, ndarray::arr2(&[[1.0, 3.0]]));
        assert!(Scaler::new(arr1(&[1.0]), arr1(&[1.0, 1.0])).is_err());
    }

    #[test]
    fn load_reads_mean_in_either_precision() {
        let tmp = tempfile::tempdir().unwrap();
        let mean = tmp.path().join("mean.npy");
        ndarray_npy::write_npy(&mean, &arr1(&[0.5f64, 1.5])).unwrap();
        let scaler = Scaler::load(mean.to_str().unwrap(), "missing_scale.npy").unwrap();
        assert_eq!(scaler, Scaler::centered(arr1(&[0.5, 1.5])));
    }

    #[test]
    fn encoder_from_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("labels.json");
        std::fs::write(&path, r#"["grass", "soil", "stone"]"#).unwrap();
        let encoder = LabelEncoder::load(path.to_str().unwrap()).unwrap();
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.classes()[2], "stone");
    }

    #[test]
    fn missing_artifacts_leave_classifier_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let property = crate::module::util::init::testing::property(tmp.path());
        assert!(matches!(
            PixelClassifier::load(&property),
            Err(HyscanError::ClassifierUnavailable)
        ));
    }
}
