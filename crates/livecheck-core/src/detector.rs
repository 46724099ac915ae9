//! Face detection collaborator.
//!
//! The pipeline only depends on the [`FaceDetector`] trait. [`ScrfdDetector`]
//! implements it with an SCRFD model via ONNX Runtime: letterboxed RGB input,
//! anchor-free decoding over strides 8/16/32 and NMS post-processing.

use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, RgbaImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use thiserror::Error;

use crate::types::FaceBox;

// --- Named constants (no magic numbers) ---
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("detector used before prepare()")]
    NotLoaded,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Per-call detection parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectOptions {
    /// Side of the square network input, a multiple of 32.
    pub input_size: u32,
    /// Minimum confidence for a detection to be reported.
    pub score_threshold: f32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            input_size: 224,
            score_threshold: 0.5,
        }
    }
}

/// Policy for picking one face when the detector reports several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaceSelection {
    /// Detector order (highest confidence first for SCRFD).
    First,
    /// Largest box area; ties keep the earlier box.
    #[default]
    Largest,
    /// Box centre closest to the frame centre.
    MostCentered,
}

pub fn select_face(
    faces: &[FaceBox],
    policy: FaceSelection,
    frame_width: u32,
    frame_height: u32,
) -> Option<FaceBox> {
    match policy {
        FaceSelection::First => faces.first().copied(),
        FaceSelection::Largest => faces.iter().copied().reduce(|best, f| {
            if f.area() > best.area() {
                f
            } else {
                best
            }
        }),
        FaceSelection::MostCentered => {
            let cx = frame_width as f32 / 2.0;
            let cy = frame_height as f32 / 2.0;
            let dist = |f: &FaceBox| {
                let c = f.center();
                (c.x - cx).powi(2) + (c.y - cy).powi(2)
            };
            faces
                .iter()
                .copied()
                .reduce(|best, f| if dist(&f) < dist(&best) { f } else { best })
        }
    }
}

/// External face-bounding-box detector.
pub trait FaceDetector {
    /// Load whatever the detector needs (model weights). Called on every
    /// session start; must be cheap when already prepared.
    fn prepare(&mut self) -> Result<(), DetectorError>;

    /// Detect faces in `frame`, in frame pixel coordinates.
    ///
    /// The verifier catches a panic from this call and skips the tick, so a
    /// detector left in a broken state keeps failing ticks instead of
    /// stopping the session.
    fn detect(
        &mut self,
        frame: &RgbaImage,
        options: &DetectOptions,
    ) -> Result<Vec<FaceBox>, DetectorError>;
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// (score, bbox) output indices for each stride.
type OutputLayout = [(usize, usize); 3];

struct LoadedModel {
    session: Session,
    layout: OutputLayout,
}

/// SCRFD face detector, loaded lazily on [`FaceDetector::prepare`].
pub struct ScrfdDetector {
    model_path: PathBuf,
    model: Option<LoadedModel>,
}

impl ScrfdDetector {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            model: None,
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn load(path: &Path) -> Result<LoadedModel, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                names.len()
            )));
        }

        let layout = output_layout(&names);
        tracing::info!(path = %path.display(), outputs = ?names, ?layout, "loaded SCRFD model");

        Ok(LoadedModel { session, layout })
    }
}

impl FaceDetector for ScrfdDetector {
    fn prepare(&mut self) -> Result<(), DetectorError> {
        if self.model.is_none() {
            self.model = Some(Self::load(&self.model_path)?);
        }
        Ok(())
    }

    fn detect(
        &mut self,
        frame: &RgbaImage,
        options: &DetectOptions,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        let model = self.model.as_mut().ok_or(DetectorError::NotLoaded)?;
        let size = options.input_size as usize;
        let Some((input, letterbox)) = preprocess(frame, size) else {
            return Ok(Vec::new());
        };

        let layout = model.layout;
        let outputs = model
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (&stride, &(score_idx, bbox_idx)) in SCRFD_STRIDES.iter().zip(layout.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                size,
                &letterbox,
                options.score_threshold,
            ));
        }

        Ok(nms(detections, SCRFD_NMS_THRESHOLD))
    }
}

/// Map `score_<stride>` / `bbox_<stride>` outputs by name, falling back to
/// the export order `[scores 8/16/32, bboxes 8/16/32, ...]`.
fn output_layout(names: &[String]) -> OutputLayout {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<(usize, usize)>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Letterbox an RGBA frame into a normalized 1×3×size×size RGB tensor.
/// `None` for frames with no pixels.
fn preprocess(frame: &RgbaImage, size: usize) -> Option<(Array4<f32>, Letterbox)> {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 || size == 0 {
        return None;
    }

    let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, size as u32);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, size as u32);
    let pad_x = (size as u32 - new_w) / 2;
    let pad_y = (size as u32 - new_h) / 2;

    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    // Padding stays 0.0, i.e. the normalized mean.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = Letterbox {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    Some((tensor, letterbox))
}

fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_size: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<FaceBox> {
    let grid = input_size / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score < threshold {
                return None;
            }
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;

            let (x1, y1) = letterbox.unmap(ax - d[0] * s, ay - d[1] * s);
            let (x2, y2) = letterbox.unmap(ax + d[2] * s, ay + d[3] * s);

            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output sorted by descending score.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<FaceBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| k.iou(&det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}
