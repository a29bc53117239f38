use anyhow::{Context, Result};
use isolation_watch::config::DetectorConfig;
use isolation_watch::core_modules::detection::RawDetection;
use isolation_watch::session::Detector;
use ndarray::{Array4, ArrayViewD};
use opencv::{
    core::{Mat, Size, Vec3f, CV_32FC3},
    imgproc,
    prelude::*,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::camera::CameraFrame;

/// Rows 0..4 of the YOLOv8 output are the box, the rest are class scores.
const BOX_ROWS: usize = 4;

/// A detection in frame pixels, before suppression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: u32,
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    fn to_raw(self) -> RawDetection {
        RawDetection {
            class_id: self.class_id,
            x1: self.x1.round() as i32,
            y1: self.y1.round() as i32,
            x2: self.x2.round() as i32,
            y2: self.y2.round() as i32,
        }
    }
}

/// YOLOv8 ONNX detector reporting every class, like the upstream model does.
pub struct YoloDetector {
    session: Session,
    input_size: i32,
    score_threshold: f32,
    nms_iou: f32,
}

impl YoloDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&config.model_path)
            .with_context(|| format!("Failed to load detection model {}", config.model_path))?;
        Ok(Self {
            session,
            input_size: config.input_size,
            score_threshold: config.score_threshold,
            nms_iou: config.nms_iou,
        })
    }

    /// BGR Mat -> NCHW [1, 3, input_size, input_size] tensor in [0, 1].
    fn preprocess(&self, frame: &Mat) -> Result<Array4<f32>> {
        let size = self.input_size;

        let mut rgb = Mat::default();
        imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let mut resized = Mat::default();
        imgproc::resize(&rgb, &mut resized, Size::new(size, size), 0.0, 0.0, imgproc::INTER_LINEAR)?;

        let mut float_mat = Mat::default();
        resized.convert_to(&mut float_mat, CV_32FC3, 1.0 / 255.0, 0.0)?;

        let s = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
        for (i, px) in float_mat.data_typed::<Vec3f>()?.iter().enumerate() {
            let (y, x) = (i / s, i % s);
            for c in 0..3 {
                tensor[[0, c, y, x]] = px[c];
            }
        }
        Ok(tensor)
    }
}

impl Detector<CameraFrame> for YoloDetector {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Vec<RawDetection>> {
        let frame_w = frame.0.cols();
        let frame_h = frame.0.rows();
        let input = self.preprocess(&frame.0)?;

        let input_tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs!["images" => input_tensor])
            .context("Detection inference failed")?;

        // Output: [1, 4 + classes, N]
        let output: ArrayViewD<f32> = outputs["output0"]
            .try_extract_array()
            .context("Failed to extract detection output")?;

        let scale_x = frame_w as f32 / self.input_size as f32;
        let scale_y = frame_h as f32 / self.input_size as f32;
        let candidates = decode_candidates(&output, scale_x, scale_y, self.score_threshold)?;
        Ok(non_max_suppression(candidates, self.nms_iou)
            .into_iter()
            .map(Candidate::to_raw)
            .collect())
    }
}

/// Picks the best class per anchor and keeps anchors scoring at least `threshold`.
pub fn decode_candidates(output: &ArrayViewD<f32>, scale_x: f32, scale_y: f32, threshold: f32) -> Result<Vec<Candidate>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] <= BOX_ROWS {
        anyhow::bail!("unexpected detection output shape {:?}", shape);
    }
    let (rows, anchors) = (shape[1], shape[2]);

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let mut best = (0u32, f32::MIN);
        for row in BOX_ROWS..rows {
            let score = output[[0, row, i]];
            if score > best.1 {
                best = ((row - BOX_ROWS) as u32, score);
            }
        }
        if best.1 < threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];
        candidates.push(Candidate {
            class_id: best.0,
            score: best.1,
            x1: (cx - w / 2.0) * scale_x,
            y1: (cy - h / 2.0) * scale_y,
            x2: (cx + w / 2.0) * scale_x,
            y2: (cy + h / 2.0) * scale_y,
        });
    }
    Ok(candidates)
}

/// Greedy per-class suppression, highest score first.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}
