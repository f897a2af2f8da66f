use anyhow::Result;
use opencv::{
    core::{Mat, Rect, Size, CV_32F},
    imgproc,
    prelude::*,
};
use tch::{Device, Kind, Tensor};

use crate::utils;

/// Category an attached detector reports objects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCategory {
    Face,
    InstanceSegmentation,
}

/// Overlay produced by segmentation-capable detectors: a colored ROI and
/// its mask, blitted into the frame at `bbox` by the render step.
#[derive(Debug, Clone)]
pub struct DrawingElement {
    pub colored_roi: Mat,
    pub mask: Mat,
    pub bbox: Rect,
}

/// A single detection result. Metadata fields are filled by the detector
/// that produced it and are never synthesized downstream.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub bbox: Rect,
    pub confidence: Option<f32>,
    pub class_name: Option<String>,
    pub age: Option<String>,
    pub gender: Option<String>,
    pub ethnicity: Option<String>,
    pub drawing: Option<DrawingElement>,
}

impl Detection {
    pub fn new(bbox: Rect, confidence: f32, class_name: &str) -> Self {
        Detection {
            bbox,
            confidence: Some(confidence),
            class_name: Some(class_name.to_string()),
            ..Default::default()
        }
    }
}

/// Capability contract for detection collaborators.
///
/// Implementations must not mutate the frame, must tolerate being called
/// once per frame for the whole session, and report "nothing found" as an
/// empty list rather than an error.
pub trait Detector {
    fn category(&self) -> ObjectCategory;

    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>>;
}

/// TorchScript-backed face detector.
pub struct FaceDetector {
    model: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    pub conf_threshold: f32,
    pub nms_threshold: f32,
}

impl FaceDetector {
    /// Create a new detector from a model file and device ("cpu"/"cuda").
    pub fn new(
        model_path: &str,
        device: &str,
        input_size: (i64, i64),
        conf_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        let device = if device == "cuda" && tch::Cuda::is_available() {
            Device::Cuda(0)
        } else {
            Device::Cpu
        };

        let model = tch::CModule::load(model_path)?;

        Ok(FaceDetector {
            model,
            device,
            input_size,
            conf_threshold,
            nms_threshold,
        })
    }

    /// Preprocess frame into a normalized [1, C, H, W] tensor.
    fn preprocess(&self, frame: &Mat) -> Result<Tensor> {
        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(self.input_size.0 as i32, self.input_size.1 as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let mut float_mat = Mat::default();
        rgb.convert_to(&mut float_mat, CV_32F, 1.0 / 255.0, 0.0)?;

        let rows = float_mat.rows();
        let cols = float_mat.cols();
        let channels = float_mat.channels();
        let total_elements = (rows * cols * channels) as usize;
        let data =
            unsafe { std::slice::from_raw_parts(float_mat.data() as *const f32, total_elements) };

        // HWC -> NCHW
        let tensor = Tensor::from_slice(data)
            .reshape([rows as i64, cols as i64, channels as i64])
            .permute([2, 0, 1])
            .unsqueeze(0)
            .to_device(self.device)
            .to_kind(Kind::Float);

        Ok(tensor)
    }

    /// Postprocess raw model output into detections in frame coordinates.
    ///
    /// Accepts the two layouts the exported models produce: `[1, N, 6]`
    /// rows of (x, y, w, h, conf, class) already in input-space pixels, or
    /// `[1, N, 5+]` rows where objectness and class scores are raw logits.
    fn postprocess(&self, output: &Tensor, orig_size: (i32, i32)) -> Result<Vec<Detection>> {
        let shape = output.size();
        if shape.len() != 3 {
            anyhow::bail!("unexpected detector output shape {:?}", shape);
        }
        let rows = shape[1];
        let cols = shape[2] as usize;
        if cols < 6 {
            anyhow::bail!("unexpected detector output shape {:?}", shape);
        }

        let cpu = output.to_device(Device::Cpu).to_kind(Kind::Float);
        let flat: Vec<f32> = Vec::<f32>::try_from(cpu.flatten(0, -1))?;

        let scale_w = orig_size.0 as f32 / self.input_size.0 as f32;
        let scale_h = orig_size.1 as f32 / self.input_size.1 as f32;

        let mut boxes: Vec<[f32; 4]> = Vec::new();
        let mut scores: Vec<f32> = Vec::new();
        for i in 0..rows as usize {
            let row = &flat[i * cols..(i + 1) * cols];
            let (tlwh, conf) = if cols == 6 {
                ([row[0], row[1], row[2], row[3]], row[4])
            } else {
                // raw head output: (cx, cy, w, h) plus objectness logit
                let conf = 1.0 / (1.0 + (-row[4]).exp());
                let x = row[0] - row[2] / 2.0;
                let y = row[1] - row[3] / 2.0;
                ([x, y, row[2], row[3]], conf)
            };
            if conf < self.conf_threshold {
                continue;
            }
            if tlwh[2] <= 0.0 || tlwh[3] <= 0.0 {
                continue;
            }
            boxes.push(tlwh);
            scores.push(conf);
        }

        let keep = utils::nms(&boxes, &scores, self.nms_threshold);

        let mut detections = Vec::with_capacity(keep.len());
        for idx in keep {
            let scaled = [
                boxes[idx][0] * scale_w,
                boxes[idx][1] * scale_h,
                boxes[idx][2] * scale_w,
                boxes[idx][3] * scale_h,
            ];
            let rect = utils::box_to_rect(&scaled, orig_size.0, orig_size.1);
            detections.push(Detection::new(rect, scores[idx], "face"));
        }

        Ok(detections)
    }
}

impl Detector for FaceDetector {
    fn category(&self) -> ObjectCategory {
        ObjectCategory::Face
    }

    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>> {
        let orig_size = (frame.cols(), frame.rows());
        let input = self.preprocess(frame)?;
        let output = self.model.forward_ts(&[input])?;
        self.postprocess(&output, orig_size)
    }
}
