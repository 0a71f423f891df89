//! YuNet detector post-processing.
//!
//! YuNet is anchor-free and predicts straight from grid cells. For each stride
//! (8, 16, 32) the model emits four tensors:
//! - cls:  [1, H*W, 1]  class probability
//! - obj:  [1, H*W, 1]  objectness
//! - bbox: [1, H*W, 4]  (dx, dy, log w, log h) in stride units
//! - kps:  [1, H*W, 10] five landmark offsets in stride units
//!
//! Output order is cls_8, cls_16, cls_32, obj_8, ..., kps_32.

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h normalized to the canvas
    pub score: f32,
    pub landmarks: [f32; 10], // normalized to the canvas
}

/// Tensors belonging to one stride, one row per grid cell.
#[derive(Debug, Clone)]
pub struct ScaleOutput {
    pub stride: usize,
    pub cls: Array2<f32>,
    pub obj: Array2<f32>,
    pub bbox: Array2<f32>,
    pub kps: Array2<f32>,
}

impl ScaleOutput {
    pub fn cells(&self) -> usize {
        self.cls.nrows()
    }

    /// OpenCV's FaceDetectorYN score: geometric mean of cls and obj.
    pub fn score(&self, idx: usize) -> f32 {
        let cls = self.cls[[idx, 0]].clamp(0.0, 1.0);
        let obj = self.obj[[idx, 0]].clamp(0.0, 1.0);
        (cls * obj).sqrt()
    }
}

fn tensor_at(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
    what: &str,
) -> Result<Array2<f32>> {
    let (shape, data) = outputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing {} output at index {}", what, index))?;

    if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != cells || shape[2] as usize != width
    {
        anyhow::bail!(
            "unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            what,
            index,
            shape,
            cells,
            width
        );
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Group the twelve raw tensors by stride, checking every shape.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<ScaleOutput>> {
    if outputs.len() < 4 * STRIDES.len() {
        anyhow::bail!(
            "expected {} detector outputs, got {}",
            4 * STRIDES.len(),
            outputs.len()
        );
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            Ok(ScaleOutput {
                stride,
                cls: tensor_at(outputs, i, cells, 1, "cls")?,
                obj: tensor_at(outputs, i + 3, cells, 1, "obj")?,
                bbox: tensor_at(outputs, i + 6, cells, 4, "bbox")?,
                kps: tensor_at(outputs, i + 9, cells, 10, "kps")?,
            })
        })
        .collect()
}

/// Decode every grid cell scoring at least `score_threshold`.
///
/// cx = (col + dx) * stride, w = exp(dw) * stride; landmarks follow the cell
/// offset the same way as the centre.
pub fn decode(scales: &[ScaleOutput], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let norm = input_size as f32;
    let mut detections = Vec::new();

    for scale in scales {
        let side = input_size / scale.stride;
        let stride = scale.stride as f32;

        for idx in 0..scale.cells().min(side * side) {
            let score = scale.score(idx);
            if score < score_threshold {
                continue;
            }
            let row = (idx / side) as f32;
            let col = (idx % side) as f32;

            let cx = (col + scale.bbox[[idx, 0]]) * stride;
            let cy = (row + scale.bbox[[idx, 1]]) * stride;
            let w = scale.bbox[[idx, 2]].exp() * stride;
            let h = scale.bbox[[idx, 3]].exp() * stride;

            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + scale.kps[[idx, k * 2]]) * stride / norm;
                landmarks[k * 2 + 1] = (row + scale.kps[[idx, k * 2 + 1]]) * stride / norm;
            }

            detections.push(RawDetection {
                bbox: [
                    (cx - w / 2.0) / norm,
                    (cy - h / 2.0) / norm,
                    w / norm,
                    h / norm,
                ],
                score,
                landmarks,
            });
        }
    }

    detections
}
