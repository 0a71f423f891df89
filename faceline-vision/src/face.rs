use crate::yunet;
use anyhow::Result;
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet expects a fixed [1, 3, 640, 640] input.
pub const DETECTOR_INPUT_SIZE: u32 = 640;

/// A face found by the detector, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.bbox[2]
    }

    pub fn height(&self) -> f32 {
        self.bbox[3]
    }
}

/// Identity vector produced by the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn len(&self) -> usize {
        self.vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Faces narrower or shorter than this many source pixels are dropped.
    pub min_face_size: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            min_face_size: 20.0,
        }
    }
}

/// Plane order of the CHW tensor fed to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub input_size: u32,
    pub channel_order: ChannelOrder,
    /// Each pixel value becomes `(v - mean) * scale`.
    pub mean: f32,
    pub scale: f32,
    pub l2_normalize: bool,
}

impl Default for EncoderSettings {
    // SFace: 112x112 BGR in [0, 255]
    fn default() -> Self {
        Self {
            input_size: 112,
            channel_order: ChannelOrder::Bgr,
            mean: 0.0,
            scale: 1.0,
            l2_normalize: true,
        }
    }
}

/// Placement of the source image inside the square detector canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    /// Maps a canvas pixel coordinate back into the source image.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x as f32) / self.scale,
            (y - self.offset_y as f32) / self.scale,
        )
    }
}

/// Resize keeping the aspect ratio and pad to a `target` square.
pub fn letterbox(img: &DynamicImage, target: u32) -> (RgbImage, Letterbox) {
    let (width, height) = img.dimensions();
    let scale = target as f32 / width.max(height).max(1) as f32;
    let new_width = ((width as f32 * scale) as u32).clamp(1, target);
    let new_height = ((height as f32 * scale) as u32).clamp(1, target);

    let resized = img.resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(target, target);
    let offset_x = (target - new_width) / 2;
    let offset_y = (target - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    (
        canvas.to_rgb8(),
        Letterbox {
            scale,
            offset_x,
            offset_y,
        },
    )
}

/// Lay an RGB raster out as a [1, 3, H, W] tensor.
pub fn to_chw_tensor(
    img: &RgbImage,
    order: ChannelOrder,
    mean: f32,
    scale: f32,
) -> Result<Array4<f32>> {
    let (width, height) = img.dimensions();
    let pixel_count = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];

    let (first, rest) = data.split_at_mut(pixel_count);
    let (second, third) = rest.split_at_mut(pixel_count);
    let (r_plane, g_plane, b_plane) = match order {
        ChannelOrder::Rgb => (first, second, third),
        ChannelOrder::Bgr => (third, second, first),
    };

    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        r_plane[i] = (px[0] as f32 - mean) * scale;
        g_plane[i] = (px[1] as f32 - mean) * scale;
        b_plane[i] = (px[2] as f32 - mean) * scale;
    }

    Ok(Array4::from_shape_vec(
        (1, 3, height as usize, width as usize),
        data,
    )?)
}

/// Detect faces in an image using the YuNet detector
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    settings: &DetectorSettings,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT_SIZE;
    let (canvas, placement) = letterbox(img, target);
    let input_tensor = Value::from_array(to_chw_tensor(&canvas, ChannelOrder::Bgr, 0.0, 1.0)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let borrowed: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let scales = yunet::parse_outputs(&borrowed, target as usize)?;
    let raw = yunet::decode(&scales, settings.score_threshold, target as usize);
    log::debug!("detector produced {} raw candidates", raw.len());

    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| to_source_detection(&d, &placement, target as f32))
        .collect();

    let kept = if settings.nms_threshold < 1.0 {
        nms(&detections, settings.nms_threshold)
    } else {
        detections
    };

    Ok(filter_small_faces(kept, settings.min_face_size))
}

fn to_source_detection(raw: &yunet::RawDetection, placement: &Letterbox, canvas: f32) -> Detection {
    let (x, y) = placement.to_source(raw.bbox[0] * canvas, raw.bbox[1] * canvas);
    let w = raw.bbox[2] * canvas / placement.scale;
    let h = raw.bbox[3] * canvas / placement.scale;

    let mut landmarks = [0.0f32; 10];
    for k in 0..5 {
        let (lx, ly) =
            placement.to_source(raw.landmarks[k * 2] * canvas, raw.landmarks[k * 2 + 1] * canvas);
        landmarks[k * 2] = lx;
        landmarks[k * 2 + 1] = ly;
    }

    Detection {
        bbox: [x, y, w, h],
        score: raw.score,
        landmarks,
    }
}

/// Drop faces whose box is smaller than `min_size` in either dimension.
pub fn filter_small_faces(detections: Vec<Detection>, min_size: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.width() >= min_size && d.height() >= min_size)
        .collect()
}

/// Highest-scoring detection; the earliest wins on equal scores.
pub fn primary_detection(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().fold(None, |best: Option<&Detection>, d| match best {
        Some(b) if b.score >= d.score => Some(b),
        _ => Some(d),
    })
}

/// Apply non-maximum suppression to remove overlapping detections
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

// ArcFace reference eye positions on a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// Rotation + uniform scale + translation mapping source pixels onto the crop.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Result<Self> {
        let dx = right.0 - left.0;
        let dy = right.1 - left.1;
        let eye_dist = (dx * dx + dy * dy).sqrt();
        if eye_dist <= f32::EPSILON {
            anyhow::bail!("degenerate landmarks: eyes coincide");
        }

        let unit = size as f32 / 112.0;
        let ref_dx = REF_RIGHT_EYE.0 - REF_LEFT_EYE.0;
        let ref_dy = REF_RIGHT_EYE.1 - REF_LEFT_EYE.1;
        let scale = unit * (ref_dx * ref_dx + ref_dy * ref_dy).sqrt() / eye_dist;

        let angle = dy.atan2(dx);
        let (sin, cos) = angle.sin_cos();
        let (a, b, c, d) = (scale * cos, scale * sin, -scale * sin, scale * cos);

        let centre = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let target = (
            (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
            (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
        );

        Ok(Self {
            a,
            b,
            c,
            d,
            tx: target.0 - (a * centre.0 + b * centre.1),
            ty: target.1 - (c * centre.0 + d * centre.1),
        })
    }

    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let det = self.a * self.d - self.b * self.c;
        let (px, py) = (x - self.tx, y - self.ty);
        (
            (self.d * px - self.b * py) / det,
            (-self.c * px + self.a * py) / det,
        )
    }
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<image::Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (ch, v) in out.iter_mut().enumerate() {
        let top = p00[ch] as f32 * (1.0 - fx) + p10[ch] as f32 * fx;
        let bottom = p01[ch] as f32 * (1.0 - fx) + p11[ch] as f32 * fx;
        *v = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(image::Rgb(out))
}

/// Align and crop face using the eye landmarks
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let left_eye = (detection.landmarks[0], detection.landmarks[1]);
    let right_eye = (detection.landmarks[2], detection.landmarks[3]);
    let transform = Similarity::from_eyes(left_eye, right_eye, size)?;

    let source = img.to_rgb8();
    let mut output = RgbImage::new(size, size);
    for (out_x, out_y, px) in output.enumerate_pixels_mut() {
        let (in_x, in_y) = transform.invert(out_x as f32, out_y as f32);
        if let Some(sampled) = sample_bilinear(&source, in_x, in_y) {
            *px = sampled;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face crop into an embedding
pub fn encode_face(
    session: &mut Session,
    face_img: &DynamicImage,
    settings: &EncoderSettings,
) -> Result<Embedding> {
    let size = settings.input_size;
    let face = face_img
        .resize_exact(size, size, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let input = to_chw_tensor(&face, settings.channel_order, settings.mean, settings.scale)?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        anyhow::bail!("encoder returned unexpected shape {:?}", shape.iter().collect::<Vec<_>>());
    }

    let mut values = data[..dim].to_vec();
    if settings.l2_normalize {
        l2_normalize(&mut values);
    }
    Ok(Embedding::from_vec(values))
}

pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Standard L2 distance. The sum runs strictly left to right so results are
/// reproducible for fixed inputs. Callers must pass equal-length slices.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let d = x - y;
        sum += d * d;
    }
    sum.sqrt()
}
