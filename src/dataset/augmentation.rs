//! Data Augmentation for ginger disease images
//!
//! An [`AugmentationPipeline`] is an ordered list of stochastic stages followed
//! by a fixed tail (resize, then normalize to a CHW `f32` buffer). Each stage has
//! its own probability gate and draws its parameters uniformly from the
//! configured ranges. A stage with several transforms applies one of them,
//! picked uniformly.
//!
//! # Augmentation Strategy
//!
//! - **Training**: random stages plus the tail
//! - **Validation/Test**: tail only ([`AugmentationPipeline::evaluation`])
//!
//! The pipeline holds no random state of its own. The caller passes the
//! generator, so results are reproducible from a seed.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{ImageShape, DEFAULT_IMAGE_SIZE};
use crate::utils::error::{DatasetError, Result};

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Inclusive `(min, max)` parameter range
pub type ParamRange = (f32, f32);

/// Synthetic weather effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherEffect {
    /// Darkened vertical band
    Shadow,
    /// Blend towards a light haze
    Fog,
}

/// A single parametrized transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformKind {
    /// Rotation about the image center, in degrees
    Rotate { degrees: ParamRange },
    /// Translation (fraction of the image size), scale and rotation in one warp
    ShiftScaleRotate {
        shift: ParamRange,
        scale: ParamRange,
        degrees: ParamRange,
    },
    HorizontalFlip,
    VerticalFlip,
    /// Additive brightness and contrast factor offset, both as fractions
    BrightnessContrast {
        brightness: ParamRange,
        contrast: ParamRange,
    },
    /// Hue shift in degrees, saturation and value shifts as fractions
    HueSaturationValue {
        hue: ParamRange,
        saturation: ParamRange,
        value: ParamRange,
    },
    /// Per-channel gaussian noise, std as a fraction of full scale
    GaussianNoise { std: ParamRange },
    /// Gaussian blur with the given sigma in pixels
    GaussianBlur { sigma: ParamRange },
    /// Horizontal box blur over `length` pixels
    MotionBlur { length: (u32, u32) },
    Weather {
        effect: WeatherEffect,
        intensity: ParamRange,
    },
}

impl TransformKind {
    fn validate(&self) -> Result<()> {
        match self {
            TransformKind::Rotate { degrees } => check_range("rotate.degrees", *degrees, None),
            TransformKind::ShiftScaleRotate {
                shift,
                scale,
                degrees,
            } => {
                check_range("shift_scale_rotate.shift", *shift, Some((-1.0, 1.0)))?;
                check_range("shift_scale_rotate.scale", *scale, Some((f32::EPSILON, 10.0)))?;
                check_range("shift_scale_rotate.degrees", *degrees, None)
            }
            TransformKind::HorizontalFlip | TransformKind::VerticalFlip => Ok(()),
            TransformKind::BrightnessContrast {
                brightness,
                contrast,
            } => {
                check_range("brightness_contrast.brightness", *brightness, Some((-1.0, 1.0)))?;
                check_range("brightness_contrast.contrast", *contrast, Some((-1.0, 1.0)))
            }
            TransformKind::HueSaturationValue {
                hue,
                saturation,
                value,
            } => {
                check_range("hue_saturation_value.hue", *hue, Some((-180.0, 180.0)))?;
                check_range("hue_saturation_value.saturation", *saturation, Some((-1.0, 1.0)))?;
                check_range("hue_saturation_value.value", *value, Some((-1.0, 1.0)))
            }
            TransformKind::GaussianNoise { std } => {
                check_range("gaussian_noise.std", *std, Some((0.0, 1.0)))
            }
            TransformKind::GaussianBlur { sigma } => {
                check_range("gaussian_blur.sigma", *sigma, Some((0.0, 50.0)))
            }
            TransformKind::MotionBlur { length } => {
                if length.0 > length.1 || length.0 == 0 {
                    return Err(DatasetError::Config(format!(
                        "motion_blur.length {:?} must be ordered and positive",
                        length
                    )));
                }
                Ok(())
            }
            TransformKind::Weather { intensity, .. } => {
                check_range("weather.intensity", *intensity, Some((0.0, 1.0)))
            }
        }
    }

    fn apply<R: Rng + ?Sized>(&self, img: RgbImage, rng: &mut R) -> RgbImage {
        match self {
            TransformKind::Rotate { degrees } => {
                let angle = sample(*degrees, rng);
                warp_affine(&img, angle, 1.0, 0.0, 0.0)
            }
            TransformKind::ShiftScaleRotate {
                shift,
                scale,
                degrees,
            } => {
                let (w, h) = img.dimensions();
                let tx = sample(*shift, rng) * w as f32;
                let ty = sample(*shift, rng) * h as f32;
                let s = sample(*scale, rng);
                let angle = sample(*degrees, rng);
                warp_affine(&img, angle, s, tx, ty)
            }
            TransformKind::HorizontalFlip => imageops::flip_horizontal(&img),
            TransformKind::VerticalFlip => imageops::flip_vertical(&img),
            TransformKind::BrightnessContrast {
                brightness,
                contrast,
            } => {
                let delta = sample(*brightness, rng);
                let factor = 1.0 + sample(*contrast, rng);
                adjust_brightness(&adjust_contrast(&img, factor), delta)
            }
            TransformKind::HueSaturationValue {
                hue,
                saturation,
                value,
            } => {
                let dh = sample(*hue, rng);
                let ds = sample(*saturation, rng);
                let dv = sample(*value, rng);
                shift_hsv(&img, dh, ds, dv)
            }
            TransformKind::GaussianNoise { std } => {
                let std = sample(*std, rng);
                add_noise(&img, std, rng)
            }
            TransformKind::GaussianBlur { sigma } => {
                let sigma = sample(*sigma, rng);
                if sigma > 0.0 {
                    imageops::blur(&img, sigma)
                } else {
                    img
                }
            }
            TransformKind::MotionBlur { length } => {
                let len = rng.gen_range(length.0..=length.1);
                motion_blur(&img, len)
            }
            TransformKind::Weather { effect, intensity } => {
                let strength = sample(*intensity, rng);
                match effect {
                    WeatherEffect::Shadow => add_shadow(&img, strength, rng),
                    WeatherEffect::Fog => add_fog(&img, strength),
                }
            }
        }
    }
}

fn check_range(name: &str, range: ParamRange, bounds: Option<(f32, f32)>) -> Result<()> {
    let (lo, hi) = range;
    if !lo.is_finite() || !hi.is_finite() || lo > hi {
        return Err(DatasetError::Config(format!(
            "{} range ({}, {}) must be finite and ordered",
            name, lo, hi
        )));
    }
    if let Some((min, max)) = bounds {
        if lo < min || hi > max {
            return Err(DatasetError::Config(format!(
                "{} range ({}, {}) must lie within [{}, {}]",
                name, lo, hi, min, max
            )));
        }
    }
    Ok(())
}

fn sample<R: Rng + ?Sized>(range: ParamRange, rng: &mut R) -> f32 {
    let (lo, hi) = range;
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..=hi)
    }
}

/// One probability-gated step of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationStage {
    /// Candidate transforms; one is picked uniformly when the gate fires
    pub transforms: Vec<TransformKind>,
    pub probability: f32,
}

impl AugmentationStage {
    pub fn single(transform: TransformKind, probability: f32) -> Self {
        Self {
            transforms: vec![transform],
            probability,
        }
    }

    pub fn one_of(transforms: Vec<TransformKind>, probability: f32) -> Self {
        Self {
            transforms,
            probability,
        }
    }
}

/// Final value mapping applied after resize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    /// Pixel / 255, values in [0, 1]
    UnitRange,
    /// `(pixel / 255 - mean) / std` per channel
    MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    pub fn imagenet() -> Self {
        Normalization::MeanStd {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

/// Configuration for data augmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub stages: Vec<AugmentationStage>,
    pub target_width: u32,
    pub target_height: u32,
    pub normalization: Normalization,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::medium()
    }
}

impl AugmentationConfig {
    /// Create a "light" augmentation preset (less aggressive)
    pub fn light() -> Self {
        Self {
            stages: vec![
                AugmentationStage::single(TransformKind::HorizontalFlip, 0.5),
                AugmentationStage::single(
                    TransformKind::Rotate {
                        degrees: (-10.0, 10.0),
                    },
                    0.3,
                ),
                AugmentationStage::single(
                    TransformKind::BrightnessContrast {
                        brightness: (-0.1, 0.1),
                        contrast: (-0.1, 0.1),
                    },
                    0.3,
                ),
            ],
            ..Self::none()
        }
    }

    /// Create a "medium" augmentation preset (the default field pipeline)
    pub fn medium() -> Self {
        Self {
            stages: vec![
                AugmentationStage::single(
                    TransformKind::Rotate {
                        degrees: (-25.0, 25.0),
                    },
                    0.7,
                ),
                AugmentationStage::single(TransformKind::HorizontalFlip, 0.5),
                AugmentationStage::single(
                    TransformKind::ShiftScaleRotate {
                        shift: (-0.1, 0.1),
                        scale: (0.9, 1.1),
                        degrees: (-15.0, 15.0),
                    },
                    0.7,
                ),
                AugmentationStage::single(
                    TransformKind::BrightnessContrast {
                        brightness: (-0.2, 0.2),
                        contrast: (-0.2, 0.2),
                    },
                    0.6,
                ),
                AugmentationStage::single(
                    TransformKind::HueSaturationValue {
                        hue: (-10.0, 10.0),
                        saturation: (-0.06, 0.06),
                        value: (-0.04, 0.04),
                    },
                    0.6,
                ),
                AugmentationStage::one_of(
                    vec![
                        TransformKind::GaussianNoise {
                            std: (0.012, 0.028),
                        },
                        TransformKind::GaussianBlur { sigma: (0.3, 1.0) },
                        TransformKind::MotionBlur { length: (2, 3) },
                    ],
                    0.4,
                ),
                AugmentationStage::one_of(
                    vec![
                        TransformKind::Weather {
                            effect: WeatherEffect::Shadow,
                            intensity: (0.3, 0.5),
                        },
                        TransformKind::Weather {
                            effect: WeatherEffect::Fog,
                            intensity: (0.1, 0.3),
                        },
                    ],
                    0.3,
                ),
            ],
            ..Self::none()
        }
    }

    /// Create a "heavy" augmentation preset (aggressive, for maximum generalization)
    pub fn heavy() -> Self {
        Self {
            stages: vec![
                AugmentationStage::single(
                    TransformKind::Rotate {
                        degrees: (-35.0, 35.0),
                    },
                    0.8,
                ),
                AugmentationStage::single(TransformKind::HorizontalFlip, 0.5),
                AugmentationStage::single(TransformKind::VerticalFlip, 0.3),
                AugmentationStage::single(
                    TransformKind::ShiftScaleRotate {
                        shift: (-0.15, 0.15),
                        scale: (0.85, 1.15),
                        degrees: (-20.0, 20.0),
                    },
                    0.8,
                ),
                AugmentationStage::single(
                    TransformKind::BrightnessContrast {
                        brightness: (-0.3, 0.3),
                        contrast: (-0.3, 0.3),
                    },
                    0.7,
                ),
                AugmentationStage::single(
                    TransformKind::HueSaturationValue {
                        hue: (-20.0, 20.0),
                        saturation: (-0.1, 0.1),
                        value: (-0.08, 0.08),
                    },
                    0.7,
                ),
                AugmentationStage::one_of(
                    vec![
                        TransformKind::GaussianNoise { std: (0.02, 0.04) },
                        TransformKind::GaussianBlur { sigma: (0.5, 1.5) },
                        TransformKind::MotionBlur { length: (3, 5) },
                    ],
                    0.5,
                ),
                AugmentationStage::one_of(
                    vec![
                        TransformKind::Weather {
                            effect: WeatherEffect::Shadow,
                            intensity: (0.3, 0.6),
                        },
                        TransformKind::Weather {
                            effect: WeatherEffect::Fog,
                            intensity: (0.1, 0.4),
                        },
                    ],
                    0.4,
                ),
            ],
            ..Self::none()
        }
    }

    /// No random stages, only resize and normalize
    pub fn none() -> Self {
        Self {
            stages: Vec::new(),
            target_width: DEFAULT_IMAGE_SIZE,
            target_height: DEFAULT_IMAGE_SIZE,
            normalization: Normalization::imagenet(),
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "light" => Ok(Self::light()),
            "medium" => Ok(Self::medium()),
            "heavy" => Ok(Self::heavy()),
            "none" => Ok(Self::none()),
            other => Err(DatasetError::Config(format!(
                "Unknown augmentation preset '{}'",
                other
            ))),
        }
    }

    /// Builder-style setter for the output size
    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_width = width;
        self.target_height = height;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(DatasetError::Config(format!(
                "Augmentation target size {}x{} must be non-zero",
                self.target_width, self.target_height
            )));
        }

        for (i, stage) in self.stages.iter().enumerate() {
            if !(0.0..=1.0).contains(&stage.probability) {
                return Err(DatasetError::Config(format!(
                    "Stage {} probability {} is outside [0, 1]",
                    i, stage.probability
                )));
            }
            if stage.transforms.is_empty() {
                return Err(DatasetError::Config(format!("Stage {} has no transforms", i)));
            }
            for transform in &stage.transforms {
                transform.validate()?;
            }
        }

        if let Normalization::MeanStd { mean, std } = &self.normalization {
            if mean.iter().any(|m| !m.is_finite()) {
                return Err(DatasetError::Config("Normalization mean must be finite".to_string()));
            }
            if std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(DatasetError::Config(
                    "Normalization std must be finite and positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Output of the pipeline: CHW `f32` data with its shape
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedImage {
    pub data: Vec<f32>,
    pub shape: ImageShape,
}

/// Validated, ready-to-apply augmentation pipeline
#[derive(Debug, Clone)]
pub struct AugmentationPipeline {
    config: AugmentationConfig,
}

impl AugmentationPipeline {
    pub fn new(config: AugmentationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    pub fn output_shape(&self) -> ImageShape {
        ImageShape::rgb(self.config.target_height, self.config.target_width)
    }

    /// Same tail, no random stages (validation and test data)
    pub fn evaluation(&self) -> Self {
        Self {
            config: AugmentationConfig {
                stages: Vec::new(),
                ..self.config.clone()
            },
        }
    }

    pub fn is_identity(&self) -> bool {
        self.config.stages.is_empty()
    }

    /// Run every stage, then resize and normalize
    ///
    /// The input image is left untouched.
    pub fn apply<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> AugmentedImage {
        let mut img = image.to_rgb8();

        for stage in &self.config.stages {
            if rng.gen::<f32>() >= stage.probability {
                continue;
            }
            let transform = match stage.transforms.len() {
                1 => &stage.transforms[0],
                n => &stage.transforms[rng.gen_range(0..n)],
            };
            img = transform.apply(img, rng);
        }

        self.finish(img)
    }

    /// Resize and normalize only
    pub fn preprocess(&self, image: &DynamicImage) -> AugmentedImage {
        self.finish(image.to_rgb8())
    }

    /// Augment a batch in parallel, each image with its own generator
    /// derived from `seed` and its position in the batch
    pub fn apply_batch(&self, images: &[DynamicImage], seed: u64) -> Vec<AugmentedImage> {
        images
            .par_iter()
            .enumerate()
            .map(|(i, img)| {
                let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, 0, i as u64));
                self.apply(img, &mut rng)
            })
            .collect()
    }

    fn finish(&self, img: RgbImage) -> AugmentedImage {
        let (w, h) = (self.config.target_width, self.config.target_height);
        let resized = if img.dimensions() == (w, h) {
            img
        } else {
            imageops::resize(&img, w, h, FilterType::Triangle)
        };

        AugmentedImage {
            data: to_tensor_data(&resized, &self.config.normalization),
            shape: self.output_shape(),
        }
    }
}

/// Seed for the generator of one (epoch, index) draw
pub fn derive_seed(seed: u64, epoch: u64, index: u64) -> u64 {
    splitmix64(splitmix64(splitmix64(seed) ^ epoch) ^ index)
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Convert to CHW float data
fn to_tensor_data(img: &RgbImage, normalization: &Normalization) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * height as usize * width as usize);

    for c in 0..3 {
        let (mean, std) = match normalization {
            Normalization::UnitRange => (0.0, 1.0),
            Normalization::MeanStd { mean, std } => (mean[c], std[c]),
        };
        for y in 0..height {
            for x in 0..width {
                let v = img.get_pixel(x, y)[c] as f32 / 255.0;
                data.push((v - mean) / std);
            }
        }
    }

    data
}

/// Inverse-mapped rotation/scale/translation about the center
fn warp_affine(img: &RgbImage, angle_degrees: f32, scale: f32, tx: f32, ty: f32) -> RgbImage {
    if angle_degrees.abs() < 0.1 && (scale - 1.0).abs() < 1e-3 && tx.abs() < 0.5 && ty.abs() < 0.5 {
        return img.clone();
    }

    let (width, height) = img.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx - tx;
        let dy = y as f32 - cy - ty;
        let src_x = cx + (dx * cos_a + dy * sin_a) / scale;
        let src_y = cy + (-dx * sin_a + dy * cos_a) / scale;
        bilinear_sample(img, src_x, src_y)
    })
}

/// Bilinear interpolation, black outside the image
fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn map_pixels(img: &RgbImage, f: impl Fn(&Rgb<u8>) -> [f32; 3]) -> RgbImage {
    let mut out = RgbImage::new(img.width(), img.height());
    for (src, dst) in img.pixels().zip(out.pixels_mut()) {
        let v = f(src);
        *dst = Rgb([
            v[0].round().clamp(0.0, 255.0) as u8,
            v[1].round().clamp(0.0, 255.0) as u8,
            v[2].round().clamp(0.0, 255.0) as u8,
        ]);
    }
    out
}

/// Add `delta` (fraction of full scale) to every channel
fn adjust_brightness(img: &RgbImage, delta: f32) -> RgbImage {
    let d = delta * 255.0;
    map_pixels(img, |p| [p[0] as f32 + d, p[1] as f32 + d, p[2] as f32 + d])
}

/// Scale pixel values around the mean luminance
fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let count = (img.width() as f64 * img.height() as f64).max(1.0);
    let sum: f64 = img
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();
    let mean = (sum / count) as f32;

    map_pixels(img, |p| {
        [
            mean + factor * (p[0] as f32 - mean),
            mean + factor * (p[1] as f32 - mean),
            mean + factor * (p[2] as f32 - mean),
        ]
    })
}

fn shift_hsv(img: &RgbImage, hue: f32, saturation: f32, value: f32) -> RgbImage {
    map_pixels(img, |p| {
        let (h, s, v) = rgb_to_hsv(p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0);
        let (r, g, b) = hsv_to_rgb(
            h + hue,
            (s + saturation).clamp(0.0, 1.0),
            (v + value).clamp(0.0, 1.0),
        );
        [r * 255.0, g * 255.0, b * 255.0]
    })
}

/// Hue in degrees, saturation and value in [0, 1]
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let d = max - min;

    let h = if d == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / d).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / d + 2.0)
    } else {
        60.0 * ((r - g) / d + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { d / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let c = v * s;
    let hp = h.rem_euclid(360.0) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    (r + m, g + m, b + m)
}

/// Independent gaussian noise per channel (Box-Muller)
fn add_noise<R: Rng + ?Sized>(img: &RgbImage, std: f32, rng: &mut R) -> RgbImage {
    let std = std * 255.0;
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for c in 0..3 {
            let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
            let u2: f32 = rng.gen();
            let noise = std * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
            pixel[c] = (pixel[c] as f32 + noise).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn motion_blur(img: &RgbImage, length: u32) -> RgbImage {
    if length <= 1 {
        return img.clone();
    }
    let (width, height) = img.dimensions();
    let half = (length / 2) as i64;

    RgbImage::from_fn(width, height, |x, y| {
        let mut sum = [0.0f32; 3];
        let mut count = 0.0f32;
        for k in -half..=half {
            let px = x as i64 + k;
            if px >= 0 && px < width as i64 {
                let p = img.get_pixel(px as u32, y);
                for c in 0..3 {
                    sum[c] += p[c] as f32;
                }
                count += 1.0;
            }
        }
        Rgb([
            (sum[0] / count).round() as u8,
            (sum[1] / count).round() as u8,
            (sum[2] / count).round() as u8,
        ])
    })
}

/// Darken a random vertical band by `strength`
fn add_shadow<R: Rng + ?Sized>(img: &RgbImage, strength: f32, rng: &mut R) -> RgbImage {
    let width = img.width();
    let band = ((width as f32 * rng.gen_range(0.3..=0.7)) as u32).clamp(1, width.max(1));
    let start = rng.gen_range(0..=width.saturating_sub(band));
    let factor = 1.0 - strength;

    let mut out = img.clone();
    for (x, _, pixel) in out.enumerate_pixels_mut() {
        if x >= start && x < start + band {
            for c in 0..3 {
                pixel[c] = (pixel[c] as f32 * factor).round() as u8;
            }
        }
    }
    out
}

/// Blend towards a light haze
fn add_fog(img: &RgbImage, strength: f32) -> RgbImage {
    const HAZE: f32 = 230.0;
    map_pixels(img, |p| {
        [
            p[0] as f32 * (1.0 - strength) + HAZE * strength,
            p[1] as f32 * (1.0 - strength) + HAZE * strength,
            p[2] as f32 * (1.0 - strength) + HAZE * strength,
        ]
    })
}
