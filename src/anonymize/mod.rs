//! Face anonymizer
//!
//! Loads a stored image, runs each configured classifier model over it in
//! order and blurs every detected region in place.
//!
//! # Pass ordering
//!
//! After a model's detect-and-blur pass the image is written back to its
//! path before the next model runs. Later models therefore see earlier
//! blurs, which compounds coverage instead of detecting against the
//! untouched original. A pass that finds nothing does not rewrite the file,
//! so an image without detectable faces stays byte-identical.

pub mod blur;
pub mod cascade;
pub mod detect;
pub mod integral;

use crate::config::AnonymizerConfig;
use crate::metrics;
use crate::store;
use cascade::{Cascade, CascadeError};
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Rectangle in pixel coordinates, always inside the image it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Anonymization errors. Any of them means the file must not be served
/// as anonymized.
#[derive(Error, Debug)]
pub enum AnonymizeError {
    #[error("Unknown image format for {path}: {source}")]
    UnknownFormat {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to load classifier {path}: {source}")]
    Model { path: PathBuf, source: CascadeError },

    #[error("Failed to blur region {region:?}: {source}")]
    Blur {
        region: Region,
        source: image::ImageError,
    },

    #[error("Failed to encode image {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of one model's pass
#[derive(Debug, Clone)]
pub struct PassReport {
    pub model: PathBuf,
    pub regions: Vec<Region>,
}

/// Outcome of a full anonymization
#[derive(Debug, Clone, Default)]
pub struct AnonymizeReport {
    pub passes: Vec<PassReport>,
}

impl AnonymizeReport {
    /// Total regions blurred across all passes
    pub fn faces(&self) -> usize {
        self.passes.iter().map(|p| p.regions.len()).sum()
    }
}

/// Runs the configured classifier models over stored images
#[derive(Debug, Clone)]
pub struct FaceAnonymizer {
    classifiers: Vec<PathBuf>,
}

impl FaceAnonymizer {
    pub fn new(classifiers: Vec<PathBuf>) -> Self {
        Self { classifiers }
    }

    pub fn from_config(config: &AnonymizerConfig) -> Self {
        Self::new(config.classifiers.clone())
    }

    /// Detect and blur faces in the image at `path`, rewriting it in place.
    ///
    /// Blocking and CPU-heavy; async callers should use
    /// `tokio::task::spawn_blocking`.
    #[tracing::instrument(name = "anonymize", skip_all, fields(path = %path.display()))]
    pub fn anonymize(&self, path: &Path) -> Result<AnonymizeReport, AnonymizeError> {
        let start = Instant::now();

        let format = ImageFormat::from_path(path).map_err(|source| AnonymizeError::UnknownFormat {
            path: path.to_path_buf(),
            source,
        })?;
        let mut img = decode(path)?;
        let mut report = AnonymizeReport::default();

        for model in &self.classifiers {
            let cascade = Cascade::load(model).map_err(|source| AnonymizeError::Model {
                path: model.clone(),
                source,
            })?;

            let gray = detect::grayscale(&img);
            let regions = detect::detect_multi_scale(&cascade, &gray);

            for region in &regions {
                blur::blur_region(&mut img, *region).map_err(|source| AnonymizeError::Blur {
                    region: *region,
                    source,
                })?;
            }

            if !regions.is_empty() {
                let bytes = encode(&img, format).map_err(|source| AnonymizeError::Encode {
                    path: path.to_path_buf(),
                    source,
                })?;
                store::write_atomic(path, &bytes).map_err(|source| AnonymizeError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
            }

            metrics::record_faces_detected(&model_label(model), regions.len());
            tracing::debug!(
                model = %model.display(),
                faces = regions.len(),
                "Detection pass complete"
            );

            report.passes.push(PassReport {
                model: model.clone(),
                regions,
            });
        }

        metrics::record_anonymize_duration(start.elapsed().as_secs_f64());
        tracing::info!(
            faces = report.faces(),
            duration_ms = start.elapsed().as_millis(),
            "Anonymized image"
        );

        Ok(report)
    }
}

fn decode(path: &Path) -> Result<DynamicImage, AnonymizeError> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| AnonymizeError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    reader.decode().map_err(|source| AnonymizeError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode in the stored file's own format, converting the pixel layout
/// where the encoder is picky.
fn encode(img: &DynamicImage, format: ImageFormat) -> image::ImageResult<Vec<u8>> {
    let converted = match (format, img) {
        (ImageFormat::Jpeg, DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_)) => None,
        (ImageFormat::Jpeg, _) => Some(DynamicImage::ImageRgb8(img.to_rgb8())),
        (ImageFormat::Png, _) => None,
        (_, DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_)) => None,
        _ => Some(DynamicImage::ImageRgba8(img.to_rgba8())),
    };

    let mut buffer = Vec::new();
    converted
        .as_ref()
        .unwrap_or(img)
        .write_to(&mut Cursor::new(&mut buffer), format)?;
    Ok(buffer)
}

/// Metric label for a model: its file stem
fn model_label(model: &Path) -> String {
    model
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}
