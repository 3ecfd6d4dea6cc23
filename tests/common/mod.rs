//! Shared test fixtures
//!
//! - A synthetic Haar cascade that fires on a dark blob inside a bright ring
//! - Scene images the cascade can (or cannot) find a "face" in
//! - Configuration pointing at temporary directories

#![allow(dead_code)]

use facemask::config::{
    AnonymizerConfig, Config, MetricsConfig, ServerConfig, StorageConfig, UploadConfig,
};
use facemask::anonymize::cascade::Cascade;
use facemask::anonymize::detect::{detect_multi_scale, grayscale};
use facemask::anonymize::Region;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 8x8 window, one stump: whole window weighted +1, centre 4x4 weighted -4
pub const DARK_CENTRE_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>8</height>
  <width>8</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 5.0000000000000000e-01</internalNodes>
          <leafValues>
            -1. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 8 8 1.</_>
        <_>
          2 2 4 4 -4.</_></rects></_></features></cascade>
</opencv_storage>
"#;

/// Side of the generated scenes
pub const SCENE_SIZE: u32 = 128;

/// Where the textured dark "face" sits: `(x, y, side)`
pub const FACE: (u32, u32, u32) = (48, 48, 32);

/// Temporary storage root plus a classifier model written next to it
pub struct Fixture {
    pub dir: TempDir,
    pub root: PathBuf,
    pub model: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path().join("uploads");
        let model = dir.path().join("dark_centre.xml");
        std::fs::write(&model, DARK_CENTRE_CASCADE).expect("write model");
        Self { dir, root, model }
    }

    pub fn config(&self) -> Config {
        self.config_with_models(vec![self.model.clone()])
    }

    pub fn config_with_models(&self, classifiers: Vec<PathBuf>) -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
            },
            storage: StorageConfig {
                root: self.root.clone(),
            },
            anonymizer: AnonymizerConfig { classifiers },
            upload: UploadConfig::default(),
            metrics: MetricsConfig {
                enabled: false,
                port: 0,
            },
        }
    }

    /// Every regular file under the storage root
    pub fn stored_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        collect_files(&self.root, &mut files);
        files
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

/// Bright scene with a dark, finely textured square at [`FACE`]
pub fn face_scene() -> DynamicImage {
    let (fx, fy, side) = FACE;
    DynamicImage::ImageRgb8(RgbImage::from_fn(SCENE_SIZE, SCENE_SIZE, |x, y| {
        let inside = (fx..fx + side).contains(&x) && (fy..fy + side).contains(&y);
        if !inside {
            Rgb([235, 230, 225])
        } else if (x / 2 + y / 2) % 2 == 0 {
            Rgb([0, 0, 0])
        } else {
            Rgb([90, 80, 70])
        }
    }))
}

/// Flat scene with nothing to detect
pub fn empty_scene() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(
        SCENE_SIZE,
        SCENE_SIZE,
        Rgb([120, 160, 200]),
    ))
}

pub fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format)
        .expect("encode test image");
    buffer
}

/// Regions the synthetic cascade finds in `img`, exactly as the anonymizer
/// sees them on its first pass
pub fn detected_regions(img: &DynamicImage) -> Vec<Region> {
    let cascade = Cascade::from_xml(DARK_CENTRE_CASCADE).expect("parse cascade");
    detect_multi_scale(&cascade, &grayscale(img))
}

/// Luma variance over `region`
pub fn region_variance(img: &DynamicImage, region: Region) -> f64 {
    let gray = img.to_luma8();
    let values: Vec<f64> = (region.y..region.y + region.height)
        .flat_map(|y| (region.x..region.x + region.width).map(move |x| (x, y)))
        .map(|(x, y)| f64::from(gray.get_pixel(x, y).0[0]))
        .collect();
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}
