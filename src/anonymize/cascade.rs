//! Haar cascade classifier models
//!
//! Reads the OpenCV cascade XML format (`stageType` BOOST, `featureType`
//! HAAR) and evaluates a single detection window against it. Both stump and
//! tree weak classifiers are supported, as are tilted (45 degree) features.
//!
//! # Example
//!
//! ```no_run
//! use facemask::anonymize::cascade::Cascade;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cascade = Cascade::load("xml/haarcascade_frontalface_default.xml")?;
//! println!("window: {:?}, stages: {}", cascade.window(), cascade.stage_count());
//! # Ok(())
//! # }
//! ```

use super::integral::IntegralImage;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Cascade loading errors
#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed cascade XML: {0}")]
    ParseError(#[from] quick_xml::DeError),

    #[error("Unsupported cascade: {0}")]
    Unsupported(String),

    #[error("Invalid cascade: {0}")]
    Invalid(String),
}

// ============================================================================
// XML layout
// ============================================================================

#[derive(Debug, Deserialize)]
struct StorageXml {
    cascade: CascadeXml,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CascadeXml {
    stage_type: String,
    feature_type: String,
    height: u32,
    width: u32,
    stages: ListXml<StageXml>,
    features: ListXml<FeatureXml>,
}

/// OpenCV serialises sequences as repeated `<_>` elements
#[derive(Debug, Deserialize)]
struct ListXml<T> {
    #[serde(rename = "_", default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageXml {
    stage_threshold: f64,
    weak_classifiers: ListXml<WeakClassifierXml>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeakClassifierXml {
    internal_nodes: String,
    leaf_values: String,
}

#[derive(Debug, Deserialize)]
struct FeatureXml {
    rects: ListXml<String>,
    #[serde(default)]
    tilted: Option<u8>,
}

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Node {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<Node>,
    leaves: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone, Copy)]
struct WeightedRect {
    x: usize,
    y: usize,
    width: usize,
    height: usize,
    weight: f64,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<WeightedRect>,
    tilted: bool,
}

impl Feature {
    #[inline]
    fn value(&self, ii: &IntegralImage, wx: usize, wy: usize) -> f64 {
        self.rects
            .iter()
            .map(|r| {
                let sum = if self.tilted {
                    ii.tilted_sum(wx + r.x, wy + r.y, r.width, r.height)
                } else {
                    ii.rect_sum(wx + r.x, wy + r.y, r.width, r.height)
                };
                r.weight * sum as f64
            })
            .sum()
    }
}

/// A boosted cascade of Haar-feature classifiers
#[derive(Debug, Clone)]
pub struct Cascade {
    window_width: usize,
    window_height: usize,
    stages: Vec<Stage>,
    features: Vec<Feature>,
    uses_tilted: bool,
}

impl Cascade {
    /// Load a cascade from an OpenCV XML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CascadeError> {
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml(&xml)
    }

    /// Parse a cascade from OpenCV XML text
    pub fn from_xml(xml: &str) -> Result<Self, CascadeError> {
        let storage: StorageXml = quick_xml::de::from_str(xml)?;
        let raw = storage.cascade;

        if raw.stage_type.trim() != "BOOST" {
            return Err(CascadeError::Unsupported(format!(
                "stage type '{}'",
                raw.stage_type.trim()
            )));
        }
        if raw.feature_type.trim() != "HAAR" {
            return Err(CascadeError::Unsupported(format!(
                "feature type '{}'",
                raw.feature_type.trim()
            )));
        }
        if raw.width < 3 || raw.height < 3 {
            return Err(CascadeError::Invalid(format!(
                "window {}x{} is too small",
                raw.width, raw.height
            )));
        }

        let window_width = raw.width as usize;
        let window_height = raw.height as usize;

        let features = raw
            .features
            .items
            .iter()
            .enumerate()
            .map(|(idx, f)| parse_feature(idx, f, window_width, window_height))
            .collect::<Result<Vec<_>, _>>()?;

        let stages = raw
            .stages
            .items
            .iter()
            .enumerate()
            .map(|(idx, s)| parse_stage(idx, s, features.len()))
            .collect::<Result<Vec<_>, _>>()?;

        if stages.is_empty() {
            return Err(CascadeError::Invalid("cascade has no stages".into()));
        }

        let uses_tilted = features.iter().any(|f| f.tilted);

        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
            uses_tilted,
        })
    }

    /// Detection window size `(width, height)` the cascade was trained on
    pub fn window(&self) -> (usize, usize) {
        (self.window_width, self.window_height)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Whether any feature needs the tilted integral image
    pub fn uses_tilted(&self) -> bool {
        self.uses_tilted
    }

    /// Run every stage on the window whose top-left corner is `(x, y)`.
    ///
    /// Feature responses are compared against thresholds scaled by the
    /// window's standard deviation (measured on the window inset by one
    /// pixel), which makes the cascade insensitive to lighting.
    pub fn evaluate(&self, ii: &IntegralImage, x: usize, y: usize) -> bool {
        let inner_w = self.window_width - 2;
        let inner_h = self.window_height - 2;
        let area = (inner_w * inner_h) as f64;
        let sum = ii.rect_sum(x + 1, y + 1, inner_w, inner_h) as f64;
        let sqsum = ii.rect_sqsum(x + 1, y + 1, inner_w, inner_h) as f64;
        let variance = area * sqsum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.stages {
            let mut stage_sum = 0.0;
            for classifier in &stage.classifiers {
                let mut idx = 0usize;
                loop {
                    let node = classifier.nodes[idx];
                    let value = self.features[node.feature].value(ii, x, y);
                    let next = if value < node.threshold * norm {
                        node.left
                    } else {
                        node.right
                    };
                    if next <= 0 {
                        stage_sum += classifier.leaves[next.unsigned_abs() as usize];
                        break;
                    }
                    idx = next as usize;
                }
            }
            if stage_sum < stage.threshold {
                return false;
            }
        }

        true
    }
}

fn numbers(text: &str) -> Result<Vec<f64>, CascadeError> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| CascadeError::Invalid(format!("'{tok}' is not a number")))
        })
        .collect()
}

fn parse_feature(
    idx: usize,
    raw: &FeatureXml,
    window_width: usize,
    window_height: usize,
) -> Result<Feature, CascadeError> {
    let tilted = raw.tilted.unwrap_or(0) != 0;
    let mut rects = Vec::with_capacity(raw.rects.items.len());

    for text in &raw.rects.items {
        let values = numbers(text)?;
        let [x, y, w, h, weight] = values[..] else {
            return Err(CascadeError::Invalid(format!(
                "feature {idx}: rect needs 5 values, got {}",
                values.len()
            )));
        };
        if x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0 {
            return Err(CascadeError::Invalid(format!("feature {idx}: negative rect")));
        }
        let rect = WeightedRect {
            x: x as usize,
            y: y as usize,
            width: w as usize,
            height: h as usize,
            weight,
        };

        let fits = if tilted {
            rect.x >= rect.height
                && rect.x + rect.width <= window_width
                && rect.y + rect.width + rect.height <= window_height
        } else {
            rect.x + rect.width <= window_width && rect.y + rect.height <= window_height
        };
        if !fits {
            return Err(CascadeError::Invalid(format!(
                "feature {idx}: rect exceeds the {window_width}x{window_height} window"
            )));
        }
        rects.push(rect);
    }

    if rects.is_empty() {
        return Err(CascadeError::Invalid(format!("feature {idx} has no rects")));
    }

    Ok(Feature { rects, tilted })
}

fn parse_stage(idx: usize, raw: &StageXml, feature_count: usize) -> Result<Stage, CascadeError> {
    let classifiers = raw
        .weak_classifiers
        .items
        .iter()
        .map(|wc| parse_weak_classifier(idx, wc, feature_count))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stage {
        threshold: raw.stage_threshold,
        classifiers,
    })
}

fn parse_weak_classifier(
    stage: usize,
    raw: &WeakClassifierXml,
    feature_count: usize,
) -> Result<WeakClassifier, CascadeError> {
    let values = numbers(&raw.internal_nodes)?;
    let leaves = numbers(&raw.leaf_values)?;

    if values.is_empty() || values.len() % 4 != 0 {
        return Err(CascadeError::Invalid(format!(
            "stage {stage}: internal nodes must come in groups of 4 (categorical features are not supported)"
        )));
    }

    let nodes: Vec<Node> = values
        .chunks_exact(4)
        .map(|n| Node {
            left: n[0] as i32,
            right: n[1] as i32,
            feature: n[2] as usize,
            threshold: n[3],
        })
        .collect();

    for node in &nodes {
        if node.feature >= feature_count {
            return Err(CascadeError::Invalid(format!(
                "stage {stage}: feature index {} out of range",
                node.feature
            )));
        }
        for child in [node.left, node.right] {
            let valid = if child <= 0 {
                (child.unsigned_abs() as usize) < leaves.len()
            } else {
                (child as usize) < nodes.len()
            };
            if !valid {
                return Err(CascadeError::Invalid(format!(
                    "stage {stage}: dangling classifier branch {child}"
                )));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}
