//! Multi-scale sliding-window detection
//!
//! The image is shrunk by [`SCALE_FACTOR`] until it is smaller than the
//! cascade window; at each scale every window position is evaluated. Raw
//! hits are then clustered and clusters with too few members are dropped.

use super::cascade::Cascade;
use super::integral::IntegralImage;
use super::Region;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use std::borrow::Cow;

/// Pyramid step between scales
pub const SCALE_FACTOR: f64 = 1.1;

/// A cluster needs more than this many raw hits to count as a detection
pub const MIN_NEIGHBORS: usize = 3;

/// Relative tolerance when deciding two hits belong to the same cluster
pub const GROUP_EPS: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: i64,
    y: i64,
    width: i64,
    height: i64,
}

/// BT.601 luma, as the stock cascades were trained on
pub fn grayscale(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (u32::from(r) * 4899 + u32::from(g) * 9617 + u32::from(b) * 1868 + 8192) >> 14;
        Luma([luma.min(255) as u8])
    })
}

/// Find every region the cascade accepts, in original-image coordinates.
///
/// Returned regions always lie within the image bounds.
pub fn detect_multi_scale(cascade: &Cascade, gray: &GrayImage) -> Vec<Region> {
    let (img_w, img_h) = (gray.width(), gray.height());
    let (win_w, win_h) = cascade.window();
    let mut hits = Vec::new();
    let mut factor = 1.0f64;

    loop {
        let scaled_w = (f64::from(img_w) / factor).round() as u32;
        let scaled_h = (f64::from(img_h) / factor).round() as u32;
        if (scaled_w as usize) < win_w || (scaled_h as usize) < win_h {
            break;
        }

        let scaled: Cow<'_, GrayImage> = if scaled_w == img_w && scaled_h == img_h {
            Cow::Borrowed(gray)
        } else {
            Cow::Owned(imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle))
        };
        let ii = IntegralImage::new(&scaled, cascade.uses_tilted());
        let step = if factor > 2.0 { 1 } else { 2 };
        let window_w = (win_w as f64 * factor).round() as i64;
        let window_h = (win_h as f64 * factor).round() as i64;

        for y in (0..=ii.height() - win_h).step_by(step) {
            for x in (0..=ii.width() - win_w).step_by(step) {
                if cascade.evaluate(&ii, x, y) {
                    hits.push(Rect {
                        x: (x as f64 * factor).round() as i64,
                        y: (y as f64 * factor).round() as i64,
                        width: window_w,
                        height: window_h,
                    });
                }
            }
        }

        factor *= SCALE_FACTOR;
    }

    group_rectangles(&hits, MIN_NEIGHBORS, GROUP_EPS)
        .into_iter()
        .filter_map(|r| clamp(r, img_w, img_h))
        .collect()
}

fn clamp(r: Rect, img_w: u32, img_h: u32) -> Option<Region> {
    let x0 = r.x.clamp(0, i64::from(img_w));
    let y0 = r.y.clamp(0, i64::from(img_h));
    let x1 = (r.x + r.width).clamp(0, i64::from(img_w));
    let y1 = (r.y + r.height).clamp(0, i64::from(img_h));
    (x1 > x0 && y1 > y0).then(|| Region {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    })
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    (a.x - b.x).abs() as f64 <= delta
        && (a.y - b.y).abs() as f64 <= delta
        && (a.x + a.width - b.x - b.width).abs() as f64 <= delta
        && (a.y + a.height - b.y - b.height).abs() as f64 <= delta
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar hits, average each cluster, drop clusters with
/// `group_threshold` or fewer members and clusters nested inside a
/// stronger one.
fn group_rectangles(rects: &[Rect], group_threshold: usize, eps: f64) -> Vec<Rect> {
    if rects.is_empty() {
        return Vec::new();
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();
    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b] = a;
                }
            }
        }
    }

    let mut labels = vec![usize::MAX; rects.len()];
    let mut sums: Vec<(Rect, usize)> = Vec::new();
    for i in 0..rects.len() {
        let root = find(&mut parent, i);
        if labels[root] == usize::MAX {
            labels[root] = sums.len();
            sums.push((
                Rect {
                    x: 0,
                    y: 0,
                    width: 0,
                    height: 0,
                },
                0,
            ));
        }
        let (acc, count) = &mut sums[labels[root]];
        acc.x += rects[i].x;
        acc.y += rects[i].y;
        acc.width += rects[i].width;
        acc.height += rects[i].height;
        *count += 1;
    }

    let clusters: Vec<(Rect, usize)> = sums
        .into_iter()
        .map(|(acc, count)| {
            let s = 1.0 / count as f64;
            (
                Rect {
                    x: (acc.x as f64 * s).round() as i64,
                    y: (acc.y as f64 * s).round() as i64,
                    width: (acc.width as f64 * s).round() as i64,
                    height: (acc.height as f64 * s).round() as i64,
                },
                count,
            )
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|(_, (_, n1))| *n1 > group_threshold)
        .filter(|(i, (r1, n1))| {
            !clusters.iter().enumerate().any(|(j, (r2, n2))| {
                if j == *i || *n2 <= group_threshold {
                    return false;
                }
                let dx = (r2.width as f64 * eps).round() as i64;
                let dy = (r2.height as f64 * eps).round() as i64;
                r1.x >= r2.x - dx
                    && r1.y >= r2.y - dy
                    && r1.x + r1.width <= r2.x + r2.width + dx
                    && r1.y + r1.height <= r2.y + r2.height + dy
                    && (*n2 > (*n1).max(3) || *n1 < 3)
            })
        })
        .map(|(_, (r, _))| *r)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymize::cascade::tests::DARK_CENTRE_CASCADE;

    fn rect(x: i64, y: i64, w: i64, h: i64) -> Rect {
        Rect {
            x,
            y,
            width: w,
            height: h,
        }
    }

    /// Bright background with one dark square
    fn scene(size: u32, square: (u32, u32, u32)) -> GrayImage {
        let (sx, sy, side) = square;
        GrayImage::from_fn(size, size, |x, y| {
            if (sx..sx + side).contains(&x) && (sy..sy + side).contains(&y) {
                Luma([10])
            } else {
                Luma([240])
            }
        })
    }

    #[test]
    fn test_grayscale_weights() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0])));
        assert_eq!(grayscale(&img).get_pixel(0, 0).0[0], 76);
        let white = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(1, 1, image::Rgb([255, 255, 255])));
        assert_eq!(grayscale(&white).get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn test_group_drops_sparse_clusters() {
        let hits = vec![rect(0, 0, 20, 20), rect(1, 0, 20, 20), rect(100, 100, 20, 20)];
        assert!(group_rectangles(&hits, MIN_NEIGHBORS, GROUP_EPS).is_empty());
    }

    #[test]
    fn test_group_averages_dense_cluster() {
        let hits = vec![
            rect(10, 10, 20, 20),
            rect(11, 10, 20, 20),
            rect(10, 11, 20, 20),
            rect(9, 10, 20, 20),
            rect(10, 9, 20, 20),
        ];
        let grouped = group_rectangles(&hits, MIN_NEIGHBORS, GROUP_EPS);
        assert_eq!(grouped, vec![rect(10, 10, 20, 20)]);
    }

    #[test]
    fn test_group_suppresses_nested_weaker_cluster() {
        let mut hits: Vec<Rect> = (0..10).map(|i| rect(100 + i % 2, 100, 100, 100)).collect();
        hits.extend((0..4).map(|i| rect(140 + i % 2, 140, 20, 20)));
        let grouped = group_rectangles(&hits, MIN_NEIGHBORS, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].width, 100);
    }

    #[test]
    fn test_clamp_to_image() {
        let region = clamp(rect(-5, 90, 20, 20), 100, 100).unwrap();
        assert_eq!(
            region,
            Region {
                x: 0,
                y: 90,
                width: 15,
                height: 10
            }
        );
        assert!(clamp(rect(120, 0, 10, 10), 100, 100).is_none());
    }

    #[test]
    fn test_detects_dark_square() {
        let cascade = Cascade::from_xml(DARK_CENTRE_CASCADE).unwrap();
        let gray = scene(64, (24, 24, 16));
        let regions = detect_multi_scale(&cascade, &gray);

        assert!(!regions.is_empty());
        for r in &regions {
            assert!(r.x + r.width <= 64 && r.y + r.height <= 64);
            let overlaps = r.x < 40 && r.x + r.width > 24 && r.y < 40 && r.y + r.height > 24;
            assert!(overlaps, "{r:?} misses the square");
        }
    }

    #[test]
    fn test_uniform_image_has_no_detections() {
        let cascade = Cascade::from_xml(DARK_CENTRE_CASCADE).unwrap();
        let gray = GrayImage::from_pixel(48, 48, Luma([200]));
        assert!(detect_multi_scale(&cascade, &gray).is_empty());
    }

    #[test]
    fn test_image_smaller_than_window() {
        let cascade = Cascade::from_xml(DARK_CENTRE_CASCADE).unwrap();
        let gray = GrayImage::from_pixel(5, 5, Luma([0]));
        assert!(detect_multi_scale(&cascade, &gray).is_empty());
    }
}
