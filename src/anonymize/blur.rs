//! Irreversible region blur
//!
//! A region is smoothed with a large Gaussian kernel, then averaged again
//! with a box filter of the same size. Both passes only read pixels inside
//! the region, so the rest of the image is untouched.

use super::Region;
use image::{imageops, DynamicImage, GenericImage, ImageResult, Rgba, RgbaImage};

/// Side of the square blur kernel, in pixels
pub const KERNEL_SIZE: u32 = 75;

/// Gaussian sigma for a kernel of `kernel` pixels.
///
/// Same derivation OpenCV uses when a blur is requested by kernel size only.
pub fn gaussian_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Blur `region` of `img` in place.
pub fn blur_region(img: &mut DynamicImage, region: Region) -> ImageResult<()> {
    if region.width == 0 || region.height == 0 {
        return Ok(());
    }

    let patch = img
        .crop_imm(region.x, region.y, region.width, region.height)
        .to_rgba8();
    let smoothed = imageops::blur(&patch, gaussian_sigma(KERNEL_SIZE));
    let averaged = box_blur(&smoothed, KERNEL_SIZE);

    img.copy_from(&averaged, region.x, region.y)
}

/// Separable mean filter; windows are clipped at the patch border.
pub fn box_blur(src: &RgbaImage, kernel: u32) -> RgbaImage {
    let radius = (kernel / 2) as usize;
    let horizontal = box_pass(src, radius, true);
    box_pass(&horizontal, radius, false)
}

fn box_pass(src: &RgbaImage, radius: usize, horizontal: bool) -> RgbaImage {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (lines, len) = if horizontal {
        (height, width)
    } else {
        (width, height)
    };

    let mut out = RgbaImage::new(src.width(), src.height());
    let mut prefix = vec![[0u32; 4]; len + 1];

    for line in 0..lines {
        let coords = |i: usize| -> (u32, u32) {
            if horizontal {
                (i as u32, line as u32)
            } else {
                (line as u32, i as u32)
            }
        };

        for i in 0..len {
            let (x, y) = coords(i);
            let px = src.get_pixel(x, y).0;
            for c in 0..4 {
                prefix[i + 1][c] = prefix[i][c] + u32::from(px[c]);
            }
        }

        for i in 0..len {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(len);
            let count = (hi - lo) as u32;
            let mut px = [0u8; 4];
            for c in 0..4 {
                let total = prefix[hi][c] - prefix[lo][c];
                px[c] = ((total + count / 2) / count) as u8;
            }
            let (x, y) = coords(i);
            out.put_pixel(x, y, Rgba(px));
        }
    }

    out
}
