//! Summed-area tables for cascade evaluation
//!
//! All tables are `(width + 1) x (height + 1)` with a zero first row and
//! column, so the sum of the upright rectangle `(x, y, w, h)` is
//! `S(x, y) - S(x + w, y) - S(x, y + h) + S(x + w, y + h)`.
//!
//! The tilted table follows the 45-degree rotated layout:
//! `T(X, Y)` is the sum of every pixel `(x, y)` with `y < Y` and
//! `|x - X + 1| <= Y - y - 1`, i.e. the upward triangle whose apex is the
//! pixel `(X - 1, Y - 1)`.
//!
//! The sum and tilted tables are 32-bit and wrap on overflow. Corner
//! differences are taken with wrapping arithmetic, so a rectangle sum is
//! exact whenever the rectangle itself fits in 32 bits, which every
//! detection window does. Squared sums stay 64-bit.

use image::GrayImage;

/// Sum, squared-sum and (optionally) tilted-sum tables of a grayscale image
pub struct IntegralImage {
    width: usize,
    height: usize,
    sum: Vec<i32>,
    sqsum: Vec<i64>,
    tilted: Option<Vec<i32>>,
}

impl IntegralImage {
    /// Build the tables. The tilted table is only built when asked for,
    /// since most cascades never use rotated features.
    pub fn new(gray: &GrayImage, with_tilted: bool) -> Self {
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let stride = width + 1;
        let pixels = gray.as_raw();

        let mut sum = vec![0i32; stride * (height + 1)];
        let mut sqsum = vec![0i64; stride * (height + 1)];

        for y in 0..height {
            let mut row_sum = 0i32;
            let mut row_sqsum = 0i64;
            for x in 0..width {
                let v = pixels[y * width + x];
                row_sum = row_sum.wrapping_add(i32::from(v));
                row_sqsum += i64::from(v) * i64::from(v);
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride].wrapping_add(row_sum);
                sqsum[idx] = sqsum[idx - stride] + row_sqsum;
            }
        }

        let tilted = with_tilted.then(|| tilted_table(pixels, width, height));

        Self {
            width,
            height,
            sum,
            sqsum,
            tilted,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Sum of pixel values in the upright rectangle
    #[inline]
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        let stride = self.width + 1;
        let t = &self.sum;
        let total = t[y * stride + x]
            .wrapping_sub(t[y * stride + x + w])
            .wrapping_sub(t[(y + h) * stride + x])
            .wrapping_add(t[(y + h) * stride + x + w]);
        i64::from(total)
    }

    /// Sum of squared pixel values in the upright rectangle
    #[inline]
    pub fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        let stride = self.width + 1;
        let t = &self.sqsum;
        t[y * stride + x] - t[y * stride + x + w] - t[(y + h) * stride + x]
            + t[(y + h) * stride + x + w]
    }

    /// Sum over the rectangle rotated by 45 degrees whose top corner is at
    /// `(x, y)`, extending `w` down-right and `h` down-left.
    ///
    /// Returns 0 when the tilted table was not built. Requires `x >= h`.
    #[inline]
    pub fn tilted_sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        let Some(t) = self.tilted.as_deref() else {
            return 0;
        };
        let stride = self.width + 1;
        let total = t[y * stride + x]
            .wrapping_sub(t[(y + h) * stride + x - h])
            .wrapping_sub(t[(y + w) * stride + x + w])
            .wrapping_add(t[(y + w + h) * stride + x + w - h]);
        i64::from(total)
    }
}

/// Build the tilted table from anti-diagonal running sums.
///
/// `D(x, y)` sums the pixels on the up-right diagonal starting at `(x, y)`.
/// Then `T(X, Y) = T(X-1, Y-1) + D(X-1, Y-1) + D(X-1, Y-2)` for `X >= 1`,
/// and the left column is `T(0, Y) = sum of D(0, j) for j <= Y - 2`.
fn tilted_table(pixels: &[u8], width: usize, height: usize) -> Vec<i32> {
    let stride = width + 1;
    let mut diag = vec![0i32; width * height];
    for y in 0..height {
        for x in 0..width {
            let mut v = i32::from(pixels[y * width + x]);
            if y > 0 && x + 1 < width {
                v = v.wrapping_add(diag[(y - 1) * width + x + 1]);
            }
            diag[y * width + x] = v;
        }
    }

    let mut tilted = vec![0i32; stride * (height + 1)];
    let mut left_column = 0i32;
    for y in 1..=height {
        if y >= 2 {
            left_column = left_column.wrapping_add(diag[(y - 2) * width]);
        }
        tilted[y * stride] = left_column;

        for x in 1..=width {
            let mut v = tilted[(y - 1) * stride + x - 1].wrapping_add(diag[(y - 1) * width + x - 1]);
            if y >= 2 {
                v = v.wrapping_add(diag[(y - 2) * width + x - 1]);
            }
            tilted[y * stride + x] = v;
        }
    }

    tilted
}
