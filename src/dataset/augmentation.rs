//! Random Affine Augmentation
//!
//! Geometric augmentation for the training feed: rotation, shift, shear,
//! per-axis zoom and horizontal flip, composed into one affine transform
//! around the image center and applied with bilinear sampling.
//!
//! The transform maps every *output* pixel `(row, col)` to a location in the
//! *input* image. Locations that fall outside the input are resolved with the
//! policy's [`FillMode`].
//!
//! Validation and inference never augment.

use image::RgbImage;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// How pixels outside the source image are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    /// Repeat the closest edge pixel
    #[default]
    Nearest,
    /// Use `cval` for every channel
    Constant,
}

/// Ranges the random transform is drawn from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationPolicy {
    /// Rotation in degrees, drawn from `[-r, r]`
    pub rotation_range: f64,
    /// Horizontal shift as a fraction of the width
    pub width_shift_range: f64,
    /// Vertical shift as a fraction of the height
    pub height_shift_range: f64,
    /// Shear angle in degrees, drawn from `[-s, s]`
    pub shear_range: f64,
    /// Per-axis zoom drawn from `[1 - z, 1 + z]`
    pub zoom_range: f64,
    /// Mirror left/right with probability 0.5
    pub horizontal_flip: bool,
    pub fill_mode: FillMode,
    /// Fill value for [`FillMode::Constant`], in raw pixel units
    pub cval: f32,
}

impl Default for AugmentationPolicy {
    fn default() -> Self {
        Self {
            rotation_range: 40.0,
            width_shift_range: 0.2,
            height_shift_range: 0.2,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
            fill_mode: FillMode::Nearest,
            cval: 0.0,
        }
    }
}

impl AugmentationPolicy {
    /// A policy that leaves every image untouched
    pub fn identity() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
            fill_mode: FillMode::Nearest,
            cval: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let ranges = [
            ("rotation_range", self.rotation_range),
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
            ("shear_range", self.shear_range),
            ("zoom_range", self.zoom_range),
        ];
        for (name, value) in ranges {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number", name));
            }
        }
        if self.zoom_range >= 1.0 {
            return Err("zoom_range must be below 1.0".to_string());
        }
        Ok(())
    }

    /// Draw one set of transform parameters for an image of `rows x cols`
    pub fn sample(&self, rows: usize, cols: usize, rng: &mut ChaCha8Rng) -> AffineParams {
        let theta = symmetric(rng, self.rotation_range);
        let tx = symmetric(rng, self.height_shift_range) * rows as f64;
        let ty = symmetric(rng, self.width_shift_range) * cols as f64;
        let shear = symmetric(rng, self.shear_range);

        let (zx, zy) = if self.zoom_range > 0.0 {
            let lo = 1.0 - self.zoom_range;
            let hi = 1.0 + self.zoom_range;
            (rng.gen_range(lo..hi), rng.gen_range(lo..hi))
        } else {
            (1.0, 1.0)
        };

        let flip_horizontal = self.horizontal_flip && rng.gen::<f64>() < 0.5;

        AffineParams {
            theta,
            tx,
            ty,
            shear,
            zx,
            zy,
            flip_horizontal,
        }
    }

    /// Sample parameters and apply them in one step
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> FloatImage {
        let (width, height) = img.dimensions();
        let params = self.sample(height as usize, width as usize, rng);
        params.apply(img, self.fill_mode, self.cval)
    }
}

fn symmetric(rng: &mut ChaCha8Rng, range: f64) -> f64 {
    if range > 0.0 {
        rng.gen_range(-range..range)
    } else {
        0.0
    }
}

/// One concrete random transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// Rotation in degrees
    pub theta: f64,
    /// Shift along rows, in pixels
    pub tx: f64,
    /// Shift along columns, in pixels
    pub ty: f64,
    /// Shear in degrees
    pub shear: f64,
    /// Zoom along rows
    pub zx: f64,
    /// Zoom along columns
    pub zy: f64,
    pub flip_horizontal: bool,
}

impl AffineParams {
    pub fn identity() -> Self {
        Self {
            theta: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear: 0.0,
            zx: 1.0,
            zy: 1.0,
            flip_horizontal: false,
        }
    }

    /// Output-to-input matrix in `(row, col, 1)` homogeneous coordinates,
    /// centered on the image
    pub fn matrix(&self, rows: usize, cols: usize) -> [[f64; 3]; 3] {
        let theta = self.theta.to_radians();
        let shear = self.shear.to_radians();

        let rotation = [
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let shift = [[1.0, 0.0, self.tx], [0.0, 1.0, self.ty], [0.0, 0.0, 1.0]];
        let shear = [
            [1.0, -shear.sin(), 0.0],
            [0.0, shear.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let zoom = [[self.zx, 0.0, 0.0], [0.0, self.zy, 0.0], [0.0, 0.0, 1.0]];

        let transform = matmul(&matmul(&matmul(&rotation, &shift), &shear), &zoom);

        let o_r = rows as f64 / 2.0 - 0.5;
        let o_c = cols as f64 / 2.0 - 0.5;
        let offset = [[1.0, 0.0, o_r], [0.0, 1.0, o_c], [0.0, 0.0, 1.0]];
        let reset = [[1.0, 0.0, -o_r], [0.0, 1.0, -o_c], [0.0, 0.0, 1.0]];

        matmul(&matmul(&offset, &transform), &reset)
    }

    /// Warp an image with these parameters
    pub fn apply(&self, img: &RgbImage, fill_mode: FillMode, cval: f32) -> FloatImage {
        let source = FloatImage::from_rgb(img);
        let (rows, cols) = (source.height, source.width);
        let m = self.matrix(rows, cols);

        let mut out = FloatImage::zeros(rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let src_r = m[0][0] * r as f64 + m[0][1] * c as f64 + m[0][2];
                let src_c = m[1][0] * r as f64 + m[1][1] * c as f64 + m[1][2];
                let pixel = source.bilinear_sample(src_r, src_c, fill_mode, cval);

                let dst_c = if self.flip_horizontal { cols - 1 - c } else { c };
                out.set(r, dst_c, pixel);
            }
        }
        out
    }
}

fn matmul(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3]) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Interleaved RGB pixels as `f32`, row-major `[H, W, 3]`
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl FloatImage {
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![0.0; height * width * 3],
        }
    }

    pub fn from_rgb(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            height: height as usize,
            width: width as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    pub fn get(&self, row: usize, col: usize) -> [f32; 3] {
        let i = (row * self.width + col) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    fn set(&mut self, row: usize, col: usize, pixel: [f32; 3]) {
        let i = (row * self.width + col) * 3;
        self.data[i..i + 3].copy_from_slice(&pixel);
    }

    fn fetch(&self, row: i64, col: i64, fill_mode: FillMode, cval: f32) -> [f32; 3] {
        let max_r = self.height as i64 - 1;
        let max_c = self.width as i64 - 1;
        match fill_mode {
            FillMode::Nearest => self.get(row.clamp(0, max_r) as usize, col.clamp(0, max_c) as usize),
            FillMode::Constant => {
                if row < 0 || col < 0 || row > max_r || col > max_c {
                    [cval; 3]
                } else {
                    self.get(row as usize, col as usize)
                }
            }
        }
    }

    /// Bilinear interpolation at a fractional `(row, col)`
    pub fn bilinear_sample(&self, row: f64, col: f64, fill_mode: FillMode, cval: f32) -> [f32; 3] {
        let (row, col) = match fill_mode {
            FillMode::Nearest => (
                row.clamp(0.0, (self.height - 1) as f64),
                col.clamp(0.0, (self.width - 1) as f64),
            ),
            FillMode::Constant => (row, col),
        };

        let r0 = row.floor();
        let c0 = col.floor();
        let fr = (row - r0) as f32;
        let fc = (col - c0) as f32;
        let (r0, c0) = (r0 as i64, c0 as i64);

        let p00 = self.fetch(r0, c0, fill_mode, cval);
        let p01 = self.fetch(r0, c0 + 1, fill_mode, cval);
        let p10 = self.fetch(r0 + 1, c0, fill_mode, cval);
        let p11 = self.fetch(r0 + 1, c0 + 1, fill_mode, cval);

        let mut result = [0.0f32; 3];
        for ch in 0..3 {
            result[ch] = p00[ch] * (1.0 - fr) * (1.0 - fc)
                + p01[ch] * (1.0 - fr) * fc
                + p10[ch] * fr * (1.0 - fc)
                + p11[ch] * fr * fc;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;

    fn create_test_image(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let r = ((x * 255) / width.max(1)) as u8;
                let g = ((y * 255) / height.max(1)) as u8;
                img.put_pixel(x, y, Rgb([r, g, 128]));
            }
        }
        img
    }

    #[test]
    fn test_identity_transform_preserves_pixels() {
        let img = create_test_image(12, 9);
        let out = AffineParams::identity().apply(&img, FillMode::Nearest, 0.0);

        assert_eq!(out, FloatImage::from_rgb(&img));
    }

    #[test]
    fn test_flip_mirrors_columns() {
        let img = create_test_image(10, 4);
        let params = AffineParams {
            flip_horizontal: true,
            ..AffineParams::identity()
        };
        let out = params.apply(&img, FillMode::Nearest, 0.0);
        let src = FloatImage::from_rgb(&img);

        for r in 0..4 {
            for c in 0..10 {
                assert_eq!(out.get(r, c), src.get(r, 9 - c));
            }
        }
    }

    #[test]
    fn test_shift_fill_modes() {
        let img = RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]));
        let params = AffineParams {
            tx: 4.0,
            ..AffineParams::identity()
        };

        let nearest = params.apply(&img, FillMode::Nearest, 0.0);
        assert!(nearest.data.iter().all(|&v| (v - 200.0).abs() < 1e-4));

        let constant = params.apply(&img, FillMode::Constant, 0.0);
        // rows 0..4 read rows 4..8 of the source, the rest falls outside
        assert_eq!(constant.get(0, 0), [200.0; 3]);
        assert_eq!(constant.get(7, 3), [0.0; 3]);
    }

    #[test]
    fn test_sampled_params_stay_in_range() {
        let policy = AugmentationPolicy::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..200 {
            let p = policy.sample(100, 50, &mut rng);
            assert!(p.theta.abs() <= 40.0);
            assert!(p.tx.abs() <= 20.0);
            assert!(p.ty.abs() <= 10.0);
            assert!(p.shear.abs() <= 0.2);
            assert!((0.8..=1.2).contains(&p.zx));
            assert!((0.8..=1.2).contains(&p.zy));
        }
    }

    #[test]
    fn test_augment_stays_in_pixel_range() {
        let img = create_test_image(32, 32);
        let policy = AugmentationPolicy::default();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        for _ in 0..5 {
            let out = policy.augment(&img, &mut rng);
            assert_eq!((out.height, out.width), (32, 32));
            assert!(out.data.iter().all(|&v| (0.0..=255.0).contains(&v)));
        }
    }

    #[test]
    fn test_augment_differs_across_seeds() {
        let img = create_test_image(32, 32);
        let policy = AugmentationPolicy::default();

        let a = policy.augment(&img, &mut ChaCha8Rng::seed_from_u64(1));
        let b = policy.augment(&img, &mut ChaCha8Rng::seed_from_u64(2));
        let a_again = policy.augment(&img, &mut ChaCha8Rng::seed_from_u64(1));

        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[test]
    fn test_identity_policy_draws_identity_params() {
        let policy = AugmentationPolicy::identity();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(policy.sample(10, 10, &mut rng), AffineParams::identity());
    }

    #[test]
    fn test_policy_validation() {
        assert!(AugmentationPolicy::default().validate().is_ok());
        let bad = AugmentationPolicy {
            zoom_range: 1.5,
            ..AugmentationPolicy::default()
        };
        assert!(bad.validate().is_err());
    }
}
