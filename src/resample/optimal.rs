//! Optimal new camera matrix for an undistorted image.
//!
//! A 9x9 grid of pixels spread over the distorted source image is undistorted
//! into normalized coordinates. Two rectangles bound the result:
//!
//! * the *outer* rectangle encloses every undistorted sample, so no source
//!   pixel is lost (black borders appear);
//! * the *inner* rectangle is the largest axis-aligned box inside the
//!   undistorted image border, so every output pixel is valid.
//!
//! Each rectangle defines a camera matrix that maps it onto the new image
//! size; `alpha` interpolates between the inner (0) and outer (1) solutions.

use crate::camera::{Intrinsics, PinholeModel, Resolution};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

const GRID_SIZE: u32 = 9;

/// Integer rectangle of valid pixels in the undistorted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRoi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl Bounds {
    fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    fn height(&self) -> f64 {
        self.y1 - self.y0
    }
}

/// Undistorts the sample grid of `model` and returns `(inner, outer)` in
/// normalized coordinates.
fn undistorted_bounds(model: &PinholeModel) -> (Bounds, Bounds) {
    let width = model.resolution.width as f64;
    let height = model.resolution.height as f64;
    let last = (GRID_SIZE - 1) as f64;

    let mut inner = Bounds {
        x0: f64::MIN,
        y0: f64::MIN,
        x1: f64::MAX,
        y1: f64::MAX,
    };
    let mut outer = Bounds {
        x0: f64::MAX,
        y0: f64::MAX,
        x1: f64::MIN,
        y1: f64::MIN,
    };

    for row in 0..GRID_SIZE {
        for col in 0..GRID_SIZE {
            let pixel = Vector2::new(col as f64 * width / last, row as f64 * height / last);
            let p = model.pixel_to_normalized(&pixel);

            outer.x0 = outer.x0.min(p.x);
            outer.x1 = outer.x1.max(p.x);
            outer.y0 = outer.y0.min(p.y);
            outer.y1 = outer.y1.max(p.y);

            if col == 0 {
                inner.x0 = inner.x0.max(p.x);
            }
            if col == GRID_SIZE - 1 {
                inner.x1 = inner.x1.min(p.x);
            }
            if row == 0 {
                inner.y0 = inner.y0.max(p.y);
            }
            if row == GRID_SIZE - 1 {
                inner.y1 = inner.y1.min(p.y);
            }
        }
    }

    (inner, outer)
}

/// Camera intrinsics mapping `bounds` onto `[0, size - 1]` on both axes.
fn fit_bounds(bounds: &Bounds, new_size: &Resolution) -> Intrinsics {
    let fx = (new_size.width as f64 - 1.0) / bounds.width();
    let fy = (new_size.height as f64 - 1.0) / bounds.height();
    Intrinsics {
        fx,
        fy,
        cx: -fx * bounds.x0,
        cy: -fy * bounds.y0,
    }
}

/// Computes the new camera intrinsics for an undistorted image of `new_size`.
///
/// Returns the intrinsics and the rectangle of valid pixels in the new image.
/// The principal point is not forced to the image center.
///
/// # Arguments
///
/// * `model` - Calibration of the distorted source images.
/// * `new_size` - Size of the undistorted output image.
/// * `alpha` - 0 keeps only valid pixels, 1 keeps every source pixel.
pub fn optimal_new_intrinsics(
    model: &PinholeModel,
    new_size: &Resolution,
    alpha: f64,
) -> (Intrinsics, PixelRoi) {
    let (inner, outer) = undistorted_bounds(model);

    let k_inner = fit_bounds(&inner, new_size);
    let k_outer = fit_bounds(&outer, new_size);

    let blend = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
    let intrinsics = Intrinsics {
        fx: blend(k_inner.fx, k_outer.fx),
        fy: blend(k_inner.fy, k_outer.fy),
        cx: blend(k_inner.cx, k_outer.cx),
        cy: blend(k_inner.cy, k_outer.cy),
    };

    let roi = valid_pixel_roi(&inner, &intrinsics, new_size);

    (intrinsics, roi)
}

/// Maps the inner rectangle through `intrinsics`, rounds to whole pixels and
/// clips it to the image.
fn valid_pixel_roi(inner: &Bounds, intrinsics: &Intrinsics, size: &Resolution) -> PixelRoi {
    let x = (intrinsics.fx * inner.x0 + intrinsics.cx).round();
    let y = (intrinsics.fy * inner.y0 + intrinsics.cy).round();
    let w = (intrinsics.fx * inner.width()).round();
    let h = (intrinsics.fy * inner.height()).round();

    let x0 = x.clamp(0.0, size.width as f64);
    let y0 = y.clamp(0.0, size.height as f64);
    let x1 = (x + w).clamp(x0, size.width as f64);
    let y1 = (y + h).clamp(y0, size.height as f64);

    PixelRoi {
        x: x0 as u32,
        y: y0 as u32,
        width: (x1 - x0) as u32,
        height: (y1 - y0) as u32,
    }
}
