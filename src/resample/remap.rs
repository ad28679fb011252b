//! Per-pixel lookup tables and bilinear resampling.

use crate::camera::{Intrinsics, PinholeModel, Resolution};
use image::{DynamicImage, ImageBuffer, Luma, Pixel, Primitive};
use nalgebra::Vector2;
use num_traits::{NumCast, ToPrimitive};

use super::ResampleError;

/// Single channel `f32` grid holding one source coordinate per output pixel.
pub type CoordinateGrid = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Source-image coordinates for every pixel of the output image.
///
/// `map_x` holds the source column and `map_y` the source row. Both grids have
/// the size of the output image.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapTable {
    pub map_x: CoordinateGrid,
    pub map_y: CoordinateGrid,
}

impl RemapTable {
    /// Builds the table that undistorts images of `model` into an ideal
    /// pinhole camera with `new_intrinsics` and `size`.
    ///
    /// Every output pixel is back-projected through `new_intrinsics`, then
    /// distorted and projected with the source calibration.
    pub fn undistort_rectify(
        model: &PinholeModel,
        new_intrinsics: &Intrinsics,
        size: &Resolution,
    ) -> Self {
        let mut map_x = CoordinateGrid::new(size.width, size.height);
        let mut map_y = CoordinateGrid::new(size.width, size.height);

        for v in 0..size.height {
            let y = (v as f64 - new_intrinsics.cy) / new_intrinsics.fy;
            for u in 0..size.width {
                let x = (u as f64 - new_intrinsics.cx) / new_intrinsics.fx;
                let source = model.normalized_to_pixel(&Vector2::new(x, y));
                map_x.put_pixel(u, v, Luma([source.x as f32]));
                map_y.put_pixel(u, v, Luma([source.y as f32]));
            }
        }

        RemapTable { map_x, map_y }
    }

    pub fn width(&self) -> u32 {
        self.map_x.width()
    }

    pub fn height(&self) -> u32 {
        self.map_x.height()
    }

    /// Source coordinate `(x, y)` sampled for the output pixel `(u, v)`.
    pub fn source_of(&self, u: u32, v: u32) -> (f32, f32) {
        (self.map_x.get_pixel(u, v)[0], self.map_y.get_pixel(u, v)[0])
    }
}

/// Resamples `image` through `table` with bilinear interpolation.
///
/// Pixels sampled outside the source image read as zero, so borders fade to
/// black. The output keeps the channel layout and bit depth of the input.
///
/// # Errors
///
/// * [`ResampleError::UnsupportedImage`] for pixel layouts other than
///   8/16-bit L, LA, RGB, RGBA and 32-bit float RGB, RGBA.
pub fn remap(image: &DynamicImage, table: &RemapTable) -> Result<DynamicImage, ResampleError> {
    let remapped = match image {
        DynamicImage::ImageLuma8(buffer) => DynamicImage::ImageLuma8(remap_buffer(buffer, table)),
        DynamicImage::ImageLumaA8(buffer) => DynamicImage::ImageLumaA8(remap_buffer(buffer, table)),
        DynamicImage::ImageRgb8(buffer) => DynamicImage::ImageRgb8(remap_buffer(buffer, table)),
        DynamicImage::ImageRgba8(buffer) => DynamicImage::ImageRgba8(remap_buffer(buffer, table)),
        DynamicImage::ImageLuma16(buffer) => DynamicImage::ImageLuma16(remap_buffer(buffer, table)),
        DynamicImage::ImageLumaA16(buffer) => {
            DynamicImage::ImageLumaA16(remap_buffer(buffer, table))
        }
        DynamicImage::ImageRgb16(buffer) => DynamicImage::ImageRgb16(remap_buffer(buffer, table)),
        DynamicImage::ImageRgba16(buffer) => DynamicImage::ImageRgba16(remap_buffer(buffer, table)),
        DynamicImage::ImageRgb32F(buffer) => DynamicImage::ImageRgb32F(remap_buffer(buffer, table)),
        DynamicImage::ImageRgba32F(buffer) => {
            DynamicImage::ImageRgba32F(remap_buffer(buffer, table))
        }
        other => {
            return Err(ResampleError::UnsupportedImage(format!(
                "{:?}",
                other.color()
            )))
        }
    };
    Ok(remapped)
}

fn remap_buffer<P>(
    source: &ImageBuffer<P, Vec<P::Subpixel>>,
    table: &RemapTable,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel,
{
    let channels = P::CHANNEL_COUNT as usize;
    let mut output: ImageBuffer<P, Vec<P::Subpixel>> =
        ImageBuffer::new(table.width(), table.height());
    let mut accumulator = vec![0.0_f32; channels];

    for (u, v, pixel) in output.enumerate_pixels_mut() {
        let (x, y) = table.source_of(u, v);
        sample_bilinear(source, x, y, &mut accumulator);
        for (channel, value) in pixel.channels_mut().iter_mut().zip(accumulator.iter()) {
            *channel = to_subpixel(*value);
        }
    }

    output
}

/// Bilinear sample at `(x, y)` with a constant zero border.
fn sample_bilinear<P>(
    source: &ImageBuffer<P, Vec<P::Subpixel>>,
    x: f32,
    y: f32,
    accumulator: &mut [f32],
) where
    P: Pixel,
{
    accumulator.iter_mut().for_each(|value| *value = 0.0);
    if !x.is_finite() || !y.is_finite() {
        return;
    }

    let (width, height) = source.dimensions();
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = x - x0;
    let wy = y - y0;

    let taps = [
        (x0, y0, (1.0 - wx) * (1.0 - wy)),
        (x0 + 1.0, y0, wx * (1.0 - wy)),
        (x0, y0 + 1.0, (1.0 - wx) * wy),
        (x0 + 1.0, y0 + 1.0, wx * wy),
    ];

    for (tx, ty, weight) in taps {
        if weight == 0.0 || tx < 0.0 || ty < 0.0 || tx >= width as f32 || ty >= height as f32 {
            continue;
        }
        let pixel = source.get_pixel(tx as u32, ty as u32);
        for (value, channel) in accumulator.iter_mut().zip(pixel.channels()) {
            *value += weight * channel.to_f32().unwrap_or(0.0);
        }
    }
}

/// Integer channels are rounded to nearest and saturated; float channels are
/// stored as computed.
fn to_subpixel<S: Primitive>(value: f32) -> S {
    let max = S::DEFAULT_MAX_VALUE.to_f32().unwrap_or(f32::MAX);
    let min = S::DEFAULT_MIN_VALUE.to_f32().unwrap_or(f32::MIN);
    let value = if max > 1.0 {
        value.round().clamp(min, max)
    } else {
        value
    };
    NumCast::from(value).unwrap_or(S::DEFAULT_MIN_VALUE)
}
