//! Depth and color image buffers.

use crate::error::{FusionError, Result};

/// Range, in meters, mapped onto one period of the depth preview ramp.
pub const DEPTH_VISUALIZATION_RANGE: f32 = 4.0;

/// A raw depth frame as delivered by the camera.
#[derive(Debug, Clone)]
pub struct DepthFrame {
    /// Depth samples in millimeters, row-major. Zero means no reading.
    pub samples: Vec<u16>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Device timestamp in milliseconds.
    pub timestamp: i64,
}

impl DepthFrame {
    /// Creates a depth frame, checking that the sample count matches the size.
    pub fn new(samples: Vec<u16>, width: u32, height: u32, timestamp: i64) -> Result<Self> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(FusionError::SizeMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            samples,
            width,
            height,
            timestamp,
        })
    }
}

/// A packed 32-bit color image (`0xAARRGGBB`, little-endian BGRA in memory).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Packed pixels, row-major.
    pub pixels: Vec<u32>,
}

impl ColorImage {
    /// Creates a fully transparent image.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Creates an image from packed pixels.
    pub fn from_pixels(pixels: Vec<u32>, width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(FusionError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Creates an image from BGRA bytes, four per pixel.
    pub fn from_bgra_bytes(bytes: &[u8], width: u32, height: u32) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if bytes.len() != expected {
            return Err(FusionError::SizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let pixels = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Returns the pixel data as raw bytes, e.g. for upload to a texture.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Returns the pixel at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Mirrors the image left-right in place.
    pub fn mirror_horizontal(&mut self) {
        if self.width == 0 {
            return;
        }
        for row in self.pixels.chunks_exact_mut(self.width as usize) {
            row.reverse();
        }
    }
}

/// A depth image in meters, after clipping. Invalid samples are `0.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthFloatImage {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Depth in meters, row-major.
    pub data: Vec<f32>,
}

impl DepthFloatImage {
    /// Creates an image with every sample invalid.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    /// Converts a raw depth frame to meters.
    ///
    /// Samples outside `[min_clip, max_clip]` become `0.0`. With `mirror`
    /// set, each row is flipped left-right.
    pub fn from_raw(frame: &DepthFrame, min_clip: f32, max_clip: f32, mirror: bool) -> Self {
        let mut data: Vec<f32> = frame
            .samples
            .iter()
            .map(|&mm| {
                let meters = f32::from(mm) / 1000.0;
                if mm == 0 || meters < min_clip || meters > max_clip {
                    0.0
                } else {
                    meters
                }
            })
            .collect();

        if mirror && frame.width > 0 {
            for row in data.chunks_exact_mut(frame.width as usize) {
                row.reverse();
            }
        }

        Self {
            width: frame.width,
            height: frame.height,
            data,
        }
    }

    /// Returns the depth at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get((y * self.width + x) as usize).copied()
    }

    /// Number of valid (non-zero) samples.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&d| d > 0.0).count()
    }

    /// Renders the depth as a repeating grey ramp for preview.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn visualize(&self) -> ColorImage {
        let one_over_range = 1.0 / DEPTH_VISUALIZATION_RANGE;
        let pixels = self
            .data
            .iter()
            .map(|&depth| {
                let intensity = if depth >= 0.0 {
                    ((depth * one_over_range * 256.0) as i32 % 256) as u32
                } else {
                    0
                };
                (intensity << 16) | (intensity << 8) | intensity
            })
            .collect();
        ColorImage {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_conversion_clips() {
        let frame = DepthFrame::new(vec![0, 300, 1000, 9000], 4, 1, 0).unwrap();
        let depth = DepthFloatImage::from_raw(&frame, 0.35, 8.0, false);
        assert_eq!(depth.data, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(depth.valid_count(), 1);
    }

    #[test]
    fn test_depth_conversion_mirrors_rows() {
        let frame = DepthFrame::new(vec![1000, 2000, 3000, 4000], 2, 2, 0).unwrap();
        let depth = DepthFloatImage::from_raw(&frame, 0.0, 8.0, true);
        assert_eq!(depth.data, vec![2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_frame_size_mismatch() {
        let err = DepthFrame::new(vec![0; 3], 2, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            FusionError::SizeMismatch {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_color_mirror_and_bytes() {
        let mut image = ColorImage::from_bgra_bytes(&[1, 0, 0, 0, 2, 0, 0, 0], 2, 1).unwrap();
        assert_eq!(image.pixels, vec![1, 2]);
        image.mirror_horizontal();
        assert_eq!(image.pixels, vec![2, 1]);
        assert_eq!(image.as_bytes(), &[2, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_visualize_ramp() {
        let depth = DepthFloatImage {
            width: 2,
            height: 1,
            data: vec![0.0, 2.0],
        };
        let vis = depth.visualize();
        assert_eq!(vis.pixels[0], 0);
        assert_eq!(vis.pixels[1], 0x0080_8080);
    }
}
