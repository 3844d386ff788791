//! Reprojection of a color frame into the pixel grid of a depth frame.
//!
//! A depth image and a color image may each have been mirrored left-right
//! when stored. The mapping function works in unmirrored sensor space, so
//! every lookup undoes the mirroring of both buffers and the output lands
//! pixel-for-pixel on the stored depth image.

use std::sync::Arc;

use crate::camera::CoordinateMapping;
use crate::frame::{ColorImage, DepthFloatImage};

/// Everything needed to map one color frame, copied out of a camera slot.
///
/// The job owns its buffers so it can run on a worker thread while the
/// camera keeps delivering frames into the slot.
#[derive(Clone)]
pub struct ColorMappingJob {
    /// Depth image the output is aligned to.
    pub depth: DepthFloatImage,
    /// Whether `depth` rows are stored mirrored.
    pub depth_mirrored: bool,
    /// Color frame to sample from.
    pub color: ColorImage,
    /// Whether `color` rows are stored mirrored.
    pub color_mirrored: bool,
    /// Device coordinate mapping.
    pub mapping: Arc<dyn CoordinateMapping>,
}

impl std::fmt::Debug for ColorMappingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorMappingJob")
            .field("depth", &(self.depth.width, self.depth.height))
            .field("depth_mirrored", &self.depth_mirrored)
            .field("color", &(self.color.width, self.color.height))
            .field("color_mirrored", &self.color_mirrored)
            .finish_non_exhaustive()
    }
}

impl ColorMappingJob {
    /// Produces the color image in depth space.
    pub fn run(&self) -> ColorImage {
        map_color_to_depth(
            &self.depth,
            self.depth_mirrored,
            &self.color,
            self.color_mirrored,
            self.mapping.as_ref(),
        )
    }
}

/// Maps `color` into the pixel grid of `depth`.
///
/// Output pixels whose depth sample is invalid, or whose mapped color
/// coordinate falls outside the color frame, are zero (fully transparent).
#[allow(clippy::cast_possible_truncation)]
pub fn map_color_to_depth(
    depth: &DepthFloatImage,
    depth_mirrored: bool,
    color: &ColorImage,
    color_mirrored: bool,
    mapping: &dyn CoordinateMapping,
) -> ColorImage {
    let mut out = ColorImage::new(depth.width, depth.height);
    if depth.width == 0 || depth.height == 0 {
        return out;
    }

    let width = depth.width as usize;
    for (y, (out_row, depth_row)) in out
        .pixels
        .chunks_exact_mut(width)
        .zip(depth.data.chunks_exact(width))
        .enumerate()
    {
        map_row(
            y as u32,
            out_row,
            depth_row,
            depth_mirrored,
            color,
            color_mirrored,
            mapping,
        );
    }
    out
}

#[allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation
)]
fn map_row(
    y: u32,
    out_row: &mut [u32],
    depth_row: &[f32],
    depth_mirrored: bool,
    color: &ColorImage,
    color_mirrored: bool,
    mapping: &dyn CoordinateMapping,
) {
    let width = out_row.len();
    for (out_x, (out, &depth)) in out_row.iter_mut().zip(depth_row).enumerate() {
        if depth <= 0.0 {
            *out = 0;
            continue;
        }

        let sensor_x = if depth_mirrored {
            width - 1 - out_x
        } else {
            out_x
        };

        let (cx, cy) = mapping.depth_to_color(sensor_x as u32, y);
        if cx < 0 || cy < 0 || cx >= color.width as i32 || cy >= color.height as i32 {
            *out = 0;
            continue;
        }

        let stored_x = if color_mirrored {
            color.width - 1 - cx as u32
        } else {
            cx as u32
        };
        *out = color.get(stored_x, cy as u32).unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> ColorImage {
        let pixels = (1..=width * height).collect();
        ColorImage::from_pixels(pixels, width, height).unwrap()
    }

    fn identity(x: u32, y: u32) -> (i32, i32) {
        (x as i32, y as i32)
    }

    #[test]
    fn test_identity_mapping_copies_pixels() {
        let depth = DepthFloatImage {
            width: 3,
            height: 2,
            data: vec![1.0; 6],
        };
        let out = map_color_to_depth(&depth, false, &gradient(3, 2), false, &identity);
        assert_eq!(out.pixels, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_invalid_depth_is_transparent() {
        let depth = DepthFloatImage {
            width: 2,
            height: 1,
            data: vec![0.0, 1.0],
        };
        let out = map_color_to_depth(&depth, false, &gradient(2, 1), false, &identity);
        assert_eq!(out.pixels, vec![0, 2]);
    }

    #[test]
    fn test_out_of_bounds_is_transparent() {
        let depth = DepthFloatImage {
            width: 2,
            height: 1,
            data: vec![1.0, 1.0],
        };
        let shifted = |x: u32, y: u32| (x as i32 + 1, y as i32);
        let out = map_color_to_depth(&depth, false, &gradient(2, 1), false, &shifted);
        assert_eq!(out.pixels, vec![2, 0]);

        let negative = |_: u32, _: u32| (-1, 0);
        let out = map_color_to_depth(&depth, false, &gradient(2, 1), false, &negative);
        assert_eq!(out.pixels, vec![0, 0]);
    }

    #[test]
    fn test_mirrored_color_lines_up_with_unmirrored_depth() {
        let depth = DepthFloatImage {
            width: 3,
            height: 1,
            data: vec![1.0; 3],
        };
        let mut color = gradient(3, 1);
        color.mirror_horizontal();
        let out = map_color_to_depth(&depth, false, &color, true, &identity);
        assert_eq!(out.pixels, vec![1, 2, 3]);
    }

    #[test]
    fn test_mirrored_depth_flips_output() {
        let depth = DepthFloatImage {
            width: 3,
            height: 1,
            data: vec![1.0; 3],
        };
        let out = map_color_to_depth(&depth, true, &gradient(3, 1), false, &identity);
        assert_eq!(out.pixels, vec![3, 2, 1]);
    }

    #[test]
    fn test_job_runs_on_owned_buffers() {
        let job = ColorMappingJob {
            depth: DepthFloatImage {
                width: 2,
                height: 1,
                data: vec![1.0, 1.0],
            },
            depth_mirrored: false,
            color: gradient(2, 1),
            color_mirrored: false,
            mapping: Arc::new(identity),
        };
        let handle = std::thread::spawn(move || job.run());
        assert_eq!(handle.join().unwrap().pixels, vec![1, 2]);
    }
}
