// THEORY:
// The `StampExtractor` cuts the fixed-size patch around a hit out of the frame and
// seals it, with its metadata, into a `Stamp`.
//
// Every stamp is the same size no matter where the hit landed. Near an edge the
// part of the square that falls outside the frame is filled with zeros, and each
// axis is clipped on its own, so a corner hit is padded on two sides.
//
// The copy walks the frame buffer in its own order: patch rows are frame rows and
// patch columns are frame columns. Nothing is rotated or flipped.

use crate::core_modules::frame::{Frame, PixelIndex};
use crate::core_modules::pixel::CHANNELS;
use crate::core_modules::stamp::{PATCH_BYTES, STAMP_SIZE, STAMP_WIDTH, Stamp};
use crate::error::{CosmicError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct StampExtractor;

impl StampExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        frame: &Frame,
        pixel_index: PixelIndex,
        elapsed_ms: u32,
        exposure_count: u32,
    ) -> Result<Stamp> {
        extract(frame, pixel_index, elapsed_ms, exposure_count)
    }
}

/// Copies the patch centred on `pixel_index` into a new stamp.
pub fn extract(frame: &Frame, pixel_index: PixelIndex, elapsed_ms: u32, exposure_count: u32) -> Result<Stamp> {
    if pixel_index as usize >= frame.pixel_count() {
        return Err(CosmicError::PixelOutOfBounds {
            index: pixel_index,
            pixel_count: frame.pixel_count(),
        });
    }

    let (centre_x, centre_y) = frame.coordinates(pixel_index);
    let (width, height) = (frame.width() as i64, frame.height() as i64);
    let row_bytes = width as usize * CHANNELS;
    let data = frame.as_bytes();
    let mut patch = Box::new([0u8; PATCH_BYTES]);

    for row in 0..STAMP_WIDTH {
        let y = centre_y as i64 + row as i64 - STAMP_SIZE as i64;
        if !(0..height).contains(&y) {
            continue;
        }
        // Columns of this patch row that land inside the frame.
        let first_x = centre_x as i64 - STAMP_SIZE as i64;
        let start_column = (-first_x).max(0) as usize;
        let end_column = (width - first_x).min(STAMP_WIDTH as i64) as usize;
        if start_column >= end_column {
            continue;
        }

        let source_start = y as usize * row_bytes + (first_x + start_column as i64) as usize * CHANNELS;
        let length = (end_column - start_column) * CHANNELS;
        let target_start = (row * STAMP_WIDTH + start_column) * CHANNELS;
        patch[target_start..target_start + length].copy_from_slice(&data[source_start..source_start + length]);
    }

    Ok(Stamp::new(elapsed_ms, pixel_index, exposure_count, patch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel::Pixel;

    /// A frame where every pixel encodes its own position.
    fn numbered(width: u32, height: u32) -> Frame {
        let mut frame = Frame::black(width, height);
        for y in 0..height {
            for x in 0..width {
                frame.set_pixel(x, y, Pixel::new(x as u8 + 1, y as u8 + 1, 7)).unwrap();
            }
        }
        frame
    }

    #[test]
    fn interior_patch_copies_neighbourhood_in_sensor_order() {
        let frame = numbered(40, 30);
        let stamp = extract(&frame, 12 * 40 + 20, 33, 4).unwrap();
        assert_eq!(stamp.patch().len(), PATCH_BYTES);
        assert_eq!(stamp.elapsed_ms(), 33);
        assert_eq!(stamp.exposure_count(), 4);
        assert_eq!(stamp.max_pixel_index(), 12 * 40 + 20);
        // First byte triple is the top-left of the neighbourhood, then along the row.
        assert_eq!(stamp.patch_pixel(0, 0), Some(Pixel::new(14, 6, 7)));
        assert_eq!(stamp.patch_pixel(1, 0), Some(Pixel::new(15, 6, 7)));
        assert_eq!(stamp.patch_pixel(0, 1), Some(Pixel::new(14, 7, 7)));
        assert_eq!(stamp.centre_pixel(), Pixel::new(21, 13, 7));
        assert_eq!(stamp.patch_pixel(14, 14), Some(Pixel::new(28, 20, 7)));
    }

    #[test]
    fn top_left_corner_is_zero_padded_on_both_axes() {
        let frame = numbered(20, 20);
        let stamp = extract(&frame, 0, 0, 0).unwrap();
        assert_eq!(stamp.patch().len(), PATCH_BYTES);
        assert_eq!(stamp.centre_pixel(), Pixel::new(1, 1, 7));
        assert_eq!(stamp.patch_pixel(6, 7), Some(Pixel::BLACK));
        assert_eq!(stamp.patch_pixel(7, 6), Some(Pixel::BLACK));
        assert_eq!(stamp.patch_pixel(0, 0), Some(Pixel::BLACK));
        assert_eq!(stamp.patch_pixel(14, 14), Some(Pixel::new(8, 8, 7)));
    }

    #[test]
    fn bottom_right_corner_is_zero_padded_on_both_axes() {
        let frame = numbered(20, 10);
        let stamp = extract(&frame, 10 * 20 - 1, 0, 0).unwrap();
        assert_eq!(stamp.centre_pixel(), Pixel::new(20, 10, 7));
        assert_eq!(stamp.patch_pixel(8, 7), Some(Pixel::BLACK));
        assert_eq!(stamp.patch_pixel(7, 8), Some(Pixel::BLACK));
        assert_eq!(stamp.patch_pixel(0, 0), Some(Pixel::new(13, 3, 7)));
    }

    #[test]
    fn frame_smaller_than_patch_still_yields_full_stamp() {
        let frame = numbered(3, 2);
        let stamp = extract(&frame, 4, 0, 0).unwrap();
        assert_eq!(stamp.patch().len(), PATCH_BYTES);
        assert_eq!(stamp.centre_pixel(), Pixel::new(2, 2, 7));
        assert_eq!(stamp.patch_pixel(6, 6), Some(Pixel::new(1, 1, 7)));
        assert_eq!(stamp.patch_pixel(9, 7), Some(Pixel::BLACK));
    }

    #[test]
    fn index_outside_frame_is_rejected() {
        let frame = Frame::black(4, 4);
        assert_eq!(
            StampExtractor::new().extract(&frame, 16, 0, 0),
            Err(CosmicError::PixelOutOfBounds {
                index: 16,
                pixel_count: 16
            })
        );
    }
}
