// THEORY:
// A `Frame` is one capture from the sensor as the external frame source hands it
// over: a fixed width x height grid of interleaved RGB bytes in sensor-native,
// row-major order, plus the instant it was captured.
//
// The frame is validated once, at construction, so every downstream stage can
// index it without re-checking lengths. It never reorients or converts the data:
// stamps are cut straight out of this buffer and must keep raw sensor byte order.

use crate::core_modules::pixel::{CHANNELS, Intensity, Pixel};
use crate::error::{CosmicError, Result};
use image::{Rgb, RgbImage};
use std::time::Instant;

pub type PixelIndex = u32;

/// One RGB capture from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    /// `width * height * 3` bytes, row-major, sensor-native orientation.
    data: Vec<u8>,
    /// When the frame source captured this frame, if it told us.
    timestamp: Option<Instant>,
}

impl Frame {
    /// Wraps a raw buffer. Fails unless it holds exactly `width * height` RGB
    /// pixels and every pixel is addressable by a `PixelIndex`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let pixel_count = width as u64 * height as u64;
        let expected = usize::try_from(pixel_count.saturating_mul(CHANNELS as u64)).unwrap_or(usize::MAX);
        if pixel_count > PixelIndex::MAX as u64 || data.len() != expected {
            return Err(CosmicError::MalformedFrame {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp: None,
        })
    }

    /// An all-black frame, the canonical dark frame.
    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * CHANNELS],
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The pixel at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Pixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixel_at(y as usize * self.width as usize + x as usize))
    }

    /// The pixel at a linear index. Callers guarantee `index < pixel_count()`.
    pub(crate) fn pixel_at(&self, index: usize) -> Pixel {
        let offset = index * CHANNELS;
        Pixel::new(self.data[offset], self.data[offset + 1], self.data[offset + 2])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) -> Result<()> {
        if x >= self.width || y >= self.height {
            return Err(CosmicError::PixelOutOfBounds {
                index: y.saturating_mul(self.width).saturating_add(x),
                pixel_count: self.pixel_count(),
            });
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[offset..offset + CHANNELS].copy_from_slice(&<[u8; CHANNELS]>::from(pixel));
        Ok(())
    }

    pub fn pixels(&self) -> impl Iterator<Item = Pixel> + '_ {
        self.data
            .chunks_exact(CHANNELS)
            .map(|rgb| Pixel::new(rgb[0], rgb[1], rgb[2]))
    }

    /// Normalized intensity of the pixel at a linear index.
    pub fn intensity(&self, index: PixelIndex) -> Option<Intensity> {
        let index = index as usize;
        (index < self.pixel_count()).then(|| self.pixel_at(index).intensity())
    }

    /// Splits a linear index into `(x, y)` for this frame's width.
    pub fn coordinates(&self, index: PixelIndex) -> (u32, u32) {
        (index % self.width, index / self.width)
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb(self.pixel(x, y).unwrap_or_default().into())
        })
    }
}

impl TryFrom<RgbImage> for Frame {
    type Error = CosmicError;

    fn try_from(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        let err = Frame::new(4, 4, vec![0; 47]).unwrap_err();
        assert_eq!(
            err,
            CosmicError::MalformedFrame {
                width: 4,
                height: 4,
                expected: 48,
                actual: 47
            }
        );
    }

    #[test]
    fn rejects_frames_too_large_to_index() {
        let err = Frame::new(u32::MAX, 2, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            CosmicError::MalformedFrame {
                width: u32::MAX,
                height: 2,
                actual: 0,
                ..
            }
        ));
    }

    #[test]
    fn pixels_are_row_major() {
        let mut frame = Frame::black(8, 4);
        frame.set_pixel(5, 2, Pixel::new(1, 2, 3)).unwrap();
        let offset = (2 * 8 + 5) * CHANNELS;
        assert_eq!(&frame.as_bytes()[offset..offset + 3], &[1, 2, 3]);
        assert_eq!(frame.pixel(5, 2), Some(Pixel::new(1, 2, 3)));
        assert_eq!(frame.coordinates(2 * 8 + 5), (5, 2));
        assert_eq!(frame.pixel(8, 0), None);
    }

    #[test]
    fn out_of_range_writes_fail() {
        let mut frame = Frame::black(3, 3);
        assert!(matches!(
            frame.set_pixel(3, 0, Pixel::BLACK),
            Err(CosmicError::PixelOutOfBounds { .. })
        ));
    }

    #[test]
    fn converts_through_rgb_image() {
        let mut frame = Frame::black(6, 5);
        frame.set_pixel(4, 1, Pixel::new(200, 100, 50)).unwrap();
        let image = frame.to_rgb_image();
        assert_eq!(image.get_pixel(4, 1), &Rgb([200, 100, 50]));
        assert_eq!(Frame::try_from(image).unwrap(), frame);
    }
}
