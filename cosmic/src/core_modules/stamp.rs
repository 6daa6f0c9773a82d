// THEORY:
// A `Stamp` is the permanent record of one hit: when it happened, where on the
// sensor, which exposure it came from, and a small square of raw pixels around
// the brightest sample.
//
// The patch keeps raw sensor byte order. It is copied row by row straight out of
// the frame buffer, so with the phone held in portrait it starts at the sensor's
// top-right corner and runs fastest down the sensor. Viewers rotate for display;
// the record itself never does.
//
// Stamps are immutable. Fields are private and there are no setters, so a stamp
// handed to a delegate or a reader is the same stamp forever.
//
// Binary layout (little-endian, fixed size):
//     offset 0   u32  elapsed milliseconds
//     offset 4   u32  max pixel index
//     offset 8   u32  exposure count
//     offset 12  [u8; 675]  RGB patch
// Exporters depend on this layout byte for byte.

use crate::core_modules::frame::PixelIndex;
use crate::core_modules::pixel::{CHANNELS, Pixel};
use crate::error::{CosmicError, Result};
use image::{Rgb, RgbImage};
use std::time::Duration;

/// Half-width `k` of the patch; the patch is `(2k + 1)` pixels square.
pub const STAMP_SIZE: usize = 7;
/// Patch side length in pixels.
pub const STAMP_WIDTH: usize = 2 * STAMP_SIZE + 1;
/// Patch length in bytes: 15 * 15 * 3.
pub const PATCH_BYTES: usize = CHANNELS * STAMP_WIDTH * STAMP_WIDTH;
const HEADER_BYTES: usize = 3 * size_of::<u32>();
/// Serialized stamp length in bytes.
pub const STAMP_RECORD_BYTES: usize = HEADER_BYTES + PATCH_BYTES;

pub type Patch = [u8; PATCH_BYTES];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    /// Milliseconds since the run started; wraps after about 49.7 days.
    elapsed_ms: u32,
    /// `y * frame_width + x` of the patch's central (brightest) pixel.
    max_pixel_index: PixelIndex,
    /// Exposure this hit came from, counting from zero.
    exposure_count: u32,
    patch: Box<Patch>,
}

impl Stamp {
    pub fn new(elapsed_ms: u32, max_pixel_index: PixelIndex, exposure_count: u32, patch: Box<Patch>) -> Self {
        Self {
            elapsed_ms,
            max_pixel_index,
            exposure_count,
            patch,
        }
    }

    /// Bytes of RGB data in every stamp.
    pub const fn rgb_size() -> usize {
        PATCH_BYTES
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms as u64)
    }

    pub fn max_pixel_index(&self) -> PixelIndex {
        self.max_pixel_index
    }

    pub fn exposure_count(&self) -> u32 {
        self.exposure_count
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// Hit position `(x, y)` in a frame of the given width; `None` for a zero width.
    pub fn coordinates(&self, frame_width: u32) -> Option<(u32, u32)> {
        (frame_width > 0).then(|| {
            (
                self.max_pixel_index % frame_width,
                self.max_pixel_index / frame_width,
            )
        })
    }

    /// The patch pixel at `(column, row)`, both in `0..STAMP_WIDTH`.
    pub fn patch_pixel(&self, column: usize, row: usize) -> Option<Pixel> {
        if column >= STAMP_WIDTH || row >= STAMP_WIDTH {
            return None;
        }
        let offset = (row * STAMP_WIDTH + column) * CHANNELS;
        Some(Pixel::new(
            self.patch[offset],
            self.patch[offset + 1],
            self.patch[offset + 2],
        ))
    }

    /// The brightest pixel the stamp is centred on.
    pub fn centre_pixel(&self) -> Pixel {
        self.patch_pixel(STAMP_SIZE, STAMP_SIZE).unwrap_or_default()
    }

    /// The patch as an image, in raw sensor orientation.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(STAMP_WIDTH as u32, STAMP_WIDTH as u32, |x, y| {
            Rgb(self
                .patch_pixel(x as usize, y as usize)
                .unwrap_or_default()
                .into())
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(STAMP_RECORD_BYTES);
        bytes.extend_from_slice(&self.elapsed_ms.to_le_bytes());
        bytes.extend_from_slice(&self.max_pixel_index.to_le_bytes());
        bytes.extend_from_slice(&self.exposure_count.to_le_bytes());
        bytes.extend_from_slice(self.patch.as_slice());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STAMP_RECORD_BYTES {
            return Err(CosmicError::MalformedStamp {
                expected: STAMP_RECORD_BYTES,
                actual: bytes.len(),
            });
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut patch = Box::new([0u8; PATCH_BYTES]);
        patch.copy_from_slice(&bytes[HEADER_BYTES..]);
        Ok(Self {
            elapsed_ms: word(0),
            max_pixel_index: word(4),
            exposure_count: word(8),
            patch,
        })
    }
}
