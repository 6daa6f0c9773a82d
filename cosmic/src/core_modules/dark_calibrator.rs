// THEORY:
// The `DarkCalibrator` learns what the sensor reads when no light reaches it. Every
// pixel has its own dark current, and some are "hot" and read bright all the time;
// without a per-pixel reference those would look like endless hits.
//
// Key architectural principles:
// 1.  **Constant Memory**: Dark frames are never stored. Each one is folded into a
//     single accumulator with an exponential moving average,
//         A <- (1 - alpha) * A + alpha * frame
//     so the baseline tracks slow drift while damping shot noise, and costs the same
//     memory after ten frames as after ten thousand.
// 2.  **No Prior, No Blend**: The first frame after a reset has nothing to blend
//     with, so it is copied in directly.
// 3.  **Exclusive Ownership**: Only the calibrator mutates the baseline. The
//     discriminator borrows it read-only once the run phase begins.
// 4.  **All or Nothing**: A frame that does not fit the accumulator is rejected
//     before any pixel is touched.

use crate::core_modules::frame::Frame;
use crate::core_modules::pixel::{BaselineChannel, BaselinePixel};
use crate::error::{CosmicError, Result};
use log::debug;

pub type FilterStrength = f32;

pub const DEFAULT_FILTER_STRENGTH: FilterStrength = 0.5;

/// A per-pixel RGB reference image with fractional channels.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineImage {
    width: u32,
    height: u32,
    pixels: Vec<BaselinePixel>,
    /// How many dark frames have been blended in. Zero means "no baseline yet".
    frames: u32,
}

impl BaselineImage {
    /// An all-zero baseline, equivalent to "suppress nothing".
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![BaselinePixel::default(); width as usize * height as usize],
            frames: 0,
        }
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

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// True once at least one dark frame has been blended in.
    pub fn is_established(&self) -> bool {
        self.frames > 0
    }

    pub fn pixels(&self) -> &[BaselinePixel] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<BaselinePixel> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Builds a dark-frame baseline from a stream of dark frames.
#[derive(Debug, Clone)]
pub struct DarkCalibrator {
    filter_strength: FilterStrength,
    /// Set when the calibrator was built for a known sensor size; survives resets.
    fixed_dimensions: Option<(u32, u32)>,
    accumulator: BaselineImage,
}

impl DarkCalibrator {
    /// A calibrator that takes its dimensions from the first frame after each reset.
    pub fn new(filter_strength: FilterStrength) -> Result<Self> {
        validate_filter_strength(filter_strength)?;
        Ok(Self {
            filter_strength,
            fixed_dimensions: None,
            accumulator: BaselineImage::zeros(0, 0),
        })
    }

    /// A calibrator locked to one sensor size.
    pub fn with_dimensions(width: u32, height: u32, filter_strength: FilterStrength) -> Result<Self> {
        validate_filter_strength(filter_strength)?;
        Ok(Self {
            filter_strength,
            fixed_dimensions: Some((width, height)),
            accumulator: BaselineImage::zeros(width, height),
        })
    }

    pub fn filter_strength(&self) -> FilterStrength {
        self.filter_strength
    }

    /// Number of dark frames accumulated since the last reset.
    pub fn frame_count(&self) -> u32 {
        self.accumulator.frames
    }

    pub fn is_complete(&self, target_frames: u32) -> bool {
        self.frame_count() >= target_frames
    }

    /// The current baseline; all zeros before the first `accumulate`.
    pub fn baseline(&self) -> &BaselineImage {
        &self.accumulator
    }

    pub fn reset(&mut self) {
        let (width, height) = self.fixed_dimensions.unwrap_or((0, 0));
        self.accumulator = BaselineImage::zeros(width, height);
    }

    /// Folds one dark frame into the running baseline.
    pub fn accumulate(&mut self, frame: &Frame) -> Result<()> {
        let expected = match self.fixed_dimensions {
            Some(dimensions) => Some(dimensions),
            None if self.accumulator.is_established() => Some(self.accumulator.dimensions()),
            None => None,
        };
        if let Some((expected_width, expected_height)) = expected {
            if frame.dimensions() != (expected_width, expected_height) {
                return Err(CosmicError::DimensionMismatch {
                    expected_width,
                    expected_height,
                    width: frame.width(),
                    height: frame.height(),
                });
            }
        }

        if !self.accumulator.is_established() {
            self.accumulator = BaselineImage {
                width: frame.width(),
                height: frame.height(),
                pixels: frame.pixels().map(BaselinePixel::from).collect(),
                frames: 1,
            };
            debug!(
                "dark baseline seeded from a {}x{} frame",
                frame.width(),
                frame.height()
            );
            return Ok(());
        }

        let alpha = self.filter_strength;
        for (accumulated, sample) in self.accumulator.pixels.iter_mut().zip(frame.pixels()) {
            accumulated.red = blend(accumulated.red, sample.red as BaselineChannel, alpha);
            accumulated.green = blend(accumulated.green, sample.green as BaselineChannel, alpha);
            accumulated.blue = blend(accumulated.blue, sample.blue as BaselineChannel, alpha);
        }
        self.accumulator.frames = self.accumulator.frames.saturating_add(1);
        debug!("dark frame {} blended", self.accumulator.frames);
        Ok(())
    }
}

/// One step of the exponential moving average.
pub fn blend(accumulated: BaselineChannel, sample: BaselineChannel, alpha: FilterStrength) -> BaselineChannel {
    (1.0 - alpha) * accumulated + alpha * sample
}

fn validate_filter_strength(filter_strength: FilterStrength) -> Result<()> {
    if !(0.0..=1.0).contains(&filter_strength) {
        return Err(CosmicError::InvalidConfig(format!(
            "filter strength {filter_strength} is outside [0, 1]"
        )));
    }
    Ok(())
}
