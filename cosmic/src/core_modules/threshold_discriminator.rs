// THEORY:
// The `ThresholdDiscriminator` decides whether a live frame contains a hit. It never
// looks at raw brightness alone: a hot pixel or a patch of high dark current is
// bright in every frame, and thresholding the raw frame would report it forever.
// Instead it subtracts the calibrated dark baseline and thresholds the excess, which
// makes the detector sensitive only to transient light such as a particle strike.
//
// Per pixel:
//     excess(p) = max(0, I_frame(p) - I_baseline(p)),   I = (R + 2G + B) / 1020
//
// A pixel dimmer than its baseline is never a hit, hence the clamp. The single pixel
// with the largest excess is the frame's candidate; it is a hit only if its excess is
// strictly above the threshold. Only one hit is reported per frame. Cosmic-ray rates
// on a phone sensor are low enough that two independent strikes in one frame are
// not modelled.

use crate::core_modules::dark_calibrator::BaselineImage;
use crate::core_modules::frame::{Frame, PixelIndex};
use crate::core_modules::pixel::Intensity;
use crate::error::{CosmicError, Result};

pub type Threshold = f32;

/// Outcome of classifying one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub has_hit: bool,
    /// Index of the pixel with the largest excess over baseline. Lowest index wins ties.
    pub pixel_index: PixelIndex,
    /// That pixel's excess over baseline, in normalized intensity units.
    pub intensity: Intensity,
}

/// Binary per-pixel output: true where the excess over baseline passes the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitMask {
    width: u32,
    height: u32,
    hits: Vec<bool>,
}

impl HitMask {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_hit(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.hits[y as usize * self.width as usize + x as usize]
    }

    pub fn hit_count(&self) -> usize {
        self.hits.iter().filter(|hit| **hit).count()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.hits
    }
}

/// A discriminator bound to a configured threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdDiscriminator {
    threshold: Threshold,
}

impl ThresholdDiscriminator {
    pub fn new(threshold: Threshold) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CosmicError::InvalidConfig(format!(
                "threshold {threshold} is outside [0, 1]"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    pub fn classify(&self, frame: &Frame, baseline: &BaselineImage) -> Result<Classification> {
        classify(frame, baseline, self.threshold)
    }

    pub fn hit_mask(&self, frame: &Frame, baseline: &BaselineImage) -> Result<HitMask> {
        hit_mask(frame, baseline, self.threshold)
    }
}

/// Finds the pixel with the largest excess over baseline and tests it against `threshold`.
pub fn classify(frame: &Frame, baseline: &BaselineImage, threshold: Threshold) -> Result<Classification> {
    check_baseline(frame, baseline)?;

    let mut best = Classification {
        has_hit: false,
        pixel_index: 0,
        intensity: 0.0,
    };
    for (index, excess) in excesses(frame, baseline).enumerate() {
        if excess > best.intensity {
            best.pixel_index = index as PixelIndex;
            best.intensity = excess;
        }
    }
    best.has_hit = best.intensity > threshold;
    Ok(best)
}

/// Marks every pixel whose excess over baseline is above `threshold`.
pub fn hit_mask(frame: &Frame, baseline: &BaselineImage, threshold: Threshold) -> Result<HitMask> {
    check_baseline(frame, baseline)?;
    Ok(HitMask {
        width: frame.width(),
        height: frame.height(),
        hits: excesses(frame, baseline).map(|excess| excess > threshold).collect(),
    })
}

fn check_baseline(frame: &Frame, baseline: &BaselineImage) -> Result<()> {
    if !baseline.is_established() {
        return Err(CosmicError::BaselineUnavailable);
    }
    if frame.dimensions() != baseline.dimensions() {
        return Err(CosmicError::DimensionMismatch {
            expected_width: baseline.width(),
            expected_height: baseline.height(),
            width: frame.width(),
            height: frame.height(),
        });
    }
    Ok(())
}

fn excesses<'a>(frame: &'a Frame, baseline: &'a BaselineImage) -> impl Iterator<Item = Intensity> + 'a {
    frame
        .pixels()
        .zip(baseline.pixels())
        .map(|(pixel, dark)| (pixel.intensity() - dark.intensity()).max(0.0))
}
