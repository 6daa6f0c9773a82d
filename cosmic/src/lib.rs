// THEORY:
// This file is the entry point for the `cosmic` library crate. It turns a camera
// sensor into a particle detector: dark frames calibrate a per-pixel baseline,
// live frames are thresholded against it, and each hit is recorded as a small,
// fixed-size `Stamp`.
//
// Two front ends are exported. `CosmicBrain` is the synchronous session object for
// callers that already own a frame loop. `CapturePipeline` wraps it in a tokio
// worker for callers whose frames, commands and readers live on different tasks.
// The per-frame stages (`core_modules`) are public too, so each can be used and
// tested on its own.

pub mod brain;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use brain::{
    BrainConfig, BrainDelegate, BrainEvent, BrainStatus, CaptureState, CosmicBrain, FrameOutcome, StampLog,
};
pub use core_modules::dark_calibrator::{BaselineImage, DarkCalibrator};
pub use core_modules::frame::{Frame, PixelIndex};
pub use core_modules::pixel::Pixel;
pub use core_modules::stamp::{PATCH_BYTES, STAMP_RECORD_BYTES, STAMP_SIZE, STAMP_WIDTH, Stamp};
pub use core_modules::stamp_extractor::StampExtractor;
pub use core_modules::threshold_discriminator::{Classification, HitMask, ThresholdDiscriminator};
pub use error::{CosmicError, Result};
pub use pipeline::CapturePipeline;
