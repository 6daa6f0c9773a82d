// THEORY:
// Every fallible operation in the detector reports one of a small, closed set of
// failures. None of them is recovered internally: a failing frame is skipped and
// the session's committed state (exposure counter, stamp collection) is left
// exactly as it was before that frame arrived.

use crate::brain::CaptureState;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CosmicError {
    /// A frame's size disagrees with the baseline or the session's frame size.
    #[error("frame is {width}x{height} but {expected_width}x{expected_height} was expected")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// Discrimination was requested before any dark frame was accumulated.
    #[error("no dark-frame baseline has been accumulated")]
    BaselineUnavailable,

    /// A control or capture operation is not allowed in the current state.
    #[error("`{operation}` is not allowed while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    /// A pixel buffer whose length is not `width * height * 3`.
    #[error("pixel buffer holds {actual} bytes, {expected} expected for {width}x{height} RGB")]
    MalformedFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("pixel index {index} lies outside a frame of {pixel_count} pixels")]
    PixelOutOfBounds { index: u32, pixel_count: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A serialized stamp record of the wrong length.
    #[error("stamp record holds {actual} bytes, {expected} expected")]
    MalformedStamp { expected: usize, actual: usize },

    #[error("capture pipeline has shut down")]
    PipelineClosed,
}

pub type Result<T> = std::result::Result<T, CosmicError>;
