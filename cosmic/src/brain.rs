// THEORY:
// The `brain` module is the orchestrator of the detector. `CosmicBrain` owns the
// whole capture session and routes every incoming frame according to a small,
// explicit state machine:
//
//     Idle --begin_calibration--> Calibrating --begin_run--> Running
//       ^                            ^    |                     |
//       +------- init_capture -------+----+---------------------+
//                                    +--- begin_calibration ----+
//
// - Idle: frames are refused.
// - Calibrating: frames are dark frames and feed the `DarkCalibrator`. They are not
//   exposures, so the exposure counter stays put. Once the configured number of
//   dark frames has been blended the brain can start the run by itself.
// - Running: every frame is one exposure. It is classified against the baseline,
//   and a hit is cut into a `Stamp` and appended to the session's collection.
//
// Key architectural principles:
// 1.  **Commit Last**: All fallible work for a frame happens before any session
//     state changes. A frame that fails leaves the counter and the stamp collection
//     exactly as they were.
// 2.  **Explicit Transitions**: An operation that is not allowed in the current
//     state fails with `InvalidState`; nothing is silently ignored.
// 3.  **Append-Only Output**: Stamps are shared with readers through a `StampLog`,
//     which hands out point-in-time snapshots and never exposes a partial append.
// 4.  **Ordered Notification**: The delegate hears about a new stamp and then the
//     new exposure count, in frame order, after both are committed.

use crate::core_modules::dark_calibrator::{DEFAULT_FILTER_STRENGTH, DarkCalibrator, FilterStrength};
use crate::core_modules::frame::Frame;
use crate::core_modules::stamp::Stamp;
use crate::core_modules::stamp_extractor::StampExtractor;
use crate::core_modules::threshold_discriminator::{Threshold, ThresholdDiscriminator};
use crate::error::{CosmicError, Result};
use log::{debug, info};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// Where the capture session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Calibrating,
    Running,
}

/// Tunable behaviour of a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct BrainConfig {
    /// Dark frames to blend before the baseline counts as calibrated (at least 1).
    pub calibration_frames: u32,
    /// Weight of each new dark frame in the moving average, in [0, 1].
    pub filter_strength: FilterStrength,
    /// Minimum excess over baseline for a hit, in normalized intensity [0, 1].
    pub threshold: Threshold,
    /// Start the run as soon as `calibration_frames` dark frames are in.
    pub auto_run: bool,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            calibration_frames: 10,
            filter_strength: DEFAULT_FILTER_STRENGTH,
            threshold: 0.1,
            auto_run: true,
        }
    }
}

impl BrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.calibration_frames == 0 {
            return Err(CosmicError::InvalidConfig(
                "calibration needs at least one dark frame".to_string(),
            ));
        }
        // The component constructors own the range checks for the two floats.
        DarkCalibrator::new(self.filter_strength)?;
        ThresholdDiscriminator::new(self.threshold)?;
        Ok(())
    }
}

/// The two events a capture session reports.
#[derive(Debug, Clone, PartialEq)]
pub enum BrainEvent {
    ExposureCountChanged(u32),
    StampAdded(Arc<Stamp>),
}

/// Receives session events on the frame-processing thread, in frame order.
pub trait BrainDelegate: Send {
    fn exposure_count_changed(&mut self, count: u32);
    fn stamp_added(&mut self, stamp: Arc<Stamp>);
}

impl BrainDelegate for std::sync::mpsc::Sender<BrainEvent> {
    fn exposure_count_changed(&mut self, count: u32) {
        let _ = self.send(BrainEvent::ExposureCountChanged(count));
    }

    fn stamp_added(&mut self, stamp: Arc<Stamp>) {
        let _ = self.send(BrainEvent::StampAdded(stamp));
    }
}

/// Shared, append-only view of a session's stamps in detection order.
#[derive(Debug, Clone, Default)]
pub struct StampLog {
    stamps: Arc<RwLock<Vec<Arc<Stamp>>>>,
}

impl StampLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the collection as it stands right now.
    pub fn snapshot(&self) -> Vec<Arc<Stamp>> {
        self.stamps.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.stamps.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<Arc<Stamp>> {
        self.stamps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    fn append(&self, stamp: Arc<Stamp>) {
        self.stamps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stamp);
    }

    fn clear(&self) {
        self.stamps.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// What happened to one frame handed to [`CosmicBrain::capture_image`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The frame was blended into the baseline.
    Calibrating { calibration_frames: u32 },
    /// The frame completed calibration and the run has begun.
    RunStarted { calibration_frames: u32 },
    /// The frame was processed as an exposure, with the stamp it produced if any.
    Exposure {
        exposure_count: u32,
        stamp: Option<Arc<Stamp>>,
    },
}

/// A point-in-time summary of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrainStatus {
    pub state: CaptureState,
    pub exposure_count: u32,
    pub calibration_frames: u32,
    pub stamp_count: usize,
}

/// Owns a capture session and drives it through calibration and the run.
pub struct CosmicBrain {
    config: BrainConfig,
    state: CaptureState,
    calibrator: DarkCalibrator,
    discriminator: ThresholdDiscriminator,
    extractor: StampExtractor,
    exposure_count: u32,
    /// Elapsed-time origin, set when the run begins.
    run_started: Option<Instant>,
    stamps: StampLog,
    delegate: Option<Box<dyn BrainDelegate>>,
}

impl CosmicBrain {
    pub fn new(config: BrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            calibrator: DarkCalibrator::new(config.filter_strength)?,
            discriminator: ThresholdDiscriminator::new(config.threshold)?,
            extractor: StampExtractor::new(),
            config,
            state: CaptureState::Idle,
            exposure_count: 0,
            run_started: None,
            stamps: StampLog::new(),
            delegate: None,
        })
    }

    pub fn set_delegate(&mut self, delegate: impl BrainDelegate + 'static) {
        self.delegate = Some(Box::new(delegate));
    }

    pub fn clear_delegate(&mut self) {
        self.delegate = None;
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn exposure_count(&self) -> u32 {
        self.exposure_count
    }

    pub fn calibrator(&self) -> &DarkCalibrator {
        &self.calibrator
    }

    /// A reader handle on the stamp collection; stays valid across resets.
    pub fn stamps(&self) -> StampLog {
        self.stamps.clone()
    }

    pub fn status(&self) -> BrainStatus {
        BrainStatus {
            state: self.state,
            exposure_count: self.exposure_count,
            calibration_frames: self.calibrator.frame_count(),
            stamp_count: self.stamps.len(),
        }
    }

    /// Returns to `Idle` with an empty session.
    pub fn init_capture(&mut self) {
        self.reset_session();
        self.state = CaptureState::Idle;
        info!("capture initialised");
    }

    /// Starts (or restarts) dark calibration from an empty accumulator.
    pub fn begin_calibration(&mut self) {
        let previous = self.state;
        self.reset_session();
        self.state = CaptureState::Calibrating;
        info!("dark calibration started (was {previous:?})");
    }

    /// Ends calibration and starts the run with a fresh counter and clock.
    pub fn begin_run(&mut self) -> Result<()> {
        if self.state != CaptureState::Calibrating {
            return Err(CosmicError::InvalidState {
                operation: "begin_run",
                state: self.state,
            });
        }
        if !self.calibrator.baseline().is_established() {
            return Err(CosmicError::BaselineUnavailable);
        }
        self.exposure_count = 0;
        self.run_started = Some(Instant::now());
        self.state = CaptureState::Running;
        info!(
            "run started after {} dark frames",
            self.calibrator.frame_count()
        );
        Ok(())
    }

    pub fn end_calibration(&mut self) -> Result<()> {
        self.begin_run()
    }

    /// Routes one frame according to the current state.
    pub fn capture_image(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        match self.state {
            CaptureState::Idle => Err(CosmicError::InvalidState {
                operation: "capture_image",
                state: self.state,
            }),
            CaptureState::Calibrating => self.calibrate(frame),
            CaptureState::Running => self.expose(frame),
        }
    }

    /// Frame-source entry point for a raw interleaved RGB buffer.
    pub fn capture_raw(&mut self, timestamp: Instant, width: u32, height: u32, data: Vec<u8>) -> Result<FrameOutcome> {
        let frame = Frame::new(width, height, data)?.with_timestamp(timestamp);
        self.capture_image(&frame)
    }

    fn calibrate(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        self.calibrator.accumulate(frame)?;
        let calibration_frames = self.calibrator.frame_count();
        if self.config.auto_run && self.calibrator.is_complete(self.config.calibration_frames) {
            self.begin_run()?;
            return Ok(FrameOutcome::RunStarted { calibration_frames });
        }
        Ok(FrameOutcome::Calibrating { calibration_frames })
    }

    fn expose(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let classification = self.discriminator.classify(frame, self.calibrator.baseline())?;
        let stamp = if classification.has_hit {
            let stamp = self.extractor.extract(
                frame,
                classification.pixel_index,
                self.elapsed_ms(frame),
                self.exposure_count,
            )?;
            debug!(
                "hit at pixel {} (excess {:.3}) in exposure {}",
                classification.pixel_index, classification.intensity, self.exposure_count
            );
            Some(Arc::new(stamp))
        } else {
            None
        };

        if let Some(stamp) = &stamp {
            self.stamps.append(Arc::clone(stamp));
        }
        self.exposure_count = self.exposure_count.saturating_add(1);

        if let Some(delegate) = self.delegate.as_mut() {
            if let Some(stamp) = &stamp {
                delegate.stamp_added(Arc::clone(stamp));
            }
            delegate.exposure_count_changed(self.exposure_count);
        }

        Ok(FrameOutcome::Exposure {
            exposure_count: self.exposure_count,
            stamp,
        })
    }

    /// Milliseconds from the start of the run to the frame's capture, wrapping at u32.
    fn elapsed_ms(&self, frame: &Frame) -> u32 {
        let captured = frame.timestamp().unwrap_or_else(Instant::now);
        match self.run_started {
            Some(origin) => captured.saturating_duration_since(origin).as_millis() as u32,
            None => 0,
        }
    }

    fn reset_session(&mut self) {
        self.calibrator.reset();
        self.exposure_count = 0;
        self.run_started = None;
        self.stamps.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel::Pixel;
    use std::sync::mpsc;

    fn manual_config() -> BrainConfig {
        BrainConfig {
            calibration_frames: 3,
            filter_strength: 0.5,
            threshold: 0.1,
            auto_run: false,
        }
    }

    fn hit_frame(width: u32, height: u32, x: u32, y: u32) -> Frame {
        let mut frame = Frame::black(width, height);
        frame.set_pixel(x, y, Pixel::new(255, 255, 255)).unwrap();
        frame
    }

    #[test]
    fn idle_refuses_frames() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        assert_eq!(
            brain.capture_image(&Frame::black(8, 8)),
            Err(CosmicError::InvalidState {
                operation: "capture_image",
                state: CaptureState::Idle
            })
        );
        assert_eq!(brain.status().calibration_frames, 0);
    }

    #[test]
    fn run_requires_calibration_state_and_a_frame() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        assert!(matches!(brain.begin_run(), Err(CosmicError::InvalidState { .. })));
        brain.begin_calibration();
        assert_eq!(brain.begin_run(), Err(CosmicError::BaselineUnavailable));
        assert_eq!(brain.state(), CaptureState::Calibrating);
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        brain.end_calibration().unwrap();
        assert_eq!(brain.state(), CaptureState::Running);
        assert!(matches!(brain.begin_run(), Err(CosmicError::InvalidState { .. })));
    }

    #[test]
    fn calibration_frames_are_not_exposures() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.begin_calibration();
        for expected in 1..=5 {
            let outcome = brain.capture_image(&Frame::black(8, 8)).unwrap();
            assert_eq!(outcome, FrameOutcome::Calibrating { calibration_frames: expected });
        }
        assert_eq!(brain.exposure_count(), 0);
        assert!(brain.stamps().is_empty());
    }

    #[test]
    fn auto_run_starts_when_target_reached() {
        let mut brain = CosmicBrain::new(BrainConfig {
            auto_run: true,
            ..manual_config()
        })
        .unwrap();
        brain.begin_calibration();
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        let outcome = brain.capture_image(&Frame::black(8, 8)).unwrap();
        assert_eq!(outcome, FrameOutcome::RunStarted { calibration_frames: 3 });
        assert_eq!(brain.state(), CaptureState::Running);
    }

    #[test]
    fn every_running_frame_advances_the_counter() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.begin_calibration();
        brain.capture_image(&Frame::black(16, 16)).unwrap();
        brain.begin_run().unwrap();
        for expected in 1..=4 {
            brain.capture_image(&Frame::black(16, 16)).unwrap();
            assert_eq!(brain.exposure_count(), expected);
        }
        let outcome = brain.capture_image(&hit_frame(16, 16, 3, 4)).unwrap();
        let FrameOutcome::Exposure { exposure_count, stamp } = outcome else {
            panic!("expected an exposure");
        };
        assert_eq!(exposure_count, 5);
        assert_eq!(stamp.unwrap().exposure_count(), 4);
    }

    #[test]
    fn counter_resets_on_each_cycle() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        for _ in 0..2 {
            brain.begin_calibration();
            assert_eq!(brain.exposure_count(), 0);
            brain.capture_image(&Frame::black(8, 8)).unwrap();
            brain.begin_run().unwrap();
            assert_eq!(brain.exposure_count(), 0);
            brain.capture_image(&Frame::black(8, 8)).unwrap();
            brain.capture_image(&Frame::black(8, 8)).unwrap();
            assert_eq!(brain.exposure_count(), 2);
        }
    }

    #[test]
    fn repeated_begin_calibration_discards_accumulation() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.begin_calibration();
        brain.capture_image(&Frame::new(4, 4, vec![200; 48]).unwrap()).unwrap();
        brain.capture_image(&Frame::new(4, 4, vec![200; 48]).unwrap()).unwrap();
        brain.begin_calibration();
        assert_eq!(brain.calibrator().frame_count(), 0);
        // The new session may even use a different frame size.
        brain.capture_image(&Frame::black(6, 6)).unwrap();
        assert_eq!(brain.calibrator().baseline().dimensions(), (6, 6));
        assert_eq!(brain.calibrator().baseline().pixels()[0].red, 0.0);
    }

    #[test]
    fn failing_frame_commits_nothing() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.begin_calibration();
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        brain.begin_run().unwrap();
        brain.capture_image(&hit_frame(8, 8, 1, 1)).unwrap();
        let before = brain.status();

        let err = brain.capture_image(&hit_frame(9, 8, 1, 1)).unwrap_err();
        assert!(matches!(err, CosmicError::DimensionMismatch { .. }));
        assert_eq!(brain.status(), before);
        assert_eq!(before.exposure_count, 1);
        assert_eq!(before.stamp_count, 1);
    }

    #[test]
    fn delegate_hears_stamp_then_count() {
        let (sender, receiver) = mpsc::channel();
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.set_delegate(sender);
        brain.begin_calibration();
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        assert!(receiver.try_recv().is_err());
        brain.begin_run().unwrap();

        brain.capture_image(&Frame::black(8, 8)).unwrap();
        brain.capture_image(&hit_frame(8, 8, 2, 5)).unwrap();

        let events: Vec<BrainEvent> = receiver.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], BrainEvent::ExposureCountChanged(1));
        let BrainEvent::StampAdded(stamp) = &events[1] else {
            panic!("expected a stamp event");
        };
        assert_eq!(stamp.max_pixel_index(), 5 * 8 + 2);
        assert_eq!(events[2], BrainEvent::ExposureCountChanged(2));
    }

    #[test]
    fn init_capture_empties_the_session_for_existing_readers() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        let log = brain.stamps();
        brain.begin_calibration();
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        brain.begin_run().unwrap();
        brain.capture_image(&hit_frame(8, 8, 4, 4)).unwrap();
        assert_eq!(log.len(), 1);

        brain.init_capture();
        assert_eq!(brain.state(), CaptureState::Idle);
        assert!(log.is_empty());
        assert_eq!(brain.exposure_count(), 0);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_stamps() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.begin_calibration();
        brain.capture_image(&Frame::black(8, 8)).unwrap();
        brain.begin_run().unwrap();
        brain.capture_image(&hit_frame(8, 8, 1, 1)).unwrap();
        let snapshot = brain.stamps().snapshot();
        brain.capture_image(&hit_frame(8, 8, 6, 6)).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(brain.stamps().len(), 2);
        assert_eq!(brain.stamps().latest().unwrap().max_pixel_index(), 6 * 8 + 6);
    }

    #[test]
    fn raw_capture_validates_buffer() {
        let mut brain = CosmicBrain::new(manual_config()).unwrap();
        brain.begin_calibration();
        assert!(matches!(
            brain.capture_raw(Instant::now(), 4, 4, vec![0; 10]),
            Err(CosmicError::MalformedFrame { .. })
        ));
        assert!(brain.capture_raw(Instant::now(), 4, 4, vec![0; 48]).is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let zero_frames = BrainConfig {
            calibration_frames: 0,
            ..BrainConfig::default()
        };
        assert!(matches!(CosmicBrain::new(zero_frames), Err(CosmicError::InvalidConfig(_))));
        let bad_threshold = BrainConfig {
            threshold: 2.0,
            ..BrainConfig::default()
        };
        assert!(CosmicBrain::new(bad_threshold).is_err());
    }
}
