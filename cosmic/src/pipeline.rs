// THEORY:
// The `pipeline` module is the asynchronous front end of the detector. Frames come
// from the camera on one task, control commands from another, and stamps are read
// by a third. `CapturePipeline` lets all of them share one `CosmicBrain` without
// the brain ever needing a lock:
//
// 1.  **Single Owner**: A dedicated worker task owns the brain outright. Frames and
//     commands are messages to that task, so the brain is only ever touched by one
//     task, one message at a time. A state transition is therefore a barrier: it
//     runs between two frames, never in the middle of one.
// 2.  **Latest Frame Wins**: Frames are not queued. Submitting a frame replaces any
//     frame still waiting, and the replaced one is counted as dropped. When the
//     camera outpaces the detector the detector stays on the newest frame instead
//     of falling behind on a backlog.
// 3.  **Commands First**: The worker always handles pending commands before the
//     next frame. A transition also discards the frame that was waiting, since it
//     was captured under the old state. This includes a run the brain starts on
//     its own when calibration completes.
// 4.  **Broadcast Events**: Delegate notifications are published on a broadcast
//     channel in frame order; any number of observers may subscribe.

use crate::brain::{BrainConfig, BrainDelegate, BrainEvent, BrainStatus, CosmicBrain, FrameOutcome, StampLog};
use crate::core_modules::frame::Frame;
use crate::core_modules::stamp::Stamp;
use crate::error::{CosmicError, Result};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 256;

impl BrainDelegate for broadcast::Sender<BrainEvent> {
    fn exposure_count_changed(&mut self, count: u32) {
        // No subscribers is not an error.
        let _ = self.send(BrainEvent::ExposureCountChanged(count));
    }

    fn stamp_added(&mut self, stamp: Arc<Stamp>) {
        let _ = self.send(BrainEvent::StampAdded(stamp));
    }
}

/// Holds at most one frame waiting for the worker.
#[derive(Default)]
struct FrameSlot {
    pending: Mutex<Option<Frame>>,
    ready: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl FrameSlot {
    fn put(&self, frame: Frame) {
        let replaced = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame);
        if replaced.is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("frame replaced before processing ({dropped} dropped so far)");
        }
        self.ready.notify_one();
    }

    fn take(&self) -> Option<Frame> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn discard(&self) {
        if self.take().is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("pending frame discarded by state transition");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    InitCapture,
    BeginCalibration,
    BeginRun,
    Status,
    /// Process the waiting frame, if any, before replying.
    Flush,
}

enum Command {
    Control(Control, oneshot::Sender<Result<BrainStatus>>),
    /// A frame that must not be dropped; processed in order with commands.
    Process(Frame, oneshot::Sender<Result<FrameOutcome>>),
}

/// Asynchronous, drop-oldest front end around a `CosmicBrain`.
pub struct CapturePipeline {
    commands: mpsc::Sender<Command>,
    slot: Arc<FrameSlot>,
    events: broadcast::Sender<BrainEvent>,
    stamps: StampLog,
    worker: JoinHandle<()>,
}

impl CapturePipeline {
    /// Builds the brain and spawns its worker on the current tokio runtime.
    pub fn new(config: BrainConfig) -> Result<Self> {
        let mut brain = CosmicBrain::new(config)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        brain.set_delegate(events.clone());
        let stamps = brain.stamps();

        let (commands, command_receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let slot = Arc::new(FrameSlot::default());
        let worker = tokio::spawn(run_worker(brain, command_receiver, Arc::clone(&slot)));

        Ok(Self {
            commands,
            slot,
            events,
            stamps,
            worker,
        })
    }

    /// Hands a frame to the worker without waiting. Replaces any frame still pending.
    ///
    /// Only a closed pipeline is reported here. A frame the brain rejects later,
    /// for example one submitted while idle, is logged and counted in
    /// [`dropped_frames`](Self::dropped_frames); use
    /// [`process_frame`](Self::process_frame) to get the error back.
    pub fn submit_frame(&self, frame: Frame) -> Result<()> {
        if self.slot.closed.load(Ordering::Acquire) {
            return Err(CosmicError::PipelineClosed);
        }
        self.slot.put(frame);
        Ok(())
    }

    /// Processes a frame in order with control commands and waits for the outcome.
    pub async fn process_frame(&self, frame: Frame) -> Result<FrameOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Process(frame, reply))
            .await
            .map_err(|_| CosmicError::PipelineClosed)?;
        outcome.await.map_err(|_| CosmicError::PipelineClosed)?
    }

    pub async fn init_capture(&self) -> Result<BrainStatus> {
        self.control(Control::InitCapture).await
    }

    pub async fn begin_calibration(&self) -> Result<BrainStatus> {
        self.control(Control::BeginCalibration).await
    }

    pub async fn begin_run(&self) -> Result<BrainStatus> {
        self.control(Control::BeginRun).await
    }

    pub async fn end_calibration(&self) -> Result<BrainStatus> {
        self.begin_run().await
    }

    pub async fn status(&self) -> Result<BrainStatus> {
        self.control(Control::Status).await
    }

    /// Waits until the pending frame, if any, has been processed.
    pub async fn flush(&self) -> Result<BrainStatus> {
        self.control(Control::Flush).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrainEvent> {
        self.events.subscribe()
    }

    pub fn stamps(&self) -> StampLog {
        self.stamps.clone()
    }

    /// Frames replaced or discarded before the worker reached them, plus
    /// submitted frames the brain rejected.
    pub fn dropped_frames(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    /// Stops accepting frames and waits for the worker to finish.
    pub async fn shutdown(self) {
        let Self {
            commands,
            slot,
            worker,
            ..
        } = self;
        slot.closed.store(true, Ordering::Release);
        drop(commands);
        slot.ready.notify_one();
        if let Err(err) = worker.await {
            warn!("capture worker ended abnormally: {err}");
        }
    }

    async fn control(&self, control: Control) -> Result<BrainStatus> {
        let (reply, status) = oneshot::channel();
        self.commands
            .send(Command::Control(control, reply))
            .await
            .map_err(|_| CosmicError::PipelineClosed)?;
        status.await.map_err(|_| CosmicError::PipelineClosed)?
    }
}

async fn run_worker(mut brain: CosmicBrain, mut commands: mpsc::Receiver<Command>, slot: Arc<FrameSlot>) {
    info!("capture worker started");
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(Command::Control(control, reply)) => {
                    let _ = reply.send(apply_control(&mut brain, control, &slot));
                }
                Some(Command::Process(frame, reply)) => {
                    let _ = reply.send(capture(&mut brain, &frame, &slot));
                }
                None => break,
            },
            _ = slot.ready.notified() => process_pending(&mut brain, &slot),
        }
    }
    slot.closed.store(true, Ordering::Release);
    info!("capture worker stopped");
}

fn apply_control(brain: &mut CosmicBrain, control: Control, slot: &FrameSlot) -> Result<BrainStatus> {
    match control {
        Control::InitCapture => {
            slot.discard();
            brain.init_capture();
        }
        Control::BeginCalibration => {
            slot.discard();
            brain.begin_calibration();
        }
        Control::BeginRun => {
            brain.begin_run()?;
            slot.discard();
        }
        Control::Status => {}
        Control::Flush => process_pending(brain, slot),
    }
    Ok(brain.status())
}

fn process_pending(brain: &mut CosmicBrain, slot: &FrameSlot) {
    let Some(frame) = slot.take() else {
        return;
    };
    if let Err(err) = capture(brain, &frame, slot) {
        slot.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("frame skipped: {err}");
    }
}

/// Runs one frame through the brain. A run started by the frame itself is a
/// transition like any other, so the frame waiting behind it is discarded.
fn capture(brain: &mut CosmicBrain, frame: &Frame, slot: &FrameSlot) -> Result<FrameOutcome> {
    let outcome = brain.capture_image(frame)?;
    if matches!(outcome, FrameOutcome::RunStarted { .. }) {
        slot.discard();
    }
    Ok(outcome)
}
