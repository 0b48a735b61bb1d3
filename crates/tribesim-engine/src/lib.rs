//! Partitioned multi-worker runtime for the tribesim core.
//!
//! `Simulation::launch` starts a coordinator thread; control flows in
//! over a bounded crossfire bus, data events flow back over a channel,
//! and the render mirror is shared as `Arc<Mutex<FrameBuffers>>`. See
//! [`protocol`] for the full message surface.
//!
//! ```no_run
//! use tribesim_core::SimConfig;
//! use tribesim_engine::{DataEvent, Simulation};
//!
//! let sim = Simulation::launch()?;
//! sim.init(SimConfig::default())?;
//! while let Some(event) = sim.wait_event(std::time::Duration::from_secs(5)) {
//!     if let DataEvent::Stats(stats) = event {
//!         println!("population: {}", stats.population);
//!         break;
//!     }
//! }
//! sim.shutdown()?;
//! # Ok::<(), tribesim_engine::EngineError>(())
//! ```

pub mod coordinator;
pub mod frame;
pub mod layout;
pub mod protocol;
pub mod worker;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossfire::{MTx, TrySendError, mpmc};
use thiserror::Error;
use tracing::warn;

use tribesim_core::SimConfig;

pub use frame::{FrameBuffers, SharedFrame};
pub use layout::Layout;
pub use protocol::{ControlRequest, DataEvent, PerfReport, WorldMetadata};

/// Capacity of the control bus; callers pushing faster than the
/// coordinator drains get an error instead of silent reordering.
const CONTROL_BUS_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("control bus is full; coordinator is not keeping up")]
    ControlBusFull,
    #[error("coordinator has terminated")]
    Terminated,
    #[error("failed to spawn coordinator thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Handle to a running simulation engine.
///
/// Dropping the handle shuts the engine down and joins the coordinator.
pub struct Simulation {
    control: MTx<ControlRequest>,
    events: Receiver<DataEvent>,
    frame: SharedFrame,
    join: Option<JoinHandle<()>>,
}

impl Simulation {
    /// Spawn the coordinator thread. The engine idles until `init`.
    pub fn launch() -> Result<Self, EngineError> {
        let (control_tx, control_rx) = mpmc::bounded_blocking(CONTROL_BUS_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel();
        let frame: SharedFrame = Arc::new(Mutex::new(FrameBuffers::empty()));
        let coordinator_frame = Arc::clone(&frame);
        let join = thread::Builder::new()
            .name("tribesim-coordinator".into())
            .spawn(move || coordinator::run(control_rx, event_tx, coordinator_frame))?;
        Ok(Self {
            control: control_tx,
            events: event_rx,
            frame,
            join: Some(join),
        })
    }

    fn send(&self, request: ControlRequest) -> Result<(), EngineError> {
        match self.control.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EngineError::ControlBusFull),
            Err(TrySendError::Disconnected(_)) => Err(EngineError::Terminated),
        }
    }

    /// Build the world and start the workers. Emits `DataEvent::Ready`
    /// once every partition reports in.
    pub fn init(&self, cfg: SimConfig) -> Result<(), EngineError> {
        self.send(ControlRequest::Init(Box::new(cfg)))
    }

    pub fn pause(&self, paused: bool) -> Result<(), EngineError> {
        self.send(ControlRequest::Pause(paused))
    }

    pub fn set_speed(&self, speed: f32) -> Result<(), EngineError> {
        self.send(ControlRequest::SetSpeed(speed))
    }

    pub fn request_stats(&self) -> Result<(), EngineError> {
        self.send(ControlRequest::RequestStats)
    }

    pub fn request_perf(&self) -> Result<(), EngineError> {
        self.send(ControlRequest::RequestPerf)
    }

    pub fn update_food_params(
        &self,
        capacity: Option<f32>,
        regen: Option<f32>,
    ) -> Result<(), EngineError> {
        self.send(ControlRequest::UpdateFoodParams { capacity, regen })
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.send(ControlRequest::Shutdown)
    }

    /// Non-blocking event poll.
    pub fn try_event(&self) -> Option<DataEvent> {
        self.events.try_recv().ok()
    }

    /// Block up to `timeout` for the next data event.
    pub fn wait_event(&self, timeout: Duration) -> Option<DataEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Shared render mirror. Lock briefly, copy, release; workers write
    /// their own ranges between ticks.
    pub fn frame(&self) -> SharedFrame {
        Arc::clone(&self.frame)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        // Blocking send: a full bus must not leave the coordinator
        // running with nobody to join it.
        let _ = self.control.send(ControlRequest::Shutdown);
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            warn!("coordinator thread panicked");
        }
    }
}
