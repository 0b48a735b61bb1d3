//! Worker thread: owns one `PartitionWorld` and drives it on a fixed
//! timestep.
//!
//! The loop drains coordinator commands, then burns the time accumulator
//! down in fixed ticks. Pause and speed changes land between ticks, never
//! inside one. Each tick runs under `catch_unwind` so a panicking
//! partition logs and skips instead of taking the process down.

use std::collections::BTreeMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, warn};

use tribesim_core::behavior::GhostEntity;
use tribesim_core::{EntitySeed, PartitionWorld, Region, SimConfig};

use crate::frame::{self, SharedFrame};
use crate::protocol::{PerfSample, WorkerCommand, WorkerReport};

/// Longest backlog of simulated time a worker will try to catch up on.
const MAX_BACKLOG_SECS: f32 = 0.25;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct WorkerSpec {
    pub id: usize,
    pub cfg: Arc<SimConfig>,
    pub region: Region,
    pub base: usize,
    pub capacity: usize,
    pub seeds: Vec<EntitySeed>,
    pub commands: Receiver<WorkerCommand>,
    pub reports: Sender<WorkerReport>,
    pub frame: SharedFrame,
}

pub fn spawn(spec: WorkerSpec) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("tribesim-worker-{}", spec.id))
        .spawn(move || run(spec))
}

struct PerfCounters {
    since: Instant,
    ticks: u64,
    total: Duration,
    max: Duration,
}

impl PerfCounters {
    fn new() -> Self {
        Self {
            since: Instant::now(),
            ticks: 0,
            total: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    fn record(&mut self, tick_time: Duration) {
        self.ticks += 1;
        self.total += tick_time;
        self.max = self.max.max(tick_time);
    }

    fn sample(&mut self, partition: usize, entities: u32) -> PerfSample {
        let wall = self.since.elapsed().as_secs_f32().max(1e-6);
        let sample = PerfSample {
            partition,
            ticks_per_sec: self.ticks as f32 / wall,
            avg_tick_ms: if self.ticks > 0 {
                self.total.as_secs_f32() * 1000.0 / self.ticks as f32
            } else {
                0.0
            },
            max_tick_ms: self.max.as_secs_f32() * 1000.0,
            entities,
        };
        *self = Self::new();
        sample
    }
}

fn run(spec: WorkerSpec) {
    let WorkerSpec {
        id,
        cfg,
        region,
        base,
        capacity,
        seeds,
        commands,
        reports,
        frame,
    } = spec;

    let mut world = match PartitionWorld::new(&cfg, id, region, base, capacity, seeds) {
        Ok(world) => world,
        Err(err) => {
            error!(partition = id, error = %err, "partition construction failed");
            let _ = reports.send(WorkerReport::Failed {
                partition: id,
                message: err.to_string(),
            });
            return;
        }
    };
    // Mirror the freshly spawned entities before reporting ready so
    // consumers of the Ready event see a populated frame.
    if let Ok(mut buffers) = frame.lock() {
        frame::write_partition(&mut buffers, &world);
    }
    let _ = reports.send(WorkerReport::Ready { partition: id });

    let fixed_dt = cfg.fixed_dt();
    let mut paused = true;
    let mut speed = 1.0f32;
    let mut accumulator = 0.0f32;
    let mut last = Instant::now();
    let mut ghost_map: BTreeMap<usize, Arc<Vec<GhostEntity>>> = BTreeMap::new();
    let mut perf = PerfCounters::new();

    'main: loop {
        loop {
            match commands.try_recv() {
                Ok(command) => match command {
                    WorkerCommand::Pause(p) => {
                        paused = p;
                        if !p {
                            last = Instant::now();
                        }
                    }
                    WorkerCommand::SetSpeed(s) => {
                        if s.is_finite() && s > 0.0 {
                            speed = s.clamp(0.05, 16.0);
                        } else {
                            warn!(partition = id, speed = s, "ignoring invalid speed");
                        }
                    }
                    WorkerCommand::SyncGhosts => {
                        let snapshot = Arc::new(world.border_snapshot());
                        let _ = reports.send(WorkerReport::Border {
                            partition: id,
                            entities: snapshot,
                        });
                    }
                    WorkerCommand::Ghosts { from, entities } => {
                        ghost_map.insert(from, entities);
                        let merged: Vec<GhostEntity> = ghost_map
                            .values()
                            .flat_map(|batch| batch.iter().copied())
                            .collect();
                        world.set_ghosts(merged);
                    }
                    WorkerCommand::PushStats => {
                        let _ = reports.send(WorkerReport::Stats(Box::new(world.stats())));
                    }
                    WorkerCommand::PushPerf => {
                        let entities = world.store().live_count() as u32;
                        let _ = reports.send(WorkerReport::Perf(perf.sample(id, entities)));
                    }
                    WorkerCommand::Admit { ticket, seed } => match world.admit(seed) {
                        Some(slot) => {
                            let _ = reports.send(WorkerReport::Admitted {
                                partition: id,
                                ticket,
                                slot,
                            });
                        }
                        None => {
                            let _ = reports.send(WorkerReport::Refused {
                                partition: id,
                                ticket,
                            });
                        }
                    },
                    WorkerCommand::Release { slot } => world.release(slot),
                    WorkerCommand::Reinstate { slot } => world.reinstate(slot),
                    WorkerCommand::UpdateFood { capacity, regen } => {
                        world.update_food_params(capacity, regen);
                    }
                    WorkerCommand::Shutdown => break 'main,
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'main,
            }
        }

        if paused {
            accumulator = 0.0;
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let now = Instant::now();
        accumulator = (accumulator + (now - last).as_secs_f32() * speed).min(MAX_BACKLOG_SECS);
        last = now;

        let mut ticked = false;
        while accumulator >= fixed_dt {
            accumulator -= fixed_dt;
            let started = Instant::now();
            match panic::catch_unwind(AssertUnwindSafe(|| world.tick(fixed_dt))) {
                Ok(Ok(outcome)) => {
                    ticked = true;
                    perf.record(started.elapsed());
                    for (slot, seed) in outcome.departures {
                        let _ = reports.send(WorkerReport::Departure {
                            partition: id,
                            slot,
                            seed,
                        });
                    }
                }
                Ok(Err(err)) => {
                    error!(partition = id, error = %err, "tick failed");
                    accumulator = 0.0;
                    break;
                }
                Err(payload) => {
                    let message = panic_message(&payload);
                    error!(partition = id, message, "tick panicked; partition isolated");
                    let _ = reports.send(WorkerReport::TickPanicked {
                        partition: id,
                        message: message.to_owned(),
                    });
                    accumulator = 0.0;
                    break;
                }
            }
        }

        if ticked {
            if let Ok(mut buffers) = frame.lock() {
                frame::write_partition(&mut buffers, &world);
            }
        } else {
            thread::sleep(IDLE_SLEEP);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
