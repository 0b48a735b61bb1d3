//! Coordinator thread: lifecycle state machine, ghost routing, migration
//! handshake, stats aggregation.
//!
//! The coordinator is the only code that reads the control bus, the only
//! code that writes the ownership ledger, and the only router between
//! workers. Workers never talk to each other directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossfire::MRx;
use rand::{SeedableRng, rngs::SmallRng};
use tracing::{debug, error, info, warn};

use tribesim_core::stats::{self, PartitionStats};
use tribesim_core::{BiomeField, EntitySeed, SimConfig, spawn};

use crate::frame::{FrameBuffers, SharedFrame};
use crate::layout::Layout;
use crate::protocol::{
    ControlRequest, DataEvent, PerfReport, WorkerCommand, WorkerReport, WorldMetadata,
};
use crate::worker::{self, WorkerSpec};

/// Ghost snapshots are exchanged at roughly this cadence.
const SYNC_INTERVAL: Duration = Duration::from_millis(16);
/// Stats pushes are throttled to this cadence while running.
const STATS_INTERVAL: Duration = Duration::from_millis(500);
const LOOP_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Allocating,
    Spawning,
    WaitingForWorkers,
    Running,
    Paused,
    Terminated,
}

/// Who may write a global slot right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotOwner {
    Partition(usize),
    /// Between a migration request and its accept/refuse resolution.
    InFlight { ticket: u64 },
}

struct PendingMigration {
    source: usize,
    slot: usize,
}

struct WorkerLink {
    commands: Sender<WorkerCommand>,
    join: Option<JoinHandle<()>>,
}

impl WorkerLink {
    fn send(&self, partition: usize, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            warn!(partition, "worker command channel closed");
        }
    }
}

struct Coordinator {
    control: MRx<ControlRequest>,
    events: Sender<DataEvent>,
    frame: SharedFrame,
    state: State,
    layout: Option<Layout>,
    metadata: Option<WorldMetadata>,
    workers: Vec<WorkerLink>,
    reports: Option<Receiver<WorkerReport>>,
    ownership: Vec<SlotOwner>,
    pending: HashMap<u64, PendingMigration>,
    next_ticket: u64,
    ready_acks: usize,
    paused: bool,
    speed: f32,
    stats_cache: Vec<Option<PartitionStats>>,
    perf_cache: Vec<Option<crate::protocol::PerfSample>>,
    extinction_reported: bool,
    spawned_any: bool,
    last_sync: Instant,
    last_stats: Instant,
}

/// Thread body behind `Simulation::launch`.
pub fn run(control: MRx<ControlRequest>, events: Sender<DataEvent>, frame: SharedFrame) {
    Coordinator::new(control, events, frame).run_loop();
}

impl Coordinator {
    fn new(control: MRx<ControlRequest>, events: Sender<DataEvent>, frame: SharedFrame) -> Self {
        Self {
            control,
            events,
            frame,
            state: State::Uninitialized,
            layout: None,
            metadata: None,
            workers: Vec::new(),
            reports: None,
            ownership: Vec::new(),
            pending: HashMap::new(),
            next_ticket: 1,
            ready_acks: 0,
            paused: false,
            speed: 1.0,
            stats_cache: Vec::new(),
            perf_cache: Vec::new(),
            extinction_reported: false,
            spawned_any: false,
            last_sync: Instant::now(),
            last_stats: Instant::now(),
        }
    }

    fn run_loop(mut self) {
        loop {
            loop {
                match self.control.try_recv() {
                    Ok(request) => {
                        if self.handle_control(request) {
                            self.shutdown();
                            return;
                        }
                    }
                    Err(crossfire::TryRecvError::Empty) => break,
                    Err(crossfire::TryRecvError::Disconnected) => {
                        debug!("control bus dropped; shutting down");
                        self.shutdown();
                        return;
                    }
                }
            }

            self.drain_reports();

            if self.state == State::Running {
                if self.last_sync.elapsed() >= SYNC_INTERVAL {
                    self.last_sync = Instant::now();
                    self.broadcast(WorkerCommand::SyncGhosts);
                }
                if !self.paused && self.last_stats.elapsed() >= STATS_INTERVAL {
                    self.last_stats = Instant::now();
                    self.broadcast(WorkerCommand::PushStats);
                }
            }

            thread::sleep(LOOP_SLEEP);
        }
    }

    /// Returns true when the loop should terminate.
    fn handle_control(&mut self, request: ControlRequest) -> bool {
        match request {
            ControlRequest::Init(cfg) => {
                if self.state != State::Uninitialized {
                    warn!(state = ?self.state, "duplicate Init rejected");
                    if matches!(self.state, State::Running | State::Paused)
                        && let Some(meta) = &self.metadata
                    {
                        // Idempotent re-entry: the caller gets the same
                        // Ready it missed.
                        let _ = self.events.send(DataEvent::Ready(Box::new(meta.clone())));
                    }
                    return false;
                }
                if let Err(err) = self.initialize(*cfg) {
                    error!(error = %err, "initialization aborted");
                    self.state = State::Uninitialized;
                }
                false
            }
            ControlRequest::Pause(paused) => {
                self.paused = paused;
                match (self.state, paused) {
                    (State::Running, true) => self.state = State::Paused,
                    (State::Paused, false) => self.state = State::Running,
                    _ => {}
                }
                self.broadcast(WorkerCommand::Pause(paused));
                false
            }
            ControlRequest::SetSpeed(speed) => {
                if speed.is_finite() && speed > 0.0 {
                    self.speed = speed.clamp(0.05, 16.0);
                    self.broadcast(WorkerCommand::SetSpeed(self.speed));
                } else {
                    warn!(speed, "ignoring invalid speed request");
                }
                false
            }
            ControlRequest::RequestStats => {
                self.broadcast(WorkerCommand::PushStats);
                false
            }
            ControlRequest::RequestPerf => {
                self.broadcast(WorkerCommand::PushPerf);
                false
            }
            ControlRequest::UpdateFoodParams { capacity, regen } => {
                self.broadcast(WorkerCommand::UpdateFood { capacity, regen });
                false
            }
            ControlRequest::Shutdown => true,
        }
    }

    fn initialize(&mut self, mut cfg: SimConfig) -> Result<(), tribesim_core::WorldError> {
        cfg.validate()?;
        for note in cfg.sanitize() {
            warn!(note, "config repaired");
        }
        cfg.workers = cfg.workers.min(cfg.capacity);

        self.state = State::Allocating;
        let layout = Layout::new(&cfg);
        let partitions = layout.partitions();
        info!(
            workers = partitions,
            capacity = cfg.capacity,
            world_w = cfg.world_width,
            world_h = cfg.world_height,
            "allocating partitions"
        );

        {
            let mut frame = self
                .frame
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *frame = FrameBuffers::new(
                cfg.capacity,
                cfg.food.resolution,
                cfg.food.resolution,
                partitions,
            );
        }

        self.state = State::Spawning;
        let biome = BiomeField::generate(
            cfg.seed,
            cfg.world_width,
            cfg.world_height,
            cfg.food.resolution,
            cfg.food.terrain,
        );
        let specs = cfg.tribe_specs();
        let mut rng = SmallRng::seed_from_u64(cfg.seed);
        let mut routed: Vec<Vec<EntitySeed>> = vec![Vec::new(); partitions];
        let mut spawned = 0usize;
        for (t, tribe) in cfg.tribes.iter().enumerate() {
            for seed in spawn::tribe_seeds(t as u16, tribe, &specs[t], &cfg, &biome, &mut rng) {
                routed[layout.resolve(seed.x, seed.y)].push(seed);
                spawned += 1;
            }
        }
        self.spawned_any = spawned > 0;
        info!(entities = spawned, "seeded tribes");

        let (report_tx, report_rx) = mpsc::channel();
        let shared_cfg = Arc::new(cfg);
        let mut workers = Vec::with_capacity(partitions);
        for (p, seeds) in routed.into_iter().enumerate() {
            let (cmd_tx, cmd_rx) = mpsc::channel();
            let (base, capacity) = layout.range(p);
            let spec = WorkerSpec {
                id: p,
                cfg: Arc::clone(&shared_cfg),
                region: layout.region(p),
                base,
                capacity,
                seeds,
                commands: cmd_rx,
                reports: report_tx.clone(),
                frame: Arc::clone(&self.frame),
            };
            match worker::spawn(spec) {
                Ok(join) => workers.push(WorkerLink {
                    commands: cmd_tx,
                    join: Some(join),
                }),
                Err(err) => {
                    error!(partition = p, error = %err, "worker thread spawn failed");
                    for link in &workers {
                        let _ = link.commands.send(WorkerCommand::Shutdown);
                    }
                    return Err(tribesim_core::WorldError::ZeroWorkers);
                }
            }
        }

        self.metadata = Some(WorldMetadata {
            world_width: shared_cfg.world_width,
            world_height: shared_cfg.world_height,
            capacity: shared_cfg.capacity,
            workers: partitions,
            food_cols: shared_cfg.food.resolution,
            food_rows: shared_cfg.food.resolution,
            tribes: specs,
            slot_ranges: layout.ranges().to_vec(),
        });
        self.ownership = (0..shared_cfg.capacity)
            .map(|slot| SlotOwner::Partition(layout.owner_of_slot(slot).unwrap_or(0)))
            .collect();
        self.stats_cache = vec![None; partitions];
        self.perf_cache = vec![None; partitions];
        self.workers = workers;
        self.reports = Some(report_rx);
        self.layout = Some(layout);
        self.ready_acks = 0;
        self.state = State::WaitingForWorkers;
        Ok(())
    }

    fn broadcast(&self, command: WorkerCommand) {
        for (p, link) in self.workers.iter().enumerate() {
            link.send(p, command.clone());
        }
    }

    fn send_to(&self, partition: usize, command: WorkerCommand) {
        if let Some(link) = self.workers.get(partition) {
            link.send(partition, command);
        }
    }

    fn drain_reports(&mut self) {
        let Some(reports) = &self.reports else {
            return;
        };
        let mut batch = Vec::new();
        loop {
            match reports.try_recv() {
                Ok(report) => batch.push(report),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        for report in batch {
            self.handle_report(report);
        }
    }

    fn handle_report(&mut self, report: WorkerReport) {
        match report {
            WorkerReport::Ready { partition } => {
                debug!(partition, "worker ready");
                self.ready_acks += 1;
                if self.state == State::WaitingForWorkers && self.ready_acks == self.workers.len()
                {
                    // A pause requested before the workers came up sticks:
                    // the world comes up frozen instead of running.
                    self.state = if self.paused {
                        State::Paused
                    } else {
                        State::Running
                    };
                    self.broadcast(WorkerCommand::Pause(self.paused));
                    if let Some(meta) = &self.metadata {
                        info!(workers = meta.workers, paused = self.paused, "simulation started");
                        let _ = self.events.send(DataEvent::Ready(Box::new(meta.clone())));
                    }
                    self.last_sync = Instant::now();
                    self.last_stats = Instant::now();
                }
            }
            WorkerReport::Failed { partition, message } => {
                error!(partition, message, "partition failed; terminating run");
                self.shutdown_workers();
                self.state = State::Terminated;
            }
            WorkerReport::Border {
                partition,
                entities,
            } => {
                if let Some(layout) = &self.layout {
                    for neighbor in layout.neighbors(partition) {
                        self.send_to(
                            neighbor,
                            WorkerCommand::Ghosts {
                                from: partition,
                                entities: Arc::clone(&entities),
                            },
                        );
                    }
                }
            }
            WorkerReport::Departure {
                partition,
                slot,
                seed,
            } => self.handle_departure(partition, slot, seed),
            WorkerReport::Admitted {
                partition,
                ticket,
                slot,
            } => {
                let Some(pending) = self.pending.remove(&ticket) else {
                    warn!(partition, ticket, "accept for unknown migration ticket");
                    return;
                };
                self.set_owner(partition, slot, SlotOwner::Partition(partition));
                self.send_to(
                    pending.source,
                    WorkerCommand::Release { slot: pending.slot },
                );
                self.set_owner(
                    pending.source,
                    pending.slot,
                    SlotOwner::Partition(pending.source),
                );
                debug!(
                    from = pending.source,
                    to = partition,
                    ticket,
                    "migration completed"
                );
            }
            WorkerReport::Refused { partition, ticket } => {
                let Some(pending) = self.pending.remove(&ticket) else {
                    warn!(partition, ticket, "refusal for unknown migration ticket");
                    return;
                };
                self.send_to(
                    pending.source,
                    WorkerCommand::Reinstate { slot: pending.slot },
                );
                self.set_owner(
                    pending.source,
                    pending.slot,
                    SlotOwner::Partition(pending.source),
                );
                debug!(
                    from = pending.source,
                    to = partition,
                    ticket,
                    "migration refused; reinstating"
                );
            }
            WorkerReport::Stats(stats) => {
                let partition = stats.partition;
                if let Some(slot) = self.stats_cache.get_mut(partition) {
                    *slot = Some(*stats);
                }
                if self.stats_cache.iter().all(|s| s.is_some()) {
                    self.publish_stats();
                }
            }
            WorkerReport::Perf(sample) => {
                if let Some(slot) = self.perf_cache.get_mut(sample.partition) {
                    *slot = Some(sample);
                }
                if self.perf_cache.iter().all(|s| s.is_some()) {
                    let samples: Vec<_> =
                        self.perf_cache.iter_mut().filter_map(|s| s.take()).collect();
                    let _ = self.events.send(DataEvent::Perf(PerfReport::merge(&samples)));
                }
            }
            WorkerReport::TickPanicked { partition, message } => {
                warn!(partition, message, "partition tick panicked; isolated");
            }
        }
    }

    fn handle_departure(&mut self, source: usize, slot: usize, seed: EntitySeed) {
        let Some(layout) = &self.layout else {
            return;
        };
        let destination = layout.resolve(seed.x, seed.y);
        let (base, capacity) = layout.range(source);
        if slot >= capacity {
            warn!(source, slot, "departure for slot outside partition range");
            return;
        }
        if let SlotOwner::InFlight { ticket } = self.ownership[base + slot] {
            warn!(source, slot, ticket, "duplicate departure for in-flight slot");
            return;
        }
        if destination == source {
            // Wrap math landed it back home; no handshake needed.
            self.send_to(source, WorkerCommand::Reinstate { slot });
            return;
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.set_owner(source, slot, SlotOwner::InFlight { ticket });
        self.pending
            .insert(ticket, PendingMigration { source, slot });
        self.send_to(destination, WorkerCommand::Admit { ticket, seed });
    }

    /// Ownership ledger updates, keyed by (partition, local slot).
    fn set_owner(&mut self, partition: usize, local_slot: usize, owner: SlotOwner) {
        let Some(layout) = &self.layout else {
            return;
        };
        let (base, capacity) = layout.range(partition);
        if local_slot < capacity {
            self.ownership[base + local_slot] = owner;
        }
    }

    fn publish_stats(&mut self) {
        let parts: Vec<PartitionStats> = self
            .stats_cache
            .iter_mut()
            .filter_map(|s| s.take())
            .collect();
        let merged = stats::merge(&parts);
        if merged.population == 0 && self.spawned_any && !self.extinction_reported {
            self.extinction_reported = true;
            info!(time = merged.time, "extinction");
            let _ = self.events.send(DataEvent::Extinction {
                final_time: merged.time,
                final_stats: Box::new(merged.clone()),
            });
        }
        let _ = self.events.send(DataEvent::Stats(Box::new(merged)));
    }

    fn shutdown_workers(&mut self) {
        self.broadcast(WorkerCommand::Shutdown);
        for link in &mut self.workers {
            if let Some(join) = link.join.take()
                && join.join().is_err()
            {
                warn!("worker thread panicked during shutdown");
            }
        }
        self.workers.clear();
    }

    fn shutdown(&mut self) {
        info!("coordinator shutting down");
        self.shutdown_workers();
        self.state = State::Terminated;
    }
}
