//! Headless runner: build a simulation from a JSON config (or a built-in
//! demo world), then stream stats to the log until extinction, the
//! requested duration elapses, or the process is killed.
//!
//! Usage: `tribesim [config.json] [seconds]`

use std::fs;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tribesim_core::gene::GeneOverrides;
use tribesim_core::{SimConfig, SpawnConfig, SpawnPattern, TribeConfig};
use tribesim_engine::{DataEvent, Simulation};

const PERF_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Three-tribe demo: a grazing herd, a pack of hunters, and adaptable
/// omnivores scattered over the map.
fn demo_config() -> SimConfig {
    let mut cfg = SimConfig::default();
    cfg.tribes = vec![
        TribeConfig {
            name: "grazers".into(),
            spawn: SpawnConfig {
                count: 120,
                pattern: SpawnPattern::Herd,
                ..SpawnConfig::default()
            },
            genes: GeneOverrides {
                diet: Some(-0.9),
                aggression: Some(0.1),
                cohesion: Some(0.8),
                ..GeneOverrides::default()
            },
            ..TribeConfig::default()
        },
        TribeConfig {
            name: "hunters".into(),
            spawn: SpawnConfig {
                count: 40,
                pattern: SpawnPattern::Blob,
                ..SpawnConfig::default()
            },
            genes: GeneOverrides {
                diet: Some(0.8),
                aggression: Some(0.8),
                speed: Some(28.0),
                ..GeneOverrides::default()
            },
            ..TribeConfig::default()
        },
        TribeConfig {
            name: "drifters".into(),
            spawn: SpawnConfig {
                count: 80,
                pattern: SpawnPattern::Scattered,
                ..SpawnConfig::default()
            },
            genes: GeneOverrides {
                diet: Some(0.0),
                ..GeneOverrides::default()
            },
            ..TribeConfig::default()
        },
    ];
    cfg
}

fn load_config(path: Option<&str>) -> Result<SimConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config file {path}"))
        }
        None => Ok(demo_config()),
    }
}

fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let run_seconds: Option<u64> = match args.next() {
        Some(raw) => Some(raw.parse().context("seconds must be a whole number")?),
        None => None,
    };

    let cfg = load_config(config_path.as_deref())?;
    info!(
        world_w = cfg.world_width,
        world_h = cfg.world_height,
        workers = cfg.workers,
        tribes = cfg.tribes.len(),
        seed = cfg.seed,
        "starting simulation"
    );

    let sim = Simulation::launch()?;
    sim.init(cfg)?;

    let started = Instant::now();
    let deadline = run_seconds.map(|s| started + Duration::from_secs(s));
    let mut last_perf_request = Instant::now();

    loop {
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            info!("requested duration elapsed");
            break;
        }
        if last_perf_request.elapsed() >= PERF_LOG_INTERVAL {
            last_perf_request = Instant::now();
            sim.request_perf()?;
        }

        let Some(event) = sim.wait_event(Duration::from_millis(250)) else {
            continue;
        };
        match event {
            DataEvent::Ready(meta) => {
                info!(
                    workers = meta.workers,
                    capacity = meta.capacity,
                    tribes = meta.tribes.len(),
                    "world ready"
                );
            }
            DataEvent::Stats(stats) => {
                let mean_of = |gene: &str| {
                    stats
                        .gene_means()
                        .find(|(name, _)| *name == gene)
                        .map_or(0.0, |(_, mean)| mean)
                };
                info!(
                    t = format_args!("{:.1}", stats.time),
                    population = stats.population,
                    by_tribe = ?stats.by_tribe,
                    births = stats.births,
                    deaths = stats.deaths,
                    kills = stats.kills,
                    starved = stats.starved,
                    defections = stats.defections,
                    mean_speed = format_args!("{:.1}", mean_of("speed")),
                    mean_diet = format_args!("{:+.2}", mean_of("diet")),
                    food = format_args!("{:.2}", stats.food_occupancy),
                    "stats"
                );
            }
            DataEvent::Perf(perf) => {
                info!(
                    ticks_per_sec = format_args!("{:.0}", perf.ticks_per_sec),
                    avg_tick_ms = format_args!("{:.2}", perf.avg_tick_ms),
                    max_tick_ms = format_args!("{:.2}", perf.max_tick_ms),
                    entities = perf.entities,
                    "perf"
                );
            }
            DataEvent::Extinction {
                final_time,
                final_stats,
            } => {
                warn!(
                    t = format_args!("{:.1}", final_time),
                    births = final_stats.births,
                    deaths = final_stats.deaths,
                    kills = final_stats.kills,
                    starved = final_stats.starved,
                    "extinction; every tribe has died out"
                );
                break;
            }
        }
    }

    sim.shutdown()?;
    Ok(())
}
