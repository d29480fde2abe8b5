//! Binary entrypoint for the meshfinder CLI.
//!
//! Commands:
//! - `init` - write a starter `meshfinder.toml`
//! - `friends [--json]` - list the stored friend table
//! - `forget <index>` - remove a friend by list index
//! - `simulate [--loss P] [--duplicate P] [--seconds N] [--seed S] [--speed X]` - pair two
//!   simulated devices over a lossy mesh, then have them track each other
//! - `status` - print configuration summary and stored friend count
//!
//! See the library crate docs for module-level details: `meshfinder::`.
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshfinder::config::Config;
use meshfinder::finder::{
    Collaborators, FinderEngine, FriendStore, GpsFix, LogUi, ManualClock, MemoryGps,
    StaticSensors,
};
use meshfinder::logutil::describe_telemetry;
use meshfinder::mesh::{NodeId, SimMesh};
use meshfinder::metrics;
use meshfinder::storage::{MemoryBlobStore, SledBlobStore};

#[derive(Parser)]
#[command(name = "meshfinder")]
#[command(about = "Friend pairing and live tracking for Meshtastic handhelds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "meshfinder.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// List stored friends
    Friends {
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a stored friend by its list index
    Forget {
        /// Index as shown by `friends`
        index: usize,
    },
    /// Pair two simulated devices and run a tracking session between them
    Simulate {
        /// Per-recipient packet loss probability (0.0-1.0)
        #[arg(short, long, default_value_t = 0.1)]
        loss: f64,
        /// Per-recipient duplication probability (0.0-1.0)
        #[arg(short, long, default_value_t = 0.05)]
        duplicate: f64,
        /// Simulated seconds of tracking after pairing
        #[arg(short, long, default_value_t = 60)]
        seconds: u64,
        /// RNG seed for the mesh and both engines
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Simulated time per wall-clock time
        #[arg(long, default_value_t = 50)]
        speed: u64,
    },
    /// Show configuration summary and friend count
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init writes the config, so there is nothing to load yet.
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Friends { json } => {
            let config = load_or_default(pre_config, &cli.config);
            let store = open_friend_store(&config)?;
            if json {
                let rows: Vec<serde_json::Value> = store
                    .iter_used()
                    .enumerate()
                    .map(|(i, rec)| {
                        serde_json::json!({
                            "index": i,
                            "node": rec.node.to_string(),
                            "session_id": rec.session_id,
                            "last_heard_ms": rec.last_heard_ms,
                            "last_data": rec.last_data,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            if store.used_count() == 0 {
                println!("No friends stored.");
            }
            for (i, rec) in store.iter_used().enumerate() {
                let heard = if rec.last_heard_ms == 0 {
                    "never heard".to_string()
                } else {
                    describe_telemetry(&rec.last_data)
                };
                println!(
                    "{:>2}  {}  session={:08x}  {}",
                    i, rec.node, rec.session_id, heard
                );
            }
        }
        Commands::Forget { index } => {
            let config = load_or_default(pre_config, &cli.config);
            let mut store = open_friend_store(&config)?;
            match store.remove_by_list_index(index) {
                Some(rec) => println!("Removed {}", rec.node),
                None => println!("No friend at index {}", index),
            }
        }
        Commands::Simulate {
            loss,
            duplicate,
            seconds,
            seed,
            speed,
        } => {
            let config = load_or_default(pre_config, &cli.config);
            simulate(&config, loss, duplicate, seconds, seed, speed).await?;
        }
        Commands::Status => {
            let config = load_or_default(pre_config, &cli.config);
            let node = config
                .node
                .node_id()
                .map(|n| n.to_string())
                .unwrap_or_else(|e| format!("invalid ({})", e));
            let store = open_friend_store(&config)?;
            println!("meshfinder v{}", env!("CARGO_PKG_VERSION"));
            println!("node:            {}", node);
            println!(
                "data:            {} (namespace '{}')",
                config.storage.data_dir, config.storage.namespace
            );
            println!(
                "friends:         {}/{}",
                store.used_count(),
                meshfinder::finder::MAX_FRIENDS
            );
            println!(
                "pairing window:  {}s, heartbeat {}s, background {}s",
                config.finder.pairing_window_secs,
                config.finder.update_interval_secs,
                config.finder.background_update_interval_secs
            );
            println!(
                "gps:             {}s normal, {}s boosted",
                config.gps.default_interval_secs, config.gps.boosted_interval_secs
            );
        }
    }

    Ok(())
}

fn load_or_default(pre_config: Option<Config>, path: &str) -> Config {
    pre_config.unwrap_or_else(|| {
        warn!("Could not load {}, using defaults", path);
        Config::default()
    })
}

fn open_friend_store(config: &Config) -> Result<FriendStore> {
    let backend = SledBlobStore::open(&config.storage.data_dir, &config.storage.namespace)
        .map_err(|e| anyhow!("Failed to open friend store in {}: {}", config.storage.data_dir, e))?;
    Ok(FriendStore::load(
        Box::new(backend),
        config.finder.eviction_policy(),
    ))
}

struct SimNode {
    engine: FinderEngine,
    sensors: StaticSensors,
}

fn sim_node(mesh: &mut SimMesh, id: NodeId, config: &Config, clock: &ManualClock, fix: GpsFix, seed: u64) -> SimNode {
    let sensors = StaticSensors::new().with_fix(fix);
    let collaborators = Collaborators {
        transport: Box::new(mesh.attach(id)),
        clock: Box::new(clock.clone()),
        sensors: Box::new(sensors.clone()),
        gps: Box::new(MemoryGps::new(config.gps.default_interval_secs)),
        ui: Box::new(LogUi::new(Some(true)).with_label(id.to_string())),
        store: Some(Box::new(MemoryBlobStore::new())),
    };
    let engine = FinderEngine::new(id, config, collaborators).with_seed(seed);
    SimNode { engine, sensors }
}

/// Advance both engines and the mesh by `duration` of simulated time.
async fn run_for(
    nodes: &mut [SimNode; 2],
    mesh: &mut SimMesh,
    clock: &ManualClock,
    step: Duration,
    interval: &mut tokio::time::Interval,
    duration: Duration,
    until: impl Fn(&[SimNode; 2]) -> bool,
) {
    let deadline = clock.now() + duration.as_millis() as u64;
    while clock.now() < deadline {
        interval.tick().await;
        clock.advance(step.as_millis() as u64);
        for node in nodes.iter_mut() {
            node.engine.tick();
        }
        for (recipient, packet) in mesh.deliver() {
            if let Some(node) = nodes.iter_mut().find(|n| n.engine.self_id() == recipient) {
                node.engine.on_packet(&packet);
            }
        }
        if until(&*nodes) {
            break;
        }
    }
}

async fn simulate(
    config: &Config,
    loss: f64,
    duplicate: f64,
    seconds: u64,
    seed: u64,
    speed: u64,
) -> Result<()> {
    config.validate()?;
    let mut mesh = SimMesh::new(loss, duplicate, seed);
    let clock = ManualClock::new();
    let (a, b) = (NodeId(0x0000_a11c), NodeId(0x0000_b0b0));
    let mut nodes = [
        sim_node(&mut mesh, a, config, &clock, GpsFix::from_degrees(37.7749, -122.4194, 9), seed),
        sim_node(&mut mesh, b, config, &clock, GpsFix::from_degrees(37.7790, -122.4130, 7), seed.wrapping_add(1)),
    ];

    let step = Duration::from_millis(config.finder.active_tick_ms);
    let real = Duration::from_micros((step.as_micros() as u64 / speed.max(1)).max(1));
    let mut interval = tokio::time::interval(real);
    info!(
        "Simulating {} <-> {} (loss {:.0}%, duplicate {:.0}%, seed {})",
        a,
        b,
        loss * 100.0,
        duplicate * 100.0,
        seed
    );

    nodes[0].engine.begin_pairing();
    run_for(&mut nodes, &mut mesh, &clock, step, &mut interval, Duration::from_millis(700), |_| false).await;
    nodes[1].engine.begin_pairing();
    let window = Duration::from_secs(config.finder.pairing_window_secs + 2);
    run_for(&mut nodes, &mut mesh, &clock, step, &mut interval, window, |n| {
        n[0].engine.state().is_idle()
            && n[1].engine.state().is_idle()
            && n[0].engine.friends().contains(b)
            && n[1].engine.friends().contains(a)
    })
    .await;

    let paired_a = nodes[0].engine.friends().contains(b);
    let paired_b = nodes[1].engine.friends().contains(a);
    println!(
        "pairing: {} knows {}: {}, {} knows {}: {}",
        a, b, paired_a, b, a, paired_b
    );
    if !paired_a {
        println!("pairing failed; try a lower --loss or another --seed");
        print_summary(&nodes, &mesh);
        return Ok(());
    }

    // A friend is tracked without a round trip, so each side opens its own session.
    nodes[0].engine.start_tracking(b);
    nodes[1].engine.start_tracking(a);
    let total = Duration::from_secs(seconds);
    let slice = Duration::from_secs(5).min(total);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        run_for(&mut nodes, &mut mesh, &clock, step, &mut interval, slice, |_| false).await;
        elapsed += slice;
        // Walk B a little north-east every slice.
        let drift = elapsed.as_secs() as f64 * 1e-5;
        nodes[1]
            .sensors
            .set_fix(Some(GpsFix::from_degrees(37.7790 + drift, -122.4130 + drift, 7)));
        if let Some(view) = nodes[0].engine.session_view() {
            println!(
                "t+{:>3}s {} -> {}: {} {} ({}), peer {} {}",
                elapsed.as_secs(),
                a,
                view.peer,
                view.distance_label,
                view.bearing_label,
                view.age_label,
                view.battery_label,
                view.sats_label
            );
        } else {
            println!("t+{:>3}s {}", elapsed.as_secs(), nodes[0].engine.status());
        }
    }

    nodes[0].engine.end_session(true);
    run_for(&mut nodes, &mut mesh, &clock, step, &mut interval, Duration::from_secs(2), |_| false).await;
    print_summary(&nodes, &mesh);
    Ok(())
}

fn print_summary(nodes: &[SimNode; 2], mesh: &SimMesh) {
    for node in nodes {
        println!("{}: {}", node.engine.self_id(), node.engine.status());
    }
    let m = metrics::snapshot();
    let s = mesh.stats();
    println!(
        "mesh: sent={} delivered={} dropped={} duplicated={}",
        s.sent, s.delivered, s.dropped, s.duplicated
    );
    println!(
        "metrics: tx={} tx_fail={} rx={} decode_fail={} pairings={} sessions={}/{} background={}",
        m.packets_sent,
        m.send_failures,
        m.packets_received,
        m.decode_failures,
        m.pairings_completed,
        m.sessions_started,
        m.sessions_ended,
        m.background_beacons
    );
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity wins; otherwise the configured level.
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when someone is watching.
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
