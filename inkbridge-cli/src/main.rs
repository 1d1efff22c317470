//! InkBridge operator CLI — entry point.
//!
//! ```text
//! inkbridge --host 192.168.1.50:4545      Stream to a known LAN host
//! inkbridge --discover                    Find the receiver by broadcast
//! inkbridge --accessory /dev/ink0         Stream over the wired endpoint
//! inkbridge --serial AA:BB:CC:DD:EE:FF    Stream over the radio serial link
//! inkbridge --gen-config                  Dump default config and exit
//! ```
//!
//! Without a real input surface attached, the CLI drives the engine
//! with a synthetic pen stroke so links and receivers can be soak-
//! and latency-tested end to end.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inkbridge_core::transport::boost_io_thread_priority;
use inkbridge_core::{
    DeviceHandle, Pointer, PointerAction, PointerSample, SessionEvent, StreamConfig, StreamEngine,
    SurfaceSize,
};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "inkbridge", about = "InkBridge pen/touch stream sender")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "inkbridge.toml")]
    config: PathBuf,

    /// Receiver address for the LAN link. Example: 192.168.1.50:4545
    #[arg(long, conflicts_with_all = ["discover", "accessory", "serial"])]
    host: Option<SocketAddr>,

    /// Find the receiver by UDP broadcast on the local network.
    #[arg(long, conflicts_with_all = ["accessory", "serial"])]
    discover: bool,

    /// Device node of the wired accessory endpoint.
    #[arg(long, conflicts_with = "serial")]
    accessory: Option<PathBuf>,

    /// Radio address of a paired receiver (colon-hex).
    #[arg(long)]
    serial: Option<String>,

    /// RFCOMM channel for the serial link.
    #[arg(long, default_value_t = inkbridge_core::transport::serial::DEFAULT_CHANNEL)]
    channel: u8,

    /// How long to stream the synthetic stroke, in seconds.
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    fn device_handle(&self) -> DeviceHandle {
        if let Some(path) = &self.accessory {
            DeviceHandle::Accessory { path: path.clone() }
        } else if let Some(addr) = &self.serial {
            DeviceHandle::Serial { addr: addr.clone(), channel: self.channel }
        } else if self.discover {
            DeviceHandle::Lan { addr: None }
        } else {
            // --host, or discovery when no target was given at all.
            DeviceHandle::Lan { addr: self.host }
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&StreamConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = StreamConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("inkbridge v{}", env!("CARGO_PKG_VERSION"));

    // Writer latency matters more than fairness here; ask the OS to
    // favor the I/O workers.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .on_thread_start(boost_io_thread_priority)
        .build()?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: StreamConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = cli.device_handle();
    let (engine, mut events) = StreamEngine::new(config);

    // Surface session status as log lines.
    let monitor = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected(kind) => info!(transport = %kind, "connected"),
                SessionEvent::Disconnected { reason: Some(reason) } => {
                    warn!(%reason, "stream ended by fault")
                }
                SessionEvent::Disconnected { reason: None } => info!("stream closed"),
                SessionEvent::Negotiating(phase) => info!(?phase, "negotiating"),
                SessionEvent::CredentialsReady(creds) => {
                    info!(group = %creds.name, passphrase = %creds.passphrase,
                          "join the group on the receiver")
                }
                SessionEvent::Failed(reason) => warn!(%reason, "connect failed"),
            }
        }
    });

    engine.connect(handle).await?;
    stream_synthetic_stroke(&engine, Duration::from_secs(cli.duration)).await;
    engine.close().await;

    drop(engine);
    let _ = monitor.await;
    Ok(())
}

/// Drive a slow circular pen stroke at a tablet-like sample rate.
async fn stream_synthetic_stroke(engine: &StreamEngine, duration: Duration) {
    const SURFACE: SurfaceSize = SurfaceSize { width: 1920.0, height: 1080.0 };
    const SAMPLE_INTERVAL: Duration = Duration::from_millis(8);

    let start = tokio::time::Instant::now();
    let mut down = false;
    let mut sent: u64 = 0;

    while start.elapsed() < duration {
        let t = start.elapsed().as_secs_f32();
        let x = 960.0 + 400.0 * t.cos();
        let y = 540.0 + 250.0 * t.sin();
        let pressure = 0.5 + 0.4 * (t * 3.0).sin();

        let action = if down { PointerAction::Move } else { PointerAction::Down };
        down = true;
        let sample = PointerSample::new(action, vec![Pointer::stylus(x, y, pressure)]);
        if engine.forward(&sample, SURFACE) {
            sent += 1;
        }

        tokio::time::sleep(SAMPLE_INTERVAL).await;
    }

    if down {
        let (x, y) = (960.0 + 400.0, 540.0);
        let sample = PointerSample::new(PointerAction::Up, vec![Pointer::stylus(x, y, 0.0)]);
        engine.forward(&sample, SURFACE);
    }
    info!(samples = sent, "synthetic stroke finished");
}
