use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use horizon_lib::device::{InitData, InitProgress};
use horizon_lib::entities::{LineSegment, PointOfInterest};
use horizon_lib::frame::{build_frame, parse_frame};
use horizon_lib::sim::{SimOptions, SimulatedDevice};
use horizon_lib::{Horizon, SessionConfig};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Tools for the Horizon link protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encode and decode single frames
    #[command(subcommand)]
    Frame(FrameCommand),
    /// Run device workflows against the in-process simulator
    #[command(subcommand)]
    Demo(DemoCommand),
}

#[derive(Subcommand, Debug)]
enum FrameCommand {
    /// Build a frame and print it as hex
    Build {
        /// Command identifier
        command: u16,
        /// Payload as hex
        #[arg(default_value = "")]
        payload: String,
    },
    /// Parse the first valid frame out of a hex string
    Parse {
        /// Frame bytes as hex, leading garbage allowed
        hex: String,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Split simulated notifications into fragments of this many bytes
    #[arg(long)]
    fragment: Option<usize>,
    /// Hex bytes the simulator sends ahead of every response
    #[arg(long, default_value = "")]
    noise: String,
}

#[derive(Subcommand, Debug)]
enum DemoCommand {
    /// Run the initialization sequence
    Init {
        /// JSON array of line segments
        #[arg(long)]
        lines: Option<PathBuf>,
        /// JSON array of points of interest
        #[arg(long)]
        pois: Option<PathBuf>,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        latitude: f32,
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        longitude: f32,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Upload, list, download and delete a file
    Files {
        /// Size of the file to round-trip
        #[arg(long, default_value_t = 2000)]
        size: usize,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Read every query record
    Query {
        /// Brightness the simulator reports
        #[arg(long, default_value_t = 180)]
        brightness: u16,
        #[command(flatten)]
        link: LinkArgs,
    },
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn run_frame(command: FrameCommand) -> Result<()> {
    match command {
        FrameCommand::Build { command, payload } => {
            let payload = hex::decode(payload.trim()).context("Payload is not valid hex")?;
            let bytes = build_frame(command, &payload)?;
            println!("{}", hex::encode(&bytes));
        }
        FrameCommand::Parse { hex } => {
            let bytes = hex::decode(hex.trim()).context("Input is not valid hex")?;
            let parsed = parse_frame(&bytes)?;
            let skipped = parsed.consumed - parsed.frame.wire_len();
            println!("Command:  {:?} ({})", parsed.frame.command, parsed.frame.command.id());
            println!("Length:   {}", parsed.frame.payload.len());
            println!("Payload:  {}", hex::encode(&parsed.frame.payload));
            println!("Consumed: {} ({} skipped)", parsed.consumed, skipped);
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    serde_json::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))
}

async fn connect_sim(link: &LinkArgs) -> Result<(Arc<SimulatedDevice>, Horizon<SimulatedDevice>)> {
    let noise = hex::decode(link.noise.trim()).context("Noise is not valid hex")?;
    let device = Arc::new(SimulatedDevice::new(SimOptions {
        fragment_size: link.fragment,
        noise: noise.into(),
        ..SimOptions::default()
    }));
    let config = SessionConfig::new().with_response_timeout(Duration::from_secs(1));
    let horizon = Horizon::connect(device.clone(), config).await?;
    Ok((device, horizon))
}

async fn run_demo(command: DemoCommand) -> Result<()> {
    match command {
        DemoCommand::Init {
            lines,
            pois,
            latitude,
            longitude,
            link,
        } => {
            let lines: Option<Vec<LineSegment>> = lines.as_deref().map(read_json).transpose()?;
            let pois: Option<Vec<PointOfInterest>> = pois.as_deref().map(read_json).transpose()?;
            let (device, horizon) = connect_sim(&link).await?;

            let data = InitData {
                time: None,
                latitude,
                longitude,
                lines,
                points_of_interest: pois,
            };
            let report = horizon
                .initialize(&data, |progress| match progress {
                    InitProgress::Lines { sent, total } => println!("Lines: {sent}/{total}"),
                    InitProgress::PointsOfInterest { sent, total } => {
                        println!("Points of interest: {sent}/{total}")
                    }
                })
                .await;
            print!("{report}");
            println!(
                "Device holds {} lines and {} points of interest",
                device.lines().len(),
                device.points_of_interest().len()
            );
            let stats = horizon.session().stats();
            info!(dropped = stats.dropped_bytes, resyncs = stats.resyncs, "Link statistics");
            horizon.close().await?;
            if !report.is_success() {
                bail!("Initialization finished with failures");
            }
        }
        DemoCommand::Files { size, link } => {
            let (_device, horizon) = connect_sim(&link).await?;
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            horizon.upload_file("/demo/data.bin", &data).await?;
            for entry in horizon.list_dir("/demo").await? {
                println!("{entry}");
            }
            let downloaded = horizon.download_file("/demo/data.bin").await?;
            if downloaded != data {
                bail!("Downloaded contents differ from the upload");
            }
            println!("Round-tripped {} bytes", downloaded.len());
            horizon.delete_file("/demo/data.bin").await?;
            let info = horizon.file_info("/demo/data.bin").await?;
            println!("After delete: status {}", info.status);
            horizon.close().await?;
        }
        DemoCommand::Query { brightness, link } => {
            let (device, horizon) = connect_sim(&link).await?;
            device.set_brightness(brightness);
            println!("Brightness:  {}", horizon.brightness().await?);
            let calibration = horizon.calibration().await?;
            println!(
                "Calibration: flags {:#04x} offset {:?} scale {:?}",
                calibration.flags, calibration.offset, calibration.scale
            );
            println!(
                "User config: {}",
                serde_json::to_string_pretty(&horizon.user_config().await?)?
            );
            println!("Magnetic:    {}", horizon.magnetic_field().await?);
            horizon.close().await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file, &cli.verbose)?;

    match cli.command {
        Commands::Frame(command) => run_frame(command),
        Commands::Demo(command) => run_demo(command).await,
    }
}
