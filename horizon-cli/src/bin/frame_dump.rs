use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use horizon_lib::constants::DEFAULT_REASSEMBLY_CAPACITY;
use horizon_lib::reassembly::ReassemblyBuffer;
use std::io::BufRead;
use tracing::warn;

/// Reassemble frames from captured notification fragments.
///
/// Reads one hex-encoded fragment per line from stdin and prints every frame
/// recovered from the stream.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Reassembly buffer bound in bytes
    #[arg(short, long, default_value_t = DEFAULT_REASSEMBLY_CAPACITY)]
    capacity: usize,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.verbose.tracing_level_filter())
        .with_writer(std::io::stderr)
        .init();

    let mut buffer = ReassemblyBuffer::new(args.capacity);
    let mut frames = 0usize;
    for (number, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line.context("Failed to read stdin")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fragment = match hex::decode(line.replace(' ', "")) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!(line = number + 1, error = %e, "Skipping line that is not hex");
                continue;
            }
        };
        buffer.push(&fragment);
        for frame in buffer.drain_frames() {
            frames += 1;
            println!(
                "{:>4}  {:<24} len={:<3} {}",
                frames,
                format!("{:?}", frame.command),
                frame.payload.len(),
                hex::encode(&frame.payload)
            );
        }
    }

    println!(
        "{} frames, {} bytes dropped, {} resyncs, {} bytes left over",
        frames,
        buffer.dropped_bytes(),
        buffer.resync_count(),
        buffer.len()
    );
    Ok(())
}
