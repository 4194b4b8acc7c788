//! Trace consumer: drains every core's ring buffer into one stream file per
//! core until SIGINT or SIGTERM.
//!
//! Usage: `consumer [-v] [trace_directory]`
//!
//! 1. Install the shutdown handler
//! 2. Allocate (or attach to) and zero the shared-memory region
//! 3. Create `trace_directory/stream-{row}-{col}` for every core
//! 4. Sweep the ring buffers until shutdown
//! 5. Flush the streams, release the region

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

use ctf_shm_transport::config::{CONSUMER_POLL_DELAY_US, DEFAULT_TRACE_DIR, VERSION_STRING};
use ctf_shm_transport::logging::StderrLogger;
use ctf_shm_transport::signal::install_shutdown_handler;
use ctf_shm_transport::{open_stream_files, Consumer, SharedRegion};

#[derive(Parser)]
#[command(name = "consumer")]
#[command(about = "Collect CTF packets from shared memory into per-core streams")]
#[command(version = VERSION_STRING)]
struct Args {
    /// Log every consumed packet
    #[arg(short, long)]
    verbose: bool,

    /// Directory receiving the stream files
    #[arg(default_value = DEFAULT_TRACE_DIR)]
    trace_directory: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    if let Err(err) = StderrLogger::init(level) {
        eprintln!("consumer: cannot install logger: {}", err);
    }

    log::info!("{}", VERSION_STRING);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let shutdown = install_shutdown_handler()?;

    let path = <SharedRegion>::default_path();
    let mut region: SharedRegion = SharedRegion::allocate_or_attach(&path)
        .with_context(|| format!("cannot set up shared memory region \"{}\"", path.display()))?;
    region.zero();

    let files = match open_stream_files(&args.trace_directory) {
        Ok(files) => files,
        Err(err) => {
            release(region);
            return Err(err).with_context(|| {
                format!("cannot create streams in \"{}\"", args.trace_directory.display())
            });
        }
    };

    let mut consumer = Consumer::new(region.rings(), files, shutdown).with_verbose(args.verbose);
    let result = consumer.run(Duration::from_micros(CONSUMER_POLL_DELAY_US));

    // Streams are flushed and closed even after a fatal write error
    let finished = consumer.finish();
    release(region);

    result.context("consumer stopped")?;
    let counts = finished.context("cannot flush streams")?;

    log::info!(
        "{} packets written to \"{}\"",
        counts.iter().sum::<u64>(),
        args.trace_directory.display()
    );
    Ok(())
}

fn release(region: SharedRegion) {
    let path = region.path().to_path_buf();
    if let Err(err) = region.release() {
        log::warn!("cannot release shared memory region \"{}\": {}", path.display(), err);
    }
}
