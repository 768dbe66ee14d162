mod config;
mod scenario;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use ringwork_io::RingAccessor;

use config::Args;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting ringwork probe: {:?} on a {}-entry ring", args.scenario, args.entries);

    let ring = RingAccessor::new(args.entries).context("Failed to set up io_uring")?;
    scenario::run(&ring, &args.scenario)?;
    ring.shutdown().context("Failed to release ring mappings")?;

    info!("Scenario passed.");
    Ok(())
}
