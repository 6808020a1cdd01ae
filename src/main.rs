mod candidate_parser;
mod cli;
mod cycle;
mod error;
mod extract;
mod model;
mod outbound;
mod selection;
mod settings;
mod source;
mod state;
mod time_util;
mod validator;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use colored::*;
use settings::ValidatorConfig;
use std::io::Write;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate().context("invalid command line arguments")?;

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            writeln!(buf, "[{}] {}", chrono::Utc::now().to_rfc3339(), record.args())
        })
        .init();

    let cfg = ValidatorConfig::from_args(&args);

    println!(
        "{} target_count={} source={}",
        "[stablepool]".cyan().bold(),
        cfg.target_count,
        cfg.source
    );

    if cfg.dry_run {
        log::info!("dry-run mode: output pool file will not be written");
    }

    if args.interval_minutes <= 0 {
        let size = cycle::run_cycle(&cfg).await.context("validation cycle failed")?;
        log::info!("pool size after single cycle: {size}");
        return Ok(());
    }

    let interval = Duration::from_secs((args.interval_minutes as u64 * 60).max(60));
    log::info!("daemon mode: running every {} minutes", interval.as_secs() / 60);

    loop {
        match cycle::run_cycle(&cfg).await {
            Ok(size) => log::info!("cycle finished, pool size: {size}"),
            Err(e) => log::error!("cycle failed: {e:#}"),
        }
        tokio::time::sleep(interval).await;
    }
}
