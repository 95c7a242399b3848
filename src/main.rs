use std::env;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

mod activity;
mod clock;
mod config;
mod console;
mod duration_fmt;
mod engine;
mod error;
mod file_store;
mod logger;
mod rest_store;
mod scheduler;
mod store;
mod time_entry;
mod timer_command;

use clock::{Clock, SystemClock};
use config::Config;
use console::ConsoleText;
use engine::{SharedTimer, TimerEngine};
use scheduler::TokioScheduler;
use timer_command::{TimerAction, TimerCommand};

/// 計測中のタイマーを操作するためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- --owner me start --project P1 --task T1
/// $ cargo run -- --owner me pause
/// $ cargo run -- --owner me status --watch
/// $ cargo run -- --owner me stop
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(
        long = "owner",
        help = "User to track time for (defaults to TRACKTIMER_OWNER_ID)"
    )]
    owner: Option<String>,

    #[clap(short = 'v', long = "verbose", help = "Show debug logs")]
    verbose: bool,

    #[clap(
        short = 'q',
        long = "quiet",
        conflicts_with = "verbose",
        help = "Only show warnings and errors"
    )]
    quiet: bool,

    #[clap(subcommand)]
    action: TimerAction,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_level = env::var("TRACKTIMER_LOG").ok();
    logger::setup_logger(logger::level_from_flags(
        args.verbose,
        args.quiet,
        env_level.as_deref(),
    ))?;

    let config = Config::from_env().context("Failed to load configuration")?;
    let owner_id = args
        .owner
        .or_else(|| config.owner_id.clone())
        .context("An owner is required: pass --owner or set TRACKTIMER_OWNER_ID")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = TimerEngine::new(
        config.build_store(),
        config.build_recorder(Arc::clone(&clock)),
        clock,
        Arc::new(TokioScheduler::new()),
        config.tick_interval,
    );
    let timer = SharedTimer::new(engine);

    let mut stdout = io::stdout();
    let mut presenter = ConsoleText::new(&mut stdout);
    TimerCommand::new(&timer, &owner_id)
        .run(args.action, &mut presenter)
        .await?;

    Ok(())
}
