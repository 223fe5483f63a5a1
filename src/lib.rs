pub mod cli;
pub mod clock;
pub mod db;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod settings;
pub mod sync;
pub mod timer;

#[cfg(test)]
mod testing;

use clap::Parser;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::Database;
pub use ledger::{CompletionLedger, CompletionSink, WorkLogStore};
pub use models::{DayContext, Segment, SegmentKind, SequencerSnapshot};
pub use persistence::{FileSnapshotStore, ResumeChoice, ResumeOffer, SnapshotStore};
pub use settings::{SessionPreferences, SettingsStore};
pub use sync::{MemoryRemoteStore, RemoteSessionStore, SqliteRemoteStore};
pub use timer::{OrchestratorOptions, SessionConfig, SessionDeps, SessionEvent, SessionOrchestrator};

fn debug_enabled() -> bool {
    std::env::var("FOCUSRAMP_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// `RUST_LOG` wins over the default level.
fn init_logging() {
    let default_level = if debug_enabled() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();
}

pub fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_logging();

    log::info!("focusramp starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli::execute(args))
}
