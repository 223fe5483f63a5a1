//! Terminal front end: drives a session from stdin and prints its events.

use std::{
    io::Write as _,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};

use crate::{
    clock::{Clock, SystemClock},
    db::Database,
    models::{parse_segments, DayContext, Segment},
    notify::{LogNotifier, TransitionEvent},
    persistence::{FileSnapshotStore, ResumeChoice, ResumeOffer},
    settings::SettingsStore,
    sync::SqliteRemoteStore,
    timer::{OrchestratorOptions, SessionConfig, SessionDeps, SessionEvent, SessionOrchestrator},
};

const DATABASE_FILE: &str = "focusramp.sqlite3";
const SETTINGS_FILE: &str = "settings.json";
const SESSIONS_DIR: &str = "sessions";

#[derive(Parser)]
#[command(name = "focusramp")]
#[command(about = "Attention-span training timer")]
#[command(version)]
pub struct Cli {
    /// Directory holding the database, settings and session snapshots
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a training day's session (commands on stdin: start, pause, resume, skip, reset, quit)
    Run {
        #[arg(long)]
        user: String,

        #[arg(long)]
        plan: String,

        #[arg(long)]
        day: String,

        /// Calendar date of the day (defaults to today)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Segment list, e.g. w25,b5,w25
        #[arg(long)]
        segments: String,

        /// This is the plan's last scheduled training day
        #[arg(long)]
        final_day: bool,

        /// Start over instead of resuming a saved session
        #[arg(long)]
        restart: bool,

        /// Act as a separate device (two terminals on one data directory)
        #[arg(long)]
        device_id: Option<String>,
    },

    /// List logged work segments for a day
    Logs {
        #[arg(long)]
        day: String,
    },

    /// Show or change session preferences
    Prefs {
        #[arg(long)]
        sound: Option<bool>,

        #[arg(long)]
        notifications: Option<bool>,

        #[arg(long)]
        auto_start_next: Option<bool>,
    },
}

pub async fn execute(cli: Cli) -> Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .map(|dir| dir.join("focusramp"))
            .ok_or_else(|| anyhow!("no data directory available; pass --data-dir"))?,
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    match cli.command {
        Commands::Run {
            user,
            plan,
            day,
            date,
            segments,
            final_day,
            restart,
            device_id,
        } => {
            let segments = parse_segments(&segments).context("invalid --segments")?;
            let context = DayContext {
                user_id: user,
                plan_id: plan,
                day_id: day,
                date: date.unwrap_or_else(|| Local::now().date_naive()),
                is_final_day: final_day,
            };
            run_session(&data_dir, context, segments, restart, device_id).await
        }
        Commands::Logs { day } => show_logs(&data_dir, &day).await,
        Commands::Prefs {
            sound,
            notifications,
            auto_start_next,
        } => update_preferences(&data_dir, sound, notifications, auto_start_next),
    }
}

async fn run_session(
    data_dir: &Path,
    context: DayContext,
    segments: Vec<Segment>,
    restart: bool,
    device_id: Option<String>,
) -> Result<()> {
    let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
    let database = Database::new(data_dir.join(DATABASE_FILE))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let preferences = settings.preferences();
    let device_id = device_id.unwrap_or_else(|| settings.device_id());

    let deps = SessionDeps {
        clock: clock.clone(),
        work_logs: Arc::new(database.clone()),
        completions: Arc::new(database.clone()),
        remote: Arc::new(SqliteRemoteStore::new(database.clone(), clock)),
        snapshots: Arc::new(FileSnapshotStore::new(data_dir.join(SESSIONS_DIR))),
        notifier: Arc::new(LogNotifier::new(preferences.clone())),
    };
    let config = SessionConfig {
        context,
        segments: segments.clone(),
        preferences,
        device_id,
        options: OrchestratorOptions::from_env(),
    };

    let (session, offer) = SessionOrchestrator::open(config, deps).await?;
    let printer = tokio::spawn(print_events(session.subscribe_events(), segments));

    if let Some(offer) = offer {
        println!("{}", describe_offer(&offer));
        let choice = if restart {
            ResumeChoice::Restart
        } else {
            ResumeChoice::Resume
        };
        session.resolve_resume(choice).await?;
    } else if restart {
        session.reset().await?;
    }

    let ticker = session.spawn_ticker();
    let subscription = session.spawn_subscription();

    println!("Commands: start, pause, resume, skip, reset, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let result = match line.trim() {
            "" => continue,
            "start" => session.start().await,
            "pause" => session.pause().await,
            "resume" => session.resume().await,
            "skip" => session.skip().await,
            "reset" => session.reset().await,
            "quit" | "exit" => break,
            other => {
                println!("Unknown command '{other}'");
                continue;
            }
        };
        if let Err(err) = result {
            warn!("Command failed: {err:#}");
        }
    }

    session.close().await;
    for handle in [ticker, subscription] {
        if let Err(err) = handle.await {
            warn!("Background task ended abnormally: {err}");
        }
    }
    drop(session);
    printer.abort();
    info!("Session closed");
    Ok(())
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>, segments: Vec<Segment>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            SessionEvent::StateChanged { snapshot } => {
                let label = segments
                    .get(snapshot.current_index)
                    .map(|segment| segment.kind.as_str())
                    .unwrap_or("-");
                let status = if snapshot.is_finished {
                    "finished"
                } else if snapshot.is_running {
                    "running"
                } else {
                    "paused"
                };
                print!(
                    "\r[{}/{}] {:<5} {} {:<8}",
                    snapshot.current_index + 1,
                    segments.len(),
                    label,
                    format_clock(snapshot.seconds_remaining),
                    status
                );
                let _ = std::io::stdout().flush();
            }
            SessionEvent::SegmentTransition(TransitionEvent {
                segment_index,
                segment_type,
                ..
            }) => println!("\nSegment {} ({segment_type}) complete", segment_index + 1),
            SessionEvent::SegmentLogged {
                segment_index,
                actual_seconds,
            } => println!(
                "Logged {} of work for segment {}",
                format_clock(actual_seconds),
                segment_index + 1
            ),
            SessionEvent::LoggingAnomaly { message, .. } | SessionEvent::LoggingFailed { message, .. } => {
                println!("\n{message}")
            }
            SessionEvent::DayCompleted => println!("Day complete"),
            SessionEvent::PlanCompleted => println!("Plan complete"),
            SessionEvent::Finished => println!("\nAll segments done"),
        }
    }
}

fn describe_offer(offer: &ResumeOffer) -> String {
    if offer.expired_while_away {
        format!(
            "Found a saved session: {} segment {} (time expired while away)",
            offer.segment_type,
            offer.segment_index + 1
        )
    } else {
        format!(
            "Found a saved session: {} segment {} with {} left",
            offer.segment_type,
            offer.segment_index + 1,
            format_clock(offer.seconds_remaining)
        )
    }
}

fn format_clock(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

async fn show_logs(data_dir: &Path, day_id: &str) -> Result<()> {
    let database = Database::new(data_dir.join(DATABASE_FILE))?;
    let logs = database.list_work_logs(day_id).await?;
    if logs.is_empty() {
        println!("No work logged for {day_id}");
    }
    for log in &logs {
        println!(
            "#{:<3} {:<5} planned {:>3}m  credited {}  ended {}",
            log.segment_index + 1,
            log.segment_type.as_str(),
            log.planned_minutes,
            format_clock(log.actual_seconds),
            log.ended_at.with_timezone(&Local).format("%H:%M:%S")
        );
    }
    if let Some(completed_at) = database.day_completed_at(day_id).await? {
        println!(
            "Day completed at {}",
            completed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn update_preferences(
    data_dir: &Path,
    sound: Option<bool>,
    notifications: Option<bool>,
    auto_start_next: Option<bool>,
) -> Result<()> {
    let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;
    let mut preferences = settings.preferences();

    if sound.is_some() || notifications.is_some() || auto_start_next.is_some() {
        if let Some(value) = sound {
            preferences.sound_enabled = value;
        }
        if let Some(value) = notifications {
            preferences.notifications_enabled = value;
        }
        if let Some(value) = auto_start_next {
            preferences.auto_start_next = value;
        }
        settings.update_preferences(preferences.clone())?;
    }

    println!("{}", serde_json::to_string_pretty(&preferences)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "focusramp",
            "--data-dir",
            "/tmp/focusramp",
            "run",
            "--user",
            "u1",
            "--plan",
            "p1",
            "--day",
            "d1",
            "--date",
            "2026-03-01",
            "--segments",
            "w25,b5,w25",
            "--final-day",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/focusramp")));
        match cli.command {
            Commands::Run {
                date,
                final_day,
                restart,
                ..
            } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 1));
                assert!(final_day);
                assert!(!restart);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn clock_format_pads() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(1_500), "25:00");
        assert_eq!(format_clock(61), "01:01");
    }

    #[test]
    fn prefs_update_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        update_preferences(dir.path(), Some(false), None, Some(false)).unwrap();

        let settings = SettingsStore::new(dir.path().join(SETTINGS_FILE)).unwrap();
        let preferences = settings.preferences();
        assert!(!preferences.sound_enabled);
        assert!(preferences.notifications_enabled);
        assert!(!preferences.auto_start_next);
    }
}
