//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// calnotify - desktop notifications for Google Calendar events
#[derive(Debug, Parser)]
#[command(name = "calnotify")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALNOTIFY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the JSON list of calendar ids
    #[arg(long, env = "CALNOTIFY_CALENDARS")]
    pub calendars: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log JSON lines instead of text
    #[arg(long)]
    pub json_logs: bool,
}
