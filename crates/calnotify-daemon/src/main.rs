//! calnotify daemon entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use calnotify_core::{TracingConfig, init_tracing};
use calnotify_daemon::cli::Cli;
use calnotify_daemon::{
    DaemonConfig, DaemonError, DaemonResult, DesktopNotifier, Dispatcher, Shutdown, SyncLoop,
    load_calendar_ids,
};
use calnotify_providers::google::{GoogleCalendarSource, GoogleCredentials};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(TracingConfig::from_flags(cli.debug, cli.json_logs)) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "calnotify failed to start");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> DaemonResult<()> {
    let config = DaemonConfig::load(cli.config.as_deref())?;

    let calendars_path = cli
        .calendars
        .unwrap_or_else(DaemonConfig::default_calendars_path);
    let calendar_ids = load_calendar_ids(&calendars_path)?;

    let google = config.google.to_provider_config()?;
    let credentials =
        GoogleCredentials::new(&google).map_err(|e| DaemonError::config(e.to_string()))?;
    let source =
        GoogleCalendarSource::new(&google).map_err(|e| DaemonError::config(e.to_string()))?;

    let shutdown = Shutdown::new();
    shutdown.listen()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        calendars = calendar_ids.len(),
        "calnotify starting"
    );

    let mut sync = SyncLoop::new(
        config.sync.to_sync_config()?,
        source,
        credentials,
        Dispatcher::new(config.notifications, DesktopNotifier),
        calendar_ids,
    );
    sync.run(shutdown).await
}
