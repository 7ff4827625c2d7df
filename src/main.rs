use std::str::FromStr;

use db::DBError;
use strava::StravaApiError;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, prelude::*};
use tracing_subscriber::{filter, fmt::format::FmtSpan};

mod config;
mod db;
mod record;
mod strava;
mod supabase;
mod sync;
#[cfg(test)]
mod test_server;

enum InShutdown {
    Yes,
    No,
}

/// Something went wrong while syncing club activities into the DB
#[derive(Debug)]
pub enum SyncError {
    DB(DBError),
    Strava(StravaApiError),
}
impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::DB(x) => write!(f, "DBError: {x}"),
            Self::Strava(x) => write!(f, "StravaApiError: {x}"),
        }
    }
}
impl core::error::Error for SyncError {}
impl From<DBError> for SyncError {
    fn from(value: DBError) -> Self {
        Self::DB(value)
    }
}
impl From<StravaApiError> for SyncError {
    fn from(value: StravaApiError) -> Self {
        Self::Strava(value)
    }
}

async fn signal_handler(
    mut watcher: tokio::sync::watch::Receiver<InShutdown>,
    shutdown_tx: tokio::sync::watch::Sender<InShutdown>,
) -> Result<(), std::io::Error> {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(x) => x,
        Err(e) => {
            error!("Failed to install SIGTERM listener: {e} Aborting.");
            shutdown_tx.send_replace(InShutdown::Yes);
            return Err(e);
        }
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(x) => x,
        Err(e) => {
            error!("Failed to install SIGHUP listener: {e} Aborting.");
            shutdown_tx.send_replace(InShutdown::Yes);
            return Err(e);
        }
    };
    // wait for a shutdown signal
    tokio::select! {
        // shutdown the signal handler when some other process signals a shutdown
        _ = watcher.changed() => {}
        _ = sigterm.recv() => {
            info!("Got SIGTERM. Shutting down.");
            shutdown_tx.send_replace(InShutdown::Yes);
        }
        _ = sighup.recv() => {
            info!("Got SIGHUP. Shutting down.");
            shutdown_tx.send_replace(InShutdown::Yes);
        }
        x = tokio::signal::ctrl_c() =>  {
            match x {
                Ok(()) => {
                    info!("Received Ctrl-c. Shutting down.");
                    shutdown_tx.send_replace(InShutdown::Yes);
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                    shutdown_tx.send_replace(InShutdown::Yes);
                }
            }
        }
    };

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::create().await?;

    // Setup tracing
    let my_crate_filter = EnvFilter::new("strava_club_sync");
    let level_filter = filter::LevelFilter::from_str(&config.global.log_level)?;
    let subscriber = tracing_subscriber::registry()
        .with(my_crate_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_line_number(true)
                .with_filter(level_filter),
        );
    tracing::subscriber::set_global_default(subscriber).expect("static tracing config");
    info!("Starting Strava -> DB sync. Got Config and set up tracing.");

    let Some(sync_frequency) = config.global.sync_frequency else {
        // one run, its outcome is the exit status
        let today = chrono::Local::now().date_naive();
        let report = sync::sync_once(&config.feed, &config.store, config.schema, today).await?;
        info!(
            "Fetched {}, found {} in the table, inserted {}.",
            report.fetched, report.stored, report.inserted
        );
        return Ok(());
    };

    // cancellation channel
    let (tx, rx) = tokio::sync::watch::channel(InShutdown::No);

    let sync_handle = tokio::spawn(async move {
        sync::keep_activities_up_to_date(
            &config.feed,
            &config.store,
            config.schema,
            sync_frequency,
            rx,
        )
        .await
    });

    // start the Signal handler
    let signal_handle = tokio::spawn(signal_handler(tx.subscribe(), tx.clone()));

    // Join both tasks
    let (sync_res, signal_res) = tokio::join!(sync_handle, signal_handle);
    sync_res?;
    signal_res??;

    Ok(())
}
