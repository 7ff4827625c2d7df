//! Get activities from the Strava club into the destination table

use std::num::NonZeroU32;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::{
    InShutdown, SyncError,
    db::ActivityStore,
    record::{ActivityFields, RecordSchema, missing_from},
    strava::ActivitySource,
};

/// What a single run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub stored: usize,
    pub inserted: usize,
}

/// A single run of the sync - get the club feed, drop what the table already has, insert the
/// rest one row at a time.
///
/// Nothing is inserted unless both the feed and the table could be read. An insert failure stops
/// the run; rows inserted before it stay in the table.
pub async fn sync_once<S: ActivitySource, D: ActivityStore>(
    source: &S,
    store: &D,
    schema: RecordSchema,
    today: NaiveDate,
) -> Result<SyncReport, SyncError> {
    let incoming = source
        .fetch_club_activities()
        .await?
        .into_iter()
        .map(|activity| schema.normalize(ActivityFields::from(activity), today))
        .collect::<Vec<_>>();
    debug!("incoming activities: {incoming:?}");

    let existing = store
        .select_all()
        .await?
        .into_iter()
        .map(|row| schema.normalize_stored(row, today))
        .collect::<Vec<_>>();
    debug!("activities in table: {existing:?}");

    let fetched = incoming.len();
    let to_insert = missing_from(incoming, &existing);
    debug!("activities to insert: {to_insert:?}");

    for (position, activity) in to_insert.iter().enumerate() {
        if let Err(e) = store.insert(activity).await {
            warn!(
                "Insert {} of {} failed, {position} rows were inserted before it: {activity:?}",
                position + 1,
                to_insert.len(),
            );
            return Err(e.into());
        }
    }

    Ok(SyncReport {
        fetched,
        stored: existing.len(),
        inserted: to_insert.len(),
    })
}

/// Sync once per `sync_frequency` seconds until a shutdown is signalled.
///
/// A failed run is logged and the next tick is awaited as usual.
pub async fn keep_activities_up_to_date<S: ActivitySource, D: ActivityStore>(
    source: &S,
    store: &D,
    schema: RecordSchema,
    sync_frequency: NonZeroU32,
    mut watcher: tokio::sync::watch::Receiver<InShutdown>,
) {
    info!("Starting Strava -> DB Sync task");
    let mut interval =
        tokio::time::interval(tokio::time::Duration::from_secs(sync_frequency.get().into()));

    loop {
        // the first tick completes immediately
        tokio::select! {
            biased;
            _ = watcher.changed() => {
                debug!("Shutting down activity sync now.");
                return;
            }
            _ = interval.tick() => {}
        }

        debug!("Now syncing from Strava.");
        let today = chrono::Local::now().date_naive();
        match sync_once(source, store, schema, today).await {
            Ok(report) => {
                info!(
                    "Fetched {}, found {} in the table, inserted {}.",
                    report.fetched, report.stored, report.inserted
                );
            }
            Err(e) => {
                warn!("Failed to sync Strava -> DB: {e}");
            }
        }
    }
}
