//! Background jobs that keep long catalog operations off the caller's thread.
//!
//! The store itself is blocking; these helpers push its work onto tokio's
//! blocking pool and split large deletes so they can report progress and be
//! cancelled between chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::spawn_blocking;

use crate::inventory::{InventoryStore, Part, PartId};

pub const DEFAULT_DELETE_CHUNK: usize = 20;

#[derive(Clone, Copy, Debug)]
pub struct DeleteOptions {
    pub chunk_size: usize,
    /// Include the ids that were actually removed in the report.
    pub return_ids: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_DELETE_CHUNK,
            return_ids: false,
        }
    }
}

/// Outcome of a chunked delete. Partial success is normal: missing ids and
/// a cancellation both leave `deleted < requested`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeleteReport {
    pub requested: usize,
    pub deleted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_ids: Option<Vec<PartId>>,
    pub cancelled: bool,
}

/// Read the whole catalog on the blocking pool.
pub async fn load_catalog(store: Arc<InventoryStore>) -> Result<Vec<Part>> {
    spawn_blocking(move || store.get_all_parts())
        .await
        .context("catalog load task panicked")
}

/// Delete `ids` in slices of `options.chunk_size`, checking `cancel` before
/// each slice and calling `progress(processed, total)` after it.
pub fn delete_in_chunks(
    store: &InventoryStore,
    ids: &[PartId],
    options: DeleteOptions,
    cancel: &AtomicBool,
    mut progress: impl FnMut(usize, usize),
) -> DeleteReport {
    let total = ids.len();
    let mut report = DeleteReport {
        requested: total,
        deleted_ids: options.return_ids.then(Vec::new),
        ..DeleteReport::default()
    };
    let mut processed = 0;
    for chunk in ids.chunks(options.chunk_size.max(1)) {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            log::info!(target: "workers", "delete cancelled after {processed}/{total}");
            break;
        }
        let removed = store.delete_parts_returning_ids(chunk);
        report.deleted += removed.len();
        if let Some(deleted_ids) = report.deleted_ids.as_mut() {
            deleted_ids.extend(removed);
        }
        processed += chunk.len();
        progress(processed, total);
    }
    report
}

/// [`delete_in_chunks`] on the blocking pool.
pub async fn delete_in_background<F>(
    store: Arc<InventoryStore>,
    ids: Vec<PartId>,
    options: DeleteOptions,
    cancel: Arc<AtomicBool>,
    progress: F,
) -> Result<DeleteReport>
where
    F: FnMut(usize, usize) + Send + 'static,
{
    spawn_blocking(move || delete_in_chunks(&store, &ids, options, &cancel, progress))
        .await
        .context("delete task panicked")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::inventory::{NewPart, Price};

    fn store_with(count: usize) -> (tempfile::TempDir, Arc<InventoryStore>, Vec<PartId>) {
        let dir = tempfile::tempdir().unwrap();
        let store = InventoryStore::open_in_dir(dir.path()).unwrap();
        let parts: Vec<NewPart> = (0..count)
            .map(|n| NewPart::new("Brakes", "Mazda", "3", &format!("Disc {n}"), 1, Price::ZERO))
            .collect();
        store.add_parts(&parts);
        let mut ids: Vec<PartId> = store.get_all_parts().iter().map(|p| p.id).collect();
        ids.sort_unstable();
        (dir, Arc::new(store), ids)
    }

    #[test]
    fn chunked_delete_reports_progress_per_chunk() {
        let (_dir, store, ids) = store_with(45);
        let mut seen = Vec::new();
        let report = delete_in_chunks(
            &store,
            &ids,
            DeleteOptions::default(),
            &AtomicBool::new(false),
            |done, total| seen.push((done, total)),
        );
        assert_eq!(seen, vec![(20, 45), (40, 45), (45, 45)]);
        assert_eq!(report.deleted, 45);
        assert!(!report.cancelled);
        assert_eq!(store.count_parts(), Some(0));

        // One batch statement and one log entry per chunk.
        let codes: Vec<_> = store
            .recent_events(10)
            .into_iter()
            .filter_map(|e| e.code)
            .collect();
        assert_eq!(codes, vec!["PRT-0004", "PRT-0004", "PRT-0004", "PRT-0005"]);
    }

    #[test]
    fn cancellation_stops_between_chunks() {
        let (_dir, store, ids) = store_with(30);
        let cancel = AtomicBool::new(false);
        let options = DeleteOptions {
            chunk_size: 10,
            return_ids: true,
        };
        let report = delete_in_chunks(&store, &ids, options, &cancel, |done, _| {
            if done >= 10 {
                cancel.store(true, Ordering::Relaxed);
            }
        });
        assert!(report.cancelled);
        assert_eq!(report.requested, 30);
        assert_eq!(report.deleted, 10);
        assert_eq!(report.deleted_ids.as_deref(), Some(&ids[..10]));
        assert_eq!(store.count_parts(), Some(20));
    }

    #[test]
    fn missing_ids_are_partial_success() {
        let (_dir, store, ids) = store_with(2);
        let mut request = ids.clone();
        request.push(ids[1] + 50);
        let options = DeleteOptions {
            chunk_size: 2,
            return_ids: true,
        };
        let report = delete_in_chunks(&store, &request, options, &AtomicBool::new(false), |_, _| {});
        assert_eq!(report.requested, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.deleted_ids, Some(ids));
    }

    #[tokio::test]
    async fn background_helpers_run_on_the_blocking_pool() {
        let (_dir, store, ids) = store_with(5);
        assert_eq!(load_catalog(Arc::clone(&store)).await.unwrap().len(), 5);

        let ticks = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&ticks);
        let report = delete_in_background(
            Arc::clone(&store),
            ids,
            DeleteOptions {
                chunk_size: 2,
                return_ids: false,
            },
            Arc::new(AtomicBool::new(false)),
            move |_, _| *counter.lock().unwrap() += 1,
        )
        .await
        .unwrap();
        assert_eq!(report.deleted, 5);
        assert_eq!(*ticks.lock().unwrap(), 3);
        assert!(load_catalog(store).await.unwrap().is_empty());
    }
}
