//! Bounded pool for CPU-heavy parsing kept off the event loop.

use gb_core::{GameKind, Item};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

use crate::error::{AdapterError, Result};

#[derive(Debug, Clone)]
pub struct ItemParsePool {
    game: GameKind,
    permits: Arc<Semaphore>,
}

impl ItemParsePool {
    pub fn new(game: GameKind, workers: usize) -> Self {
        Self {
            game,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Runs `job` on the blocking pool once a permit frees up.
    ///
    /// A job that panics drops its sender, which surfaces as a `Worker` error.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| self.worker_error(err))?;

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _ = tx.send(job());
        });

        rx.await
            .map_err(|_| self.worker_error("worker exited without a result"))
    }

    /// Parses the raw `li *` listing into catalog items.
    pub async fn parse_items(&self, raw: String) -> Result<Vec<Item>> {
        let items = self.run(move || parse_item_listing(&raw)).await?;
        debug!(game = %self.game, count = items.len(), "parsed item listing");
        Ok(items)
    }

    fn worker_error(&self, err: impl std::fmt::Display) -> AdapterError {
        AdapterError::Worker {
            game: self.game,
            message: err.to_string(),
        }
    }
}

/// One item name per line, closed by a `Listed N matching items.` footer.
pub fn parse_item_listing(raw: &str) -> Vec<Item> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("Listed "))
        .map(|code| Item {
            name: code.to_string(),
            code: code.to_string(),
            ..Default::default()
        })
        .collect()
}
