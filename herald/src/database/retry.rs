//! Retries for SQLite lock contention.
//!
//! The compare-and-set loops (toggles, ping cooldowns) run their own retries on
//! a lost race. This layer only covers `SQLITE_BUSY` / `SQLITE_LOCKED`, which
//! the busy timeout does not absorb when a writer upgrades a read transaction.

use std::future::Future;
use std::time::Duration;

use rand::random;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const MAX_RETRIES: u32 = 12;
const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(2);

fn is_busy(err: &Error) -> bool {
    let Error::DatabaseSqlx(err) = err else {
        return false;
    };
    if let sqlx::Error::Database(db_err) = err
        && matches!(db_err.code().as_deref(), Some("5" | "6"))
    {
        return true;
    }
    let message = err.to_string().to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

/// Exponential backoff capped at [`MAX_DELAY`], plus up to a quarter of jitter.
fn backoff(attempt: u32, jitter: u64) -> Duration {
    let exp = BASE_DELAY.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(MAX_DELAY);
    let quarter = capped.as_millis() as u64 / 4;
    (capped + Duration::from_millis(jitter % (quarter + 1))).min(MAX_DELAY)
}

/// Run `op`, retrying while SQLite reports the database as busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if is_busy(&err) && attempt < MAX_RETRIES => {
                let delay = backoff(attempt, random::<u64>());
                attempt += 1;
                debug!(op_name, attempt, ?delay, "SQLite busy, retrying");
                sleep(delay).await;
            }
            result => return result,
        }
    }
}
