//! Transaction helper for operations that must land more than one write
//! atomically.
//!
//! Used by retry-from-DLQ (reset the task, then clear the episode's failure
//! record if it was recorded at the same stage) and retry-episode (clear the
//! failure record, then enqueue a fresh task) -- both read-then-write-twice
//! sequences where a crash between the writes would otherwise leave the
//! task and the episode failure record disagreeing with each other.

use std::future::Future;
use std::pin::Pin;

use sqlx::{PgConnection, PgPool};

/// A future boxed for storage in a trait object, as returned by a
/// [`transaction`] closure.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Run `f` against a single transaction's connection, committing on `Ok`
/// and rolling back on `Err`.
pub async fn transaction<F, T, E>(pool: &PgPool, f: F) -> Result<T, E>
where
    for<'c> F: FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>>,
    E: From<sqlx::Error>,
{
    let mut tx = pool.begin().await.map_err(E::from)?;

    match f(&mut tx).await {
        Ok(value) => {
            tx.commit().await.map_err(E::from)?;
            Ok(value)
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}
