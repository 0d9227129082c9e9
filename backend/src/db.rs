//! Transaction helpers
//!
//! Ledger-mutating operations run in one transaction bounded twice: Postgres
//! gives up on lock waits and statements past the bound, and the whole
//! operation future is dropped (rolling the transaction back) if it overruns.

use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub type PgTx = Transaction<'static, Postgres>;

/// Begin a transaction whose lock waits and statements share `timeout`
pub async fn begin_bounded(pool: &PgPool, timeout: Duration) -> AppResult<PgTx> {
    let mut tx = pool.begin().await?;
    let millis = timeout.as_millis().max(1);

    // SET does not take bind parameters
    sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", millis))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("SET LOCAL statement_timeout = '{}ms'", millis))
        .execute(&mut *tx)
        .await?;

    Ok(tx)
}

/// Begin a read-only snapshot for aggregation queries
pub async fn begin_snapshot(pool: &PgPool) -> AppResult<PgTx> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Run `operation`, failing with `TransactionTimeout` once `timeout` elapses.
///
/// The operation owns its transaction, so dropping it on timeout rolls every
/// mutation back.
pub async fn with_deadline<F, T>(timeout: Duration, operation: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Transaction deadline exceeded");
            Err(AppError::TransactionTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_result_through() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, AppError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let result = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::TransactionTimeout)));
    }
}
