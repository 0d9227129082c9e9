//! Business-key numbering (`TRF-2025-001`, `NCR-2025-014`, ...)
//!
//! The counter row is bumped with a single upsert, which row-locks it until
//! the calling transaction ends. Concurrent creators therefore queue on the
//! counter instead of reading the same maximum, and a rolled-back creation
//! releases its number without leaving a gap.

use chrono::{Datelike, Utc};
use shared::{format_document_number, DocumentKind};
use sqlx::PgConnection;

use crate::error::AppResult;

/// Take the next number for `kind` in the current year.
/// Must run on the transaction that inserts the document.
pub async fn next_document_number(conn: &mut PgConnection, kind: DocumentKind) -> AppResult<String> {
    let year = Utc::now().year();

    let sequence = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO document_sequences (prefix, year, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (prefix, year)
        DO UPDATE SET last_value = document_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(kind.prefix())
    .bind(year)
    .fetch_one(&mut *conn)
    .await?;

    Ok(format_document_number(kind, year, sequence))
}
