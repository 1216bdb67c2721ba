//! Transaction operations

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, ErrorCode, OptionalExtension, Row};

use super::{datetime_from_ms, Database};
use crate::error::{Error, Result};
use crate::models::{ClassificationStats, StoredTransaction, TransactionRecord};
use crate::store::TransactionStore;

const TRANSACTION_COLUMNS: &str = "id, date_ms, description, amount, card_type, period_scope, \
                                   identity_hash, category_id, updated_at_ms";

fn row_to_transaction(row: &Row) -> rusqlite::Result<StoredTransaction> {
    Ok(StoredTransaction {
        id: row.get(0)?,
        date: datetime_from_ms(row.get(1)?)?,
        description: row.get(2)?,
        amount: row.get(3)?,
        card_type: row.get(4)?,
        period_scope: row.get(5)?,
        identity_hash: row.get(6)?,
        category_id: row.get(7)?,
        updated_at: datetime_from_ms(row.get(8)?)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

impl Database {
    /// Look up a transaction by identity within a period scope
    pub fn get_transaction_by_identity(
        &self,
        identity_hash: &str,
        period_scope: &str,
    ) -> Result<Option<StoredTransaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!(
                    "SELECT {} FROM transactions WHERE identity_hash = ? AND period_scope = ?",
                    TRANSACTION_COLUMNS
                ),
                params![identity_hash, period_scope],
                row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// Insert a transaction, failing with `DuplicateIdentity` if it exists
    pub fn insert_transaction(&self, record: &TransactionRecord) -> Result<i64> {
        let conn = self.conn()?;

        let inserted = conn.execute(
            r#"
            INSERT INTO transactions (date_ms, description, amount, card_type, period_scope,
                                      identity_hash, category_id, updated_at_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.date.timestamp_millis(),
                record.description,
                record.amount,
                record.card_type,
                record.period_scope,
                record.identity_hash,
                record.category_id,
                Utc::now().timestamp_millis(),
            ],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_constraint_violation(&e) => {
                Err(Error::DuplicateIdentity(record.identity_hash.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the stored fields of transaction `id`
    pub fn update_transaction(&self, id: i64, record: &TransactionRecord) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            UPDATE transactions
            SET date_ms = ?, description = ?, amount = ?, card_type = ?,
                category_id = ?, updated_at_ms = ?
            WHERE id = ?
            "#,
            params![
                record.date.timestamp_millis(),
                record.description,
                record.amount,
                record.card_type,
                record.category_id,
                Utc::now().timestamp_millis(),
                id,
            ],
        )?;

        if changed == 0 {
            return Err(Error::NotFound(format!("transaction {}", id)));
        }
        Ok(())
    }

    /// Transactions without a category, oldest first
    pub fn list_uncategorized_transactions(&self) -> Result<Vec<StoredTransaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE category_id IS NULL ORDER BY date_ms, id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transactions in one period scope, oldest first
    pub fn list_transactions_for_period(&self, period_scope: &str) -> Result<Vec<StoredTransaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE period_scope = ? ORDER BY date_ms, id",
            TRANSACTION_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![period_scope], row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_classification_stats(&self) -> Result<ClassificationStats> {
        let conn = self.conn()?;
        let (total_count, classified_count): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(category_id) FROM transactions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(ClassificationStats {
            total_count,
            classified_count,
            unclassified_count: total_count - classified_count,
        })
    }
}

#[async_trait]
impl TransactionStore for Database {
    async fn find_by_identity_hash(
        &self,
        identity_hash: &str,
        period_scope: &str,
    ) -> Result<Option<StoredTransaction>> {
        let identity_hash = identity_hash.to_string();
        let period_scope = period_scope.to_string();
        self.blocking(move |db| db.get_transaction_by_identity(&identity_hash, &period_scope))
            .await
    }

    async fn insert(&self, record: &TransactionRecord) -> Result<i64> {
        let record = record.clone();
        self.blocking(move |db| db.insert_transaction(&record)).await
    }

    async fn update(&self, id: i64, record: &TransactionRecord) -> Result<()> {
        let record = record.clone();
        self.blocking(move |db| db.update_transaction(id, &record)).await
    }

    async fn list_uncategorized(&self) -> Result<Vec<StoredTransaction>> {
        self.blocking(|db| db.list_uncategorized_transactions()).await
    }

    async fn list_by_period(&self, period_scope: &str) -> Result<Vec<StoredTransaction>> {
        let period_scope = period_scope.to_string();
        self.blocking(move |db| db.list_transactions_for_period(&period_scope))
            .await
    }

    async fn stats(&self) -> Result<ClassificationStats> {
        self.blocking(|db| db.get_classification_stats()).await
    }
}
