//! Pattern store operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::debug;

use super::{datetime_from_ms, Database};
use crate::error::Result;
use crate::models::{CategoryId, Pattern, PatternSeed};
use crate::patterns::{confidence, select_by_similarity};
use crate::store::PatternStore;

const PATTERN_COLUMNS: &str = "pattern, category_id, confidence, frequency, last_updated_ms";

fn row_to_pattern(row: &Row) -> rusqlite::Result<Pattern> {
    Ok(Pattern {
        pattern: row.get(0)?,
        category_id: row.get(1)?,
        confidence: row.get(2)?,
        frequency: row.get(3)?,
        last_updated: datetime_from_ms(row.get(4)?)?,
    })
}

/// Read-modify-write of one (pattern, category) row inside `tx`
fn bump_pattern(
    tx: &Transaction,
    pattern: &str,
    category_id: CategoryId,
    now: DateTime<Utc>,
) -> Result<Pattern> {
    let current: Option<i64> = tx
        .query_row(
            "SELECT frequency FROM patterns WHERE pattern = ? AND category_id = ?",
            params![pattern, category_id],
            |row| row.get(0),
        )
        .optional()?;

    let frequency = current.unwrap_or(0) + 1;
    let confidence = confidence(frequency, pattern);

    tx.execute(
        r#"
        INSERT INTO patterns (pattern, category_id, confidence, frequency, last_updated_ms)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(pattern, category_id) DO UPDATE SET
            confidence = excluded.confidence,
            frequency = excluded.frequency,
            last_updated_ms = excluded.last_updated_ms
        "#,
        params![pattern, category_id, confidence, frequency, now.timestamp_millis()],
    )?;

    debug!(
        "Reinforced '{}' -> {} (frequency {}, confidence {:.3})",
        pattern, category_id, frequency, confidence
    );

    Ok(Pattern {
        pattern: pattern.to_string(),
        category_id,
        confidence,
        frequency,
        last_updated: now,
    })
}

impl Database {
    /// Most confident pattern equal to `text`
    pub fn find_exact_pattern(&self, text: &str) -> Result<Option<Pattern>> {
        let conn = self.conn()?;
        let pattern = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM patterns
                    WHERE pattern = ?1
                    ORDER BY confidence DESC, last_updated_ms DESC, category_id ASC
                    LIMIT 1
                    "#,
                    PATTERN_COLUMNS
                ),
                params![text],
                row_to_pattern,
            )
            .optional()?;
        Ok(pattern)
    }

    /// Longest pattern that contains or is contained in `text`
    pub fn find_containing_pattern(&self, text: &str) -> Result<Option<Pattern>> {
        if text.is_empty() {
            return Ok(None);
        }

        let conn = self.conn()?;
        let pattern = conn
            .query_row(
                &format!(
                    r#"
                    SELECT {} FROM patterns
                    WHERE pattern <> '' AND (instr(?1, pattern) > 0 OR instr(pattern, ?1) > 0)
                    ORDER BY length(pattern) DESC, confidence DESC,
                             last_updated_ms DESC, category_id ASC
                    LIMIT 1
                    "#,
                    PATTERN_COLUMNS
                ),
                params![text],
                row_to_pattern,
            )
            .optional()?;
        Ok(pattern)
    }

    /// All patterns ordered by (pattern, category_id)
    pub fn list_patterns(&self) -> Result<Vec<Pattern>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM patterns ORDER BY pattern, category_id",
            PATTERN_COLUMNS
        ))?;
        let patterns = stmt
            .query_map([], row_to_pattern)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    /// Bump frequency of (pattern, category), creating it at frequency 1
    ///
    /// Runs as one IMMEDIATE transaction so concurrent reinforcements of the
    /// same key serialize on the write lock.
    pub fn reinforce_pattern(&self, pattern: &str, category_id: CategoryId) -> Result<Pattern> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let reinforced = bump_pattern(&tx, pattern, category_id, Utc::now())?;
        tx.commit()?;
        Ok(reinforced)
    }

    /// Reinforce `patterns` unless `source` already taught `category_id`
    ///
    /// Claiming the source and every reinforcement share one IMMEDIATE
    /// transaction; any failure rolls all of it back.
    pub fn learn_patterns(
        &self,
        source: &str,
        patterns: &[String],
        category_id: CategoryId,
    ) -> Result<Option<Vec<Pattern>>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now();

        let claimed = tx.execute(
            r#"
            INSERT INTO pattern_sources (source, category_id, learned_at_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(source, category_id) DO NOTHING
            "#,
            params![source, category_id, now.timestamp_millis()],
        )?;
        if claimed == 0 {
            debug!("Source {} already taught category {}", source, category_id);
            return Ok(None);
        }

        let learned = patterns
            .iter()
            .map(|p| bump_pattern(&tx, p, category_id, now))
            .collect::<Result<Vec<_>>>()?;
        tx.commit()?;

        Ok(Some(learned))
    }

    /// Insert seeds whose key is not present yet
    pub fn insert_pattern_seeds(&self, seeds: &[PatternSeed]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now_ms = Utc::now().timestamp_millis();

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO patterns (pattern, category_id, confidence, frequency, last_updated_ms)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(pattern, category_id) DO NOTHING
                "#,
            )?;
            for seed in seeds {
                let frequency = seed.frequency.max(1);
                inserted += stmt.execute(params![
                    seed.pattern,
                    seed.category_id,
                    confidence(frequency, &seed.pattern),
                    frequency,
                    now_ms,
                ])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    /// Delete every pattern and learning source; returns patterns removed
    pub fn delete_all_patterns(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute("DELETE FROM patterns", [])?;
        tx.execute("DELETE FROM pattern_sources", [])?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn count_patterns(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl PatternStore for Database {
    async fn find_exact(&self, text: &str) -> Result<Option<Pattern>> {
        let text = text.to_string();
        self.blocking(move |db| db.find_exact_pattern(&text)).await
    }

    async fn find_containing(&self, text: &str) -> Result<Option<Pattern>> {
        let text = text.to_string();
        self.blocking(move |db| db.find_containing_pattern(&text)).await
    }

    async fn find_by_similarity(
        &self,
        text: &str,
        min_similarity: f64,
    ) -> Result<Option<(Pattern, f64)>> {
        let text = text.to_string();
        self.blocking(move |db| {
            let patterns = db.list_patterns()?;
            Ok(select_by_similarity(&patterns, &text, min_similarity))
        })
        .await
    }

    async fn reinforce(&self, pattern: &str, category_id: CategoryId) -> Result<Pattern> {
        let pattern = pattern.to_string();
        self.blocking(move |db| db.reinforce_pattern(&pattern, category_id))
            .await
    }

    async fn learn(
        &self,
        source: &str,
        patterns: &[String],
        category_id: CategoryId,
    ) -> Result<Option<Vec<Pattern>>> {
        let source = source.to_string();
        let patterns = patterns.to_vec();
        self.blocking(move |db| db.learn_patterns(&source, &patterns, category_id))
            .await
    }

    async fn bulk_load(&self, seeds: &[PatternSeed]) -> Result<usize> {
        let seeds = seeds.to_vec();
        self.blocking(move |db| db.insert_pattern_seeds(&seeds)).await
    }

    async fn reset(&self) -> Result<usize> {
        self.blocking(|db| db.delete_all_patterns()).await
    }

    async fn count(&self) -> Result<usize> {
        self.blocking(|db| db.count_patterns()).await
    }

    async fn snapshot(&self) -> Result<Vec<Pattern>> {
        self.blocking(|db| db.list_patterns()).await
    }
}
