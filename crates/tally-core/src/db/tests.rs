//! Database tests

use super::*;
use crate::models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use crate::error::Error;
    use crate::patterns::confidence;
    use crate::store::{CategoryDirectory, PatternStore, TransactionStore};

    fn record(day: u32, description: &str, period: &str) -> TransactionRecord {
        let candidate = TransactionCandidate::new(
            Utc.with_ymd_and_hms(2024, 4, day, 12, 0, 0).unwrap(),
            description,
            -2500.0,
        )
        .with_period(period);
        TransactionRecord::from_candidate(&candidate, None)
    }

    #[test]
    fn test_in_memory_db() {
        let db = Database::in_memory().unwrap();
        assert!(db.list_patterns().unwrap().is_empty());
        assert!(db.list_all_categories().unwrap().is_empty());
        assert_eq!(db.get_classification_stats().unwrap(), ClassificationStats::default());
    }

    #[test]
    fn test_schema_exists() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('patterns') WHERE name IN ('pattern', 'category_id', 'confidence', 'frequency', 'last_updated_ms')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 5, "patterns table should have 5 expected columns");

        let result: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('transactions') WHERE name IN ('identity_hash', 'period_scope', 'category_id', 'date_ms')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(result, 4);
    }

    #[test]
    fn test_busy_timeout_set_on_connections() {
        let db = Database::in_memory().unwrap();
        let conn = db.conn().unwrap();
        let timeout: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);
    }

    #[test]
    fn test_category_upsert_is_case_insensitive() {
        let db = Database::in_memory().unwrap();

        let groceries = db.upsert_category("Groceries").unwrap();
        let again = db.upsert_category("  groceries ").unwrap();
        assert_eq!(groceries.id, again.id);
        assert_eq!(again.name, "Groceries");

        assert!(db.has_category_named("GROCERIES").unwrap());
        assert!(!db.has_category_named("Fuel").unwrap());
        assert_eq!(db.get_category(groceries.id).unwrap(), Some(groceries));

        assert!(matches!(db.upsert_category("  "), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_reinforce_pattern() {
        let db = Database::in_memory().unwrap();

        let first = db.reinforce_pattern("supermercado lider", 3).unwrap();
        assert_eq!(first.frequency, 1);
        assert!((first.confidence - confidence(1, "supermercado lider")).abs() < 1e-12);

        let second = db.reinforce_pattern("supermercado lider", 3).unwrap();
        assert_eq!(second.frequency, 2);
        assert!(second.confidence > first.confidence);

        // another category is its own key
        db.reinforce_pattern("supermercado lider", 4).unwrap();
        assert_eq!(db.count_patterns().unwrap(), 2);
    }

    #[test]
    fn test_exact_lookup_tie_breaks() {
        let db = Database::in_memory().unwrap();
        db.reinforce_pattern("uber", 5).unwrap();
        db.reinforce_pattern("uber", 2).unwrap();
        db.reinforce_pattern("uber", 2).unwrap();

        // higher frequency means higher confidence
        let best = db.find_exact_pattern("uber").unwrap().unwrap();
        assert_eq!(best.category_id, 2);
        assert!(db.find_exact_pattern("ube").unwrap().is_none());
    }

    #[test]
    fn test_containing_lookup_prefers_longest() {
        let db = Database::in_memory().unwrap();
        db.reinforce_pattern("starbucks", 1).unwrap();
        db.reinforce_pattern("starbucks av libertad", 2).unwrap();

        let best = db
            .find_containing_pattern("starbucks av libertad centro")
            .unwrap()
            .unwrap();
        assert_eq!(best.pattern, "starbucks av libertad");

        // query contained in the pattern
        let best = db.find_containing_pattern("av libertad").unwrap().unwrap();
        assert_eq!(best.category_id, 2);

        assert!(db.find_containing_pattern("").unwrap().is_none());
        assert!(db.find_containing_pattern("jumbo").unwrap().is_none());
    }

    #[test]
    fn test_seeds_do_not_overwrite() {
        let db = Database::in_memory().unwrap();
        db.reinforce_pattern("copec", 1).unwrap();

        let inserted = db
            .insert_pattern_seeds(&[
                PatternSeed {
                    pattern: "copec".to_string(),
                    category_id: 1,
                    frequency: 9,
                },
                PatternSeed {
                    pattern: "jumbo".to_string(),
                    category_id: 2,
                    frequency: 0,
                },
            ])
            .unwrap();
        assert_eq!(inserted, 1);

        let patterns = db.list_patterns().unwrap();
        assert_eq!(patterns[0].pattern, "copec");
        assert_eq!(patterns[0].frequency, 1);
        // frequency clamped to at least 1
        assert_eq!(patterns[1].frequency, 1);

        assert_eq!(db.delete_all_patterns().unwrap(), 2);
        assert_eq!(db.count_patterns().unwrap(), 0);
    }

    #[test]
    fn test_learn_patterns_once_per_source() {
        let db = Database::in_memory().unwrap();
        let patterns = vec!["supermercado lider".to_string(), "lider".to_string()];

        let learned = db.learn_patterns("tx-1", &patterns, 3).unwrap().unwrap();
        assert_eq!(learned.len(), 2);
        assert!(db.learn_patterns("tx-1", &patterns, 3).unwrap().is_none());
        assert!(db.learn_patterns("tx-1", &patterns, 4).unwrap().is_some());

        let lider = db.find_exact_pattern("lider").unwrap().unwrap();
        assert_eq!(lider.frequency, 1);

        // reset forgets sources too
        assert_eq!(db.delete_all_patterns().unwrap(), 4);
        assert!(db.learn_patterns("tx-1", &patterns, 3).unwrap().is_some());
    }

    #[test]
    fn test_failed_learn_rolls_back_and_can_retry() {
        let db = Database::in_memory().unwrap();
        db.conn()
            .unwrap()
            .execute_batch(
                r#"
                CREATE TRIGGER fail_rappi BEFORE INSERT ON patterns
                WHEN NEW.pattern = 'rappi'
                BEGIN SELECT RAISE(ABORT, 'rappi rejected'); END;
                "#,
            )
            .unwrap();

        let patterns = vec!["rappi restaurantes".to_string(), "rappi".to_string()];
        assert!(db.learn_patterns("tx-9", &patterns, 2).is_err());
        assert_eq!(db.count_patterns().unwrap(), 0);

        db.conn()
            .unwrap()
            .execute_batch("DROP TRIGGER fail_rappi;")
            .unwrap();
        let learned = db.learn_patterns("tx-9", &patterns, 2).unwrap().unwrap();
        assert_eq!(learned.len(), 2);
        assert!(learned.iter().all(|p| p.frequency == 1));
    }

    #[test]
    fn test_transaction_insert_duplicate_and_update() {
        let db = Database::in_memory().unwrap();
        let rec = record(3, "NETFLIX.COM", "2024-04");

        let id = db.insert_transaction(&rec).unwrap();
        assert!(matches!(
            db.insert_transaction(&rec),
            Err(Error::DuplicateIdentity(_))
        ));

        // same identity in another period is a different row
        let mut other_period = rec.clone();
        other_period.period_scope = "2024-05".to_string();
        assert_ne!(db.insert_transaction(&other_period).unwrap(), id);

        let mut categorized = rec.clone();
        categorized.category_id = Some(9);
        db.update_transaction(id, &categorized).unwrap();

        let stored = db
            .get_transaction_by_identity(&rec.identity_hash, "2024-04")
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.category_id, Some(9));
        assert_eq!(stored.date, rec.date);

        assert!(matches!(
            db.update_transaction(9999, &categorized),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_transaction_lists_and_stats() {
        let db = Database::in_memory().unwrap();
        let mut categorized = record(2, "COPEC", "2024-04");
        categorized.category_id = Some(1);
        db.insert_transaction(&record(5, "UBER TRIP", "2024-04")).unwrap();
        db.insert_transaction(&categorized).unwrap();
        db.insert_transaction(&record(1, "JUMBO", "")).unwrap();

        let uncategorized = db.list_uncategorized_transactions().unwrap();
        let descriptions: Vec<&str> = uncategorized.iter().map(|t| t.description.as_str()).collect();
        assert_eq!(descriptions, vec!["JUMBO", "UBER TRIP"]);

        let april = db.list_transactions_for_period("2024-04").unwrap();
        assert_eq!(april.len(), 2);
        assert_eq!(april[0].description, "COPEC");

        let unscoped = db.list_transactions_for_period("").unwrap();
        assert_eq!(unscoped.len(), 1);
        assert_eq!(unscoped[0].to_candidate().period_id, None);

        let stats = db.get_classification_stats().unwrap();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.classified_count, 1);
        assert_eq!(stats.unclassified_count, 2);
    }

    #[tokio::test]
    async fn test_store_traits_over_sqlite() {
        let db = Database::in_memory().unwrap();
        db.upsert_category("Entertainment").unwrap();

        let patterns: &dyn PatternStore = &db;
        patterns.reinforce("farmacia ahumada", 7).await.unwrap();
        let (found, score) = patterns
            .find_by_similarity("farmacias ahumada", 0.6)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.category_id, 7);
        assert!(score > 0.9);
        assert_eq!(patterns.snapshot().await.unwrap().len(), 1);

        let transactions: &dyn TransactionStore = &db;
        let id = transactions.insert(&record(8, "SPOTIFY", "2024-04")).await.unwrap();
        assert_eq!(transactions.list_uncategorized().await.unwrap()[0].id, id);

        let categories: &dyn CategoryDirectory = &db;
        assert!(categories.category_exists("entertainment").await.unwrap());
        assert_eq!(categories.list_categories().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reinforcement_counts_every_call() {
        let db = Arc::new(Database::in_memory().unwrap());

        let mut handles = Vec::new();
        for _ in 0..25 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.reinforce("rappi", 4).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let p = db.find_exact("rappi").await.unwrap().unwrap();
        assert_eq!(p.frequency, 25);
        assert!((p.confidence - confidence(25, "rappi")).abs() < 1e-12);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_learn_from_one_source() {
        let db = Arc::new(Database::in_memory().unwrap());

        let mut handles = Vec::new();
        for _ in 0..12 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.learn("tx-1", &["copec ruta".to_string(), "copec".to_string()], 5)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut taught = 0;
        for h in handles {
            if h.await.unwrap() {
                taught += 1;
            }
        }

        assert_eq!(taught, 1);
        let patterns = db.snapshot().await.unwrap();
        assert!(patterns.iter().all(|p| p.frequency == 1));
        assert_eq!(patterns.len(), 2);
    }
}
