//! Seeding the pattern store from historical categorizations
//!
//! Historical data is a CSV of `description,category` pairs exported from an
//! earlier system. Each record is normalized and run through pattern
//! extraction like an accepted suggestion; identical (pattern, category)
//! pairs are folded into one seed whose frequency is the number of records
//! that produced it.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use csv::{ReaderBuilder, Trim};
use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::models::{CategoryId, HistoricalRecord, PatternSeed};
use crate::normalize::Normalizer;
use crate::patterns::extract_patterns;
use crate::store::{CategoryDirectory, PatternStore};

/// Read `description,category` records from CSV
///
/// A malformed row yields an `Err` item; reading continues with the next row.
pub fn read_history_csv<R: Read>(reader: R) -> impl Iterator<Item = Result<HistoricalRecord>> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader)
        .into_deserialize::<HistoricalRecord>()
        .map(|row| row.map_err(Error::from))
}

/// Outcome of a seeding run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub records_read: usize,
    pub records_skipped: usize,
    pub patterns_inserted: usize,
}

pub struct HistorySeeder {
    normalizer: Arc<Normalizer>,
    patterns: Arc<dyn PatternStore>,
    categories: Arc<dyn CategoryDirectory>,
    extraction: ExtractionConfig,
}

impl HistorySeeder {
    pub fn new(
        normalizer: Arc<Normalizer>,
        patterns: Arc<dyn PatternStore>,
        categories: Arc<dyn CategoryDirectory>,
        extraction: ExtractionConfig,
    ) -> Self {
        Self {
            normalizer,
            patterns,
            categories,
            extraction,
        }
    }

    /// Bulk-load patterns learned from `records`
    ///
    /// Bad rows, blank descriptions and unknown categories are skipped.
    /// Existing patterns are never overwritten.
    pub async fn seed<I>(&self, records: I) -> Result<SeedReport>
    where
        I: IntoIterator<Item = Result<HistoricalRecord>>,
    {
        let by_name: HashMap<String, CategoryId> = self
            .categories
            .list_categories()
            .await?
            .into_iter()
            .map(|c| (c.name.trim().to_lowercase(), c.id))
            .collect();

        let mut report = SeedReport::default();
        let mut seeds: Vec<PatternSeed> = Vec::new();
        let mut index: HashMap<(String, CategoryId), usize> = HashMap::new();

        for (line, record) in records.into_iter().enumerate() {
            report.records_read += 1;

            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping historical record {}: {}", line + 1, e);
                    report.records_skipped += 1;
                    continue;
                }
            };

            let Some(&category_id) = by_name.get(&record.category.trim().to_lowercase()) else {
                warn!(
                    "Skipping historical record {}: unknown category '{}'",
                    line + 1,
                    record.category
                );
                report.records_skipped += 1;
                continue;
            };

            let normalized = self.normalizer.normalize(&record.description);
            if normalized.is_empty() {
                warn!(
                    "Skipping historical record {}: blank description '{}'",
                    line + 1,
                    record.description
                );
                report.records_skipped += 1;
                continue;
            }

            for pattern in extract_patterns(&normalized, &self.extraction) {
                match index.get(&(pattern.clone(), category_id)) {
                    Some(&i) => seeds[i].frequency += 1,
                    None => {
                        index.insert((pattern.clone(), category_id), seeds.len());
                        seeds.push(PatternSeed {
                            pattern,
                            category_id,
                            frequency: 1,
                        });
                    }
                }
            }
        }

        debug!("Aggregated {} pattern seeds", seeds.len());
        report.patterns_inserted = self.patterns.bulk_load(&seeds).await?;

        info!(
            "Seeded {} patterns from {} historical records ({} skipped)",
            report.patterns_inserted, report.records_read, report.records_skipped
        );
        Ok(report)
    }

    /// Seed only when the pattern store is empty (first run)
    pub async fn seed_if_empty<I>(&self, records: I) -> Result<Option<SeedReport>>
    where
        I: IntoIterator<Item = Result<HistoricalRecord>>,
    {
        let existing = self.patterns.count().await?;
        if existing > 0 {
            debug!("Pattern store holds {} patterns, skipping seed", existing);
            return Ok(None);
        }
        self.seed(records).await.map(Some)
    }
}
