//! Background preloader
//!
//! Classifies a batch of uncategorized transactions ahead of time so the review
//! screen has suggestions ready. A run happens on its own tokio task and
//! publishes its result by swapping one `Arc<Vec<_>>` into the buffer, so
//! readers always see either the previous batch or the new one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::EngineCache;
use crate::classifier::Classifier;
use crate::error::{Error, Result};
use crate::models::ReviewCandidate;

type Buffer = Arc<RwLock<Arc<Vec<ReviewCandidate>>>>;

/// Resets the in-progress flag however the run ends, including abort
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Preloader {
    classifier: Arc<Classifier>,
    cache: Arc<EngineCache>,
    batch_size: usize,
    buffer: Buffer,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Preloader {
    pub fn new(classifier: Arc<Classifier>, cache: Arc<EngineCache>, batch_size: usize) -> Self {
        Self {
            classifier,
            cache,
            batch_size,
            buffer: Arc::new(RwLock::new(Arc::new(Vec::new()))),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Start a preload run in the background
    ///
    /// Returns `false` without doing anything when a run is already in progress.
    pub fn start(&self) -> bool {
        // held until the handle is stored so `stop` never misses a started run
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Preload already running");
            return false;
        }

        let guard = RunningGuard(self.running.clone());
        let classifier = self.classifier.clone();
        let cache = self.cache.clone();
        let buffer = self.buffer.clone();
        let batch_size = self.batch_size;

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match load_batch(&classifier, &cache, batch_size).await {
                Ok(batch) => {
                    info!("Preloaded {} suggestions", batch.len());
                    publish(&buffer, batch);
                }
                Err(e) => warn!("Preload failed: {}", e),
            }
        });

        *slot = Some(handle);
        true
    }

    /// Abort the running preload, if any; an aborted run publishes nothing
    pub async fn stop(&self) -> bool {
        let handle = self.take_handle();
        match handle {
            Some(handle) => {
                handle.abort();
                let _ = handle.await;
                debug!("Preload stopped");
                true
            }
            None => false,
        }
    }

    /// Wait for the current run to finish
    pub async fn wait(&self) -> Result<()> {
        match self.take_handle() {
            Some(handle) => match handle.await {
                Ok(()) => Ok(()),
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(Error::from(e)),
            },
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current batch of preloaded candidates
    pub fn pending(&self) -> Arc<Vec<ReviewCandidate>> {
        self.buffer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        publish(&self.buffer, Vec::new());
    }

    /// Drop the candidate with `identity_hash` from the published batch
    pub fn remove(&self, identity_hash: &str) {
        let mut current = self.buffer.write().unwrap_or_else(|e| e.into_inner());
        if current.iter().any(|c| c.identity_hash() == identity_hash) {
            let remaining = current
                .iter()
                .filter(|c| c.identity_hash() != identity_hash)
                .cloned()
                .collect();
            *current = Arc::new(remaining);
        }
    }

    fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

fn publish(buffer: &Buffer, batch: Vec<ReviewCandidate>) {
    *buffer.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(batch);
}

async fn load_batch(
    classifier: &Classifier,
    cache: &EngineCache,
    batch_size: usize,
) -> Result<Vec<ReviewCandidate>> {
    let uncategorized = cache.uncategorized().await?;

    let mut batch = Vec::with_capacity(batch_size);
    for row in uncategorized.iter() {
        if batch.len() >= batch_size {
            break;
        }
        let suggestion = classifier.suggest(&row.description).await?;
        if !suggestion.is_none() {
            batch.push(ReviewCandidate::new(row.to_candidate(), suggestion));
        }
    }
    Ok(batch)
}
