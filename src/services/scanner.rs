use crate::core::duplicate::{DuplicateCluster, DuplicateClusterer, PairScore};
use crate::core::features::FeatureSet;
use crate::core::image::{list_images, Bucket};
use crate::core::similarity::PairScorer;
use crate::core::store::FeatureStore;
use crate::error::EngineError;
use crate::services::pool::WorkerPool;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub buckets_done: usize,
    pub total_buckets: usize,
    pub current_bucket: String,
    pub clusters_found: usize,
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScanPhase {
    Discovery,
    Clustering,
    Complete,
}

/// Scans whole buckets for duplicate clusters, one pool job per bucket.
pub struct CorpusScanner {
    store: Arc<FeatureStore>,
    scorer: Arc<dyn PairScorer>,
    pool: Arc<WorkerPool>,
    supported_formats: Arc<Vec<String>>,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    cancellation_token: Arc<AtomicBool>,
}

impl CorpusScanner {
    pub fn new(
        store: Arc<FeatureStore>,
        scorer: Arc<dyn PairScorer>,
        pool: Arc<WorkerPool>,
        supported_formats: Vec<String>,
    ) -> Self {
        Self {
            store,
            scorer,
            pool,
            supported_formats: Arc::new(supported_formats),
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// Cluster every bucket and return all clusters, largest first.
    /// Buckets never mix: a cluster always lies within one character directory.
    pub async fn scan(
        &self,
        buckets: &[Bucket],
        threshold: f32,
    ) -> Result<Vec<DuplicateCluster>, EngineError> {
        let per_bucket = self
            .fan_out(
                buckets,
                move |store, scorer, images| {
                    let clusterer = DuplicateClusterer::new(scorer, threshold);
                    clusterer.cluster(load_features(store, images))
                },
                |clusters| clusters.len(),
            )
            .await?;

        let mut clusters: Vec<DuplicateCluster> = per_bucket.into_iter().flatten().collect();
        clusters.sort_by(|a, b| b.len().cmp(&a.len()));

        log::info!(
            "Scan of {} buckets found {} clusters",
            buckets.len(),
            clusters.len()
        );
        Ok(clusters)
    }

    /// Every matching pair across the buckets, strongest first.
    pub async fn scan_pairs(
        &self,
        buckets: &[Bucket],
        threshold: f32,
    ) -> Result<Vec<PairScore>, EngineError> {
        let per_bucket = self
            .fan_out(
                buckets,
                move |store, scorer, images| {
                    let clusterer = DuplicateClusterer::new(scorer, threshold);
                    clusterer.pairs(load_features(store, images))
                },
                |pairs| pairs.len(),
            )
            .await?;

        let mut pairs: Vec<PairScore> = per_bucket.into_iter().flatten().collect();
        pairs.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(pairs)
    }

    async fn fan_out<T, W, C>(
        &self,
        buckets: &[Bucket],
        work: W,
        count: C,
    ) -> Result<Vec<Vec<T>>, EngineError>
    where
        T: Send + 'static,
        W: Fn(&FeatureStore, &dyn PairScorer, Vec<PathBuf>) -> Vec<T> + Send + Sync + 'static,
        C: Fn(&[T]) -> usize + Send + Sync + 'static,
    {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let total_buckets = buckets.len();
        self.send_progress(ScanProgress {
            buckets_done: 0,
            total_buckets,
            current_bucket: String::new(),
            clusters_found: 0,
            phase: ScanPhase::Discovery,
        });

        let work = Arc::new(work);
        let count = Arc::new(count);
        let done = Arc::new(AtomicUsize::new(0));
        let found = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = buckets
            .iter()
            .map(|bucket| {
                let label = bucket.to_string();
                let dir = bucket.dir.clone();
                let store = self.store.clone();
                let scorer = self.scorer.clone();
                let formats = self.supported_formats.clone();
                let token = self.cancellation_token.clone();
                let sender = self.progress_sender.clone();
                let work = work.clone();
                let count = count.clone();
                let done = done.clone();
                let found = found.clone();

                move || {
                    if token.load(Ordering::Relaxed) {
                        return Vec::new();
                    }

                    // A panic in one bucket (e.g. inside an image decoder) costs
                    // only that bucket's results.
                    let results = panic::catch_unwind(AssertUnwindSafe(|| {
                        bucket_job(&dir, &formats, |images| {
                            (*work)(store.as_ref(), scorer.as_ref(), images)
                        })
                    }))
                    .unwrap_or_else(|_| {
                        log::warn!("Skipping bucket {} after a worker panic", label);
                        Vec::new()
                    });

                    let n = (*count)(results.as_slice());
                    let found_now = found.fetch_add(n, Ordering::Relaxed) + n;
                    let done_now = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(sender) = &sender {
                        let _ = sender.send(ScanProgress {
                            buckets_done: done_now,
                            total_buckets,
                            current_bucket: label,
                            clusters_found: found_now,
                            phase: ScanPhase::Clustering,
                        });
                    }
                    results
                }
            })
            .collect();

        let results = self.pool.run_all(jobs).await?;

        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.send_progress(ScanProgress {
            buckets_done: total_buckets,
            total_buckets,
            current_bucket: String::new(),
            clusters_found: found.load(Ordering::Relaxed),
            phase: ScanPhase::Complete,
        });

        Ok(results)
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

/// Run `work` on one bucket's images, skipping buckets that cannot hold a pair.
fn bucket_job<T>(
    dir: &Path,
    supported_formats: &[String],
    work: impl FnOnce(Vec<PathBuf>) -> Vec<T>,
) -> Vec<T> {
    let images = list_images(dir, supported_formats);
    if images.len() < 2 {
        log::debug!("Skipping {} ({} images)", dir.display(), images.len());
        return Vec::new();
    }
    work(images)
}

fn load_features(
    store: &FeatureStore,
    images: Vec<PathBuf>,
) -> Vec<(PathBuf, Option<FeatureSet>)> {
    images
        .into_iter()
        .map(|path| {
            let features = store.get(&path);
            (path, features)
        })
        .collect()
}
