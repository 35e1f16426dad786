use crate::core::features::FeatureSet;
use crate::core::hash::display_id_for_path;
use crate::core::image::list_images;
use crate::core::similarity::PairScorer;
use crate::core::store::FeatureStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadMatch {
    pub existing: PathBuf,
    pub score: f32,
}

/// Matches for one incoming image, best first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadVerdict {
    pub image: PathBuf,
    pub matches: Vec<UploadMatch>,
}

impl UploadVerdict {
    pub fn best(&self) -> Option<&UploadMatch> {
        self.matches.first()
    }

    pub fn is_blocked(&self, block_threshold: f32) -> bool {
        self.best().is_some_and(|m| m.score >= block_threshold)
    }
}

/// An incoming image that duplicates something already in the bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedUpload {
    /// 1-based position in the submitted batch.
    pub position: usize,
    pub image: PathBuf,
    pub existing: PathBuf,
    pub existing_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadReport {
    /// One verdict per incoming image, in submission order.
    pub verdicts: Vec<UploadVerdict>,
}

impl UploadReport {
    pub fn matches_for(&self, image: &Path) -> Option<&[UploadMatch]> {
        self.verdicts
            .iter()
            .find(|v| v.image == image)
            .map(|v| v.matches.as_slice())
    }

    pub fn blocked(&self, block_threshold: f32) -> Vec<BlockedUpload> {
        self.verdicts
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_blocked(block_threshold))
            .filter_map(|(i, v)| {
                let best = v.best()?;
                Some(BlockedUpload {
                    position: i + 1,
                    image: v.image.clone(),
                    existing: best.existing.clone(),
                    existing_id: display_id_for_path(&best.existing),
                    score: best.score,
                })
            })
            .collect()
    }

    /// Incoming images that may be kept.
    pub fn accepted(&self, block_threshold: f32) -> Vec<&Path> {
        self.verdicts
            .iter()
            .filter(|v| !v.is_blocked(block_threshold))
            .map(|v| v.image.as_path())
            .collect()
    }
}

/// Compares freshly added images against the rest of their bucket.
pub struct UploadGuard<'a> {
    store: &'a FeatureStore,
    scorer: &'a dyn PairScorer,
    threshold: f32,
    supported_formats: &'a [String],
}

impl<'a> UploadGuard<'a> {
    pub fn new(
        store: &'a FeatureStore,
        scorer: &'a dyn PairScorer,
        threshold: f32,
        supported_formats: &'a [String],
    ) -> Self {
        Self {
            store,
            scorer,
            threshold,
            supported_formats,
        }
    }

    /// Score each of `new_images` against every other image in `bucket_dir`.
    ///
    /// New images are never compared with each other. Matches below the
    /// threshold are dropped; an image that could not be scored gets an
    /// empty list.
    pub fn check(&self, new_images: &[PathBuf], bucket_dir: &Path) -> UploadReport {
        let incoming: HashSet<&Path> = new_images.iter().map(|p| p.as_path()).collect();

        let existing: Vec<(PathBuf, FeatureSet)> = list_images(bucket_dir, self.supported_formats)
            .into_iter()
            .filter(|path| !incoming.contains(path.as_path()))
            .filter_map(|path| {
                let features = self.store.get(&path)?;
                Some((path, features))
            })
            .collect();

        log::debug!(
            "Checking {} uploads against {} images in {}",
            new_images.len(),
            existing.len(),
            bucket_dir.display()
        );

        let verdicts = new_images
            .iter()
            .map(|image| UploadVerdict {
                image: image.clone(),
                matches: self.rank(image, &existing),
            })
            .collect();

        UploadReport { verdicts }
    }

    fn rank(&self, image: &Path, existing: &[(PathBuf, FeatureSet)]) -> Vec<UploadMatch> {
        if existing.is_empty() {
            return Vec::new();
        }
        let Some(features) = self.store.get(image) else {
            log::warn!("No features for upload {}", image.display());
            return Vec::new();
        };

        let mut matches: Vec<UploadMatch> = existing
            .iter()
            .filter_map(|(path, other)| {
                let score = self.scorer.score(&features, other)?;
                (score >= self.threshold).then(|| UploadMatch {
                    existing: path.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.existing.cmp(&b.existing)));
        matches
    }
}
