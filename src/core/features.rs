use crate::core::orb::OrbExtractor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// 256-bit binary descriptor.
pub type Descriptor = [u8; 32];

/// Keypoint positions and their descriptors for one image.
///
/// Always holds at least one keypoint, and exactly one descriptor per
/// keypoint. Images without keypoints have no `FeatureSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    keypoints: Vec<[f32; 2]>,
    descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn new(keypoints: Vec<[f32; 2]>, descriptors: Vec<Descriptor>) -> Option<Self> {
        if keypoints.is_empty() || keypoints.len() != descriptors.len() {
            return None;
        }
        Some(Self {
            keypoints,
            descriptors,
        })
    }

    pub fn keypoints(&self) -> &[[f32; 2]] {
        &self.keypoints
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Re-check the invariants after deserializing.
    pub fn is_consistent(&self) -> bool {
        !self.keypoints.is_empty() && self.keypoints.len() == self.descriptors.len()
    }
}

/// Computes keypoint descriptors for an image file.
///
/// Implementations are pure functions of the file bytes. `None` means the
/// image could not be decoded or has no keypoints.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image_path: &Path) -> Option<FeatureSet>;

    fn name(&self) -> &'static str;
}

/// Which extractor the engine is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorBackend {
    Orb,
    /// No CV backend: every image is unscoreable.
    Disabled,
}

/// Stand-in used when no CV backend is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullExtractor;

impl FeatureExtractor for NullExtractor {
    fn extract(&self, _image_path: &Path) -> Option<FeatureSet> {
        None
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

pub fn build_extractor(backend: ExtractorBackend, max_features: usize) -> Arc<dyn FeatureExtractor> {
    match backend {
        ExtractorBackend::Orb => Arc::new(OrbExtractor::new().with_max_features(max_features)),
        ExtractorBackend::Disabled => Arc::new(NullExtractor),
    }
}
