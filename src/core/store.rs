use crate::config::AppConfig;
use crate::core::features::{FeatureExtractor, FeatureSet};
use crate::core::image::Category;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Appended to the source file name to form the cache file name.
pub const CACHE_SUFFIX: &str = "orb";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Malformed cache entry: {path}")]
    Malformed { path: String },
}

/// On-disk cache of per-image feature sets.
///
/// Entries live under `<cache_root>/<category>/<path relative to the category
/// root>.orb`. An entry is fresh while its modification time is not older
/// than the source image's. Cache problems never surface to callers: a bad
/// entry is a miss.
pub struct FeatureStore {
    cache_root: PathBuf,
    roots: BTreeMap<Category, PathBuf>,
    extractor: Arc<dyn FeatureExtractor>,
}

impl FeatureStore {
    pub fn new(
        cache_root: PathBuf,
        roots: BTreeMap<Category, PathBuf>,
        extractor: Arc<dyn FeatureExtractor>,
    ) -> Self {
        Self {
            cache_root,
            roots,
            extractor,
        }
    }

    pub fn from_config(config: &AppConfig, extractor: Arc<dyn FeatureExtractor>) -> Self {
        Self::new(
            config.cache_root.clone(),
            config.category_roots.clone(),
            extractor,
        )
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Cache location for `image`, or `None` when the image is outside every
    /// category root (such images are scored but never cached).
    pub fn cache_path(&self, image: &Path) -> Option<PathBuf> {
        self.roots.iter().find_map(|(category, root)| {
            let rel = image.strip_prefix(root).ok()?;
            let file_name = rel.file_name()?;

            let mut cache_name = file_name.to_os_string();
            cache_name.push(".");
            cache_name.push(CACHE_SUFFIX);

            Some(
                self.cache_root
                    .join(category.as_str())
                    .join(rel)
                    .with_file_name(cache_name),
            )
        })
    }

    pub fn bucket_cache_dir(&self, category: Category, character: &str) -> PathBuf {
        self.cache_root.join(category.as_str()).join(character)
    }

    /// Cached features when fresh, otherwise extract and persist.
    pub fn get(&self, image: &Path) -> Option<FeatureSet> {
        match self.load(image) {
            Ok(Some(set)) => return Some(set),
            Ok(None) => {}
            Err(e) => log::debug!("Ignoring cache entry for {}: {}", image.display(), e),
        }

        self.compute_and_store(image)
    }

    /// Recompute and overwrite, e.g. after the image was re-encoded in place.
    pub fn refresh(&self, image: &Path) -> Option<FeatureSet> {
        let set = self.compute_and_store(image);
        if set.is_none() {
            self.invalidate(image);
        }
        set
    }

    /// Drop the entry for `image`. Absent entries are fine.
    pub fn invalidate(&self, image: &Path) {
        let Some(cache_path) = self.cache_path(image) else {
            return;
        };

        match fs::remove_file(&cache_path) {
            Ok(()) => log::debug!("Removed feature cache {}", cache_path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove feature cache {}: {}", cache_path.display(), e),
        }
    }

    /// Drop every entry of one character's bucket.
    pub fn invalidate_bucket(&self, category: Category, character: &str) {
        let dir = self.bucket_cache_dir(category, character);
        match fs::remove_dir_all(&dir) {
            Ok(()) => log::info!("Removed feature cache directory {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", dir.display(), e),
        }
    }

    /// `old` was replaced by `new` (for instance re-encoded to another format).
    pub fn replace(&self, old: &Path, new: &Path) -> Option<FeatureSet> {
        self.invalidate(old);
        self.refresh(new)
    }

    /// Read a fresh entry. `Ok(None)` for missing or stale entries.
    pub fn load(&self, image: &Path) -> Result<Option<FeatureSet>, CacheError> {
        let Some(cache_path) = self.cache_path(image) else {
            return Ok(None);
        };

        let cache_modified = match fs::metadata(&cache_path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let source_modified = match fs::metadata(image) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if cache_modified < source_modified {
            return Ok(None);
        }

        let bytes = fs::read(&cache_path)?;
        let set: FeatureSet = bincode::deserialize(&bytes)?;
        if !set.is_consistent() {
            return Err(CacheError::Malformed {
                path: cache_path.to_string_lossy().to_string(),
            });
        }
        Ok(Some(set))
    }

    fn compute_and_store(&self, image: &Path) -> Option<FeatureSet> {
        let set = self.extractor.extract(image)?;
        if let Err(e) = self.persist(image, &set) {
            log::warn!("Failed to write feature cache for {}: {}", image.display(), e);
        }
        Some(set)
    }

    /// Write through a temporary file in the target directory and rename it
    /// into place, so readers never see a partial entry.
    fn persist(&self, image: &Path, set: &FeatureSet) -> Result<(), CacheError> {
        let Some(cache_path) = self.cache_path(image) else {
            return Ok(());
        };
        let parent = cache_path.parent().ok_or_else(|| CacheError::Malformed {
            path: cache_path.to_string_lossy().to_string(),
        })?;
        fs::create_dir_all(parent)?;

        let bytes = bincode::serialize(set)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&cache_path).map_err(|e| e.error)?;
        Ok(())
    }
}
