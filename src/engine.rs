use crate::config::AppConfig;
use crate::core::features::{build_extractor, FeatureSet};
use crate::core::image::{list_images, Bucket, Category, Library};
use crate::core::similarity::{PairScorer, SimilarityScorer};
use crate::core::store::FeatureStore;
use crate::error::EngineError;
use crate::services::pool::WorkerPool;
use crate::services::scanner::CorpusScanner;
use crate::services::upload::{UploadGuard, UploadReport};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Everything built from one config: library layout, feature cache,
/// scorer and the worker pool they share.
pub struct Engine {
    config: AppConfig,
    library: Library,
    store: Arc<FeatureStore>,
    scorer: Arc<dyn PairScorer>,
    pool: Arc<WorkerPool>,
}

impl Engine {
    pub fn from_config(config: AppConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let extractor = build_extractor(config.extractor, config.max_features);
        let store = FeatureStore::from_config(&config, extractor);
        log::info!(
            "Using {} features, {} workers, cache at {}",
            store.extractor_name(),
            config.parallel_workers,
            store.cache_root().display()
        );

        Ok(Self {
            library: Library::from_config(&config),
            store: Arc::new(store),
            scorer: Arc::new(SimilarityScorer::from_config(&config)),
            pool: Arc::new(WorkerPool::new(config.parallel_workers)?),
            config,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    /// A scanner sharing this engine's cache, scorer and pool.
    pub fn scanner(&self) -> CorpusScanner {
        CorpusScanner::new(
            self.store.clone(),
            self.scorer.clone(),
            self.pool.clone(),
            self.config.supported_formats.clone(),
        )
    }

    pub fn bucket(&self, category: Category, character: &str) -> Result<Bucket, EngineError> {
        let mut components = Path::new(character).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !valid {
            return Err(EngineError::InvalidPath {
                path: character.to_string(),
            });
        }

        self.library
            .bucket(category, character)
            .ok_or_else(|| EngineError::UnknownCategory {
                category: category.to_string(),
            })
    }

    /// Check images just written into a bucket against the rest of it.
    pub async fn check_upload(
        &self,
        category: Category,
        character: &str,
        new_images: Vec<PathBuf>,
    ) -> Result<UploadReport, EngineError> {
        let bucket = self.bucket(category, character)?;
        let store = self.store.clone();
        let scorer = self.scorer.clone();
        let threshold = self.config.scan_threshold;
        let formats = self.config.supported_formats.clone();

        self.pool
            .run(move || {
                UploadGuard::new(&store, scorer.as_ref(), threshold, &formats)
                    .check(&new_images, &bucket.dir)
            })
            .await
    }

    pub async fn refresh(&self, image: PathBuf) -> Result<Option<FeatureSet>, EngineError> {
        let store = self.store.clone();
        self.pool.run(move || store.refresh(&image)).await
    }

    pub async fn replace(&self, old: PathBuf, new: PathBuf) -> Result<Option<FeatureSet>, EngineError> {
        let store = self.store.clone();
        self.pool.run(move || store.replace(&old, &new)).await
    }

    pub fn invalidate(&self, image: &Path) {
        self.store.invalidate(image);
    }

    /// Delete every image of a character and its cache directory.
    /// Returns the number of images removed.
    pub fn purge_bucket(&self, category: Category, character: &str) -> Result<usize, EngineError> {
        let bucket = self.bucket(category, character)?;
        let images = list_images(&bucket.dir, &self.config.supported_formats);

        for image in &images {
            fs::remove_file(image)?;
        }
        self.store.invalidate_bucket(category, character);

        log::info!("Purged {} images from {}", images.len(), bucket);
        Ok(images.len())
    }

    pub fn find(&self, display_id: &str) -> Vec<(Bucket, PathBuf)> {
        self.library.find_by_display_id(display_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::display_id_for_path;
    use crate::core::testing::save_textured_image;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Engine {
        let mut config =
            AppConfig::with_base_dir(dir.path().join("images"), dir.path().join("cache"));
        config.parallel_workers = 2;
        Engine::from_config(config).unwrap()
    }

    #[test]
    fn test_rejects_unsafe_character_names() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        for name in ["", "..", "a/b", "/abs"] {
            assert!(
                matches!(engine.bucket(Category::Card, name), Err(EngineError::InvalidPath { .. })),
                "accepted {:?}",
                name
            );
        }
        assert!(engine.bucket(Category::Card, "1102").is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config =
            AppConfig::with_base_dir(dir.path().join("images"), dir.path().join("cache"));
        config.block_threshold = 2.0;
        assert!(matches!(Engine::from_config(config), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_upload_then_purge() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let bucket = engine.bucket(Category::Card, "1102").unwrap();
        fs::create_dir_all(&bucket.dir).unwrap();

        let existing = bucket.dir.join("existing.png");
        let upload = bucket.dir.join("upload.png");
        save_textured_image(&existing, 31);
        fs::copy(&existing, &upload).unwrap();

        let report = engine
            .check_upload(Category::Card, "1102", vec![upload.clone()])
            .await
            .unwrap();
        let blocked = report.blocked(engine.config().block_threshold);
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].existing, existing);

        let cache_dir = engine.store().bucket_cache_dir(Category::Card, "1102");
        assert!(cache_dir.exists());

        assert_eq!(engine.purge_bucket(Category::Card, "1102").unwrap(), 2);
        assert!(!existing.exists());
        assert!(!cache_dir.exists());
    }

    #[tokio::test]
    async fn test_find_and_refresh() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let bucket = engine.bucket(Category::Bg, "1205").unwrap();
        fs::create_dir_all(&bucket.dir).unwrap();
        let image = bucket.dir.join("wallpaper.png");
        save_textured_image(&image, 32);

        let found = engine.find(&display_id_for_path(&image));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, image);

        let features = engine.refresh(image.clone()).await.unwrap();
        assert!(features.is_some());
        assert!(engine.store().cache_path(&image).unwrap().exists());

        engine.invalidate(&image);
        assert!(!engine.store().cache_path(&image).unwrap().exists());

        // re-encoded under a new name
        let reencoded = bucket.dir.join("wallpaper.jpg");
        image::open(&image).unwrap().to_rgb8().save(&reencoded).unwrap();
        engine.refresh(image.clone()).await.unwrap();
        assert!(engine.replace(image.clone(), reencoded.clone()).await.unwrap().is_some());
        assert!(!engine.store().cache_path(&image).unwrap().exists());
        assert!(engine.store().cache_path(&reencoded).unwrap().exists());
    }
}
