pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod services;

pub use config::AppConfig;
pub use core::duplicate::{DuplicateCluster, DuplicateClusterer, PairScore};
pub use core::features::{FeatureExtractor, FeatureSet};
pub use core::image::{Bucket, Category, Library};
pub use core::similarity::{PairScorer, SimilarityScorer};
pub use core::store::FeatureStore;
pub use engine::Engine;
pub use error::EngineError;
pub use services::scanner::{CorpusScanner, ScanPhase, ScanProgress};
pub use services::upload::{UploadGuard, UploadReport};
