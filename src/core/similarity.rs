use crate::config::AppConfig;
use crate::core::features::FeatureSet;
use crate::core::homography::{fit_homography_ransac, RansacHomographyConfig};
use crate::core::matcher::ratio_test;

/// Scores how likely two feature sets come from the same picture.
///
/// `None` means similarity could not be established, which is not the same
/// as a confirmed `0.0`.
pub trait PairScorer: Send + Sync {
    fn score(&self, a: &FeatureSet, b: &FeatureSet) -> Option<f32>;
}

/// Descriptor matching followed by a homography consistency check.
///
/// The score is the fraction of ratio-test survivors that agree with a single
/// planar transform. Matching runs from `a` into `b` only, so
/// `score(a, b)` and `score(b, a)` may differ.
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    ratio: f32,
    min_matches: usize,
    ransac: RansacHomographyConfig,
}

impl SimilarityScorer {
    pub fn new() -> Self {
        Self {
            ratio: crate::config::RATIO,
            min_matches: crate::config::MIN_MATCHES,
            ransac: RansacHomographyConfig::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new()
            .with_ratio(config.ratio)
            .with_min_matches(config.min_matches)
            .with_inlier_threshold(config.reprojection_threshold)
    }

    pub fn with_ratio(mut self, ratio: f32) -> Self {
        self.ratio = ratio;
        self
    }

    pub fn with_min_matches(mut self, min_matches: usize) -> Self {
        self.min_matches = min_matches;
        self
    }

    pub fn with_inlier_threshold(mut self, threshold: f64) -> Self {
        self.ransac.inlier_threshold = threshold;
        self
    }
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl PairScorer for SimilarityScorer {
    fn score(&self, a: &FeatureSet, b: &FeatureSet) -> Option<f32> {
        let good = ratio_test(a.descriptors(), b.descriptors(), self.ratio);
        if good.len() < self.min_matches {
            return None;
        }

        let (src, dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = good
            .iter()
            .map(|m| {
                let p = a.keypoints()[m.query];
                let q = b.keypoints()[m.train];
                ([p[0] as f64, p[1] as f64], [q[0] as f64, q[1] as f64])
            })
            .unzip();

        let result = fit_homography_ransac(&src, &dst, &self.ransac)?;
        Some(result.n_inliers as f32 / good.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orb::OrbExtractor;
    use crate::core::testing::{textured_image, with_chrome};
    use image::{imageops, DynamicImage, GrayImage};

    fn features(gray: &GrayImage) -> FeatureSet {
        OrbExtractor::new().extract_gray(gray).expect("features")
    }

    fn gray(seed: u64) -> GrayImage {
        DynamicImage::ImageRgb8(textured_image(seed, 320, 240)).to_luma8()
    }

    #[test]
    fn test_identical_images_score_one() {
        let a = features(&gray(10));
        let b = features(&gray(10));

        let score = SimilarityScorer::new().score(&a, &b).unwrap();
        assert!(score > 0.99, "score was {}", score);
    }

    #[test]
    fn test_unrelated_images_do_not_match() {
        let a = features(&gray(11));
        let c = features(&gray(12));

        let score = SimilarityScorer::new().score(&a, &c);
        assert!(score.map_or(true, |s| s < 0.70), "score was {:?}", score);
    }

    #[test]
    fn test_rotated_copy_still_matches() {
        let original = gray(13);
        let rotated = imageops::rotate90(&original);

        let score = SimilarityScorer::new()
            .score(&features(&original), &features(&rotated))
            .unwrap();
        assert!(score > 0.5, "score was {}", score);
    }

    #[test]
    fn test_too_few_matches_is_undefined() {
        let a = features(&gray(14));
        let small = FeatureSet::new(
            a.keypoints()[..10].to_vec(),
            a.descriptors()[..10].to_vec(),
        )
        .unwrap();

        assert!(SimilarityScorer::new().score(&small, &a).is_none());
        assert!(SimilarityScorer::new().with_min_matches(usize::MAX).score(&a, &a).is_none());
    }

    #[test]
    fn test_stricter_settings_never_raise_score() {
        let original = gray(15);
        let crop = imageops::crop_imm(&original, 8, 5, 300, 220).to_image();
        let a = features(&original);
        let b = features(&crop);

        let loose = SimilarityScorer::new().with_inlier_threshold(8.0).score(&a, &b);
        let strict = SimilarityScorer::new().with_inlier_threshold(1.0).score(&a, &b);
        let (loose, strict) = (loose.expect("loose score"), strict.expect("strict score"));
        assert!(strict <= loose + 1e-6, "strict {} > loose {}", strict, loose);
    }

    #[test]
    fn test_shared_chrome_is_not_a_match() {
        let a = features(&DynamicImage::ImageRgb8(with_chrome(16, 320, 240)).to_luma8());
        let c = features(&DynamicImage::ImageRgb8(with_chrome(17, 320, 240)).to_luma8());
        let scorer = SimilarityScorer::new();

        for score in [scorer.score(&a, &c), scorer.score(&c, &a)] {
            assert!(score.map_or(true, |s| s < 0.70), "score was {:?}", score);
        }
        assert!(scorer.score(&a, &a).unwrap() > 0.99);
    }
}
