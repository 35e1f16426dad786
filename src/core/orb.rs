//! Oriented FAST keypoints with steered BRIEF descriptors.

use crate::core::features::{Descriptor, FeatureExtractor, FeatureSet};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageReader};
use imageproc::corners::{corners_fast9, Corner};
use imageproc::filter::gaussian_blur_f32;
use imageproc::suppress::local_maxima;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const PATTERN_SEED: u64 = 0x6f72_625f_7061_7474;
const DESCRIPTOR_BITS: usize = 256;
/// Radius of the disc used for the intensity centroid.
const ORIENTATION_RADIUS: i32 = 15;
/// Sampling pairs lie in [-13, 13]²; rotated they stay within 19 px.
const SAMPLE_RADIUS: i32 = 13;
const BORDER: u32 = 20;

#[derive(Debug, Clone, Copy)]
struct ScoredKeypoint {
    x: f32,
    y: f32,
    score: f32,
    descriptor: Descriptor,
}

pub struct OrbExtractor {
    max_features: usize,
    levels: usize,
    scale_factor: f32,
    fast_threshold: u8,
    nms_radius: u32,
    blur_sigma: f32,
    pattern: Vec<[(i32, i32); 2]>,
}

impl OrbExtractor {
    pub fn new() -> Self {
        Self {
            max_features: crate::config::MAX_FEATURES,
            levels: 8,
            scale_factor: 1.2,
            fast_threshold: 20,
            nms_radius: 3,
            blur_sigma: 2.0,
            pattern: sampling_pattern(),
        }
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = max_features.max(1);
        self
    }

    pub fn with_pyramid(mut self, levels: usize, scale_factor: f32) -> Self {
        self.levels = levels.max(1);
        self.scale_factor = if scale_factor > 1.0 { scale_factor } else { 1.2 };
        self
    }

    /// Detect and describe keypoints in an already-decoded grayscale image.
    pub fn extract_gray(&self, gray: &GrayImage) -> Option<FeatureSet> {
        let budgets = self.level_budgets();
        let mut keypoints = Vec::new();
        let mut scale = 1.0f32;

        for (level, budget) in budgets.into_iter().enumerate() {
            if level > 0 {
                scale *= self.scale_factor;
            }
            let width = (gray.width() as f32 / scale).round() as u32;
            let height = (gray.height() as f32 / scale).round() as u32;
            if width < 2 * BORDER + 1 || height < 2 * BORDER + 1 {
                break;
            }

            let level_image = if level == 0 {
                gray.clone()
            } else {
                imageops::resize(gray, width, height, FilterType::Triangle)
            };

            let mut found = self.detect_level(&level_image, budget);
            for kp in &mut found {
                kp.x *= scale;
                kp.y *= scale;
            }
            keypoints.extend(found);
        }

        if keypoints.len() > self.max_features {
            keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
            keypoints.truncate(self.max_features);
        }

        let points = keypoints.iter().map(|kp| [kp.x, kp.y]).collect();
        let descriptors = keypoints.iter().map(|kp| kp.descriptor).collect();
        FeatureSet::new(points, descriptors)
    }

    /// Split the feature budget geometrically across pyramid levels.
    fn level_budgets(&self) -> Vec<usize> {
        let factor = 1.0 / self.scale_factor;
        let mut per_level = self.max_features as f32 * (1.0 - factor)
            / (1.0 - factor.powi(self.levels as i32));

        let mut budgets = Vec::with_capacity(self.levels);
        let mut assigned = 0;
        for _ in 0..self.levels - 1 {
            let n = per_level.round() as usize;
            budgets.push(n);
            assigned += n;
            per_level *= factor;
        }
        budgets.push(self.max_features.saturating_sub(assigned));
        budgets
    }

    fn detect_level(&self, image: &GrayImage, budget: usize) -> Vec<ScoredKeypoint> {
        if budget == 0 {
            return Vec::new();
        }

        let (width, height) = image.dimensions();
        let corners: Vec<Corner> = corners_fast9(image, self.fast_threshold)
            .into_iter()
            .filter(|c| {
                c.x >= BORDER && c.y >= BORDER && c.x < width - BORDER && c.y < height - BORDER
            })
            .collect();

        let mut corners = local_maxima(&corners, self.nms_radius);
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(budget);

        if corners.is_empty() {
            return Vec::new();
        }

        let smoothed = gaussian_blur_f32(image, self.blur_sigma);
        corners
            .iter()
            .map(|corner| {
                let angle = intensity_centroid_angle(image, corner.x as i32, corner.y as i32);
                ScoredKeypoint {
                    x: corner.x as f32,
                    y: corner.y as f32,
                    score: corner.score,
                    descriptor: self.describe(&smoothed, corner.x as i32, corner.y as i32, angle),
                }
            })
            .collect()
    }

    fn describe(&self, smoothed: &GrayImage, x: i32, y: i32, angle: f32) -> Descriptor {
        let (sin, cos) = angle.sin_cos();
        let sample = |(dx, dy): (i32, i32)| -> u8 {
            let rx = (dx as f32 * cos - dy as f32 * sin).round() as i32;
            let ry = (dx as f32 * sin + dy as f32 * cos).round() as i32;
            smoothed.get_pixel((x + rx) as u32, (y + ry) as u32)[0]
        };

        let mut descriptor = [0u8; 32];
        for (bit, [p, q]) in self.pattern.iter().enumerate() {
            if sample(*p) < sample(*q) {
                descriptor[bit / 8] |= 1 << (bit % 8);
            }
        }
        descriptor
    }
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for OrbExtractor {
    fn extract(&self, image_path: &Path) -> Option<FeatureSet> {
        let decoded = ImageReader::open(image_path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(image::ImageError::IoError)
            .and_then(|reader| reader.decode());

        match decoded {
            Ok(img) => self.extract_gray(&img.to_luma8()),
            Err(e) => {
                log::warn!("Could not decode {}: {}", image_path.display(), e);
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "orb"
    }
}

/// Orientation of the patch around (x, y) from its intensity centroid.
fn intensity_centroid_angle(image: &GrayImage, x: i32, y: i32) -> f32 {
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;
    let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;

    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > r2 {
                continue;
            }
            let value = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0] as f32;
            m10 += dx as f32 * value;
            m01 += dy as f32 * value;
        }
    }

    m01.atan2(m10)
}

/// Fixed pseudo-random point pairs. Cached descriptors are only comparable
/// with descriptors built from the same pattern.
fn sampling_pattern() -> Vec<[(i32, i32); 2]> {
    let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
    let point = |rng: &mut StdRng| {
        (
            rng.gen_range(-SAMPLE_RADIUS..=SAMPLE_RADIUS),
            rng.gen_range(-SAMPLE_RADIUS..=SAMPLE_RADIUS),
        )
    };

    (0..DESCRIPTOR_BITS)
        .map(|_| {
            let p = point(&mut rng);
            let mut q = point(&mut rng);
            while q == p {
                q = point(&mut rng);
            }
            [p, q]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{save_textured_image, textured_image};
    use image::Luma;
    use tempfile::TempDir;

    #[test]
    fn test_extracts_features_from_textured_image() {
        let img = textured_image(1, 320, 240);
        let set = OrbExtractor::new().extract_gray(&image::DynamicImage::ImageRgb8(img).to_luma8());

        let set = set.expect("textured image should have keypoints");
        assert!(set.len() >= 40);
        assert!(set.len() <= 2000);
        assert_eq!(set.keypoints().len(), set.descriptors().len());
    }

    #[test]
    fn test_respects_feature_cap() {
        let img = textured_image(2, 320, 240);
        let gray = image::DynamicImage::ImageRgb8(img).to_luma8();
        let set = OrbExtractor::new().with_max_features(25).extract_gray(&gray).unwrap();
        assert!(set.len() <= 25);
    }

    #[test]
    fn test_flat_image_has_no_features() {
        let flat = GrayImage::from_pixel(200, 200, Luma([128u8]));
        assert!(OrbExtractor::new().extract_gray(&flat).is_none());
    }

    #[test]
    fn test_tiny_image_has_no_features() {
        let tiny = GrayImage::from_pixel(16, 16, Luma([10u8]));
        assert!(OrbExtractor::new().extract_gray(&tiny).is_none());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.png");
        save_textured_image(&path, 3);

        let extractor = OrbExtractor::new();
        assert_eq!(extractor.extract(&path), extractor.extract(&path));
    }

    #[test]
    fn test_undecodable_file_yields_none() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();

        assert!(OrbExtractor::new().extract(&path).is_none());
        assert!(OrbExtractor::new().extract(&temp_dir.path().join("missing.png")).is_none());
    }

    #[test]
    fn test_level_budgets_sum_to_cap() {
        let extractor = OrbExtractor::new().with_max_features(2000);
        let budgets = extractor.level_budgets();
        assert_eq!(budgets.len(), 8);
        assert_eq!(budgets.iter().sum::<usize>(), 2000);
        assert!(budgets[0] > budgets[7]);

        let single = OrbExtractor::new().with_pyramid(1, 1.2).with_max_features(500);
        assert_eq!(single.level_budgets(), vec![500]);
    }

    #[test]
    fn test_pattern_stays_inside_border() {
        let max = (SAMPLE_RADIUS as f32 * 2f32.sqrt()).ceil() as u32;
        assert!(max < BORDER);
        assert!((ORIENTATION_RADIUS as u32) < BORDER);
        assert_eq!(sampling_pattern(), sampling_pattern());
    }
}
