//! Planar homography estimation with RANSAC.

use nalgebra::{Matrix3, SMatrix, SVector, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

const SAMPLE_SIZE: usize = 4;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct RansacHomographyConfig {
    /// Maximum forward reprojection error (pixels) for an inlier.
    pub inlier_threshold: f64,
    pub max_iters: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacHomographyConfig {
    fn default() -> Self {
        Self {
            inlier_threshold: crate::config::REPROJECTION_THRESHOLD,
            max_iters: 2000,
            confidence: 0.995,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RansacHomographyResult {
    pub h: Matrix3<f64>,
    pub inliers: Vec<bool>,
    pub n_inliers: usize,
}

/// Fit `dst ~ H · src` robustly. `None` when fewer than four correspondences
/// exist or no non-degenerate model supports at least four of them.
pub fn fit_homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacHomographyConfig,
) -> Option<RansacHomographyResult> {
    let n = src.len().min(dst.len());
    if n < SAMPLE_SIZE {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Matrix3<f64>, usize)> = None;
    let mut needed = config.max_iters;
    let mut iter = 0;

    while iter < needed {
        iter += 1;

        let idx = sample(&mut rng, n, SAMPLE_SIZE).into_vec();
        let s: Vec<[f64; 2]> = idx.iter().map(|&i| src[i]).collect();
        let d: Vec<[f64; 2]> = idx.iter().map(|&i| dst[i]).collect();
        if is_degenerate(&s) || is_degenerate(&d) {
            continue;
        }

        let Some(h) = solve_dlt(&s, &d) else {
            continue;
        };

        let count = count_inliers(&h, &src[..n], &dst[..n], config.inlier_threshold)
            .iter()
            .filter(|&&inlier| inlier)
            .count();

        if best.as_ref().map_or(true, |(_, best_count)| count > *best_count) {
            best = Some((h, count));
            let ratio = count as f64 / n as f64;
            needed = required_iterations(ratio, config.confidence, config.max_iters);
        }
    }

    let (mut h, best_count) = best?;
    if best_count < SAMPLE_SIZE {
        return None;
    }

    // Least-squares refit on the consensus set.
    let mut inliers = count_inliers(&h, &src[..n], &dst[..n], config.inlier_threshold);
    let (in_src, in_dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = (0..n)
        .filter(|&i| inliers[i])
        .map(|i| (src[i], dst[i]))
        .unzip();
    if let Some(refined) = solve_dlt(&in_src, &in_dst) {
        let refined_inliers =
            count_inliers(&refined, &src[..n], &dst[..n], config.inlier_threshold);
        let refined_count = refined_inliers.iter().filter(|&&i| i).count();
        if refined_count >= best_count {
            h = refined;
            inliers = refined_inliers;
        }
    }

    let n_inliers = inliers.iter().filter(|&&i| i).count();
    Some(RansacHomographyResult { h, inliers, n_inliers })
}

/// Mark correspondences whose forward reprojection error is within `threshold`.
pub fn count_inliers(
    h: &Matrix3<f64>,
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    threshold: f64,
) -> Vec<bool> {
    let t2 = threshold * threshold;
    src.iter()
        .zip(dst.iter())
        .map(|(s, d)| match project(h, *s) {
            Some(p) => {
                let dx = p[0] - d[0];
                let dy = p[1] - d[1];
                dx * dx + dy * dy <= t2
            }
            None => false,
        })
        .collect()
}

pub fn project(h: &Matrix3<f64>, point: [f64; 2]) -> Option<[f64; 2]> {
    let v = h * Vector3::new(point[0], point[1], 1.0);
    if v.z.abs() < EPS {
        return None;
    }
    Some([v.x / v.z, v.y / v.z])
}

/// Normalized direct linear transform over any number (≥ 4) of correspondences.
fn solve_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    if src.len() < SAMPLE_SIZE || src.len() != dst.len() {
        return None;
    }

    let (t_src, src_n) = normalize(src)?;
    let (t_dst, dst_n) = normalize(dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src_n.iter().zip(dst_n.iter()) {
        let (x, y, u, v) = (s[0], s[1], d[0], d[1]);
        let r1 = SVector::<f64, 9>::from_row_slice(&[-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u]);
        let r2 = SVector::<f64, 9>::from_row_slice(&[0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]);
        ata += r1 * r1.transpose();
        ata += r2 * r2.transpose();
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let hv = eigen.eigenvectors.column(min_idx);

    let hn = Matrix3::new(hv[0], hv[1], hv[2], hv[3], hv[4], hv[5], hv[6], hv[7], hv[8]);
    let h = t_dst.try_inverse()? * hn * t_src;

    if h[(2, 2)].abs() < EPS {
        return None;
    }
    let h = h / h[(2, 2)];
    h.iter().all(|v| v.is_finite()).then_some(h)
}

/// Translate to the centroid and scale so the mean distance is √2.
fn normalize(points: &[[f64; 2]]) -> Option<(Matrix3<f64>, Vec<[f64; 2]>)> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < EPS {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    Some((t, normalized))
}

/// True when any three of the points are (nearly) collinear.
fn is_degenerate(points: &[[f64; 2]]) -> bool {
    let cross = |a: [f64; 2], b: [f64; 2], c: [f64; 2]| {
        ((b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])).abs()
    };
    for i in 0..points.len() {
        for j in i + 1..points.len() {
            for k in j + 1..points.len() {
                if cross(points[i], points[j], points[k]) < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

fn required_iterations(inlier_ratio: f64, confidence: f64, max_iters: usize) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let denom = (1.0 - inlier_ratio.powi(SAMPLE_SIZE as i32)).ln();
    if inlier_ratio <= 0.0 || denom >= 0.0 {
        return max_iters;
    }
    let k = ((1.0 - confidence).ln() / denom).ceil();
    if k.is_finite() {
        (k as usize).clamp(1, max_iters)
    } else {
        max_iters
    }
}
