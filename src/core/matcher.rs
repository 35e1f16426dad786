use crate::core::features::Descriptor;

/// A query descriptor paired with its nearest train descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Brute-force two nearest neighbours in `train` for every descriptor in
/// `query`. Queries get no entry when `train` has fewer than two descriptors.
pub fn knn2(query: &[Descriptor], train: &[Descriptor]) -> Vec<[DescriptorMatch; 2]> {
    if train.len() < 2 {
        return Vec::new();
    }

    query
        .iter()
        .enumerate()
        .map(|(qi, q)| {
            let mut best = DescriptorMatch { query: qi, train: 0, distance: u32::MAX };
            let mut second = best;

            for (ti, t) in train.iter().enumerate() {
                let distance = hamming_distance(q, t);
                if distance < best.distance {
                    second = best;
                    best = DescriptorMatch { query: qi, train: ti, distance };
                } else if distance < second.distance {
                    second = DescriptorMatch { query: qi, train: ti, distance };
                }
            }

            [best, second]
        })
        .collect()
}

/// Keep a match only when its nearest distance is below `ratio` times the
/// second-nearest distance.
pub fn ratio_test(query: &[Descriptor], train: &[Descriptor], ratio: f32) -> Vec<DescriptorMatch> {
    knn2(query, train)
        .into_iter()
        .filter(|[best, second]| (best.distance as f32) < ratio * second.distance as f32)
        .map(|[best, _]| best)
        .collect()
}
