//! Robust statistics used by the matcher

/// Scale factor turning a MAD into a standard-deviation estimate for normal data
const MAD_SCALE: f64 = 0.6745;
/// Mean-absolute-deviation scale used when the MAD is zero
const MEAN_AD_SCALE: f64 = 1.253314;

/// First Wasserstein (earth mover's) distance between two weighted 1-D samples.
///
/// Returns 0.0 when either sample is empty or has no positive weight.
pub fn wasserstein(u: &[f64], u_weights: &[f64], v: &[f64], v_weights: &[f64]) -> f64 {
    let u_cdf = match WeightedCdf::new(u, u_weights) {
        Some(cdf) => cdf,
        None => return 0.0,
    };
    let v_cdf = match WeightedCdf::new(v, v_weights) {
        Some(cdf) => cdf,
        None => return 0.0,
    };

    let mut all: Vec<f64> = u.iter().chain(v.iter()).copied().collect();
    all.sort_by(f64::total_cmp);

    all.windows(2)
        .map(|pair| {
            let width = pair[1] - pair[0];
            (u_cdf.at(pair[0]) - v_cdf.at(pair[0])).abs() * width
        })
        .sum()
}

struct WeightedCdf {
    values: Vec<f64>,
    cumulative: Vec<f64>,
    total: f64,
}

impl WeightedCdf {
    fn new(values: &[f64], weights: &[f64]) -> Option<Self> {
        let mut pairs: Vec<(f64, f64)> = values
            .iter()
            .copied()
            .zip(weights.iter().copied())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut running = 0.0;
        let mut cumulative = Vec::with_capacity(pairs.len());
        for (_, weight) in &pairs {
            running += weight;
            cumulative.push(running);
        }

        if pairs.is_empty() || running <= 0.0 {
            return None;
        }
        Some(Self {
            values: pairs.into_iter().map(|(value, _)| value).collect(),
            cumulative,
            total: running,
        })
    }

    /// Fraction of the weight at values <= x
    fn at(&self, x: f64) -> f64 {
        let count = self.values.partition_point(|&v| v <= x);
        if count == 0 {
            0.0
        } else {
            self.cumulative[count - 1] / self.total
        }
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Modified z-score of every value: 0.6745 * (x - median) / MAD.
///
/// With a zero MAD the mean absolute deviation is used instead; if that is
/// zero too, every score is 0.
pub fn modified_z_scores(values: &[f64]) -> Vec<f64> {
    let Some(center) = median(values) else {
        return Vec::new();
    };
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    let mad = median(&deviations).unwrap_or(0.0);

    if mad > 0.0 {
        return values.iter().map(|v| MAD_SCALE * (v - center) / mad).collect();
    }

    let mean_ad = deviations.iter().sum::<f64>() / deviations.len() as f64;
    if mean_ad > 0.0 {
        return values
            .iter()
            .map(|v| (v - center) / (MEAN_AD_SCALE * mean_ad))
            .collect();
    }
    vec![0.0; values.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(n: usize) -> Vec<f64> {
        vec![1.0; n]
    }

    #[test]
    fn test_wasserstein_point_masses() {
        // Moving a unit mass from 0 to 5 costs 5
        let d = wasserstein(&[0.0], &ones(1), &[5.0], &ones(1));
        assert!((d - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_wasserstein_identical_samples() {
        let sample = [1.0, 2.0, 3.0];
        assert_eq!(wasserstein(&sample, &ones(3), &sample, &ones(3)), 0.0);
    }

    #[test]
    fn test_wasserstein_matches_reference() {
        // scipy.stats.wasserstein_distance([0, 1, 3], [5, 6, 8]) == 5.0
        let d = wasserstein(&[0.0, 1.0, 3.0], &ones(3), &[5.0, 6.0, 8.0], &ones(3));
        assert!((d - 5.0).abs() < 1e-9);

        // scipy.stats.wasserstein_distance([50], [3, 2, 1]) == 48.0
        let d = wasserstein(&[50.0], &ones(1), &[3.0, 2.0, 1.0], &ones(3));
        assert!((d - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_wasserstein_empty_is_zero() {
        assert_eq!(wasserstein(&[], &[], &[1.0], &ones(1)), 0.0);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_modified_z_scores_flag_outlier() {
        let scores = modified_z_scores(&[1.0, 2.0, 2.0, 3.0, 50.0]);
        assert!(scores[4] > 3.5);
        assert!(scores[..4].iter().all(|z| z.abs() < 1.0));
    }

    #[test]
    fn test_modified_z_scores_zero_mad() {
        let scores = modified_z_scores(&[2.0, 2.0, 2.0, 9.0]);
        assert!(scores[3] > 0.0);
        assert_eq!(scores[0], 0.0);

        assert_eq!(modified_z_scores(&[4.0, 4.0]), vec![0.0, 0.0]);
    }
}
