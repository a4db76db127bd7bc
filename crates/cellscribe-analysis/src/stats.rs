use serde::{Deserialize, Serialize};
use std::fmt;

/// Six-number summary plus standard deviation of one numeric vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveSummary {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub mean: f64,
    pub q3: f64,
    pub max: f64,
    pub sd: f64,
}

impl DescriptiveSummary {
    /// Summarise the finite values of `values`; `None` when there are none.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let sd = if sorted.len() > 1 {
            (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };

        Some(Self {
            min: sorted[0],
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            mean,
            q3: quantile(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
            sd,
        })
    }
}

/// Linear-interpolation quantile of sorted data (R's default type 7)
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

impl fmt::Display for DescriptiveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} / {:.2} / {:.2} / {:.2} / {:.2} / {:.2} / {:.2}",
            self.min, self.q1, self.median, self.mean, self.q3, self.max, self.sd
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quartiles_match_type7() {
        let summary = DescriptiveSummary::from_values(&[4.0, 1.0, 3.0, 2.0, 5.0]).unwrap();
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.q1, 2.0);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.q3, 4.0);
        assert_eq!(summary.max, 5.0);
        assert!((summary.sd - 1.5811).abs() < 1e-3);

        let even = DescriptiveSummary::from_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(even.median, 2.5);
        assert_eq!(even.q1, 1.75);
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        assert!(DescriptiveSummary::from_values(&[]).is_none());
        assert!(DescriptiveSummary::from_values(&[f64::NAN]).is_none());

        let summary = DescriptiveSummary::from_values(&[f64::NAN, 7.0]).unwrap();
        assert_eq!(summary.mean, 7.0);
        assert_eq!(summary.sd, 0.0);
    }

    #[test]
    fn test_display_order() {
        let summary = DescriptiveSummary::from_values(&[1.0, 3.0]).unwrap();
        assert_eq!(summary.to_string(), "1.00 / 1.50 / 2.00 / 2.00 / 2.50 / 3.00 / 1.41");
    }
}
