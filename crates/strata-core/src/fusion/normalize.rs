//! Per-column score normalization.
//!
//! Vector scores (cosine, bounded) and lexical scores (BM25, unbounded) live
//! on incomparable scales. Each column is rescaled on its own, using only the
//! statistics of the current query's candidates.
//!
//! | Method    | Output                         | Degenerate column      |
//! |-----------|--------------------------------|------------------------|
//! | `none`    | input unchanged                | n/a                    |
//! | `min-max` | `(v - min) / (max - min)`      | every value becomes 1  |
//! | `z-score` | `(v - mean) / population_std`  | every value becomes 0  |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rescaling strategy applied to each score column before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Leave raw scores as they are.
    None,
    /// Rescale onto `[0, 1]`. The only method the SQLite store fuses natively.
    #[default]
    MinMax,
    /// Standardize to zero mean and unit population variance.
    ZScore,
}

impl Normalization {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MinMax => "min-max",
            Self::ZScore => "z-score",
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "min-max" | "minmax" | "min_max" => Ok(Self::MinMax),
            "z-score" | "zscore" | "z_score" => Ok(Self::ZScore),
            other => Err(format!(
                "unknown normalization '{other}' (expected min-max, z-score or none)"
            )),
        }
    }
}

/// Normalize `values` with `method`, preserving length and order.
#[must_use]
pub fn normalize(values: &[f64], method: Normalization) -> Vec<f64> {
    match method {
        Normalization::None => values.to_vec(),
        Normalization::MinMax => min_max(values),
        Normalization::ZScore => z_score(values),
    }
}

// Exact equality, matching the store-side `max = min` check.
#[allow(clippy::float_cmp)]
fn min_max(values: &[f64]) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if hi == lo {
        return vec![1.0; values.len()];
    }

    let range = hi - lo;
    values.iter().map(|&v| (v - lo) / range).collect()
}

#[allow(clippy::cast_precision_loss, clippy::float_cmp)]
fn z_score(values: &[f64]) -> Vec<f64> {
    let Some(&first) = values.first() else {
        return Vec::new();
    };

    // A constant column can still leave a rounding residue in the mean.
    if values.iter().all(|&v| v == first) {
        return vec![0.0; values.len()];
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return vec![0.0; values.len()];
    }

    values.iter().map(|v| (v - mean) / std_dev).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx_eq(left: f64, right: f64) {
        assert!(
            (left - right).abs() < 1e-12,
            "expected {right}, got {left}"
        );
    }

    #[test]
    fn none_is_identity() {
        let values = [3.5, -1.0, 0.0];
        assert_eq!(normalize(&values, Normalization::None), values.to_vec());
    }

    #[test]
    fn min_max_rescales_to_unit_interval() {
        let normalized = normalize(&[3.0, 1.0, 5.0], Normalization::MinMax);
        assert_eq!(normalized.len(), 3);
        assert_approx_eq(normalized[0], 0.5);
        assert_approx_eq(normalized[1], 0.0);
        assert_approx_eq(normalized[2], 1.0);
    }

    #[test]
    fn min_max_constant_column_is_all_ones() {
        assert_eq!(
            normalize(&[2.0, 2.0, 2.0], Normalization::MinMax),
            vec![1.0, 1.0, 1.0]
        );
    }

    #[test]
    fn min_max_singleton_is_one() {
        assert_eq!(normalize(&[0.42], Normalization::MinMax), vec![1.0]);
    }

    #[test]
    fn min_max_handles_negative_cosine() {
        let normalized = normalize(&[-1.0, 0.0, 1.0], Normalization::MinMax);
        assert_eq!(normalized, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn z_score_uses_population_std_dev() {
        // mean 5, population variance 4 → std 2
        let normalized = normalize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], Normalization::ZScore);
        assert_approx_eq(normalized[0], -1.5);
        assert_approx_eq(normalized[4], 0.0);
        assert_approx_eq(normalized[7], 2.0);
    }

    #[test]
    fn z_score_constant_column_is_all_zeroes() {
        assert_eq!(
            normalize(&[7.0, 7.0], Normalization::ZScore),
            vec![0.0, 0.0]
        );
        assert_eq!(normalize(&[7.0], Normalization::ZScore), vec![0.0]);
        assert_eq!(
            normalize(&[0.1, 0.1, 0.1], Normalization::ZScore),
            vec![0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn empty_input_is_empty_for_every_method() {
        for method in [
            Normalization::None,
            Normalization::MinMax,
            Normalization::ZScore,
        ] {
            assert!(normalize(&[], method).is_empty(), "{method}");
        }
    }

    #[test]
    fn parses_and_displays_method_names() {
        assert_eq!("min-max".parse::<Normalization>(), Ok(Normalization::MinMax));
        assert_eq!("Z-Score".parse::<Normalization>(), Ok(Normalization::ZScore));
        assert_eq!("none".parse::<Normalization>(), Ok(Normalization::None));
        assert!("rrf".parse::<Normalization>().is_err());
        assert_eq!(Normalization::ZScore.to_string(), "z-score");
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&Normalization::MinMax).expect("serialize");
        assert_eq!(json, "\"min-max\"");
        let parsed: Normalization = serde_json::from_str("\"z-score\"").expect("deserialize");
        assert_eq!(parsed, Normalization::ZScore);
    }
}
