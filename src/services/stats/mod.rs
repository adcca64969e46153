//! Statistics
//!
//! Descriptive sample statistics and the two-sample hypothesis validator.

pub mod validator;

pub use validator::{interpret_effect, StatisticalValidator, ValidationThresholds};

/// Mean and spread of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub n: usize,
    pub mean: f64,
    /// Unbiased (n - 1) variance; zero for fewer than two observations.
    pub variance: f64,
}

impl SampleStats {
    pub fn of(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                n,
                mean: 0.0,
                variance: 0.0,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)
        } else {
            0.0
        };
        Self { n, mean, variance }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Population mean and standard deviation, for comparing segments of a
/// dimension against each other.
pub fn population_mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
