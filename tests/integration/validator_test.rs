//! Validator Integration Tests
//!
//! Samples with a known mean and spread, run through the public validator.

use insight_cascade::models::ValidationStatus;
use insight_cascade::services::StatisticalValidator;
use insight_cascade::{AnalysisConfig, Metric};

/// `n` evenly spread values with the given mean and standard deviation.
fn spread(n: usize, mean: f64, sd: f64) -> Vec<f64> {
    let half_width = sd * 3f64.sqrt();
    (0..n)
        .map(|i| mean + half_width * (2.0 * (i as f64 + 0.5) / n as f64 - 1.0))
        .collect()
}

fn validator() -> StatisticalValidator {
    StatisticalValidator::from_config(&AnalysisConfig::default())
}

#[test]
fn test_image_beats_video_on_roas() {
    let image = spread(450, 6.13, 1.2);
    let video = spread(420, 5.35, 1.1);

    let result = validator().validate(&image, &video, Metric::Roas);

    assert_eq!(result.status, ValidationStatus::Validated);
    assert!(result.p_value < 0.05);
    let d = result.effect_size.unwrap();
    assert!(d > 0.5 && d < 0.8, "d = {d}");
    assert_eq!(result.n_a, 450);
    assert_eq!(result.n_b, 420);
    assert!(result.confidence > 0.8);
    assert!(!result.insufficient_data);
}

#[test]
fn test_small_groups_are_inconclusive() {
    let a = spread(10, 9.0, 0.5);
    let b = spread(10, 2.0, 0.5);

    let result = validator().validate(&a, &b, Metric::Roas);

    assert_eq!(result.status, ValidationStatus::Inconclusive);
    assert!(result.insufficient_data);
    assert!(result.confidence <= 0.3 + 1e-12);
}

#[test]
fn test_identical_groups_rejected() {
    let a = spread(40, 2.0, 0.4);
    let b = a.clone();

    let result = validator().validate(&a, &b, Metric::Ctr);

    assert_eq!(result.status, ValidationStatus::Rejected);
    assert!((result.p_value - 1.0).abs() < 1e-9);
}

#[test]
fn test_confidence_orders_by_evidence() {
    let v = validator();
    assert!(v.confidence(0.01, Some(0.5)) > v.confidence(0.2, Some(0.5)));
    assert!(v.confidence(0.01, Some(0.9)) >= v.confidence(0.01, Some(0.4)));
    for p in [0.0, 0.3, 1.0] {
        let c = v.confidence(p, Some(5.0));
        assert!((0.0..=1.0).contains(&c));
    }
}
