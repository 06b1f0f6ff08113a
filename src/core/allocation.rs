use super::types::{BUCKET_COUNT, BucketAllocation, BucketConfig, ConfigError, RetirementInput};

pub fn validate_buckets(buckets: &[BucketConfig; BUCKET_COUNT]) -> Result<f64, ConfigError> {
    for (index, bucket) in buckets.iter().enumerate() {
        if !bucket.weight.is_finite() {
            return Err(ConfigError::NonFiniteValue { field: "weight" });
        }
        if bucket.weight < 0.0 {
            return Err(ConfigError::NegativeWeight { index: index + 1 });
        }
        if !bucket.expected_return.is_finite() {
            return Err(ConfigError::NonFiniteValue {
                field: "expectedReturn",
            });
        }
        if !bucket.volatility.is_finite() {
            return Err(ConfigError::NonFiniteValue { field: "volatility" });
        }
        if bucket.volatility < 0.0 {
            return Err(ConfigError::NegativeVolatility { index: index + 1 });
        }
    }

    let total_weight: f64 = buckets.iter().map(|b| b.weight).sum();
    if total_weight <= 0.0 {
        return Err(ConfigError::ZeroTotalWeight);
    }
    Ok(total_weight)
}

/// Bucket 3 takes the rounding remainder so the parts add back to `capital`.
pub fn initial_allocation(
    capital: f64,
    buckets: &[BucketConfig; BUCKET_COUNT],
) -> Result<BucketAllocation, ConfigError> {
    if !capital.is_finite() {
        return Err(ConfigError::NonFiniteValue {
            field: "totalCapital",
        });
    }
    if capital < 0.0 {
        return Err(ConfigError::NegativeValue {
            field: "totalCapital",
        });
    }
    let total_weight = validate_buckets(buckets)?;

    // Both shares may round up; bucket 3 must never be left negative.
    let bucket1 = (capital * (buckets[0].weight / total_weight)).round().min(capital);
    let bucket2 = (capital * (buckets[1].weight / total_weight))
        .round()
        .min(capital - bucket1);
    let bucket3 = capital - bucket1 - bucket2;

    Ok(BucketAllocation::new(bucket1, bucket2, bucket3))
}

pub fn withdrawal_rate(input: &RetirementInput) -> f64 {
    if input.total_capital <= 0.0 {
        return f64::INFINITY;
    }
    input.annual_withdrawal / input.total_capital * 100.0
}

pub fn years_of_coverage(input: &RetirementInput) -> f64 {
    coverage_years(input.total_capital, input.annual_withdrawal).floor()
}

pub fn coverage_years(value: f64, annual_withdrawal: f64) -> f64 {
    if annual_withdrawal <= 0.0 {
        return f64::INFINITY;
    }
    value / annual_withdrawal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::default_bucket_configs;
    use proptest::prelude::{prop_assert, prop_assert_eq, prop_assume, proptest};

    fn weighted(w1: f64, w2: f64, w3: f64) -> [BucketConfig; BUCKET_COUNT] {
        let mut buckets = default_bucket_configs();
        buckets[0].weight = w1;
        buckets[1].weight = w2;
        buckets[2].weight = w3;
        buckets
    }

    #[test]
    fn default_weights_split_half_million_exactly() {
        let allocation = initial_allocation(500_000.0, &weighted(15.0, 35.0, 50.0)).unwrap();
        assert_eq!(allocation.bucket1, 75_000.0);
        assert_eq!(allocation.bucket2, 175_000.0);
        assert_eq!(allocation.bucket3, 250_000.0);
    }

    #[test]
    fn weights_are_normalized_when_not_summing_to_100() {
        let allocation = initial_allocation(90_000.0, &weighted(1.0, 1.0, 1.0)).unwrap();
        assert_eq!(allocation.bucket1, 30_000.0);
        assert_eq!(allocation.bucket2, 30_000.0);
        assert_eq!(allocation.bucket3, 30_000.0);
    }

    #[test]
    fn bucket3_absorbs_rounding_remainder() {
        let allocation = initial_allocation(100_001.0, &weighted(1.0, 1.0, 1.0)).unwrap();
        assert_eq!(allocation.bucket1, 33_334.0);
        assert_eq!(allocation.bucket2, 33_334.0);
        assert_eq!(allocation.bucket3, 33_333.0);
        assert_eq!(allocation.total(), 100_001.0);
    }

    #[test]
    fn near_even_split_never_exceeds_capital() {
        let allocation = initial_allocation(500_001.0, &weighted(50.0, 50.0, 0.0)).unwrap();
        assert_eq!(allocation.bucket1, 250_001.0);
        assert_eq!(allocation.bucket2, 250_000.0);
        assert_eq!(allocation.bucket3, 0.0);
        assert_eq!(allocation.total(), 500_001.0);
    }

    #[test]
    fn fractional_capital_is_not_rounded_past_itself() {
        let allocation = initial_allocation(0.6, &weighted(100.0, 0.0, 0.0)).unwrap();
        assert_eq!(allocation.bucket1, 0.6);
        assert_eq!(allocation.bucket2, 0.0);
        assert_eq!(allocation.bucket3, 0.0);
    }

    #[test]
    fn negative_capital_is_rejected() {
        let err = initial_allocation(-1_000.0, &weighted(15.0, 35.0, 50.0)).unwrap_err();
        assert_eq!(
            err,
            ConfigError::NegativeValue {
                field: "totalCapital"
            }
        );
    }

    #[test]
    fn zero_total_weight_is_rejected() {
        let err = initial_allocation(100_000.0, &weighted(0.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroTotalWeight);
    }

    #[test]
    fn negative_weight_is_rejected() {
        let err = initial_allocation(100_000.0, &weighted(-5.0, 50.0, 55.0)).unwrap_err();
        assert_eq!(err, ConfigError::NegativeWeight { index: 1 });
    }

    #[test]
    fn zero_withdrawal_has_infinite_coverage() {
        let input = RetirementInput {
            total_capital: 500_000.0,
            age: 65,
            annual_withdrawal: 0.0,
            life_expectancy: Some(95),
        };
        assert!(years_of_coverage(&input).is_infinite());
        assert_eq!(withdrawal_rate(&input), 0.0);
    }

    #[test]
    fn coverage_and_rate_match_hand_calculation() {
        let input = RetirementInput {
            total_capital: 500_000.0,
            age: 65,
            annual_withdrawal: 24_000.0,
            life_expectancy: None,
        };
        assert_eq!(years_of_coverage(&input), 20.0);
        assert!((withdrawal_rate(&input) - 4.8).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_allocation_sums_to_capital(
            capital in 0u64..50_000_000,
            w1 in 0u32..100,
            w2 in 0u32..100,
            w3 in 0u32..100,
        ) {
            prop_assume!(w1 + w2 + w3 > 0);
            let capital = capital as f64;
            let allocation = initial_allocation(
                capital,
                &weighted(w1 as f64, w2 as f64, w3 as f64),
            ).unwrap();
            prop_assert!(allocation.bucket1 >= 0.0);
            prop_assert!(allocation.bucket2 >= 0.0);
            prop_assert!(allocation.bucket3 >= 0.0);
            prop_assert_eq!(allocation.total(), capital);
        }
    }
}
