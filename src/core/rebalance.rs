use super::allocation::coverage_years;
use super::types::{
    BUCKET_COUNT, Bucket, BucketAllocation, BucketConfig, BucketCostBasis, RebalanceAction,
    RebalanceRecommendation, Urgency,
};

pub fn would_realize_loss(current_value: f64, cost_basis: f64) -> bool {
    cost_basis > 0.0 && current_value / cost_basis < 1.0
}

pub fn max_gain_sell_amount(current_value: f64, cost_basis: f64) -> f64 {
    (current_value - cost_basis).max(0.0)
}

pub fn loss_capped_amount(current_value: f64, cost_basis: f64, amount: f64) -> f64 {
    if would_realize_loss(current_value, cost_basis) {
        amount.min(max_gain_sell_amount(current_value, cost_basis))
    } else {
        amount
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyInput<'a> {
    pub allocation: BucketAllocation,
    pub annual_withdrawal: f64,
    pub buckets: &'a [BucketConfig; BUCKET_COUNT],
    pub cost_basis: Option<BucketCostBasis>,
    pub avoid_loss_realization: bool,
}

impl PolicyInput<'_> {
    fn years(&self, bucket: Bucket) -> f64 {
        coverage_years(self.allocation.get(bucket), self.annual_withdrawal)
    }

    fn name(&self, bucket: Bucket) -> &str {
        &self.buckets[bucket.index()].name
    }

    fn adjusted_amount(&self, from: Bucket, requested: f64) -> (f64, bool) {
        let Some(cost_basis) = self.cost_basis.filter(|_| self.avoid_loss_realization) else {
            return (requested, false);
        };

        let value = self.allocation.get(from);
        let cost = cost_basis.get(from);
        if !would_realize_loss(value, cost) {
            return (requested, false);
        }

        let max_gain = max_gain_sell_amount(value, cost);
        if max_gain < self.annual_withdrawal * 0.5 {
            return (0.0, true);
        }
        (requested.min(max_gain.round()), true)
    }
}

#[derive(Debug, Clone, Copy)]
struct Source {
    bucket: Bucket,
    min_years: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Exhausted {
    ReduceWithdrawal,
    HoldIfBlocked,
    FallThrough,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    target: Bucket,
    below_years: f64,
    sources: &'static [Source],
    refill_years: f64,
    action: RebalanceAction,
    urgency: Urgency,
    exhausted: Exhausted,
}

const RULES: [Rule; 3] = [
    Rule {
        target: Bucket::One,
        below_years: 1.5,
        sources: &[
            Source {
                bucket: Bucket::Three,
                min_years: 1.0,
            },
            Source {
                bucket: Bucket::Two,
                min_years: 1.0,
            },
        ],
        refill_years: 1.5,
        action: RebalanceAction::RefillBucket1,
        urgency: Urgency::High,
        exhausted: Exhausted::ReduceWithdrawal,
    },
    Rule {
        target: Bucket::One,
        below_years: 2.5,
        sources: &[Source {
            bucket: Bucket::Three,
            min_years: 2.0,
        }],
        refill_years: 1.0,
        action: RebalanceAction::RefillBucket1,
        urgency: Urgency::Medium,
        exhausted: Exhausted::HoldIfBlocked,
    },
    Rule {
        target: Bucket::Two,
        below_years: 3.0,
        sources: &[Source {
            bucket: Bucket::Three,
            min_years: 3.0,
        }],
        refill_years: 2.0,
        action: RebalanceAction::RefillBucket2,
        urgency: Urgency::Low,
        exhausted: Exhausted::FallThrough,
    },
];

// First rule with an outcome wins.
pub fn recommend_rebalance(input: &PolicyInput<'_>) -> RebalanceRecommendation {
    let mut avoided_any = false;

    for rule in &RULES {
        if input.years(rule.target) >= rule.below_years {
            continue;
        }

        let mut blocked = false;
        for source in rule.sources {
            if input.years(source.bucket) <= source.min_years {
                continue;
            }
            let requested = (input.annual_withdrawal * rule.refill_years).round();
            let (amount, avoided_loss) = input.adjusted_amount(source.bucket, requested);
            if amount > 0.0 {
                return RebalanceRecommendation {
                    action: rule.action,
                    from_bucket: Some(source.bucket),
                    to_bucket: Some(rule.target),
                    amount: Some(amount),
                    description: refill_description(input, rule, source.bucket, avoided_loss),
                    urgency: rule.urgency,
                    avoided_loss,
                };
            }
            blocked |= avoided_loss;
        }
        avoided_any |= blocked;

        match rule.exhausted {
            Exhausted::ReduceWithdrawal => {
                return RebalanceRecommendation {
                    action: RebalanceAction::ReduceWithdrawal,
                    from_bucket: None,
                    to_bucket: None,
                    amount: None,
                    description: if blocked {
                        "Capital critically low and every refill source is below cost basis. \
                         Reduce the withdrawal instead of realizing losses."
                            .to_string()
                    } else {
                        "Capital critically low and no bucket can fund a refill. \
                         Reduce the withdrawal."
                            .to_string()
                    },
                    urgency: Urgency::High,
                    avoided_loss: blocked,
                };
            }
            Exhausted::HoldIfBlocked if blocked => {
                return hold(
                    format!(
                        "Bucket 1 ({}) is running low, but a transfer would realize losses. Wait.",
                        input.name(Bucket::One)
                    ),
                    true,
                );
            }
            Exhausted::HoldIfBlocked | Exhausted::FallThrough => {}
        }
    }

    hold(
        "All buckets are adequately funded. No transfer needed.".to_string(),
        avoided_any,
    )
}

fn hold(description: String, avoided_loss: bool) -> RebalanceRecommendation {
    RebalanceRecommendation {
        action: RebalanceAction::None,
        from_bucket: None,
        to_bucket: None,
        amount: None,
        description,
        urgency: Urgency::Low,
        avoided_loss,
    }
}

fn refill_description(
    input: &PolicyInput<'_>,
    rule: &Rule,
    from: Bucket,
    avoided_loss: bool,
) -> String {
    let target = rule.target.number();
    let target_name = input.name(rule.target);
    let source = from.number();
    let source_name = input.name(from);
    match (rule.urgency, avoided_loss) {
        (Urgency::High, false) => format!(
            "Bucket {target} ({target_name}) critically low. Move funds from bucket {source} ({source_name})."
        ),
        (Urgency::High, true) => format!(
            "Bucket {target} critically low. Partial move from bucket {source} ({source_name}), gains only."
        ),
        (_, false) => format!(
            "Top up bucket {target} ({target_name}) from bucket {source} ({source_name})."
        ),
        (_, true) => format!(
            "Top up bucket {target} ({target_name}) with gains only from bucket {source} ({source_name})."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::default_bucket_configs;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    fn policy(
        allocation: BucketAllocation,
        withdrawal: f64,
        cost_basis: Option<BucketCostBasis>,
        avoid: bool,
        buckets: &[BucketConfig; BUCKET_COUNT],
    ) -> RebalanceRecommendation {
        recommend_rebalance(&PolicyInput {
            allocation,
            annual_withdrawal: withdrawal,
            buckets,
            cost_basis,
            avoid_loss_realization: avoid,
        })
    }

    #[test]
    fn well_funded_bucket1_needs_no_action() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(75_000.0, 175_000.0, 250_000.0);
        assert_eq!(allocation.bucket1 / 24_000.0, 3.125);
        let rec = policy(allocation, 24_000.0, None, false, &buckets);
        assert_eq!(rec.action, RebalanceAction::None);
        assert!(!rec.avoided_loss);
        assert!(rec.transfer().is_none());
    }

    #[test]
    fn urgent_refill_moves_one_and_a_half_years_from_bucket3() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(20_000.0, 0.0, 100_000.0);
        let rec = policy(allocation, 24_000.0, None, false, &buckets);
        assert_eq!(rec.action, RebalanceAction::RefillBucket1);
        assert_eq!(rec.urgency, Urgency::High);
        assert_eq!(rec.transfer(), Some((Bucket::Three, Bucket::One, 36_000.0)));
    }

    #[test]
    fn urgent_refill_falls_back_to_bucket2() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(10_000.0, 50_000.0, 20_000.0);
        let rec = policy(allocation, 24_000.0, None, false, &buckets);
        assert_eq!(rec.transfer(), Some((Bucket::Two, Bucket::One, 36_000.0)));
    }

    #[test]
    fn urgent_without_sources_reduces_withdrawal() {
        let buckets = default_bucket_configs();
        let rec = policy(BucketAllocation::ZERO, 24_000.0, None, false, &buckets);
        assert_eq!(rec.action, RebalanceAction::ReduceWithdrawal);
        assert_eq!(rec.urgency, Urgency::High);
        assert!(!rec.avoided_loss);
        assert!(rec.transfer().is_none());
    }

    #[test]
    fn urgent_with_underwater_sources_reduces_withdrawal_and_flags_avoided_loss() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(20_000.0, 40_000.0, 100_000.0);
        let cost = BucketCostBasis::new(20_000.0, 50_000.0, 120_000.0);
        let rec = policy(allocation, 24_000.0, Some(cost), true, &buckets);
        assert_eq!(rec.action, RebalanceAction::ReduceWithdrawal);
        assert!(rec.avoided_loss);
    }

    #[test]
    fn urgent_skips_underwater_bucket3_and_uses_bucket2() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(20_000.0, 60_000.0, 100_000.0);
        let cost = BucketCostBasis::new(20_000.0, 50_000.0, 120_000.0);
        let rec = policy(allocation, 24_000.0, Some(cost), true, &buckets);
        assert_eq!(rec.transfer(), Some((Bucket::Two, Bucket::One, 36_000.0)));
        assert!(!rec.avoided_loss);
    }

    #[test]
    fn loss_avoidance_is_ignored_when_disabled() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(20_000.0, 0.0, 100_000.0);
        let cost = BucketCostBasis::new(20_000.0, 0.0, 200_000.0);
        let rec = policy(allocation, 24_000.0, Some(cost), false, &buckets);
        assert_eq!(rec.transfer(), Some((Bucket::Three, Bucket::One, 36_000.0)));
    }

    #[test]
    fn medium_refill_moves_one_year() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(48_000.0, 200_000.0, 100_000.0);
        let rec = policy(allocation, 24_000.0, None, true, &buckets);
        assert_eq!(rec.urgency, Urgency::Medium);
        assert_eq!(rec.transfer(), Some((Bucket::Three, Bucket::One, 24_000.0)));
    }

    #[test]
    fn medium_refill_blocked_by_loss_holds() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(48_000.0, 200_000.0, 100_000.0);
        let cost = BucketCostBasis::new(48_000.0, 200_000.0, 110_000.0);
        let rec = policy(allocation, 24_000.0, Some(cost), true, &buckets);
        assert_eq!(rec.action, RebalanceAction::None);
        assert!(rec.avoided_loss);
    }

    #[test]
    fn low_urgency_refills_bucket2_with_two_years() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(72_000.0, 48_000.0, 300_000.0);
        let rec = policy(allocation, 24_000.0, None, true, &buckets);
        assert_eq!(rec.action, RebalanceAction::RefillBucket2);
        assert_eq!(rec.urgency, Urgency::Low);
        assert_eq!(rec.transfer(), Some((Bucket::Three, Bucket::Two, 48_000.0)));
    }

    #[test]
    fn low_urgency_blocked_falls_back_to_none_with_flag() {
        let buckets = default_bucket_configs();
        let allocation = BucketAllocation::new(72_000.0, 48_000.0, 300_000.0);
        let cost = BucketCostBasis::new(72_000.0, 48_000.0, 350_000.0);
        let rec = policy(allocation, 24_000.0, Some(cost), true, &buckets);
        assert_eq!(rec.action, RebalanceAction::None);
        assert!(rec.avoided_loss);
    }

    #[test]
    fn zero_withdrawal_is_always_covered() {
        let buckets = default_bucket_configs();
        let rec = policy(BucketAllocation::ZERO, 0.0, None, true, &buckets);
        assert_eq!(rec.action, RebalanceAction::None);
    }

    #[test]
    fn loss_cap_limits_to_gain_portion() {
        assert_eq!(loss_capped_amount(80.0, 100.0, 50.0), 0.0);
        assert_eq!(loss_capped_amount(120.0, 100.0, 50.0), 50.0);
        assert_eq!(loss_capped_amount(100.0, 0.0, 50.0), 50.0);
    }

    proptest! {
        #[test]
        fn prop_would_realize_loss_matches_ratio(value in 0.0f64..1e7, cost in -1e3f64..1e7) {
            let expected = cost > 0.0 && value / cost < 1.0;
            prop_assert_eq!(would_realize_loss(value, cost), expected);
        }

        #[test]
        fn prop_max_gain_is_positive_part_of_gain(value in 0.0f64..1e7, cost in 0.0f64..1e7) {
            prop_assert_eq!(max_gain_sell_amount(value, cost), (value - cost).max(0.0));
        }

        #[test]
        fn prop_recommended_transfers_are_positive_and_from_funded_buckets(
            b1 in 0.0f64..500_000.0,
            b2 in 0.0f64..500_000.0,
            b3 in 0.0f64..500_000.0,
            c3 in 0.0f64..600_000.0,
            withdrawal in 1.0f64..80_000.0,
            avoid in proptest::bool::ANY,
        ) {
            let buckets = default_bucket_configs();
            let allocation = BucketAllocation::new(b1, b2, b3);
            let cost = BucketCostBasis::new(b1, b2, c3);
            let rec = policy(allocation, withdrawal, Some(cost), avoid, &buckets);
            if let Some((from, to, amount)) = rec.transfer() {
                prop_assert!(amount > 0.0);
                prop_assert!(from != to);
                prop_assert!(allocation.get(from) > withdrawal);
            }
        }
    }
}
