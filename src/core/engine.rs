use rand::Rng;

use super::allocation::validate_buckets;
use super::rebalance::{PolicyInput, loss_capped_amount, recommend_rebalance};
use super::returns::sample_bucket_returns;
use super::types::{
    BUCKET_COUNT, Bucket, BucketAllocation, BucketConfig, BucketCostBasis, BucketReturns,
    ConfigError, RebalanceRecommendation, SimulationOptions, SimulationResult, SimulationYear,
    TwoPhaseWithdrawal,
};

#[derive(Debug, Clone)]
pub struct TrialPlan {
    pub initial_allocation: BucketAllocation,
    pub annual_withdrawal: f64,
    pub start_age: u32,
    pub years: u32,
    pub buckets: [BucketConfig; BUCKET_COUNT],
    pub inflation_enabled: bool,
    pub inflation_rate: f64,
    pub avoid_loss_realization: bool,
    pub two_phase: Option<TwoPhaseWithdrawal>,
}

impl TrialPlan {
    pub fn new(
        initial_allocation: BucketAllocation,
        annual_withdrawal: f64,
        start_age: u32,
        years: u32,
        options: &SimulationOptions,
    ) -> Result<Self, ConfigError> {
        let buckets = options.buckets();
        validate_buckets(&buckets)?;
        for (field, value) in [
            ("annualWithdrawal", annual_withdrawal),
            ("inflationRate", options.inflation_rate),
            ("bucket1", initial_allocation.bucket1),
            ("bucket2", initial_allocation.bucket2),
            ("bucket3", initial_allocation.bucket3),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteValue { field });
            }
        }
        for (field, value) in [
            ("bucket1", initial_allocation.bucket1),
            ("bucket2", initial_allocation.bucket2),
            ("bucket3", initial_allocation.bucket3),
        ] {
            if value < 0.0 {
                return Err(ConfigError::NegativeValue { field });
            }
        }
        let two_phase = options.active_two_phase();
        if let Some(tp) = two_phase {
            if !tp.phase1_withdrawal.is_finite() || !tp.phase2_withdrawal.is_finite() {
                return Err(ConfigError::NonFiniteValue {
                    field: "twoPhaseWithdrawal",
                });
            }
        }

        Ok(Self {
            initial_allocation,
            annual_withdrawal,
            start_age,
            years,
            buckets,
            inflation_enabled: options.inflation_enabled,
            inflation_rate: options.inflation_rate,
            avoid_loss_realization: options.avoid_loss_realization,
            two_phase,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialState {
    pub allocation: BucketAllocation,
    pub cost_basis: BucketCostBasis,
    pub withdrawal: f64,
    pub depleted_in: Option<u32>,
}

impl TrialState {
    pub fn initial(plan: &TrialPlan) -> Self {
        let withdrawal = match plan.two_phase {
            Some(tp) => tp.phase1_withdrawal,
            None => plan.annual_withdrawal,
        };
        Self {
            allocation: plan.initial_allocation,
            cost_basis: plan.initial_allocation,
            withdrawal,
            depleted_in: None,
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.depleted_in.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutedTransfer {
    pub allocation: BucketAllocation,
    pub cost_basis: BucketCostBasis,
    pub transferred: f64,
}

pub fn run_trial<R: Rng>(plan: &TrialPlan, rng: &mut R) -> SimulationResult {
    let mut state = TrialState::initial(plan);
    let mut years = Vec::with_capacity(plan.years as usize);

    for year_index in 0..plan.years {
        let returns = sample_bucket_returns(rng, &plan.buckets);
        let (next, snapshot) = advance_year(plan, &state, year_index, returns);
        state = next;
        years.push(snapshot);
    }

    let final_value = years
        .last()
        .map(|y| y.total_value)
        .unwrap_or_else(|| plan.initial_allocation.total().round());

    SimulationResult {
        years,
        final_value,
        ran_out_of_money: state.is_depleted(),
        year_ran_out: state.depleted_in,
    }
}

// `year_index` is zero-based; the snapshot reports it one-based.
pub fn advance_year(
    plan: &TrialPlan,
    state: &TrialState,
    year_index: u32,
    returns: BucketReturns,
) -> (TrialState, SimulationYear) {
    let year = year_index + 1;
    let age = plan.start_age + year;
    let withdrawal = size_withdrawal(plan, state.withdrawal, year_index, age);

    let mut allocation = state.allocation;
    let mut cost_basis = state.cost_basis;
    let mut depleted_in = state.depleted_in;

    if depleted_in.is_none() {
        let grown = apply_returns(allocation, returns);
        match withdraw(grown, cost_basis, withdrawal) {
            Some((after, basis)) => {
                allocation = after;
                cost_basis = basis;
            }
            None => {
                log::trace!("trial depleted in year {year} (age {age})");
                allocation = BucketAllocation::ZERO;
                cost_basis = BucketCostBasis::ZERO;
                depleted_in = Some(year);
            }
        }
    }

    let recommendation = recommend_rebalance(&PolicyInput {
        allocation,
        annual_withdrawal: withdrawal,
        buckets: &plan.buckets,
        cost_basis: plan.avoid_loss_realization.then_some(cost_basis),
        avoid_loss_realization: plan.avoid_loss_realization,
    });

    if depleted_in.is_none() {
        let executed = execute_rebalance(
            allocation,
            cost_basis,
            &recommendation,
            plan.avoid_loss_realization,
        );
        allocation = executed.allocation;
        cost_basis = executed.cost_basis;
    }

    let snapshot = SimulationYear {
        year,
        age,
        buckets: allocation,
        total_value: allocation.total().round(),
        withdrawal: withdrawal.round(),
        returns,
        rebalance_action: recommendation,
        inflation_adjusted_withdrawal: withdrawal.round(),
        cost_basis,
    };
    let next = TrialState {
        allocation,
        cost_basis,
        withdrawal,
        depleted_in,
    };
    (next, snapshot)
}

fn size_withdrawal(plan: &TrialPlan, current: f64, year_index: u32, age: u32) -> f64 {
    if let Some(tp) = plan.two_phase {
        if age == tp.transition_age {
            // Same compounding phase 1 would have accrued since the start year.
            return if plan.inflation_enabled && year_index > 0 {
                tp.phase2_withdrawal * (1.0 + plan.inflation_rate).powi(year_index as i32)
            } else {
                tp.phase2_withdrawal
            };
        }
    }
    if plan.inflation_enabled && year_index > 0 {
        current * (1.0 + plan.inflation_rate)
    } else {
        current
    }
}

pub fn apply_returns(allocation: BucketAllocation, returns: BucketReturns) -> BucketAllocation {
    Bucket::ALL.iter().fold(allocation, |acc, &bucket| {
        let grown = (acc.get(bucket) * (1.0 + returns.get(bucket))).max(0.0);
        acc.with(bucket, grown)
    })
}

pub fn withdraw(
    allocation: BucketAllocation,
    cost_basis: BucketCostBasis,
    amount: f64,
) -> Option<(BucketAllocation, BucketCostBasis)> {
    if amount <= 0.0 {
        return Some((allocation, cost_basis));
    }
    if allocation.total() < amount {
        return None;
    }

    let mut remaining = amount;
    let mut values = allocation;
    let mut basis = cost_basis;
    for bucket in Bucket::ALL {
        if remaining <= 0.0 {
            break;
        }
        let before = values.get(bucket);
        let taken = before.min(remaining);
        let after = (before - taken).max(0.0);
        values = values.with(bucket, after);
        basis = basis.with(bucket, shrink_basis(basis.get(bucket), before, after));
        remaining -= taken;
    }
    Some((values, basis))
}

// The loss cap is checked again against execution-time values.
pub fn execute_rebalance(
    allocation: BucketAllocation,
    cost_basis: BucketCostBasis,
    recommendation: &RebalanceRecommendation,
    avoid_loss_realization: bool,
) -> ExecutedTransfer {
    let unchanged = ExecutedTransfer {
        allocation,
        cost_basis,
        transferred: 0.0,
    };
    let Some((from, to, requested)) = recommendation.transfer() else {
        return unchanged;
    };

    let from_value = allocation.get(from);
    let from_cost = cost_basis.get(from);
    let mut amount = requested.min(from_value).max(0.0);
    if avoid_loss_realization {
        amount = loss_capped_amount(from_value, from_cost, amount);
    }
    if amount <= 0.0 {
        return unchanged;
    }

    let from_after = (from_value - amount).max(0.0);
    let allocation = allocation
        .with(from, from_after)
        .with(to, allocation.get(to) + amount);
    let cost_basis = cost_basis
        .with(from, shrink_basis(from_cost, from_value, from_after))
        .with(to, cost_basis.get(to) + amount);

    ExecutedTransfer {
        allocation,
        cost_basis,
        transferred: amount,
    }
}

fn shrink_basis(basis: f64, value_before: f64, value_after: f64) -> f64 {
    if value_before <= 0.0 {
        return basis.max(0.0);
    }
    // A bucket with no gain or loss must stay exactly at par after a sale.
    if basis == value_before {
        return value_after.max(0.0);
    }
    (basis * (value_after / value_before)).max(0.0)
}
