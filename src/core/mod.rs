mod allocation;
mod engine;
mod monte_carlo;
mod rebalance;
mod returns;
mod solver;
mod types;

pub use allocation::{
    coverage_years, initial_allocation, validate_buckets, withdrawal_rate, years_of_coverage,
};
pub use engine::{
    ExecutedTransfer, TrialPlan, TrialState, advance_year, apply_returns, execute_rebalance,
    run_trial, withdraw,
};
pub use monte_carlo::{generate_scenarios, run_monte_carlo};
pub use rebalance::{
    PolicyInput, max_gain_sell_amount, recommend_rebalance, would_realize_loss,
};
pub use returns::{derive_seed, sample_bucket_returns, standard_normal, trial_rng};
pub use solver::{
    CalculationMode, CapitalSolution, DEFAULT_DIVERGENCE_TOLERANCE, DEFAULT_TARGET_SUCCESS_RATE,
    ModelDivergence, ReverseCalculationResult, WithdrawalSolution, estimate_success_rate,
    heuristic_success_rate, optimal_withdrawal, required_capital, reverse_calculate,
};
pub use types::{
    BUCKET_COUNT, Bucket, BucketAllocation, BucketConfig, BucketCostBasis, BucketReturns,
    BucketValues, ConfigError, DEFAULT_INFLATION_RATE, DEFAULT_LIFE_EXPECTANCY,
    DEFAULT_SCENARIO_COUNT, DEFAULT_SIMULATIONS, MonteCarloConfig, MonteCarloOutcome,
    MonteCarloSummary, Percentiles, RebalanceAction, RebalanceRecommendation, RetirementInput,
    SimulationOptions, SimulationResult, SimulationYear, TwoPhaseWithdrawal, Urgency,
    default_bucket_configs,
};
