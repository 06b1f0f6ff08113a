use serde::Serialize;
use thiserror::Error;

pub const BUCKET_COUNT: usize = 3;
pub const DEFAULT_SIMULATIONS: u32 = 1_000;
pub const DEFAULT_INFLATION_RATE: f64 = 0.02;
pub const DEFAULT_LIFE_EXPECTANCY: u32 = 95;
pub const DEFAULT_SCENARIO_COUNT: u32 = 5;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(into = "u8")]
pub enum Bucket {
    One,
    Two,
    Three,
}

impl Bucket {
    pub const ALL: [Bucket; BUCKET_COUNT] = [Bucket::One, Bucket::Two, Bucket::Three];

    pub fn index(self) -> usize {
        match self {
            Bucket::One => 0,
            Bucket::Two => 1,
            Bucket::Three => 2,
        }
    }

    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl From<Bucket> for u8 {
    fn from(value: Bucket) -> Self {
        value.number()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketConfig {
    pub name: String,
    pub weight: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub color: String,
}

impl BucketConfig {
    pub fn new(name: &str, weight: f64, expected_return: f64, volatility: f64, color: &str) -> Self {
        Self {
            name: name.to_string(),
            weight,
            expected_return,
            volatility,
            color: color.to_string(),
        }
    }
}

pub fn default_bucket_configs() -> [BucketConfig; BUCKET_COUNT] {
    [
        BucketConfig::new("Liquidity", 15.0, 0.02, 0.005, "#22c55e"),
        BucketConfig::new("Bonds", 35.0, 0.04, 0.06, "#3b82f6"),
        BucketConfig::new("Equities", 50.0, 0.07, 0.18, "#8b5cf6"),
    ]
}

// Live bucket values and their cost basis share one shape.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketValues {
    pub bucket1: f64,
    pub bucket2: f64,
    pub bucket3: f64,
}

pub type BucketAllocation = BucketValues;
pub type BucketCostBasis = BucketValues;

impl BucketValues {
    pub const ZERO: BucketValues = BucketValues {
        bucket1: 0.0,
        bucket2: 0.0,
        bucket3: 0.0,
    };

    pub fn new(bucket1: f64, bucket2: f64, bucket3: f64) -> Self {
        Self {
            bucket1,
            bucket2,
            bucket3,
        }
    }

    pub fn get(self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::One => self.bucket1,
            Bucket::Two => self.bucket2,
            Bucket::Three => self.bucket3,
        }
    }

    pub fn with(self, bucket: Bucket, value: f64) -> Self {
        let mut next = self;
        match bucket {
            Bucket::One => next.bucket1 = value,
            Bucket::Two => next.bucket2 = value,
            Bucket::Three => next.bucket3 = value,
        }
        next
    }

    pub fn total(self) -> f64 {
        self.bucket1 + self.bucket2 + self.bucket3
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetirementInput {
    pub total_capital: f64,
    pub age: u32,
    pub annual_withdrawal: f64,
    pub life_expectancy: Option<u32>,
}

impl RetirementInput {
    pub fn life_expectancy_or_default(&self) -> u32 {
        self.life_expectancy.unwrap_or(DEFAULT_LIFE_EXPECTANCY)
    }

    pub fn horizon_years(&self) -> Result<u32, ConfigError> {
        let life_expectancy = self.life_expectancy_or_default();
        if life_expectancy < self.age {
            return Err(ConfigError::InvalidHorizon {
                age: self.age,
                life_expectancy,
            });
        }
        Ok(life_expectancy - self.age)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoPhaseWithdrawal {
    pub enabled: bool,
    pub phase1_withdrawal: f64,
    pub transition_age: u32,
    pub phase2_withdrawal: f64,
}

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub custom_buckets: Option<[BucketConfig; BUCKET_COUNT]>,
    pub inflation_enabled: bool,
    pub inflation_rate: f64,
    pub avoid_loss_realization: bool,
    pub two_phase_withdrawal: Option<TwoPhaseWithdrawal>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            custom_buckets: None,
            inflation_enabled: true,
            inflation_rate: DEFAULT_INFLATION_RATE,
            avoid_loss_realization: true,
            two_phase_withdrawal: None,
        }
    }
}

impl SimulationOptions {
    pub fn buckets(&self) -> [BucketConfig; BUCKET_COUNT] {
        self.custom_buckets.clone().unwrap_or_else(default_bucket_configs)
    }

    pub fn active_two_phase(&self) -> Option<TwoPhaseWithdrawal> {
        self.two_phase_withdrawal.filter(|tp| tp.enabled)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceAction {
    None,
    RefillBucket1,
    RefillBucket2,
    ReduceWithdrawal,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceRecommendation {
    pub action: RebalanceAction,
    pub from_bucket: Option<Bucket>,
    pub to_bucket: Option<Bucket>,
    pub amount: Option<f64>,
    pub description: String,
    pub urgency: Urgency,
    pub avoided_loss: bool,
}

impl RebalanceRecommendation {
    pub fn transfer(&self) -> Option<(Bucket, Bucket, f64)> {
        match (self.from_bucket, self.to_bucket, self.amount) {
            (Some(from), Some(to), Some(amount)) if amount > 0.0 => Some((from, to, amount)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketReturns {
    pub bucket1: f64,
    pub bucket2: f64,
    pub bucket3: f64,
}

impl BucketReturns {
    pub fn get(self, bucket: Bucket) -> f64 {
        match bucket {
            Bucket::One => self.bucket1,
            Bucket::Two => self.bucket2,
            Bucket::Three => self.bucket3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationYear {
    pub year: u32,
    pub age: u32,
    pub buckets: BucketAllocation,
    pub total_value: f64,
    pub withdrawal: f64,
    pub returns: BucketReturns,
    pub rebalance_action: RebalanceRecommendation,
    pub inflation_adjusted_withdrawal: f64,
    pub cost_basis: BucketCostBasis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub years: Vec<SimulationYear>,
    pub final_value: f64,
    pub ran_out_of_money: bool,
    pub year_ran_out: Option<u32>,
}

impl SimulationResult {
    pub fn years_lasted(&self) -> u32 {
        match self.year_ran_out {
            Some(year) if self.ran_out_of_money => year,
            _ => self.years.len() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloSummary {
    pub simulations: u32,
    pub success_rate: f64,
    pub median_final_value: f64,
    pub worst_case: f64,
    pub best_case: f64,
    pub average_years_lasted: f64,
    pub percentiles: Percentiles,
}

#[derive(Debug, Clone)]
pub struct MonteCarloConfig {
    pub simulations: u32,
    pub seed: u64,
    pub parallel: bool,
}

#[derive(Debug, Clone)]
pub struct MonteCarloOutcome {
    pub summary: MonteCarloSummary,
    pub sample_simulation: SimulationResult,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("total bucket weight must be greater than zero")]
    ZeroTotalWeight,
    #[error("bucket {index} weight must be >= 0")]
    NegativeWeight { index: usize },
    #[error("{field} must be a finite number")]
    NonFiniteValue { field: &'static str },
    #[error("{field} must be >= 0")]
    NegativeValue { field: &'static str },
    #[error("bucket {index} volatility must be >= 0")]
    NegativeVolatility { index: usize },
    #[error("life expectancy {life_expectancy} must not be below age {age}")]
    InvalidHorizon { age: u32, life_expectancy: u32 },
    #[error("simulations must be > 0")]
    ZeroSimulations,
    #[error("target success rate must be between 0 and 100, got {0}")]
    InvalidTargetSuccessRate(f64),
}
