use serde::Serialize;

use super::types::{ConfigError, RetirementInput};

const BASE_WITHDRAWAL_RATE: f64 = 4.0;
const BASE_YEARS: f64 = 30.0;
const BASE_SUCCESS: f64 = 95.0;
const RATE_PENALTY_PER_POINT: f64 = 12.0;
const YEARS_PENALTY_PER_YEAR: f64 = 0.5;
const RATE_BONUS_PER_POINT: f64 = 5.0;
const YEARS_BONUS_PER_YEAR: f64 = 0.3;
const MIN_ESTIMATE: f64 = 5.0;
const MAX_ESTIMATE: f64 = 99.9;

const SEARCH_ITERATIONS: u32 = 15;
const WITHDRAWAL_SEARCH_MIN_RATE: f64 = 0.02;
const WITHDRAWAL_SEARCH_MAX_RATE: f64 = 0.10;
const CAPITAL_SEARCH_MIN_MULTIPLE: f64 = 15.0;
const CAPITAL_SEARCH_MAX_MULTIPLE: f64 = 40.0;

pub const DEFAULT_TARGET_SUCCESS_RATE: f64 = 95.0;
pub const DEFAULT_DIVERGENCE_TOLERANCE: f64 = 10.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMode {
    Standard,
    OptimalWithdrawal,
    RequiredCapital,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalSolution {
    pub withdrawal: f64,
    pub success_rate: f64,
    pub withdrawal_rate: f64,
    pub target_met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalSolution {
    pub capital: f64,
    pub success_rate: f64,
    pub withdrawal_rate: f64,
    pub target_met: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseCalculationResult {
    pub mode: CalculationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimal_withdrawal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_capital: Option<f64>,
    pub success_rate: f64,
    pub withdrawal_rate: f64,
    pub target_met: bool,
}

// Anchored on a 4% withdrawal over 30 years. Never calibrated to the simulation.
pub fn estimate_success_rate(capital: f64, withdrawal: f64, years: f64) -> f64 {
    if capital <= 0.0 {
        return MIN_ESTIMATE;
    }
    let withdrawal_rate = withdrawal / capital * 100.0;

    let rate_penalty = ((withdrawal_rate - BASE_WITHDRAWAL_RATE) * RATE_PENALTY_PER_POINT).max(0.0);
    let years_penalty = ((years - BASE_YEARS) * YEARS_PENALTY_PER_YEAR).max(0.0);
    let rate_bonus = ((BASE_WITHDRAWAL_RATE - withdrawal_rate) * RATE_BONUS_PER_POINT).max(0.0);
    let years_bonus = ((BASE_YEARS - years) * YEARS_BONUS_PER_YEAR).max(0.0);

    (BASE_SUCCESS - rate_penalty - years_penalty + rate_bonus + years_bonus)
        .clamp(MIN_ESTIMATE, MAX_ESTIMATE)
}

pub fn heuristic_success_rate(input: &RetirementInput) -> Result<f64, ConfigError> {
    let years = input.horizon_years()?;
    Ok(estimate_success_rate(
        input.total_capital,
        input.annual_withdrawal,
        years as f64,
    ))
}

pub fn optimal_withdrawal(
    capital: f64,
    age: u32,
    life_expectancy: u32,
    target_success_rate: f64,
) -> Result<WithdrawalSolution, ConfigError> {
    validate_target(target_success_rate)?;
    validate_amount("totalCapital", capital)?;
    let years = horizon(age, life_expectancy)?;

    let mut low = capital * WITHDRAWAL_SEARCH_MIN_RATE;
    let mut high = capital * WITHDRAWAL_SEARCH_MAX_RATE;
    let mut best = low;
    let mut best_success = estimate_success_rate(capital, low, years);
    let mut target_met = false;

    for _ in 0..SEARCH_ITERATIONS {
        let mid = (low + high) / 2.0;
        let estimate = estimate_success_rate(capital, mid, years);
        if estimate >= target_success_rate {
            best = mid;
            best_success = estimate;
            target_met = true;
            low = mid;
        } else {
            high = mid;
        }
    }

    let withdrawal = (best / 100.0).round() * 100.0;
    log::debug!(
        "optimal withdrawal for capital {capital} over {years} years: {withdrawal} ({best_success:.1}%, target met: {target_met})"
    );
    Ok(WithdrawalSolution {
        withdrawal,
        success_rate: best_success,
        withdrawal_rate: if capital > 0.0 { best / capital * 100.0 } else { 0.0 },
        target_met,
    })
}

pub fn required_capital(
    desired_withdrawal: f64,
    age: u32,
    life_expectancy: u32,
    target_success_rate: f64,
) -> Result<CapitalSolution, ConfigError> {
    validate_target(target_success_rate)?;
    validate_amount("annualWithdrawal", desired_withdrawal)?;
    let years = horizon(age, life_expectancy)?;

    let mut low = desired_withdrawal * CAPITAL_SEARCH_MIN_MULTIPLE;
    let mut high = desired_withdrawal * CAPITAL_SEARCH_MAX_MULTIPLE;
    let mut best = high;
    let mut best_success = estimate_success_rate(high, desired_withdrawal, years);
    let mut target_met = false;

    for _ in 0..SEARCH_ITERATIONS {
        let mid = (low + high) / 2.0;
        let estimate = estimate_success_rate(mid, desired_withdrawal, years);
        if estimate >= target_success_rate {
            best = mid;
            best_success = estimate;
            target_met = true;
            high = mid;
        } else {
            low = mid;
        }
    }

    let capital = (best / 1000.0).round() * 1000.0;
    log::debug!(
        "required capital for withdrawal {desired_withdrawal} over {years} years: {capital} ({best_success:.1}%, target met: {target_met})"
    );
    Ok(CapitalSolution {
        capital,
        success_rate: best_success,
        withdrawal_rate: if best > 0.0 {
            desired_withdrawal / best * 100.0
        } else {
            0.0
        },
        target_met,
    })
}

pub fn reverse_calculate(
    mode: CalculationMode,
    input: &RetirementInput,
    target_success_rate: f64,
) -> Result<Option<ReverseCalculationResult>, ConfigError> {
    let life_expectancy = input.life_expectancy_or_default();
    let result = match mode {
        CalculationMode::Standard => return Ok(None),
        CalculationMode::OptimalWithdrawal => {
            let solution = optimal_withdrawal(
                input.total_capital,
                input.age,
                life_expectancy,
                target_success_rate,
            )?;
            ReverseCalculationResult {
                mode,
                optimal_withdrawal: Some(solution.withdrawal),
                required_capital: None,
                success_rate: solution.success_rate,
                withdrawal_rate: solution.withdrawal_rate,
                target_met: solution.target_met,
            }
        }
        CalculationMode::RequiredCapital => {
            let solution = required_capital(
                input.annual_withdrawal,
                input.age,
                life_expectancy,
                target_success_rate,
            )?;
            ReverseCalculationResult {
                mode,
                optimal_withdrawal: None,
                required_capital: Some(solution.capital),
                success_rate: solution.success_rate,
                withdrawal_rate: solution.withdrawal_rate,
                target_met: solution.target_met,
            }
        }
    };
    Ok(Some(result))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDivergence {
    pub heuristic_success_rate: f64,
    pub simulated_success_rate: f64,
    pub difference: f64,
    pub tolerance: f64,
    pub exceeds_tolerance: bool,
}

impl ModelDivergence {
    pub fn compare(heuristic: f64, simulated: f64, tolerance: f64) -> Self {
        let difference = simulated - heuristic;
        let exceeds_tolerance = difference.abs() > tolerance;
        if exceeds_tolerance {
            log::debug!(
                "heuristic estimate {heuristic:.1}% and simulation {simulated:.1}% differ by {:.1} points",
                difference.abs()
            );
        }
        Self {
            heuristic_success_rate: heuristic,
            simulated_success_rate: simulated,
            difference,
            tolerance,
            exceeds_tolerance,
        }
    }
}

fn validate_target(target: f64) -> Result<(), ConfigError> {
    if !target.is_finite() || !(0.0..=100.0).contains(&target) {
        return Err(ConfigError::InvalidTargetSuccessRate(target));
    }
    Ok(())
}

fn validate_amount(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ConfigError::NegativeValue { field });
    }
    Ok(())
}

fn horizon(age: u32, life_expectancy: u32) -> Result<f64, ConfigError> {
    if life_expectancy < age {
        return Err(ConfigError::InvalidHorizon {
            age,
            life_expectancy,
        });
    }
    Ok((life_expectancy - age) as f64)
}
