use rayon::prelude::*;

use super::engine::{TrialPlan, run_trial};
use super::returns::trial_rng;
use super::types::{
    ConfigError, MonteCarloConfig, MonteCarloOutcome, MonteCarloSummary, Percentiles,
    SimulationResult,
};

#[derive(Debug, Clone, Copy)]
struct TrialOutcome {
    final_value: f64,
    years_lasted: u32,
    success: bool,
}

impl TrialOutcome {
    fn from_result(result: &SimulationResult) -> Self {
        Self {
            final_value: result.final_value,
            years_lasted: result.years_lasted(),
            success: !result.ran_out_of_money,
        }
    }
}

pub fn run_monte_carlo(
    plan: &TrialPlan,
    config: &MonteCarloConfig,
) -> Result<MonteCarloOutcome, ConfigError> {
    if config.simulations == 0 {
        return Err(ConfigError::ZeroSimulations);
    }

    let run = |trial_id: u32| {
        let mut rng = trial_rng(config.seed, trial_id);
        let result = run_trial(plan, &mut rng);
        let outcome = TrialOutcome::from_result(&result);
        (outcome, (trial_id == 0).then_some(result))
    };

    let collected: Vec<(TrialOutcome, Option<SimulationResult>)> = if config.parallel {
        (0..config.simulations).into_par_iter().map(&run).collect()
    } else {
        (0..config.simulations).map(&run).collect()
    };

    let mut sample_simulation = None;
    let mut outcomes = Vec::with_capacity(collected.len());
    for (outcome, trajectory) in collected {
        if trajectory.is_some() {
            sample_simulation = trajectory;
        }
        outcomes.push(outcome);
    }
    let Some(sample_simulation) = sample_simulation else {
        return Err(ConfigError::ZeroSimulations);
    };

    let summary = summarize(&outcomes);
    log::info!(
        "monte carlo: {} trials over {} years, seed {}, success rate {:.1}%",
        summary.simulations,
        plan.years,
        config.seed,
        summary.success_rate
    );
    log::debug!(
        "monte carlo percentiles: p10={} p50={} p90={} worst={} best={}",
        summary.percentiles.p10,
        summary.percentiles.p50,
        summary.percentiles.p90,
        summary.worst_case,
        summary.best_case
    );

    Ok(MonteCarloOutcome {
        summary,
        sample_simulation,
    })
}

pub fn generate_scenarios(plan: &TrialPlan, count: u32, seed: u64) -> Vec<SimulationResult> {
    (0..count)
        .into_par_iter()
        .map(|trial_id| run_trial(plan, &mut trial_rng(seed, trial_id)))
        .collect()
}

fn summarize(outcomes: &[TrialOutcome]) -> MonteCarloSummary {
    let n = outcomes.len();
    let successes = outcomes.iter().filter(|o| o.success).count();
    let total_years: u64 = outcomes.iter().map(|o| o.years_lasted as u64).sum();

    let mut final_values: Vec<f64> = outcomes.iter().map(|o| o.final_value).collect();
    final_values.sort_by(|a, b| a.total_cmp(b));

    let percentiles = Percentiles {
        p10: percentile(&final_values, 10.0),
        p25: percentile(&final_values, 25.0),
        p50: percentile(&final_values, 50.0),
        p75: percentile(&final_values, 75.0),
        p90: percentile(&final_values, 90.0),
    };

    MonteCarloSummary {
        simulations: n as u32,
        success_rate: successes as f64 / n as f64 * 100.0,
        median_final_value: percentiles.p50,
        worst_case: final_values.first().copied().unwrap_or(0.0),
        best_case: final_values.last().copied().unwrap_or(0.0),
        average_years_lasted: total_years as f64 / n as f64,
        percentiles,
    }
}

// Nearest rank; `sorted` must be ascending.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (n as f64 * (p / 100.0)).ceil() as i64 - 1;
    sorted[rank.clamp(0, n as i64 - 1) as usize]
}
