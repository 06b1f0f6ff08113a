use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    BUCKET_COUNT, Bucket, BucketAllocation, BucketConfig, CalculationMode, CapitalSolution,
    DEFAULT_DIVERGENCE_TOLERANCE, DEFAULT_INFLATION_RATE, DEFAULT_LIFE_EXPECTANCY,
    DEFAULT_SCENARIO_COUNT, DEFAULT_SIMULATIONS, DEFAULT_TARGET_SUCCESS_RATE, ModelDivergence,
    MonteCarloConfig, MonteCarloSummary, RetirementInput, ReverseCalculationResult,
    SimulationOptions, SimulationResult, TrialPlan, TwoPhaseWithdrawal, WithdrawalSolution,
    default_bucket_configs, generate_scenarios, heuristic_success_rate, initial_allocation,
    optimal_withdrawal, required_capital, reverse_calculate, run_monte_carlo, withdrawal_rate,
    years_of_coverage,
};

const MAX_SIMULATIONS: u32 = 100_000;
const MAX_SCENARIOS: u32 = 100;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCalculationMode {
    Standard,
    OptimalWithdrawal,
    RequiredCapital,
}

impl From<CliCalculationMode> for CalculationMode {
    fn from(value: CliCalculationMode) -> Self {
        match value {
            CliCalculationMode::Standard => CalculationMode::Standard,
            CliCalculationMode::OptimalWithdrawal => CalculationMode::OptimalWithdrawal,
            CliCalculationMode::RequiredCapital => CalculationMode::RequiredCapital,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiCalculationMode {
    Standard,
    #[serde(alias = "optimalWithdrawal", alias = "optimal_withdrawal", alias = "optimal")]
    OptimalWithdrawal,
    #[serde(alias = "requiredCapital", alias = "required_capital", alias = "capital")]
    RequiredCapital,
}

impl From<ApiCalculationMode> for CliCalculationMode {
    fn from(value: ApiCalculationMode) -> Self {
        match value {
            ApiCalculationMode::Standard => CliCalculationMode::Standard,
            ApiCalculationMode::OptimalWithdrawal => CliCalculationMode::OptimalWithdrawal,
            ApiCalculationMode::RequiredCapital => CliCalculationMode::RequiredCapital,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    total_capital: Option<f64>,
    age: Option<u32>,
    annual_withdrawal: Option<f64>,
    life_expectancy: Option<u32>,

    bucket1_name: Option<String>,
    bucket1_weight: Option<f64>,
    bucket1_return: Option<f64>,
    bucket1_volatility: Option<f64>,
    bucket2_name: Option<String>,
    bucket2_weight: Option<f64>,
    bucket2_return: Option<f64>,
    bucket2_volatility: Option<f64>,
    bucket3_name: Option<String>,
    bucket3_weight: Option<f64>,
    bucket3_return: Option<f64>,
    bucket3_volatility: Option<f64>,

    inflation_enabled: Option<bool>,
    inflation_rate: Option<f64>,
    avoid_loss_realization: Option<bool>,

    two_phase_enabled: Option<bool>,
    transition_age: Option<u32>,
    phase2_withdrawal: Option<f64>,

    calculation_mode: Option<ApiCalculationMode>,
    target_success_rate: Option<f64>,

    simulations: Option<u32>,
    seed: Option<u64>,
    parallel: Option<bool>,
    count: Option<u32>,
}

#[derive(Parser, Debug)]
#[command(
    name = "bucketplan",
    about = "Three-bucket retirement Monte Carlo simulator (liquidity, bonds, equities)"
)]
struct Cli {
    #[arg(long, default_value_t = 500_000.0, help = "Starting portfolio value")]
    capital: f64,
    #[arg(long, default_value_t = 65, help = "Age at the start of the simulation")]
    age: u32,
    #[arg(
        long,
        default_value_t = 24_000.0,
        help = "Annual withdrawal in today's money; the desired withdrawal in required-capital mode"
    )]
    withdrawal: f64,
    #[arg(long, default_value_t = DEFAULT_LIFE_EXPECTANCY, help = "Age to fund through")]
    life_expectancy: u32,

    #[arg(long, default_value = "Liquidity")]
    bucket1_name: String,
    #[arg(long, default_value_t = 15.0, help = "Bucket 1 target weight")]
    bucket1_weight: f64,
    #[arg(long, default_value_t = 2.0, help = "Bucket 1 expected return in percent")]
    bucket1_return: f64,
    #[arg(
        long,
        help = "Bucket 1 volatility in percent, derived from the expected return when omitted"
    )]
    bucket1_volatility: Option<f64>,
    #[arg(long, default_value = "Bonds")]
    bucket2_name: String,
    #[arg(long, default_value_t = 35.0, help = "Bucket 2 target weight")]
    bucket2_weight: f64,
    #[arg(long, default_value_t = 4.0, help = "Bucket 2 expected return in percent")]
    bucket2_return: f64,
    #[arg(
        long,
        help = "Bucket 2 volatility in percent, derived from the expected return when omitted"
    )]
    bucket2_volatility: Option<f64>,
    #[arg(long, default_value = "Equities")]
    bucket3_name: String,
    #[arg(long, default_value_t = 50.0, help = "Bucket 3 target weight")]
    bucket3_weight: f64,
    #[arg(long, default_value_t = 7.0, help = "Bucket 3 expected return in percent")]
    bucket3_return: f64,
    #[arg(
        long,
        help = "Bucket 3 volatility in percent, derived from the expected return when omitted"
    )]
    bucket3_volatility: Option<f64>,

    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Grow the withdrawal with inflation every year"
    )]
    inflation: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_INFLATION_RATE * 100.0,
        help = "Annual inflation in percent"
    )]
    inflation_rate: f64,
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        help = "Skip or cap rebalancing transfers that would sell a bucket below its cost basis"
    )]
    avoid_loss: bool,

    #[arg(long, help = "Switch to --phase2-withdrawal at --transition-age")]
    two_phase: bool,
    #[arg(long, default_value_t = 75, help = "Age at which phase 2 starts")]
    transition_age: u32,
    #[arg(
        long,
        default_value_t = 18_000.0,
        help = "Phase 2 annual withdrawal in today's money"
    )]
    phase2_withdrawal: f64,

    #[arg(long, value_enum, default_value_t = CliCalculationMode::Standard)]
    mode: CliCalculationMode,
    #[arg(
        long,
        default_value_t = DEFAULT_TARGET_SUCCESS_RATE,
        help = "Target heuristic success rate in percent for the reverse calculation modes"
    )]
    target_success_rate: f64,

    #[arg(long, default_value_t = DEFAULT_SIMULATIONS)]
    simulations: u32,
    #[arg(long, help = "Random seed; a fresh one is drawn and reported when omitted")]
    seed: Option<u64>,
    #[arg(long, help = "Run trials on a single thread")]
    sequential: bool,
    #[arg(long, default_value_t = DEFAULT_SCENARIO_COUNT, help = "Trajectories for --print-scenarios")]
    scenarios: u32,
    #[arg(
        long,
        help = "Print independent scenario trajectories instead of the Monte Carlo summary"
    )]
    print_scenarios: bool,
}

#[derive(Debug, Clone)]
struct SimulationRequest {
    input: RetirementInput,
    options: SimulationOptions,
    mode: CalculationMode,
    target_success_rate: f64,
    simulations: u32,
    seed: Option<u64>,
    parallel: bool,
    scenario_count: u32,
}

/// Inputs after the reverse pre-pass, ready to simulate.
#[derive(Debug)]
struct PreparedRun {
    input: RetirementInput,
    options: SimulationOptions,
    reverse_calculation: Option<ReverseCalculationResult>,
    plan: TrialPlan,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InputSummary {
    total_capital: f64,
    age: u32,
    annual_withdrawal: f64,
    life_expectancy: u32,
    horizon_years: u32,
    withdrawal_rate: f64,
    years_of_coverage: f64,
    inflation_enabled: bool,
    inflation_rate: f64,
    avoid_loss_realization: bool,
    two_phase_withdrawal: Option<TwoPhaseWithdrawal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    seed: u64,
    input: InputSummary,
    buckets: [BucketConfig; BUCKET_COUNT],
    initial_allocation: BucketAllocation,
    reverse_calculation: Option<ReverseCalculationResult>,
    summary: MonteCarloSummary,
    sample_simulation: SimulationResult,
    divergence: ModelDivergence,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenariosResponse {
    seed: u64,
    input: InputSummary,
    reverse_calculation: Option<ReverseCalculationResult>,
    scenarios: Vec<SimulationResult>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_inputs(cli: Cli) -> Result<SimulationRequest, String> {
    if !cli.capital.is_finite() || cli.capital < 0.0 {
        return Err("--capital must be >= 0".to_string());
    }

    if !cli.withdrawal.is_finite() || cli.withdrawal < 0.0 {
        return Err("--withdrawal must be >= 0".to_string());
    }

    if cli.life_expectancy <= cli.age {
        return Err("--life-expectancy must be > --age".to_string());
    }

    if cli.simulations == 0 || cli.simulations > MAX_SIMULATIONS {
        return Err(format!(
            "--simulations must be between 1 and {MAX_SIMULATIONS}"
        ));
    }

    if cli.scenarios == 0 || cli.scenarios > MAX_SCENARIOS {
        return Err(format!("--scenarios must be between 1 and {MAX_SCENARIOS}"));
    }

    if !(0.0..=100.0).contains(&cli.target_success_rate) {
        return Err("--target-success-rate must be between 0 and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.inflation_rate) {
        return Err("--inflation-rate must be between 0 and 100".to_string());
    }

    let defaults = default_bucket_configs();
    let specs = [
        (
            Bucket::One,
            cli.bucket1_name,
            cli.bucket1_weight,
            cli.bucket1_return,
            cli.bucket1_volatility,
        ),
        (
            Bucket::Two,
            cli.bucket2_name,
            cli.bucket2_weight,
            cli.bucket2_return,
            cli.bucket2_volatility,
        ),
        (
            Bucket::Three,
            cli.bucket3_name,
            cli.bucket3_weight,
            cli.bucket3_return,
            cli.bucket3_volatility,
        ),
    ];

    let mut buckets = defaults.clone();
    for (bucket, name, weight, expected_return, volatility) in specs {
        let flag = format!("--bucket{}", bucket.number());
        if !weight.is_finite() || weight < 0.0 {
            return Err(format!("{flag}-weight must be >= 0"));
        }
        if !expected_return.is_finite() || expected_return <= -100.0 {
            return Err(format!("{flag}-return must be > -100"));
        }
        let expected_return = expected_return / 100.0;
        let volatility = match volatility {
            Some(v) if !v.is_finite() || v < 0.0 => {
                return Err(format!("{flag}-volatility must be >= 0"));
            }
            Some(v) => v / 100.0,
            None => derived_volatility(bucket, expected_return),
        };
        let name = if name.trim().is_empty() {
            defaults[bucket.index()].name.clone()
        } else {
            name
        };
        buckets[bucket.index()] = BucketConfig {
            name,
            weight,
            expected_return,
            volatility,
            color: defaults[bucket.index()].color.clone(),
        };
    }

    if buckets.iter().map(|b| b.weight).sum::<f64>() <= 0.0 {
        return Err("bucket weights must sum to more than 0".to_string());
    }

    let two_phase_withdrawal = if cli.two_phase {
        if !cli.phase2_withdrawal.is_finite() || cli.phase2_withdrawal < 0.0 {
            return Err("--phase2-withdrawal must be >= 0".to_string());
        }
        if cli.transition_age <= cli.age || cli.transition_age > cli.life_expectancy {
            return Err(
                "--transition-age must be > --age and <= --life-expectancy".to_string(),
            );
        }
        Some(TwoPhaseWithdrawal {
            enabled: true,
            phase1_withdrawal: cli.withdrawal,
            transition_age: cli.transition_age,
            phase2_withdrawal: cli.phase2_withdrawal,
        })
    } else {
        None
    };

    Ok(SimulationRequest {
        input: RetirementInput {
            total_capital: cli.capital,
            age: cli.age,
            annual_withdrawal: cli.withdrawal,
            life_expectancy: Some(cli.life_expectancy),
        },
        options: SimulationOptions {
            custom_buckets: Some(buckets),
            inflation_enabled: cli.inflation,
            inflation_rate: cli.inflation_rate / 100.0,
            avoid_loss_realization: cli.avoid_loss,
            two_phase_withdrawal,
        },
        mode: cli.mode.into(),
        target_success_rate: cli.target_success_rate,
        simulations: cli.simulations,
        seed: cli.seed,
        parallel: !cli.sequential,
        scenario_count: cli.scenarios,
    })
}

/// Volatility assumed for a bucket when only its expected return is given.
fn derived_volatility(bucket: Bucket, expected_return: f64) -> f64 {
    let volatility = match bucket {
        Bucket::One => 0.005 + expected_return * 0.1,
        Bucket::Two => 0.03 + expected_return * 0.5,
        Bucket::Three => 0.08 + expected_return * 1.5,
    };
    volatility.max(0.0)
}

fn prepare_run(request: &SimulationRequest) -> Result<PreparedRun, String> {
    let mut input = request.input;
    let reverse_calculation = reverse_calculate(request.mode, &input, request.target_success_rate)
        .map_err(|e| e.to_string())?;
    if let Some(reverse) = reverse_calculation {
        if let Some(withdrawal) = reverse.optimal_withdrawal {
            input.annual_withdrawal = withdrawal;
        }
        if let Some(capital) = reverse.required_capital {
            input.total_capital = capital;
        }
    }

    let mut options = request.options.clone();
    if let Some(two_phase) = options.two_phase_withdrawal.as_mut() {
        two_phase.phase1_withdrawal = input.annual_withdrawal;
    }

    let years = input.horizon_years().map_err(|e| e.to_string())?;
    let allocation =
        initial_allocation(input.total_capital, &options.buckets()).map_err(|e| e.to_string())?;
    let plan = TrialPlan::new(
        allocation,
        input.annual_withdrawal,
        input.age,
        years,
        &options,
    )
    .map_err(|e| e.to_string())?;

    Ok(PreparedRun {
        input,
        options,
        reverse_calculation,
        plan,
    })
}

fn input_summary(prepared: &PreparedRun) -> InputSummary {
    let input = &prepared.input;
    InputSummary {
        total_capital: input.total_capital,
        age: input.age,
        annual_withdrawal: input.annual_withdrawal,
        life_expectancy: input.life_expectancy_or_default(),
        horizon_years: prepared.plan.years,
        withdrawal_rate: withdrawal_rate(input),
        years_of_coverage: years_of_coverage(input),
        inflation_enabled: prepared.options.inflation_enabled,
        inflation_rate: prepared.options.inflation_rate,
        avoid_loss_realization: prepared.options.avoid_loss_realization,
        two_phase_withdrawal: prepared.options.active_two_phase(),
    }
}

fn run_simulation(request: &SimulationRequest, seed: u64) -> Result<SimulateResponse, String> {
    let prepared = prepare_run(request)?;
    let outcome = run_monte_carlo(
        &prepared.plan,
        &MonteCarloConfig {
            simulations: request.simulations,
            seed,
            parallel: request.parallel,
        },
    )
    .map_err(|e| e.to_string())?;

    let heuristic = heuristic_success_rate(&prepared.input).map_err(|e| e.to_string())?;
    let divergence = ModelDivergence::compare(
        heuristic,
        outcome.summary.success_rate,
        DEFAULT_DIVERGENCE_TOLERANCE,
    );

    Ok(SimulateResponse {
        seed,
        input: input_summary(&prepared),
        buckets: prepared.plan.buckets.clone(),
        initial_allocation: prepared.plan.initial_allocation,
        reverse_calculation: prepared.reverse_calculation,
        summary: outcome.summary,
        sample_simulation: outcome.sample_simulation,
        divergence,
    })
}

fn run_scenarios(request: &SimulationRequest, seed: u64) -> Result<ScenariosResponse, String> {
    let prepared = prepare_run(request)?;
    let scenarios = generate_scenarios(&prepared.plan, request.scenario_count, seed);
    Ok(ScenariosResponse {
        seed,
        input: input_summary(&prepared),
        reverse_calculation: prepared.reverse_calculation,
        scenarios,
    })
}

fn solve_optimal_withdrawal(request: &SimulationRequest) -> Result<WithdrawalSolution, String> {
    let input = &request.input;
    optimal_withdrawal(
        input.total_capital,
        input.age,
        input.life_expectancy_or_default(),
        request.target_success_rate,
    )
    .map_err(|e| e.to_string())
}

fn solve_required_capital(request: &SimulationRequest) -> Result<CapitalSolution, String> {
    let input = &request.input;
    required_capital(
        input.annual_withdrawal,
        input.age,
        input.life_expectancy_or_default(),
        request.target_success_rate,
    )
    .map_err(|e| e.to_string())
}

/// One-shot command line run; returns the pretty-printed JSON response.
pub fn run_cli<I, T>(args: I) -> Result<String, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let print_scenarios = cli.print_scenarios;
    let request = build_inputs(cli)?;
    let seed = request.seed.unwrap_or_else(rand::random);

    let json = if print_scenarios {
        serde_json::to_string_pretty(&run_scenarios(&request, seed)?)
    } else {
        serde_json::to_string_pretty(&run_simulation(&request, seed)?)
    };
    json.map_err(|e| format!("failed to serialize response: {e}"))
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route(
            "/api/scenarios",
            get(scenarios_get_handler).post(scenarios_post_handler),
        )
        .route(
            "/api/optimal-withdrawal",
            get(optimal_withdrawal_get_handler).post(optimal_withdrawal_post_handler),
        )
        .route(
            "/api/required-capital",
            get(required_capital_get_handler).post(required_capital_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    log::info!("bucketplan HTTP API listening on http://{addr}");
    log::info!("Local access: http://127.0.0.1:{port}/api/health");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn scenarios_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    scenarios_handler_impl(payload).await
}

async fn scenarios_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    scenarios_handler_impl(payload).await
}

async fn optimal_withdrawal_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    solver_handler_impl(payload, solve_optimal_withdrawal)
}

async fn optimal_withdrawal_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    solver_handler_impl(payload, solve_optimal_withdrawal)
}

async fn required_capital_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    solver_handler_impl(payload, solve_required_capital)
}

async fn required_capital_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    solver_handler_impl(payload, solve_required_capital)
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return rejected(&msg),
    };
    let seed = request.seed.unwrap_or_else(rand::random);
    run_blocking(move || run_simulation(&request, seed)).await
}

async fn scenarios_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return rejected(&msg),
    };
    let seed = request.seed.unwrap_or_else(rand::random);
    run_blocking(move || run_scenarios(&request, seed)).await
}

fn solver_handler_impl<T, F>(payload: SimulatePayload, solve: F) -> Response
where
    T: Serialize,
    F: FnOnce(&SimulationRequest) -> Result<T, String>,
{
    let result = api_request_from_payload(payload).and_then(|request| solve(&request));
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(msg) => rejected(&msg),
    }
}

/// Monte Carlo batches are CPU-bound; keep them off the async workers.
async fn run_blocking<T, F>(job: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(msg)) => rejected(&msg),
        Err(e) => {
            log::error!("simulation task failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation failed")
        }
    }
}

fn rejected(msg: &str) -> Response {
    log::warn!("rejected request: {msg}");
    error_response(StatusCode::BAD_REQUEST, msg)
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<SimulationRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<SimulationRequest, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.total_capital {
        cli.capital = v;
    }
    if let Some(v) = payload.age {
        cli.age = v;
    }
    if let Some(v) = payload.annual_withdrawal {
        cli.withdrawal = v;
    }
    if let Some(v) = payload.life_expectancy {
        cli.life_expectancy = v;
    }

    if let Some(v) = payload.bucket1_name {
        cli.bucket1_name = v;
    }
    if let Some(v) = payload.bucket1_weight {
        cli.bucket1_weight = v;
    }
    if let Some(v) = payload.bucket1_return {
        cli.bucket1_return = v;
    }
    if let Some(v) = payload.bucket1_volatility {
        cli.bucket1_volatility = Some(v);
    }
    if let Some(v) = payload.bucket2_name {
        cli.bucket2_name = v;
    }
    if let Some(v) = payload.bucket2_weight {
        cli.bucket2_weight = v;
    }
    if let Some(v) = payload.bucket2_return {
        cli.bucket2_return = v;
    }
    if let Some(v) = payload.bucket2_volatility {
        cli.bucket2_volatility = Some(v);
    }
    if let Some(v) = payload.bucket3_name {
        cli.bucket3_name = v;
    }
    if let Some(v) = payload.bucket3_weight {
        cli.bucket3_weight = v;
    }
    if let Some(v) = payload.bucket3_return {
        cli.bucket3_return = v;
    }
    if let Some(v) = payload.bucket3_volatility {
        cli.bucket3_volatility = Some(v);
    }

    if let Some(v) = payload.inflation_enabled {
        cli.inflation = v;
    }
    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }
    if let Some(v) = payload.avoid_loss_realization {
        cli.avoid_loss = v;
    }

    if let Some(v) = payload.two_phase_enabled {
        cli.two_phase = v;
    }
    if let Some(v) = payload.transition_age {
        cli.transition_age = v;
    }
    if let Some(v) = payload.phase2_withdrawal {
        cli.phase2_withdrawal = v;
    }

    if let Some(v) = payload.calculation_mode {
        cli.mode = v.into();
    }
    if let Some(v) = payload.target_success_rate {
        cli.target_success_rate = v;
    }

    if let Some(v) = payload.simulations {
        cli.simulations = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = Some(v);
    }
    if let Some(v) = payload.parallel {
        cli.sequential = !v;
    }
    if let Some(v) = payload.count {
        cli.scenarios = v;
    }

    build_inputs(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        capital: 500_000.0,
        age: 65,
        withdrawal: 24_000.0,
        life_expectancy: DEFAULT_LIFE_EXPECTANCY,
        bucket1_name: "Liquidity".to_string(),
        bucket1_weight: 15.0,
        bucket1_return: 2.0,
        bucket1_volatility: None,
        bucket2_name: "Bonds".to_string(),
        bucket2_weight: 35.0,
        bucket2_return: 4.0,
        bucket2_volatility: None,
        bucket3_name: "Equities".to_string(),
        bucket3_weight: 50.0,
        bucket3_return: 7.0,
        bucket3_volatility: None,
        inflation: true,
        inflation_rate: DEFAULT_INFLATION_RATE * 100.0,
        avoid_loss: true,
        two_phase: false,
        transition_age: 75,
        phase2_withdrawal: 18_000.0,
        mode: CliCalculationMode::Standard,
        target_success_rate: DEFAULT_TARGET_SUCCESS_RATE,
        simulations: DEFAULT_SIMULATIONS,
        seed: None,
        sequential: false,
        scenarios: DEFAULT_SCENARIO_COUNT,
        print_scenarios: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        let mut cli = default_cli_for_api();
        cli.simulations = 50;
        cli.seed = Some(7);
        cli
    }

    #[test]
    fn empty_payload_uses_defaults() {
        let request = api_request_from_json("{}").expect("json should parse");
        assert_approx(request.input.total_capital, 500_000.0);
        assert_eq!(request.input.age, 65);
        assert_approx(request.input.annual_withdrawal, 24_000.0);
        assert_eq!(request.input.life_expectancy, Some(95));
        assert_eq!(request.mode, CalculationMode::Standard);
        assert_eq!(request.simulations, DEFAULT_SIMULATIONS);
        assert_eq!(request.seed, None);
        assert!(request.parallel);
        assert!(request.options.inflation_enabled);
        assert!(request.options.avoid_loss_realization);
        assert!(request.options.two_phase_withdrawal.is_none());

        let buckets = request.options.buckets();
        assert_eq!(buckets[0].name, "Liquidity");
        assert_approx(buckets[0].expected_return, 0.02);
        assert_approx(buckets[0].volatility, 0.007);
        assert_approx(buckets[1].volatility, 0.05);
        assert_approx(buckets[2].volatility, 0.185);
        assert_eq!(buckets[2].color, "#8b5cf6");
    }

    #[test]
    fn api_request_from_json_converts_percent_units() {
        let json = r#"{
          "totalCapital": 750000,
          "age": 60,
          "annualWithdrawal": 30000,
          "lifeExpectancy": 90,
          "bucket2Return": 5,
          "bucket3Volatility": 20,
          "inflationRate": 3,
          "avoidLossRealization": false,
          "calculationMode": "optimal-withdrawal",
          "targetSuccessRate": 90,
          "simulations": 250,
          "seed": 11,
          "parallel": false
        }"#;
        let request = api_request_from_json(json).expect("json should parse");
        assert_approx(request.input.total_capital, 750_000.0);
        assert_eq!(request.input.age, 60);
        assert_eq!(request.input.life_expectancy, Some(90));
        let buckets = request.options.buckets();
        assert_approx(buckets[1].expected_return, 0.05);
        assert_approx(buckets[1].volatility, 0.055);
        assert_approx(buckets[2].volatility, 0.2);
        assert_approx(request.options.inflation_rate, 0.03);
        assert!(!request.options.avoid_loss_realization);
        assert_eq!(request.mode, CalculationMode::OptimalWithdrawal);
        assert_approx(request.target_success_rate, 90.0);
        assert_eq!(request.simulations, 250);
        assert_eq!(request.seed, Some(11));
        assert!(!request.parallel);
    }

    #[test]
    fn calculation_mode_accepts_aliases() {
        let request = api_request_from_json(r#"{"calculationMode": "required_capital"}"#)
            .expect("json should parse");
        assert_eq!(request.mode, CalculationMode::RequiredCapital);
        let request = api_request_from_json(r#"{"calculationMode": "optimalWithdrawal"}"#)
            .expect("json should parse");
        assert_eq!(request.mode, CalculationMode::OptimalWithdrawal);
        assert!(api_request_from_json(r#"{"calculationMode": "guess"}"#).is_err());
    }

    #[test]
    fn build_inputs_rejects_horizon_not_after_age() {
        let mut cli = sample_cli();
        cli.age = 70;
        cli.life_expectancy = 70;
        let err = build_inputs(cli).expect_err("must reject empty horizon");
        assert!(err.contains("--life-expectancy"));
    }

    #[test]
    fn build_inputs_rejects_zero_total_weight() {
        let mut cli = sample_cli();
        cli.bucket1_weight = 0.0;
        cli.bucket2_weight = 0.0;
        cli.bucket3_weight = 0.0;
        let err = build_inputs(cli).expect_err("must reject zero weights");
        assert!(err.contains("bucket weights"));
    }

    #[test]
    fn build_inputs_rejects_negative_volatility() {
        let mut cli = sample_cli();
        cli.bucket2_volatility = Some(-1.0);
        let err = build_inputs(cli).expect_err("must reject negative volatility");
        assert!(err.contains("--bucket2-volatility"));
    }

    #[test]
    fn build_inputs_rejects_transition_outside_horizon() {
        let mut cli = sample_cli();
        cli.two_phase = true;
        cli.transition_age = 100;
        let err = build_inputs(cli).expect_err("must reject transition age");
        assert!(err.contains("--transition-age"));
    }

    #[test]
    fn build_inputs_rejects_out_of_range_simulations() {
        let mut cli = sample_cli();
        cli.simulations = 0;
        let err = build_inputs(cli).expect_err("must reject zero simulations");
        assert!(err.contains("--simulations"));
    }

    #[test]
    fn cli_parses_flags_with_explicit_booleans() {
        let cli = Cli::parse_from([
            "bucketplan",
            "--capital",
            "800000",
            "--inflation",
            "false",
            "--two-phase",
            "--phase2-withdrawal",
            "15000",
            "--mode",
            "required-capital",
            "--seed",
            "5",
        ]);
        let request = build_inputs(cli).expect("valid inputs");
        assert_approx(request.input.total_capital, 800_000.0);
        assert!(!request.options.inflation_enabled);
        assert_eq!(request.mode, CalculationMode::RequiredCapital);
        let two_phase = request.options.two_phase_withdrawal.expect("two-phase set");
        assert_approx(two_phase.phase1_withdrawal, 24_000.0);
        assert_approx(two_phase.phase2_withdrawal, 15_000.0);
        assert_eq!(two_phase.transition_age, 75);
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let request = build_inputs(sample_cli()).expect("valid inputs");
        let response = run_simulation(&request, 7).expect("simulation runs");
        assert_eq!(response.sample_simulation.years.len(), 30);
        assert!((0.0..=100.0).contains(&response.summary.success_rate));
        assert_approx(
            response.divergence.simulated_success_rate,
            response.summary.success_rate,
        );

        let json = serde_json::to_string(&response).expect("response should serialize");
        for key in [
            "\"seed\":7",
            "\"initialAllocation\"",
            "\"summary\"",
            "\"successRate\"",
            "\"medianFinalValue\"",
            "\"percentiles\"",
            "\"sampleSimulation\"",
            "\"ranOutOfMoney\"",
            "\"rebalanceAction\"",
            "\"costBasis\"",
            "\"divergence\"",
            "\"exceedsTolerance\"",
            "\"yearsOfCoverage\"",
        ] {
            assert!(json.contains(key), "missing {key}");
        }
    }

    #[test]
    fn same_seed_reproduces_the_response() {
        let request = build_inputs(sample_cli()).expect("valid inputs");
        let first = serde_json::to_string(&run_simulation(&request, 21).unwrap()).unwrap();
        let second = serde_json::to_string(&run_simulation(&request, 21).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn optimal_withdrawal_mode_replaces_withdrawal_and_phase1() {
        let mut cli = sample_cli();
        cli.capital = 1_000_000.0;
        cli.two_phase = true;
        cli.mode = CliCalculationMode::OptimalWithdrawal;
        let request = build_inputs(cli).expect("valid inputs");
        let response = run_simulation(&request, 3).expect("simulation runs");

        let reverse = response.reverse_calculation.expect("reverse pass ran");
        assert_eq!(reverse.optimal_withdrawal, Some(40_000.0));
        assert_approx(response.input.annual_withdrawal, 40_000.0);
        let two_phase = response.input.two_phase_withdrawal.expect("two-phase set");
        assert_approx(two_phase.phase1_withdrawal, 40_000.0);
        assert_approx(response.sample_simulation.years[0].withdrawal, 40_000.0);
    }

    #[test]
    fn required_capital_mode_replaces_capital() {
        let mut cli = sample_cli();
        cli.withdrawal = 40_000.0;
        cli.mode = CliCalculationMode::RequiredCapital;
        let request = build_inputs(cli).expect("valid inputs");
        let response = run_simulation(&request, 3).expect("simulation runs");

        let reverse = response.reverse_calculation.expect("reverse pass ran");
        assert_eq!(reverse.required_capital, Some(1_000_000.0));
        assert_approx(response.input.total_capital, 1_000_000.0);
        assert_approx(response.initial_allocation.total(), 1_000_000.0);
    }

    #[test]
    fn scenarios_return_requested_count() {
        let mut cli = sample_cli();
        cli.scenarios = 3;
        let request = build_inputs(cli).expect("valid inputs");
        let response = run_scenarios(&request, 9).expect("scenarios run");
        assert_eq!(response.scenarios.len(), 3);
        assert!(response.scenarios.iter().all(|s| s.years.len() == 30));
    }

    #[test]
    fn solver_routes_validate_target() {
        let mut cli = sample_cli();
        cli.target_success_rate = 150.0;
        let err = build_inputs(cli).expect_err("must reject target");
        assert!(err.contains("--target-success-rate"));

        let request = build_inputs(sample_cli()).expect("valid inputs");
        let solution = solve_required_capital(&request).expect("solver runs");
        assert!(solution.target_met);
        assert!(solution.capital > request.input.annual_withdrawal);
    }
}
