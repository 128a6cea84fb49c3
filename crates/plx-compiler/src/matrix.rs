//! Matrix expansion
//!
//! Grid, random and mapping searches are pure in `(matrix, seed)` and expand
//! in a single iteration. Hyperband, bayes, hyperopt and iterative searches
//! run in rounds: [`create_iteration`] hands out the next round number and
//! [`MatrixExpander::trials`] produces the round's trials, asking a
//! [`SuggestionProducer`] where a model has to propose configurations.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use plx_schema::matrix::{
    HpDateRange, HpParam, HpSpace, HyperbandSearch, Optimization, OptimizationMetric,
};
use plx_schema::{CompiledOperation, Matrix, MatrixParams, Status};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::compiler::{OperationCompiler, Resolved};
use crate::{CompileError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// One configuration of a matrix round
#[derive(Clone, Debug, PartialEq)]
pub struct Trial {
    /// Position within the round
    pub index: u32,
    /// Param overrides
    pub params: BTreeMap<String, Value>,
}

/// Outcome of a finished trial, fed back to iterative searches
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// Params the trial ran with
    pub params: BTreeMap<String, Value>,
    /// Value of the optimized metric, when reported
    pub metric: Option<f64>,
    /// Final status
    pub status: Status,
}

/// Proposes configurations for model-driven searches (bayes, hyperopt, iterative)
#[cfg_attr(test, automock)]
pub trait SuggestionProducer: Send + Sync {
    /// Up to `count` configurations for round `iteration`
    fn suggest(
        &self,
        matrix: &Matrix,
        iteration: u32,
        observations: &[Observation],
        count: u32,
    ) -> Result<Vec<BTreeMap<String, Value>>>;
}

/// Whether the search needs more than one round
pub fn should_reschedule(matrix: &Matrix) -> bool {
    matches!(
        matrix,
        Matrix::Hyperband(_) | Matrix::Bayes(_) | Matrix::Hyperopt(_) | Matrix::Iterative(_)
    )
}

/// Number of rounds the search runs
pub fn rounds(matrix: &Matrix) -> Result<u32> {
    Ok(match matrix {
        Matrix::Grid(_) | Matrix::Random(_) | Matrix::Mapping(_) => 1,
        Matrix::Hyperband(m) => Hyperband::new(m)?.rounds(),
        Matrix::Bayes(m) => m.max_iterations.max(1),
        Matrix::Hyperopt(m) => m.max_iterations.unwrap_or(1).max(1),
        Matrix::Iterative(m) => m.max_iterations.max(1),
    })
}

/// Next round after `current`; `None` once the search is exhausted
pub fn create_iteration(matrix: &Matrix, current: Option<u32>) -> Result<Option<u32>> {
    let next = current.map_or(0, |c| c + 1);
    if next < rounds(matrix)? {
        Ok(Some(next))
    } else {
        Ok(None)
    }
}

/// Hyperband bracket bookkeeping.
///
/// Rounds are numbered across brackets: bracket `s_max` contributes rungs
/// `0..=s_max`, then bracket `s_max - 1`, down to bracket 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Hyperband {
    max_iterations: f64,
    eta: f64,
    s_max: u32,
    budget: f64,
}

impl Hyperband {
    /// Bookkeeping for a hyperband search
    pub fn new(search: &HyperbandSearch) -> Result<Self> {
        if search.eta <= 1.0 {
            return Err(CompileError::matrix("matrix.eta", "must be greater than 1"));
        }
        if search.max_iterations == 0 {
            return Err(CompileError::matrix("matrix.maxIterations", "must be positive"));
        }
        let max_iterations = f64::from(search.max_iterations);
        let s_max = (max_iterations.ln() / search.eta.ln() + 1e-9).floor() as u32;
        Ok(Self {
            max_iterations,
            eta: search.eta,
            s_max,
            budget: f64::from(s_max + 1) * max_iterations,
        })
    }

    /// Largest bracket
    pub fn s_max(&self) -> u32 {
        self.s_max
    }

    /// Total rounds over every bracket
    pub fn rounds(&self) -> u32 {
        (self.s_max + 1) * (self.s_max + 2) / 2
    }

    /// `(bracket, rung)` of a round
    pub fn position(&self, iteration: u32) -> Option<(u32, u32)> {
        let mut remaining = iteration;
        for bracket in (0..=self.s_max).rev() {
            if remaining <= bracket {
                return Some((bracket, remaining));
            }
            remaining -= bracket + 1;
        }
        None
    }

    /// Configurations sampled when a bracket starts
    pub fn num_runs(&self, bracket: u32) -> u32 {
        let s = f64::from(bracket);
        ((self.budget / self.max_iterations) * self.eta.powi(bracket as i32) / (s + 1.0)).ceil() as u32
    }

    /// Resource given to each configuration when a bracket starts
    pub fn resources(&self, bracket: u32) -> f64 {
        self.max_iterations / self.eta.powi(bracket as i32)
    }

    /// Configurations kept at a rung
    pub fn num_runs_to_keep(&self, num_runs: u32, rung: u32) -> u32 {
        (f64::from(num_runs) / self.eta.powi(rung as i32)).floor() as u32
    }

    /// Resource given to each configuration at a rung
    pub fn resources_at(&self, bracket: u32, rung: u32) -> f64 {
        self.resources(bracket) * self.eta.powi(rung as i32)
    }
}

/// Produces the trials of a matrix round
pub struct MatrixExpander<'a> {
    matrix: &'a Matrix,
    producer: Option<&'a dyn SuggestionProducer>,
}

impl<'a> MatrixExpander<'a> {
    /// Expander for a matrix
    pub fn new(matrix: &'a Matrix) -> Self {
        Self { matrix, producer: None }
    }

    /// Producer consulted by model-driven searches
    pub fn with_producer(mut self, producer: &'a dyn SuggestionProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Trials of round `iteration`
    pub fn trials(&self, iteration: u32, observations: &[Observation]) -> Result<Vec<Trial>> {
        let configs = match self.matrix {
            Matrix::Grid(m) => {
                let mut grid = grid(&m.params)?;
                if let Some(n) = m.num_runs {
                    grid.truncate(n as usize);
                }
                grid
            }
            Matrix::Random(m) => sample(&m.params, m.num_runs, &mut rng(m.seed))?,
            Matrix::Mapping(m) => m
                .values
                .iter()
                .map(|v| v.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .collect(),
            Matrix::Hyperband(m) => self.hyperband(m, iteration, observations)?,
            Matrix::Bayes(m) if iteration == 0 => {
                sample(&m.params, m.num_initial_runs, &mut rng(m.seed))?
            }
            Matrix::Bayes(_) => self.suggest(iteration, observations, 1)?,
            Matrix::Hyperopt(m) => self.suggest(iteration, observations, m.num_runs)?,
            Matrix::Iterative(_) => self.suggest(iteration, observations, 1)?,
        };
        info!(kind = self.matrix.kind(), iteration, trials = configs.len(), "matrix round expanded");
        Ok(configs
            .into_iter()
            .enumerate()
            .map(|(i, params)| Trial {
                index: i as u32,
                params,
            })
            .collect())
    }

    fn suggest(
        &self,
        iteration: u32,
        observations: &[Observation],
        count: u32,
    ) -> Result<Vec<BTreeMap<String, Value>>> {
        let producer = self.producer.ok_or_else(|| {
            CompileError::matrix("matrix.kind", format!("{} search needs a suggestion producer", self.matrix.kind()))
        })?;
        producer.suggest(self.matrix, iteration, observations, count)
    }

    fn hyperband(
        &self,
        search: &HyperbandSearch,
        iteration: u32,
        observations: &[Observation],
    ) -> Result<Vec<BTreeMap<String, Value>>> {
        let hyperband = Hyperband::new(search)?;
        let (bracket, rung) = hyperband
            .position(iteration)
            .ok_or_else(|| CompileError::matrix("matrix", format!("no hyperband round {}", iteration)))?;
        let resource = hyperband.resources_at(bracket, rung);
        let resource = if search.resource.resource_type == "int" {
            Value::from(resource.round() as i64)
        } else {
            Value::from(resource)
        };
        debug!(bracket, rung, resource = %resource, "hyperband round");

        let mut configs = if rung == 0 {
            let seed = search.seed.map(|s| s.wrapping_add(u64::from(iteration)));
            sample(&search.params, hyperband.num_runs(bracket), &mut rng(seed))?
        } else {
            let keep = hyperband.num_runs_to_keep(hyperband.num_runs(bracket), rung);
            top_observations(observations, &search.metric, keep as usize)
        };
        for config in &mut configs {
            config.insert(search.resource.name.clone(), resource.clone());
        }
        Ok(configs)
    }
}

/// Best `keep` succeeded observations by metric
pub fn top_observations(
    observations: &[Observation],
    metric: &OptimizationMetric,
    keep: usize,
) -> Vec<BTreeMap<String, Value>> {
    let mut scored: Vec<(&Observation, f64)> = observations
        .iter()
        .filter(|o| o.status == Status::Succeeded)
        .filter_map(|o| o.metric.map(|m| (o, m)))
        .collect();
    scored.sort_by(|a, b| match metric.optimization {
        Optimization::Maximize => b.1.total_cmp(&a.1),
        Optimization::Minimize => a.1.total_cmp(&b.1),
    });
    scored.into_iter().take(keep).map(|(o, _)| o.params.clone()).collect()
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Cartesian product in declaration order; the first param varies slowest
fn grid(params: &MatrixParams) -> Result<Vec<BTreeMap<String, Value>>> {
    let mut configs = vec![BTreeMap::new()];
    for (name, param) in &params.0 {
        let values = enumerate(name, param)?;
        let mut next = Vec::with_capacity(configs.len() * values.len());
        for config in &configs {
            for value in &values {
                let mut config = config.clone();
                config.insert(name.clone(), value.clone());
                next.push(config);
            }
        }
        configs = next;
    }
    if params.is_empty() {
        configs.clear();
    }
    Ok(configs)
}

fn sample(params: &MatrixParams, count: u32, rng: &mut StdRng) -> Result<Vec<BTreeMap<String, Value>>> {
    let mut supports = BTreeMap::new();
    for (name, param) in &params.0 {
        if param.is_discrete() && !matches!(param, HpParam::Pchoice { .. }) {
            supports.insert(name.as_str(), enumerate(name, param)?);
        }
    }
    let mut configs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut config = BTreeMap::new();
        for (name, param) in &params.0 {
            let value = match supports.get(name.as_str()) {
                Some(values) if values.is_empty() => {
                    return Err(CompileError::matrix(format!("matrix.params.{}", name), "empty support"))
                }
                Some(values) => values[rng.gen_range(0..values.len())].clone(),
                None => draw(param, rng),
            };
            config.insert(name.clone(), value);
        }
        configs.push(config);
    }
    Ok(configs)
}

/// Finite support of a discrete distribution
fn enumerate(name: &str, param: &HpParam) -> Result<Vec<Value>> {
    let path = || format!("matrix.params.{}", name);
    match param {
        HpParam::Choice { value } => Ok(value.clone()),
        HpParam::Pchoice { value } => Ok(value.iter().map(|(v, _)| v.clone()).collect()),
        HpParam::Range { value } => {
            if value.step == 0.0 || (value.stop - value.start) * value.step < 0.0 {
                return Err(CompileError::matrix(path(), "range step does not reach stop"));
            }
            let integral = value.start.fract() == 0.0 && value.step.fract() == 0.0;
            let count = ((value.stop - value.start) / value.step).ceil().max(0.0) as u64;
            Ok((0..count)
                .map(|i| {
                    let x = value.start + i as f64 * value.step;
                    if integral {
                        Value::from(x as i64)
                    } else {
                        Value::from(x)
                    }
                })
                .collect())
        }
        HpParam::Linspace { value } => Ok(space(value).into_iter().map(Value::from).collect()),
        HpParam::Logspace { value } => Ok(space(value)
            .into_iter()
            .map(|x| Value::from(10f64.powf(x)))
            .collect()),
        HpParam::Geomspace { value } => {
            if value.start <= 0.0 || value.stop <= 0.0 {
                return Err(CompileError::matrix(path(), "geomspace bounds must be positive"));
            }
            let log = HpSpace {
                start: value.start.ln(),
                stop: value.stop.ln(),
                num: value.num,
            };
            Ok(space(&log).into_iter().map(|x| Value::from(x.exp())).collect())
        }
        HpParam::Daterange { value } => date_range(value).map_err(|e| CompileError::matrix(path(), e)),
        HpParam::Datetimerange { value } => {
            datetime_range(value).map_err(|e| CompileError::matrix(path(), e))
        }
        other => Err(CompileError::matrix(
            path(),
            format!("`{}` is continuous and cannot be enumerated", other.kind()),
        )),
    }
}

/// `num` evenly spaced points, bounds included
fn space(value: &HpSpace) -> Vec<f64> {
    let num = value.num.max(0.0) as u64;
    match num {
        0 => Vec::new(),
        1 => vec![value.start],
        n => {
            let step = (value.stop - value.start) / (n - 1) as f64;
            (0..n).map(|i| value.start + i as f64 * step).collect()
        }
    }
}

fn date_range(value: &HpDateRange) -> std::result::Result<Vec<Value>, String> {
    let parse = |s: &str| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).map_err(|e| format!("`{}`: {}", s, e));
    let (start, stop) = (parse(&value.start)?, parse(&value.stop)?);
    let step = value.step.round() as i64;
    if step <= 0 {
        return Err("daterange step must be a positive number of days".to_string());
    }
    let mut out = Vec::new();
    let mut current = start;
    while current < stop {
        out.push(Value::String(current.format(DATE_FORMAT).to_string()));
        current += Duration::days(step);
    }
    Ok(out)
}

fn datetime_range(value: &HpDateRange) -> std::result::Result<Vec<Value>, String> {
    let parse = |s: &str| {
        DATETIME_FORMATS
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(s.trim(), f).ok())
            .ok_or_else(|| format!("`{}` is not a datetime", s))
    };
    let (start, stop) = (parse(&value.start)?, parse(&value.stop)?);
    let step = value.step.round() as i64;
    if step <= 0 {
        return Err("datetimerange step must be a positive number of seconds".to_string());
    }
    let mut out = Vec::new();
    let mut current = start;
    while current < stop {
        out.push(Value::String(current.format(DATETIME_FORMATS[0]).to_string()));
        current += Duration::seconds(step);
    }
    Ok(out)
}

fn normal(rng: &mut StdRng, loc: f64, scale: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    loc + scale * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn quantize(x: f64, q: f64) -> f64 {
    if q > 0.0 {
        (x / q).round() * q
    } else {
        x
    }
}

/// One sample of a continuous or weighted distribution
fn draw(param: &HpParam, rng: &mut StdRng) -> Value {
    let uniform = |rng: &mut StdRng, low: f64, high: f64| {
        if high > low {
            rng.gen_range(low..high)
        } else {
            low
        }
    };
    let x = match param {
        HpParam::Pchoice { value } => {
            let total: f64 = value.iter().map(|(_, p)| p).sum();
            let mut target = rng.gen::<f64>() * total;
            for (v, p) in value {
                if target < *p {
                    return v.clone();
                }
                target -= p;
            }
            return value.last().map(|(v, _)| v.clone()).unwrap_or(Value::Null);
        }
        HpParam::Uniform { value } => uniform(rng, value.low, value.high),
        HpParam::Quniform { value } => quantize(uniform(rng, value.low, value.high), value.q),
        HpParam::Loguniform { value } => uniform(rng, value.low, value.high).exp(),
        HpParam::Qloguniform { value } => quantize(uniform(rng, value.low, value.high).exp(), value.q),
        HpParam::Normal { value } => normal(rng, value.loc, value.scale),
        HpParam::Qnormal { value } => quantize(normal(rng, value.loc, value.scale), value.q),
        HpParam::Lognormal { value } => normal(rng, value.loc, value.scale).exp(),
        HpParam::Qlognormal { value } => quantize(normal(rng, value.loc, value.scale).exp(), value.q),
        _ => return Value::Null,
    };
    Value::from(x)
}

impl OperationCompiler<'_> {
    /// Compile every trial of a matrix round
    pub async fn compile_matrix(
        &self,
        iteration: u32,
        observations: &[Observation],
        producer: Option<&dyn SuggestionProducer>,
    ) -> Result<Vec<CompiledOperation>> {
        let resolved = self.resolve().await?;
        self.compile_round(&resolved, iteration, observations, producer)
    }

    /// Compile every trial of a matrix round on a resolved operation
    pub fn compile_round(
        &self,
        resolved: &Resolved,
        iteration: u32,
        observations: &[Observation],
        producer: Option<&dyn SuggestionProducer>,
    ) -> Result<Vec<CompiledOperation>> {
        let matrix = resolved
            .operation
            .matrix
            .as_ref()
            .ok_or_else(|| CompileError::matrix("matrix", "operation has no matrix"))?;
        let mut expander = MatrixExpander::new(matrix);
        if let Some(producer) = producer {
            expander = expander.with_producer(producer);
        }
        expander
            .trials(iteration, observations)?
            .iter()
            .map(|trial| self.compile_trial(resolved, iteration, trial))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn matrix(doc: Value) -> Matrix {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn grid_is_declaration_major() {
        let m = matrix(json!({
            "kind": "grid",
            "params": {
                "lr": {"kind": "choice", "value": [0.1, 0.01]},
                "bs": {"kind": "choice", "value": [16, 32]},
            }
        }));
        let trials = MatrixExpander::new(&m).trials(0, &[]).unwrap();
        let tuples: Vec<(Value, Value)> = trials
            .iter()
            .map(|t| (t.params["lr"].clone(), t.params["bs"].clone()))
            .collect();
        assert_eq!(
            tuples,
            vec![
                (json!(0.1), json!(16)),
                (json!(0.1), json!(32)),
                (json!(0.01), json!(16)),
                (json!(0.01), json!(32)),
            ]
        );
        assert_eq!(trials[3].index, 3);
    }

    #[test]
    fn grid_truncates_to_num_runs() {
        let m = matrix(json!({
            "kind": "grid",
            "numRuns": 3,
            "params": {"x": {"kind": "range", "value": "0:10:1"}}
        }));
        let trials = MatrixExpander::new(&m).trials(0, &[]).unwrap();
        assert_eq!(trials.len(), 3);
        assert_eq!(trials[2].params["x"], json!(2));
    }

    #[test]
    fn grid_rejects_continuous_distributions() {
        let m = matrix(json!({
            "kind": "grid",
            "params": {"lr": {"kind": "uniform", "value": [0, 1]}}
        }));
        let err = MatrixExpander::new(&m).trials(0, &[]).unwrap_err();
        assert!(matches!(err, CompileError::Matrix { ref path, .. } if path == "matrix.params.lr"));
    }

    #[rstest]
    #[case::linspace(json!({"kind": "linspace", "value": [0, 1, 3]}), vec![json!(0.0), json!(0.5), json!(1.0)])]
    #[case::logspace(json!({"kind": "logspace", "value": "0:2:3"}), vec![json!(1.0), json!(10.0), json!(100.0)])]
    #[case::daterange(
        json!({"kind": "daterange", "value": {"start": "2024-01-01", "stop": "2024-01-05", "step": 2}}),
        vec![json!("2024-01-01"), json!("2024-01-03")]
    )]
    fn enumerates_discrete_distributions(#[case] param: Value, #[case] expected: Vec<Value>) {
        let param: HpParam = serde_json::from_value(param).unwrap();
        assert_eq!(enumerate("x", &param).unwrap(), expected);
    }

    #[test]
    fn random_is_reproducible_with_seed() {
        let m = matrix(json!({
            "kind": "random",
            "numRuns": 5,
            "seed": 42,
            "params": {
                "lr": {"kind": "loguniform", "value": [-5, -1]},
                "opt": {"kind": "choice", "value": ["sgd", "adam"]},
                "drop": {"kind": "pchoice", "value": [[0.1, 0.5], [0.5, 0.5]]},
            }
        }));
        let a = MatrixExpander::new(&m).trials(0, &[]).unwrap();
        let b = MatrixExpander::new(&m).trials(0, &[]).unwrap();
        assert_eq!(a.len(), 5);
        assert_eq!(a, b);
        for trial in &a {
            let lr = trial.params["lr"].as_f64().unwrap();
            assert!(lr >= (-5f64).exp() && lr < (-1f64).exp());
        }
    }

    #[test]
    fn mapping_yields_one_trial_per_value() {
        let m = matrix(json!({
            "kind": "mapping",
            "values": [{"lr": 0.1}, {"lr": 0.2, "bs": 8}]
        }));
        let trials = MatrixExpander::new(&m).trials(0, &[]).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[1].params["bs"], json!(8));
    }

    fn hyperband() -> Matrix {
        matrix(json!({
            "kind": "hyperband",
            "maxIterations": 81,
            "eta": 3,
            "seed": 1,
            "resource": {"name": "epochs", "type": "int"},
            "metric": {"name": "loss", "optimization": "minimize"},
            "params": {"lr": {"kind": "uniform", "value": [0, 1]}}
        }))
    }

    #[test]
    fn hyperband_brackets_follow_the_classic_table() {
        let Matrix::Hyperband(search) = hyperband() else { unreachable!() };
        let hb = Hyperband::new(&search).unwrap();
        assert_eq!(hb.s_max(), 4);
        let runs: Vec<u32> = (0..=4).rev().map(|s| hb.num_runs(s)).collect();
        assert_eq!(runs, vec![81, 34, 15, 8, 5]);
        assert_eq!(hb.resources(4), 1.0);
        assert_eq!(hb.rounds(), 15);
        assert_eq!(hb.position(0), Some((4, 0)));
        assert_eq!(hb.position(5), Some((3, 0)));
        assert_eq!(hb.position(14), Some((0, 0)));
        assert_eq!(hb.position(15), None);
    }

    #[test]
    fn hyperband_promotes_best_observations() {
        let m = hyperband();
        let first = MatrixExpander::new(&m).trials(0, &[]).unwrap();
        assert_eq!(first.len(), 81);
        assert_eq!(first[0].params["epochs"], json!(1));

        let observations: Vec<Observation> = first
            .iter()
            .enumerate()
            .map(|(i, t)| Observation {
                params: t.params.clone(),
                metric: Some(i as f64),
                status: Status::Succeeded,
            })
            .collect();
        let second = MatrixExpander::new(&m).trials(1, &observations).unwrap();
        assert_eq!(second.len(), 27);
        assert_eq!(second[0].params["lr"], first[0].params["lr"]);
        assert_eq!(second[0].params["epochs"], json!(3));
    }

    #[rstest]
    #[case::grid(json!({"kind": "grid", "params": {"a": {"kind": "choice", "value": [1]}}}), false, 1)]
    #[case::bayes(
        json!({"kind": "bayes", "numInitialRuns": 2, "maxIterations": 4,
               "metric": {"name": "loss", "optimization": "minimize"},
               "params": {"a": {"kind": "uniform", "value": [0, 1]}}}),
        true,
        4
    )]
    fn iteration_bookkeeping(#[case] doc: Value, #[case] reschedule: bool, #[case] total: u32) {
        let m = matrix(doc);
        assert_eq!(should_reschedule(&m), reschedule);
        assert_eq!(create_iteration(&m, None).unwrap(), Some(0));
        assert_eq!(create_iteration(&m, Some(total - 1)).unwrap(), None);
    }

    #[test]
    fn iterative_searches_ask_the_producer() {
        let m = matrix(json!({
            "kind": "hyperopt",
            "numRuns": 2,
            "maxIterations": 3,
            "metric": {"name": "loss", "optimization": "minimize"},
            "params": {"a": {"kind": "uniform", "value": [0, 1]}}
        }));
        let mut producer = MockSuggestionProducer::new();
        producer
            .expect_suggest()
            .withf(|_, iteration, _, count| *iteration == 1 && *count == 2)
            .returning(|_, _, _, _| {
                Ok(vec![
                    BTreeMap::from([("a".to_string(), json!(0.25))]),
                    BTreeMap::from([("a".to_string(), json!(0.75))]),
                ])
            });
        let trials = MatrixExpander::new(&m).with_producer(&producer).trials(1, &[]).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[1].params["a"], json!(0.75));

        let err = MatrixExpander::new(&m).trials(1, &[]).unwrap_err();
        assert!(matches!(err, CompileError::Matrix { .. }));
    }
}
