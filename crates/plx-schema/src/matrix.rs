//! Matrix (hyperparameter search) declarations
//!
//! Distributions accept three equivalent value forms: a `start:stop:step`
//! string, a positional list, or a mapping with named keys. They always
//! serialize as mappings.

use std::fmt;

use serde::de::{Error as DeError, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

fn numeric_parts(raw: &Value, keys: &[&str]) -> Result<Vec<f64>, String> {
    let as_f64 = |v: &Value| -> Result<f64, String> {
        match v {
            Value::Number(n) => n.as_f64().ok_or_else(|| format!("bad number {}", n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("bad number `{}`", s)),
            other => Err(format!("expected a number, got {}", other)),
        }
    };
    let values: Vec<f64> = match raw {
        Value::String(s) => s
            .split(':')
            .map(|p| as_f64(&Value::String(p.to_string())))
            .collect::<Result<_, _>>()?,
        Value::Array(items) => items.iter().map(as_f64).collect::<Result<_, _>>()?,
        Value::Object(map) => keys
            .iter()
            .map(|k| {
                map.get(*k)
                    .ok_or_else(|| format!("missing `{}`", k))
                    .and_then(as_f64)
            })
            .collect::<Result<_, _>>()?,
        other => return Err(format!("expected a string, list or mapping, got {}", other)),
    };
    if values.len() != keys.len() {
        return Err(format!(
            "expected {} values ({}), got {}",
            keys.len(),
            keys.join(", "),
            values.len()
        ));
    }
    Ok(values)
}

macro_rules! numeric_distribution {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ }) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Serialize)]
        pub struct $name {
            $(
                #[doc = stringify!($field)]
                pub $field: f64,
            )+
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = Value::deserialize(deserializer)?;
                let values = numeric_parts(&raw, &[$(stringify!($field)),+])
                    .map_err(D::Error::custom)?;
                let mut values = values.into_iter();
                Ok(Self {
                    $($field: values.next().unwrap_or_default(),)+
                })
            }
        }
    };
}

numeric_distribution!(
    /// `range`: `[start, stop)` by `step`
    HpRange { start, stop, step }
);
numeric_distribution!(
    /// `linspace`, `logspace`, `geomspace`: `num` points between bounds
    HpSpace { start, stop, num }
);
numeric_distribution!(
    /// `uniform`, `loguniform`
    HpBounds { low, high }
);
numeric_distribution!(
    /// `quniform`, `qloguniform`
    HpQBounds { low, high, q }
);
numeric_distribution!(
    /// `normal`, `lognormal`
    HpNormal { loc, scale }
);
numeric_distribution!(
    /// `qnormal`, `qlognormal`
    HpQNormal { loc, scale, q }
);

/// `daterange` (step in days) and `datetimerange` (step in seconds)
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HpDateRange {
    /// First date or datetime
    pub start: String,
    /// Exclusive end
    pub stop: String,
    /// Step
    pub step: f64,
}

impl<'de> Deserialize<'de> for HpDateRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        let text = |v: &Value| -> Result<String, D::Error> {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| D::Error::custom("date bounds must be strings"))
        };
        let (start, stop, step) = match &raw {
            Value::String(s) => {
                let parts: Vec<&str> = s.split(':').collect();
                match parts.as_slice() {
                    [start, stop, step] => (
                        Value::String(start.to_string()),
                        Value::String(stop.to_string()),
                        Value::String(step.to_string()),
                    ),
                    _ => return Err(D::Error::custom("expected `start:stop:step`")),
                }
            }
            Value::Array(items) if items.len() == 3 => {
                (items[0].clone(), items[1].clone(), items[2].clone())
            }
            Value::Object(map) => (
                map.get("start").cloned().unwrap_or(Value::Null),
                map.get("stop").cloned().unwrap_or(Value::Null),
                map.get("step").cloned().unwrap_or(Value::Null),
            ),
            _ => return Err(D::Error::custom("expected a string, list or mapping")),
        };
        let step = numeric_parts(&Value::Array(vec![step]), &["step"]).map_err(D::Error::custom)?;
        Ok(Self {
            start: text(&start)?,
            stop: text(&stop)?,
            step: step[0],
        })
    }
}

/// A hyperparameter distribution, discriminated by `kind`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HpParam {
    /// Uniform choice among values
    Choice {
        /// Candidate values
        value: Vec<Value>,
    },
    /// Weighted choice among `[value, probability]` pairs
    Pchoice {
        /// Candidate values and probabilities
        value: Vec<(Value, f64)>,
    },
    /// Arithmetic range
    Range {
        /// Bounds and step
        value: HpRange,
    },
    /// Date range
    Daterange {
        /// Bounds and step in days
        value: HpDateRange,
    },
    /// Datetime range
    Datetimerange {
        /// Bounds and step in seconds
        value: HpDateRange,
    },
    /// Evenly spaced points
    Linspace {
        /// Bounds and count
        value: HpSpace,
    },
    /// Points evenly spaced on a log scale (base 10 exponents)
    Logspace {
        /// Exponent bounds and count
        value: HpSpace,
    },
    /// Points in geometric progression
    Geomspace {
        /// Bounds and count
        value: HpSpace,
    },
    /// Continuous uniform
    Uniform {
        /// Bounds
        value: HpBounds,
    },
    /// Quantized uniform
    Quniform {
        /// Bounds and quantum
        value: HpQBounds,
    },
    /// `exp(uniform(low, high))`
    Loguniform {
        /// Bounds
        value: HpBounds,
    },
    /// Quantized log-uniform
    Qloguniform {
        /// Bounds and quantum
        value: HpQBounds,
    },
    /// Normal
    Normal {
        /// Mean and deviation
        value: HpNormal,
    },
    /// Quantized normal
    Qnormal {
        /// Mean, deviation and quantum
        value: HpQNormal,
    },
    /// `exp(normal(loc, scale))`
    Lognormal {
        /// Mean and deviation
        value: HpNormal,
    },
    /// Quantized log-normal
    Qlognormal {
        /// Mean, deviation and quantum
        value: HpQNormal,
    },
}

impl HpParam {
    /// Distribution name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Choice { .. } => "choice",
            Self::Pchoice { .. } => "pchoice",
            Self::Range { .. } => "range",
            Self::Daterange { .. } => "daterange",
            Self::Datetimerange { .. } => "datetimerange",
            Self::Linspace { .. } => "linspace",
            Self::Logspace { .. } => "logspace",
            Self::Geomspace { .. } => "geomspace",
            Self::Uniform { .. } => "uniform",
            Self::Quniform { .. } => "quniform",
            Self::Loguniform { .. } => "loguniform",
            Self::Qloguniform { .. } => "qloguniform",
            Self::Normal { .. } => "normal",
            Self::Qnormal { .. } => "qnormal",
            Self::Lognormal { .. } => "lognormal",
            Self::Qlognormal { .. } => "qlognormal",
        }
    }

    /// Whether the distribution has a finite support that can be enumerated
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            Self::Choice { .. }
                | Self::Pchoice { .. }
                | Self::Range { .. }
                | Self::Daterange { .. }
                | Self::Datetimerange { .. }
                | Self::Linspace { .. }
                | Self::Logspace { .. }
                | Self::Geomspace { .. }
        )
    }
}

/// All distribution names
pub const HP_PARAM_KINDS: &[&str] = &[
    "choice",
    "pchoice",
    "range",
    "daterange",
    "datetimerange",
    "linspace",
    "logspace",
    "geomspace",
    "uniform",
    "quniform",
    "loguniform",
    "qloguniform",
    "normal",
    "qnormal",
    "lognormal",
    "qlognormal",
];

/// Matrix params in declaration order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatrixParams(pub Vec<(String, HpParam)>);

impl MatrixParams {
    /// Names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Whether there are no params
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for MatrixParams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, param) in &self.0 {
            map.serialize_entry(name, param)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MatrixParams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = MatrixParams;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of param name to distribution")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut params = Vec::new();
                while let Some((name, param)) = access.next_entry::<String, HpParam>()? {
                    if params.iter().any(|(n, _): &(String, HpParam)| n == &name) {
                        return Err(A::Error::custom(format!("duplicate matrix param `{}`", name)));
                    }
                    params.push((name, param));
                }
                Ok(MatrixParams(params))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Metric optimization direction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimization {
    /// Higher is better
    Maximize,
    /// Lower is better
    Minimize,
}

/// Metric optimized by iterative searches
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetric {
    /// Metric name
    pub name: String,
    /// Direction
    pub optimization: Optimization,
}

/// Resource budgeted by hyperband
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HpResource {
    /// Param receiving the budget
    pub name: String,
    /// `int` or `float`
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// Stop when a metric crosses a threshold
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricEarlyStopping {
    /// Metric name
    pub metric: String,
    /// Threshold
    pub value: f64,
    /// Direction
    pub optimization: Optimization,
    /// Extra stopping policy (median, truncation, diff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
}

/// Stop when too many trials failed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureEarlyStopping {
    /// Percentage of failed trials
    pub percent: f64,
}

/// Early stopping policy, discriminated by `kind`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EarlyStopping {
    /// Metric threshold
    MetricEarlyStopping(MetricEarlyStopping),
    /// Failure ratio
    FailureEarlyStopping(FailureEarlyStopping),
}

/// Grid search
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSearch {
    /// Search space
    pub params: MatrixParams,
    /// Truncate the grid
    #[serde(default, alias = "num_runs", skip_serializing_if = "Option::is_none")]
    pub num_runs: Option<u32>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Random search
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomSearch {
    /// Search space
    pub params: MatrixParams,
    /// Number of trials
    #[serde(alias = "num_runs")]
    pub num_runs: u32,
    /// Sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Explicit list of param sets
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingSearch {
    /// One mapping per trial
    pub values: Vec<Map<String, Value>>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Hyperband
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperbandSearch {
    /// Search space
    pub params: MatrixParams,
    /// Maximum resource per trial
    #[serde(alias = "max_iterations")]
    pub max_iterations: u32,
    /// Downsampling rate
    pub eta: f64,
    /// Budgeted resource
    pub resource: HpResource,
    /// Metric to optimize
    pub metric: OptimizationMetric,
    /// Resume promoted trials instead of restarting them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<bool>,
    /// Sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Bayesian optimization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BayesSearch {
    /// Search space
    pub params: MatrixParams,
    /// Random trials before the model kicks in
    #[serde(alias = "num_initial_runs")]
    pub num_initial_runs: u32,
    /// Suggestion rounds
    #[serde(alias = "max_iterations")]
    pub max_iterations: u32,
    /// Acquisition function settings
    #[serde(default, alias = "utility_function", skip_serializing_if = "Option::is_none")]
    pub utility_function: Option<Value>,
    /// Metric to optimize
    pub metric: OptimizationMetric,
    /// Sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Hyperopt search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperoptSearch {
    /// Search space
    pub params: MatrixParams,
    /// Trials per suggestion round
    #[serde(alias = "num_runs")]
    pub num_runs: u32,
    /// Suggestion rounds
    #[serde(default, alias = "max_iterations", skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// `tpe`, `rand` or `anneal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    /// Metric to optimize
    pub metric: OptimizationMetric,
    /// Sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Custom iterative search driven by a user tuner
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterativeSearch {
    /// Search space
    pub params: MatrixParams,
    /// Suggestion rounds
    #[serde(alias = "max_iterations")]
    pub max_iterations: u32,
    /// Sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Tuner component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuner: Option<Value>,
    /// Parallel trials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Early stopping
    #[serde(default, alias = "early_stopping", skip_serializing_if = "Vec::is_empty")]
    pub early_stopping: Vec<EarlyStopping>,
}

/// Matrix, discriminated by `kind`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Matrix {
    /// Random search
    Random(RandomSearch),
    /// Grid search
    Grid(GridSearch),
    /// Hyperband
    Hyperband(HyperbandSearch),
    /// Bayesian optimization
    Bayes(BayesSearch),
    /// Hyperopt
    Hyperopt(HyperoptSearch),
    /// Custom iterative
    Iterative(IterativeSearch),
    /// Explicit mapping
    Mapping(MappingSearch),
}

/// All matrix kind names
pub const MATRIX_KINDS: &[&str] = &[
    "random",
    "grid",
    "hyperband",
    "bayes",
    "hyperopt",
    "iterative",
    "mapping",
];

impl Matrix {
    /// Kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Random(_) => "random",
            Self::Grid(_) => "grid",
            Self::Hyperband(_) => "hyperband",
            Self::Bayes(_) => "bayes",
            Self::Hyperopt(_) => "hyperopt",
            Self::Iterative(_) => "iterative",
            Self::Mapping(_) => "mapping",
        }
    }

    /// Search space (mapping has none)
    pub fn params(&self) -> Option<&MatrixParams> {
        match self {
            Self::Random(m) => Some(&m.params),
            Self::Grid(m) => Some(&m.params),
            Self::Hyperband(m) => Some(&m.params),
            Self::Bayes(m) => Some(&m.params),
            Self::Hyperopt(m) => Some(&m.params),
            Self::Iterative(m) => Some(&m.params),
            Self::Mapping(_) => None,
        }
    }

    /// Parallel trials
    pub fn concurrency(&self) -> Option<u32> {
        match self {
            Self::Random(m) => m.concurrency,
            Self::Grid(m) => m.concurrency,
            Self::Hyperband(m) => m.concurrency,
            Self::Bayes(m) => m.concurrency,
            Self::Hyperopt(m) => m.concurrency,
            Self::Iterative(m) => m.concurrency,
            Self::Mapping(m) => m.concurrency,
        }
    }

    /// Early stopping policies
    pub fn early_stopping(&self) -> &[EarlyStopping] {
        match self {
            Self::Random(m) => &m.early_stopping,
            Self::Grid(m) => &m.early_stopping,
            Self::Hyperband(m) => &m.early_stopping,
            Self::Bayes(m) => &m.early_stopping,
            Self::Hyperopt(m) => &m.early_stopping,
            Self::Iterative(m) => &m.early_stopping,
            Self::Mapping(m) => &m.early_stopping,
        }
    }
}
