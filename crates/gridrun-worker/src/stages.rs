//! Built-in stages.
//!
//! These move and reshape data between the numeric steps of a sweep: picking
//! parameters, sampling a test signal, adding noise, decimating, measuring the
//! error of a restored signal and shaping the stored log. Solvers themselves
//! are registered by the embedding application.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tracing::debug;

use gridrun_core::DataMap;

use crate::stage::{Stage, StageError, StageInput, StageRegistry};

/// Register every built-in under its tag.
pub fn register_builtins(registry: &mut StageRegistry) {
    registry.register("assign", || Box::new(Assign));
    registry.register("signal", || Box::new(Signal));
    registry.register("noise", || Box::new(Noise));
    registry.register("decimate", || Box::new(Decimate));
    registry.register("epsilon", || Box::new(Epsilon));
    registry.register("save", || Box::new(Save));
}

fn number(value: &Value, field: &str) -> Result<f64, StageError> {
    value.as_f64().ok_or_else(|| StageError::InvalidField {
        field: field.to_string(),
        expected: "a number",
    })
}

fn count(value: &Value, field: &str) -> Result<usize, StageError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| StageError::InvalidField {
            field: field.to_string(),
            expected: "a non-negative integer",
        })
}

fn series(value: &Value, field: &str) -> Result<Vec<f64>, StageError> {
    let invalid = || StageError::InvalidField {
        field: field.to_string(),
        expected: "an array of numbers",
    };
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_f64().ok_or_else(invalid))
        .collect()
}

fn success(input: &StageInput<'_>) -> Result<bool, StageError> {
    input
        .field("success")?
        .as_bool()
        .ok_or_else(|| StageError::InvalidField {
            field: "success".to_string(),
            expected: "a boolean",
        })
}

/// False once an upstream stage reported a numeric failure. No marker means
/// nothing has failed yet.
fn upstream_ok(input: &StageInput<'_>) -> Result<bool, StageError> {
    match input.data.get("success") {
        None => Ok(true),
        Some(_) => success(input),
    }
}

fn update(key: &str, value: Value) -> DataMap {
    let mut out = DataMap::new();
    out.insert(key.to_string(), value);
    out
}

/// Numeric failure marker. JSON has no NaN or infinity, so a series that
/// left the finite range is reported as data instead of being stored.
fn numeric_failure(stage: &str, field: &str) -> DataMap {
    debug!(stage, field, "Non-finite output, marking job as failed");
    update("success", Value::Bool(false))
}

/// `{key: values}`, or the failure marker if any value is not finite.
fn finite_series(stage: &str, key: &str, values: Vec<f64>) -> DataMap {
    if values.iter().all(|x| x.is_finite()) {
        update(key, json!(values))
    } else {
        numeric_failure(stage, key)
    }
}

/// Copies the parameter record's attributes into the data.
pub struct Assign;

impl Stage for Assign {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
        Ok(input.params()?.attributes.clone())
    }
}

/// Samples `size` points of a sum of damped cosines over `range`.
///
/// A signal that overflows (e.g. negative damping over a long range) is
/// reported as `success: false` rather than stored.
///
/// Each entry of `components` is `{amplitude, frequency, damping?, phase?}`.
/// A parameter record carrying `offset` shifts the range by `offset * pi`.
pub struct Signal;

impl Stage for Signal {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
        if !upstream_ok(&input)? {
            return Ok(DataMap::new());
        }
        let range = series(input.field("range")?, "range")?;
        let &[start, end] = range.as_slice() else {
            return Err(StageError::InvalidField {
                field: "range".to_string(),
                expected: "a pair of numbers",
            });
        };
        let size = count(input.field("size")?, "size")?;
        let shift = match input.params.and_then(|p| p.get("offset")) {
            Some(offset) => number(offset, "offset")? * PI,
            None => 0.0,
        };

        let components = input
            .field("components")?
            .as_array()
            .ok_or_else(|| StageError::InvalidField {
                field: "components".to_string(),
                expected: "an array of components",
            })?
            .iter()
            .map(|c| -> Result<(f64, f64, f64, f64), StageError> {
                let attr = |name: &str| c.get(name).map(|v| number(v, name)).transpose();
                Ok((
                    attr("amplitude")?.unwrap_or(1.0),
                    attr("frequency")?.ok_or_else(|| StageError::MissingField("frequency".into()))?,
                    attr("damping")?.unwrap_or(0.0),
                    attr("phase")?.unwrap_or(0.0),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let step = if size > 1 {
            (end - start) / (size - 1) as f64
        } else {
            0.0
        };
        let source: Vec<f64> = (0..size)
            .map(|i| {
                let t = start + shift + step * i as f64;
                components
                    .iter()
                    .map(|(amplitude, frequency, damping, phase)| {
                        amplitude * (-damping * t).exp() * (2.0 * PI * frequency * t + phase).cos()
                    })
                    .sum::<f64>()
            })
            .collect();

        Ok(finite_series("signal", "source", source))
    }
}

/// Adds white noise with deviation `sigma * max|source|` to `source`.
///
/// The generator is seeded from `sigma` and the signal length, so the output
/// is reproducible for the same inputs and the stage can be cached.
pub struct Noise;

impl Noise {
    fn gaussian(rng: &mut StdRng) -> f64 {
        // Box-Muller; 1 - u keeps the logarithm finite.
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

impl Stage for Noise {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
        if !upstream_ok(&input)? {
            return Ok(DataMap::new());
        }
        let source = series(input.field("source")?, "source")?;
        let sigma = number(input.param("sigma")?, "sigma")?;

        let peak = source.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        let deviation = sigma * peak;
        let mut rng = StdRng::seed_from_u64(sigma.to_bits() ^ source.len() as u64);
        let signal: Vec<f64> = source
            .iter()
            .map(|x| x + deviation * Self::gaussian(&mut rng))
            .collect();

        Ok(finite_series("noise", "signal", signal))
    }
}

/// Keeps every `step`-th sample of `signal`.
pub struct Decimate;

impl Stage for Decimate {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
        if !upstream_ok(&input)? {
            return Ok(DataMap::new());
        }
        let step = count(input.param("step")?, "step")?;
        if step == 0 {
            return Err(StageError::InvalidField {
                field: "step".to_string(),
                expected: "at least 1",
            });
        }
        let signal = input.field("signal")?.as_array().ok_or_else(|| StageError::InvalidField {
            field: "signal".to_string(),
            expected: "an array",
        })?;
        let decimated: Vec<Value> = signal.iter().step_by(step).cloned().collect();

        let mut out = update("signal", Value::Array(decimated));
        out.insert("dec_step".to_string(), json!(step));
        Ok(out)
    }
}

/// Normalized L2 distance between `result.restore` and `source`.
///
/// Adds nothing when the upstream solver reported `success: false`, and
/// reports a failure itself when the distance overflows.
pub struct Epsilon;

impl Stage for Epsilon {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
        if !success(&input)? {
            return Ok(DataMap::new());
        }
        let restore = input
            .field("result")?
            .get("restore")
            .ok_or_else(|| StageError::MissingField("result.restore".to_string()))?;
        let restore = series(restore, "result.restore")?;
        let source = series(input.field("source")?, "source")?;
        if restore.len() != source.len() || source.is_empty() {
            return Err(StageError::InvalidField {
                field: "result.restore".to_string(),
                expected: "a non-empty series as long as source",
            });
        }

        let norm = restore
            .iter()
            .zip(&source)
            .map(|(r, s)| (r - s).powi(2))
            .sum::<f64>()
            .sqrt();
        let eps = norm / source.len() as f64;
        if !eps.is_finite() {
            return Ok(numeric_failure("epsilon", "eps"));
        }
        Ok(update("eps", json!(eps)))
    }
}

/// Shapes the stored log: `null` on failure, otherwise the error measure,
/// restored and input signals and the fitted parameters.
pub struct Save;

impl Stage for Save {
    fn run(&self, input: StageInput<'_>) -> Result<DataMap, StageError> {
        if !success(&input)? {
            return Ok(update("log", Value::Null));
        }
        let result = input.field("result")?;
        let log = json!({
            "eps": input.field("eps")?,
            "restore": result.get("restore").cloned().unwrap_or(Value::Null),
            "params": result.get("params").cloned().unwrap_or(Value::Null),
            "signal": input.field("signal")?,
        });
        Ok(update("log", log))
    }
}
