// Built-in stage functions served by the local tier pool

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tierflow_core::{FunctionRegistry, Parameters, TierId};

/// Register every built-in named in `routes` (function -> tier)
pub fn register_builtins(
    registry: &mut FunctionRegistry,
    routes: &BTreeMap<String, String>,
) -> Result<()> {
    for (name, tier) in routes {
        let tier = TierId::new(tier.clone());
        match name.as_str() {
            "echo" => registry.register_fn(name.clone(), tier, echo)?,
            "sum" => registry.register_fn(name.clone(), tier, sum)?,
            "sleep" => registry.register_fn(name.clone(), tier, sleep)?,
            "fail" => registry.register_fn(name.clone(), tier, fail)?,
            other => bail!("Unknown built-in function '{}'", other),
        }
    }

    Ok(())
}

/// Returns its parameters unchanged
async fn echo(params: Parameters) -> Result<Value> {
    Ok(Value::Object(params.into_iter().collect()))
}

/// Adds up the numeric array `values`
async fn sum(params: Parameters) -> Result<Value> {
    let values = params
        .get("values")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("'values' must be an array of numbers"))?;

    let mut total = 0.0;
    for value in values {
        total += value
            .as_f64()
            .ok_or_else(|| anyhow!("'values' contains a non-number: {}", value))?;
    }

    Ok(json!({ "sum": total }))
}

/// Waits `ms` milliseconds
async fn sleep(params: Parameters) -> Result<Value> {
    let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(json!({ "slept_ms": ms }))
}

/// Always fails with `message`
async fn fail(params: Parameters) -> Result<Value> {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("stage failed on request");
    Err(anyhow!(message.to_string()))
}
