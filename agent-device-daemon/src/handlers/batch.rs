use agent_device_core::DaemonError;
use serde_json::{json, Value};

use crate::context::DispatchContext;
use crate::wire::Request;

/// One sub-command queued inside a `batch` request's `steps` flag: the same
/// shape as a wire `Request` minus auth/session routing, which the batch
/// handler supplies from the parent request.
#[derive(Debug, Clone, serde::Deserialize)]
struct BatchStep {
    command: String,
    #[serde(default)]
    positionals: Vec<String>,
    #[serde(default)]
    flags: std::collections::HashMap<String, Value>,
}

fn parse_steps(req: &Request) -> Result<Vec<BatchStep>, DaemonError> {
    let raw = req
        .flags
        .get("steps")
        .ok_or_else(|| DaemonError::invalid_args("batch requires a 'steps' array"))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| DaemonError::invalid_args(format!("malformed batch steps: {e}")))
}

/// `batch --steps [...]`, per spec §7: runs each sub-command against the
/// same session in order, stopping at the first failure. On failure the
/// error carries `{step, command, executed, total, partialResults}` so a
/// caller can see exactly how far the batch got.
pub async fn batch(ctx: &DispatchContext, req: &Request, session_name: &str) -> Result<Value, DaemonError> {
    let steps = parse_steps(req)?;
    if steps.is_empty() {
        return Err(DaemonError::invalid_args("batch requires at least one step"));
    }

    let total = steps.len();
    let mut partial_results = Vec::with_capacity(total);

    for (idx, step) in steps.iter().enumerate() {
        let synthetic = Request {
            token: req.token.clone(),
            session: session_name.to_string(),
            command: step.command.clone(),
            positionals: step.positionals.clone(),
            flags: step.flags.clone(),
            meta: req.meta.clone(),
        };

        match crate::dispatcher::handle_command(ctx, &synthetic, session_name).await {
            Ok(result) => partial_results.push(result),
            Err(err) => {
                return Err(err.into_batch_failure(idx + 1, &step.command, idx, total, partial_results));
            }
        }
    }

    Ok(json!({ "executed": total, "total": total, "results": partial_results }))
}
