use serde_json::Value;

/// Renders one wire response, per spec §6's CLI exit codes: `0` on success,
/// `1` on any daemon error. `--json` flips rendering to the structured
/// envelope `{success, data|error}` instead of the human-readable form.
pub fn render(response: &Value, json: bool) -> i32 {
    let ok = response.get("ok").and_then(Value::as_bool).unwrap_or(false);

    if json {
        let envelope = if ok {
            serde_json::json!({ "success": true, "data": response.get("data").cloned().unwrap_or(Value::Null) })
        } else {
            serde_json::json!({ "success": false, "error": response.get("error").cloned().unwrap_or(Value::Null) })
        };
        println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string()));
        return if ok { 0 } else { 1 };
    }

    if ok {
        match response.get("data") {
            Some(Value::Null) | None => {}
            Some(data) => println!("{}", serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())),
        }
        return 0;
    }

    let error = response.get("error").cloned().unwrap_or(Value::Null);
    let code = error.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN");
    let message = error.get("message").and_then(Value::as_str).unwrap_or("request failed");
    eprintln!("Error ({code}): {message}");
    if let Some(hint) = error.get("hint").and_then(Value::as_str) {
        eprintln!("Hint: {hint}");
    }
    if let Some(diagnostic_id) = error.get("diagnosticId").and_then(Value::as_str) {
        eprintln!("Diagnostic ID: {diagnostic_id}");
    }
    if let Some(log_path) = error.get("logPath").and_then(Value::as_str) {
        eprintln!("Log: {log_path}");
    }
    1
}
