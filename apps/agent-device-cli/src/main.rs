use std::path::PathBuf;

use agent_device_core::resolve_home;
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

mod daemon_client;
mod flags;
mod output;
mod spawn;

/// Thin client for the agent-device automation daemon. Argument parsing here
/// is deliberately shallow: every command's positionals and `--flag [value]`
/// pairs are forwarded to the daemon verbatim (§6), which owns validation.
#[derive(Parser, Debug)]
#[command(name = "agent-device", version, about = "Drives iOS and Android devices through the agent-device automation daemon")]
struct Cli {
    /// Overrides `$AGENT_DEVICE_HOME` / `~/.agent-device`.
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Emit the structured `{success, data|error}` envelope instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    /// Explicit session name; without it, commands route to the sole active session if there is one.
    #[arg(long, global = true)]
    session: Option<String>,

    /// Emit diagnostics to stderr in addition to the daemon's own log.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Tag this request for a verbose per-request diagnostic capture.
    #[arg(long, global = true)]
    debug: bool,

    /// Wire command name (`open`, `click`, `snapshot`, `replay`, ...).
    command: String,

    /// Positionals and `--flag [value]` pairs, in any order, for `command`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn init_logging(verbose: bool) {
    let filter = if verbose { EnvFilter::new("info") } else { EnvFilter::from_default_env() };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let home = resolve_home(cli.home.as_deref());
    let client = match spawn::ensure_daemon(&home).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error (UNAVAILABLE): {e}");
            std::process::exit(1);
        }
    };

    let (positionals, mut request_flags) = flags::split_args(&cli.args);

    if cli.verbose {
        request_flags.insert("verbose".to_string(), Value::Bool(true));
    }
    if cli.debug {
        request_flags.insert("debug".to_string(), Value::Bool(true));
    }

    let session = cli.session.clone().unwrap_or_else(|| "default".to_string());
    if cli.session.is_some() {
        request_flags.insert("session".to_string(), Value::String(session.clone()));
    }

    let response = match client.send(&session, &cli.command, positionals, request_flags).await {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error (UNAVAILABLE): {e}");
            std::process::exit(1);
        }
    };

    let code = output::render(&response, cli.json);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_trailing_flags() {
        let cli = Cli::try_parse_from([
            "agent-device",
            "press",
            "label=Continue",
            "--count",
            "3",
            "--double-tap",
        ])
        .unwrap();
        assert_eq!(cli.command, "press");
        assert_eq!(cli.args, vec!["label=Continue", "--count", "3", "--double-tap"]);
    }

    #[test]
    fn global_flags_are_accepted_before_the_command() {
        let cli = Cli::try_parse_from(["agent-device", "--json", "--session", "alpha", "devices"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.session.as_deref(), Some("alpha"));
        assert_eq!(cli.command, "devices");
        assert!(cli.args.is_empty());
    }

    #[test]
    fn missing_command_is_rejected() {
        assert!(Cli::try_parse_from(["agent-device"]).is_err());
    }
}
