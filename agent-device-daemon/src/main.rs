use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use agent_device_core::{resolve_home, Config};
use agent_device_daemon::{dispatcher, DispatchContext, Request};
use clap::Parser;
use rand::Rng;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::{prelude::__tracing_subscriber_SubscriberExt, Layer};

#[derive(Parser, Debug)]
#[command(name = "agent-device-daemon", about = "Loopback daemon driving iOS/Android automation commands")]
struct Cli {
    /// Overrides `$AGENT_DEVICE_HOME` / `~/.agent-device`.
    #[arg(long)]
    home: Option<PathBuf>,
}

#[derive(Serialize)]
struct DaemonInfo {
    port: u16,
    token: String,
    pid: u32,
    version: &'static str,
}

fn setup_logging(home: &PathBuf) -> anyhow::Result<WorkerGuard> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("agent-device-daemon")
        .filename_suffix("log")
        .max_log_files(5)
        .build(home)?;

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let make_env_filter = || {
        EnvFilter::from_default_env()
            .add_directive("tokio=debug".parse().unwrap())
            .add_directive("info".parse().unwrap())
    };

    let timer = tracing_subscriber::fmt::time::ChronoLocal::new("%Y-%m-%dT%H:%M:%S%.6fZ".to_string());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(timer.clone()).with_filter(make_env_filter()))
        .with(fmt::layer().with_writer(file_writer).with_timer(timer).with_filter(make_env_filter()))
        .init();

    Ok(guard)
}

fn generate_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

fn write_daemon_info(home: &PathBuf, info: &DaemonInfo) -> io::Result<PathBuf> {
    std::fs::create_dir_all(home)?;
    let path = home.join("daemon.json");
    let contents = serde_json::to_string_pretty(info)?;
    std::fs::write(&path, contents)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    Ok(path)
}

async fn handle_connection(ctx: Arc<DispatchContext>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "connection read error");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => dispatcher::dispatch(&ctx, req).await,
            Err(e) => agent_device_daemon::Response::from_daemon_error(&agent_device_core::DaemonError::invalid_args(
                format!("malformed request: {e}"),
            )),
        };

        let mut out = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                continue;
            }
        };
        out.push('\n');
        if let Err(e) = write_half.write_all(out.as_bytes()).await {
            warn!(error = %e, "connection write error");
            return;
        }
    }
}

/// Iterates every active session and runs the same cleanup `close` does:
/// flush `.ad` scripts, stop iOS simulator runners. Reuses the `close`
/// handler itself so shutdown never diverges from a client-initiated close.
async fn drain_sessions(ctx: &DispatchContext) {
    for name in ctx.sessions.names().await {
        if let Err(e) = dispatcher::handle_command(
            ctx,
            &agent_device_daemon::Request {
                token: ctx.token.clone(),
                session: name.clone(),
                command: "close".to_string(),
                positionals: Vec::new(),
                flags: Default::default(),
                meta: Default::default(),
            },
            &name,
        )
        .await
        {
            warn!(session = %name, error = %e.message, "failed to close session during shutdown");
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sighup.recv() => info!("received SIGHUP"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let home = resolve_home(cli.home.as_deref());
    std::fs::create_dir_all(&home)?;

    let _log_guard = setup_logging(&home)?;
    info!("starting agent-device daemon");

    let config = Config::load(&home.join("config.toml"));
    let token = generate_token();

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let port = listener.local_addr()?.port();

    let ctx = Arc::new(DispatchContext::new(home.clone(), token.clone(), config));

    let info_path = write_daemon_info(
        &home,
        &DaemonInfo { port, token: token.clone(), pid: std::process::id(), version: env!("CARGO_PKG_VERSION") },
    )?;
    info!(port, path = %info_path.display(), "daemon listening");

    let accept_ctx = ctx.clone();
    let accept_loop = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let conn_ctx = accept_ctx.clone();
                    tokio::spawn(async move {
                        handle_connection(conn_ctx, stream).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    });

    tokio::select! {
        _ = accept_loop => {}
        _ = wait_for_shutdown_signal() => {
            info!("shutting down");
        }
    }

    drain_sessions(&ctx).await;
    let _ = std::fs::remove_file(&info_path);
    info!("shutdown complete");

    Ok(())
}
