pub mod config;
pub mod deadline;
pub mod diagnostics;
pub mod error;
pub mod lock;
pub mod retry;
pub mod script;
pub mod session;

pub use config::{resolve_home, Config};
pub use deadline::Deadline;
pub use diagnostics::{redact, CancellationRegistry, DiagnosticContext, DiagnosticEvent, DiagnosticSink};
pub use error::{DaemonError, DaemonResult, ErrorCode};
pub use lock::KeyedLock;
pub use retry::{retry_with_backoff, ReasonCode, RetryEvent, RetryPolicy};
pub use script::{
    default_script_path, default_trace_path, parse_ad_line, quote_token, render_script, safe_name,
    tokenize_line, write_atomic, ParsedLine,
};
pub use session::{
    Action, DeviceBinding, RecordingInfo, Session, SessionStore, TraceInfo, SELECTOR_EXEMPT_COMMANDS,
};
