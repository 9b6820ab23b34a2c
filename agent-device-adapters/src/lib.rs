pub mod android;
pub mod device;
pub mod error;
pub mod executor;
pub mod ios_device;
pub mod ios_simulator;
pub mod xctest_runner;

pub use device::{Device, DeviceKind, Readiness};
pub use error::{AdapterError, AdapterFailureReason};
pub use executor::{ProcessRunner, RunOptions, RunOutput, SystemProcessRunner};
pub use xctest_runner::XctestRunnerClient;
