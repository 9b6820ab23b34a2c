pub mod batch;
pub mod common;
pub mod device_ops;
pub mod find;
pub mod gesture;
pub mod interaction;
pub mod record;
pub mod replay;
pub mod session;
pub mod snapshot;
