pub mod context;
pub mod device_select;
pub mod dispatcher;
pub mod handlers;
pub mod platform;
pub mod readiness;
pub mod wire;

pub use context::DispatchContext;
pub use wire::{Request, Response};
