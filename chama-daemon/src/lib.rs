//! Background sync daemon: store watcher, push processor, pull session and
//! the control socket.

mod error;
pub mod log_rotation;
pub mod logging;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
    SyncDirection,
};
pub use runtime::{run, start_blocking, DaemonState, JobSummary};
