//! Background daemon: hosts the process monitor and the sync engine, and
//! answers control requests on a Unix socket.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, serve, start_blocking, Daemon};
