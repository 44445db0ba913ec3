//! IPC server for dashboard clients

pub mod protocol;
pub mod server;

pub use server::{DaemonContext, IpcServer};
