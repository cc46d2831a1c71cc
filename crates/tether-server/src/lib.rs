pub mod config;
pub mod error;
pub mod poll;
pub mod registry;
pub mod server;
pub mod ws;

pub use config::ServerConfig;
pub use registry::{start_sweeper, SessionCounts, SessionRegistry, SweepStats};
pub use server::{build_router, start, AppState, ServerHandle};
