mod admin;
pub mod config;
mod http_layers;
mod peer_api;
pub mod server;
pub mod state;
mod stream;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server};
pub use state::ServerState;
