pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use server::{DiegoServer, ServerBuilder, build_app, build_auth_state};
