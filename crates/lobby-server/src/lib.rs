pub mod client;
pub mod server;

pub use client::ClientRegistry;
pub use server::{build_router, start, AppState, RoomCommand, ServerConfig, ServerHandle};
