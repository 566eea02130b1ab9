//! Read-only HTTP and WebSocket dashboard

pub mod server;

pub use server::DashboardServer;
