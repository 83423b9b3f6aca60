//! The WhatsApp session: client abstraction, the gateway adapter that drives
//! a WPPConnect server, and the manager that owns connection state.

pub mod client;
pub mod gateway;
pub mod manager;
pub mod mock;

pub use client::{MediaFile, StartOutcome, WhatsAppClient};
pub use gateway::{parse_webhook, GatewayClient, GatewayConfig};
pub use manager::{SessionEvent, SessionManager};
