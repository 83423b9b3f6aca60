pub mod client;
pub mod fanout;
pub mod handlers;
pub mod server;
pub mod subscriber;

pub use fanout::{Fanout, Forwarder};
pub use server::{start, BridgeServices, ServerConfig, ServerHandle};
pub use subscriber::RealtimeSubscriber;
