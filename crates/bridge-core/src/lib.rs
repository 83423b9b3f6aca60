pub mod clock;
pub mod contacts;
pub mod credential;
pub mod dedup;
pub mod errors;
pub mod events;
pub mod groups;
pub mod identity;
pub mod ids;
pub mod media;
pub mod message;
pub mod phone;
pub mod state;

pub use credential::BearerToken;
pub use errors::BridgeError;
pub use events::WireEvent;
pub use state::ConnectionState;
