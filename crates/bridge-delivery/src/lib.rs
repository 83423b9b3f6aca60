//! Outbound delivery and the backend seam: bearer-authenticated HTTP client,
//! retry policy, queue draining, the cached contact directory and group
//! management.

pub mod backend;
pub mod contacts;
pub mod groups;
pub mod pipeline;
pub mod retry;

pub use backend::{
    BackendClient, BackendConfig, ContactDirectory, GroupQueue, IncomingSink, MessageQueue,
};
pub use groups::GroupManager;
pub use pipeline::DeliveryPipeline;
pub use retry::RetryPolicy;
