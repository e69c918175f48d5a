//! Upstream identity providers

mod broker;
mod google;
mod mock;

pub use broker::FederatedBrokerProvider;
pub use google::GoogleProvider;
pub use mock::MockProvider;
