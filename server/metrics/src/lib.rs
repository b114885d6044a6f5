pub mod config;
pub mod gateway;
pub mod http;
pub mod labels;
pub mod router;
pub mod store;

pub use config::MetricsConfig;
pub use gateway::GatewayMetrics;
pub use http::MetricsServer;
pub use labels::{BoundedLabel, LabelPolicy};
pub use router::RouterMetrics;
pub use store::StoreMetrics;
