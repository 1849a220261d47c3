// Utils

pub mod logging;
pub mod metrics_server;
pub mod prometheus_metrics;

pub use logging::init_tracing;
pub use metrics_server::setup_prometheus_metrics;
