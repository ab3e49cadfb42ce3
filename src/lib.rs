pub mod async_optimizer;
pub mod bottleneck;
pub mod caching;
pub mod config;
pub mod logging;
pub mod manager;
pub mod metrics_store;
pub mod profiler;
pub mod resources;

pub use async_optimizer::AsyncOptimizer;
pub use bottleneck::BottleneckDetector;
pub use caching::CachingService;
pub use manager::{PerfManagerActor, Telemetry};
pub use profiler::Profiler;
