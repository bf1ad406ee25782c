//! Streaming throughput telemetry

mod token_speed;

pub use token_speed::{SpeedReport, StatsSink, TokenSpeedMonitor, TokenStats, TracingStatsSink};
