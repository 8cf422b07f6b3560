pub mod pool;
pub mod service;
pub mod telemetry;
