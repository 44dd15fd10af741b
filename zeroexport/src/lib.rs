// control loop
pub mod aggregator;
pub mod balance;
pub mod control_config;
pub mod controller;
pub mod dispatcher;
pub mod freshness;
pub mod protection;
pub mod rate_limiter;
pub mod supervisor;
pub mod telemetry;

// device adapters
pub mod ahoy;
pub mod influx;
pub mod mystrom;
pub mod sources;
pub mod tibber;

// externally visible interfaces
pub mod hybrid_inverter;
pub mod metric_collector;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod simple_mqtt;

// internal interfaces
mod meter_frame;

pub use meter_frame::FrameLayout;
