#![no_std]

/// Remote-control entry points that reply with a single integer.
pub mod control;
/// Driver for reading from a DHT22 with configurable bit timing.
pub mod dht22;
/// A one-factor-at-a-time search for reliable DHT22 timing parameters.
pub mod experiment;
/// Per-phase statistics for the experiment.
pub mod stats;
/// Persistence of the timing configuration.
pub mod store;
/// Microsecond clock and critical-section capabilities used by the driver.
pub mod timer;
/// The driver's four timing parameters and their bounds.
pub mod timing;
