//! Entry points for a remote-control surface, such as cloud functions that take an argument and
//! reply with a single integer.
//!
//! Each function returns the echoed value on success and [`FAILURE`] otherwise, so a caller that
//! only sees the integer can still tell the two apart.

use crate::experiment::{Experiment, TunableSensor};
use crate::store::ParameterStore;
use crate::timing::Parameter;

/// Returned by every function in this module when the request was not carried out.
pub const FAILURE: i32 = -1;

/// Sets one timing value on the sensor and saves the resulting configuration.
///
/// Refused while an experiment is running, since the experiment reconfigures the sensor before
/// every batch. Returns `value` on success.
pub fn set_parameter<TSensor, TStore>(
    sensor: &mut TSensor,
    store: &mut TStore,
    experiment: &Experiment,
    parameter: Parameter,
    value: i32,
) -> i32
where
    TSensor: TunableSensor,
    TStore: ParameterStore,
{
    if experiment.is_running() {
        log::warn!("Refusing to set {} during an experiment", parameter.name());
        return FAILURE;
    }
    let value_us = match u16::try_from(value) {
        Ok(value_us) => value_us,
        Err(_) => return FAILURE,
    };
    let params = match sensor.parameters().with(parameter, value_us) {
        Ok(params) => params,
        Err(err) => {
            log::warn!("Rejected remote change: {}", err);
            return FAILURE;
        }
    };
    if sensor.configure(params).is_err() {
        return FAILURE;
    }
    if let Err(err) = store.save(&params) {
        // The sensor already runs with the new value; it just won't survive a reboot.
        log::error!("Failed to save timing parameters: {:?}", err);
    }
    log::info!("{} set to {}us", parameter.name(), value_us);
    value
}

/// Same as [`set_parameter`], with the parameter given by its remote name (e.g. `"bitThreshold"`).
pub fn set_parameter_by_name<TSensor, TStore>(
    sensor: &mut TSensor,
    store: &mut TStore,
    experiment: &Experiment,
    name: &str,
    value: i32,
) -> i32
where
    TSensor: TunableSensor,
    TStore: ParameterStore,
{
    match Parameter::from_name(name) {
        Some(parameter) => set_parameter(sensor, store, experiment, parameter, value),
        None => FAILURE,
    }
}

/// Performs one read on demand. Returns 1 on success, 0 for a failed transaction and [`FAILURE`]
/// if the sensor could not be used at all.
pub fn read_now<TSensor: TunableSensor>(sensor: &mut TSensor, experiment: &Experiment) -> i32 {
    if experiment.is_running() {
        return FAILURE;
    }
    match sensor.read() {
        Ok(result) if result.is_success() => 1,
        Ok(_) => 0,
        Err(_) => FAILURE,
    }
}

/// Starts an experiment. Returns 1, or [`FAILURE`] if one is already running.
pub fn start_experiment(experiment: &mut Experiment, now_ms: u64) -> i32 {
    match experiment.begin(now_ms) {
        Ok(()) => 1,
        Err(_) => FAILURE,
    }
}

/// Requests cancellation. Returns 1, or [`FAILURE`] if nothing is running.
pub fn stop_experiment(experiment: &mut Experiment) -> i32 {
    match experiment.cancel() {
        Ok(()) => 1,
        Err(_) => FAILURE,
    }
}
