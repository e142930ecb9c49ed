use core::ops::RangeInclusive;
use serde::{Deserialize, Serialize};

/// One of the four tunable timing values of the DHT22 driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parameter {
    /// How long the line is held low to wake the sensor, in microseconds.
    StartSignal,
    /// Maximum wait for each of the sensor's handshake transitions, in microseconds.
    ResponseTimeout,
    /// Maximum wait for each edge of a data bit, in microseconds.
    BitTimeout,
    /// High pulses at or above this many microseconds are read as a 1 bit.
    BitThreshold,
}

impl Parameter {
    /// All parameters, in the order the experiment sweeps them.
    pub const ALL: [Parameter; 4] = [
        Parameter::StartSignal,
        Parameter::ResponseTimeout,
        Parameter::BitTimeout,
        Parameter::BitThreshold,
    ];

    /// The inclusive range of accepted values, in microseconds.
    pub fn bounds(self) -> RangeInclusive<u16> {
        match self {
            Parameter::StartSignal => 800..=2000,
            Parameter::ResponseTimeout => 150..=300,
            Parameter::BitTimeout => 80..=150,
            Parameter::BitThreshold => 40..=60,
        }
    }

    /// The name used for this parameter by remote callers and serialized records.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::StartSignal => "startSignal",
            Parameter::ResponseTimeout => "responseTimeout",
            Parameter::BitTimeout => "bitTimeout",
            Parameter::BitThreshold => "bitThreshold",
        }
    }

    pub fn from_name(name: &str) -> Option<Parameter> {
        Parameter::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn get(self, params: &TimingParameters) -> u16 {
        match self {
            Parameter::StartSignal => params.start_signal_us,
            Parameter::ResponseTimeout => params.response_timeout_us,
            Parameter::BitTimeout => params.bit_timeout_us,
            Parameter::BitThreshold => params.bit_threshold_us,
        }
    }

    fn check(self, value: u16) -> Result<u16, InvalidParameter> {
        if self.bounds().contains(&value) {
            Ok(value)
        } else {
            Err(InvalidParameter {
                parameter: self,
                value,
            })
        }
    }
}

/// A timing value was outside the range accepted for its parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{} = {value}us is outside {}..={}us", .parameter.name(), .parameter.bounds().start(), .parameter.bounds().end())]
pub struct InvalidParameter {
    pub parameter: Parameter,
    pub value: u16,
}

/// The full timing configuration of the driver.
///
/// The defaults are the winners of an earlier experiment run against a DHT22 on a 10k external
/// pull-up, so they are a good starting point but not universal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingParameters {
    #[serde(rename = "startSignal")]
    pub start_signal_us: u16,
    #[serde(rename = "responseTimeout")]
    pub response_timeout_us: u16,
    #[serde(rename = "bitTimeout")]
    pub bit_timeout_us: u16,
    #[serde(rename = "bitThreshold")]
    pub bit_threshold_us: u16,
}

impl TimingParameters {
    pub const DEFAULT: TimingParameters = TimingParameters {
        start_signal_us: 1600,
        response_timeout_us: 240,
        bit_timeout_us: 115,
        bit_threshold_us: 46,
    };

    /// Builds a parameter set, rejecting the first field that is out of range.
    pub fn new(
        start_signal_us: u16,
        response_timeout_us: u16,
        bit_timeout_us: u16,
        bit_threshold_us: u16,
    ) -> Result<TimingParameters, InvalidParameter> {
        let params = TimingParameters {
            start_signal_us,
            response_timeout_us,
            bit_timeout_us,
            bit_threshold_us,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks every field against its bounds, in [`Parameter::ALL`] order.
    pub fn validate(&self) -> Result<(), InvalidParameter> {
        for parameter in Parameter::ALL {
            parameter.check(parameter.get(self))?;
        }
        Ok(())
    }

    /// Returns a copy with one field replaced. `self` is never modified.
    pub fn with(&self, parameter: Parameter, value: u16) -> Result<TimingParameters, InvalidParameter> {
        let value = parameter.check(value)?;
        let mut params = *self;
        match parameter {
            Parameter::StartSignal => params.start_signal_us = value,
            Parameter::ResponseTimeout => params.response_timeout_us = value,
            Parameter::BitTimeout => params.bit_timeout_us = value,
            Parameter::BitThreshold => params.bit_threshold_us = value,
        }
        Ok(params)
    }
}

impl Default for TimingParameters {
    fn default() -> Self {
        TimingParameters::DEFAULT
    }
}
