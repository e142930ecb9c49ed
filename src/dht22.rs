use core::marker::PhantomData;
use core::time::Duration;
use embedded_hal::digital::blocking::{InputPin, IoPin, OutputPin};
use embedded_hal::digital::PinState;
use serde::Serialize;

use crate::experiment::TunableSensor;
use crate::store::{self, ParameterStore};
use crate::timer::{self, CriticalSection, MicrosecondClock};
use crate::timing::{InvalidParameter, Parameter, TimingParameters};

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error<TIoError> {
    /// Wrapped error from the HAL.
    #[error("pin error: {0:?}")]
    Wrapped(TIoError),
    /// Invalid argument was provided.
    #[error("invalid argument")]
    InvalidArgument,
    /// The pin was lost to a failed mode switch and the driver can no longer talk to the sensor.
    #[error("pin unavailable")]
    PinUnavailable,
}

impl<TIoError> From<TIoError> for Error<TIoError> {
    fn from(error: TIoError) -> Error<TIoError> {
        Error::Wrapped(error)
    }
}

/// Why a single transaction with the sensor failed.
///
/// These are expected in the field (loose wiring, noise, a marginal timing configuration) and are
/// reported through [`ReadResult::Failure`] rather than as an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum FailureKind {
    /// The sensor did not complete its low-high-low response to the start signal in time.
    #[error("no handshake from sensor")]
    HandshakeTimeout,
    /// An edge of one of the 40 data bits did not arrive in time.
    #[error("bit edge timed out")]
    BitTimeout,
    /// The fifth byte did not match the sum of the first four.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// The decoded values are outside what a DHT22 can report.
    #[error("reading out of range")]
    RangeViolation,
}

/// Data read from the DHT22.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub humidity_x10: u16,
    /// Sign-magnitude: bit 15 set means below zero.
    pub temperature_x10: u16,
}

impl Reading {
    fn from_raw_bytes(bytes: [u8; 4]) -> Reading {
        Reading {
            humidity_x10: ((bytes[0] as u16) << 8) | bytes[1] as u16,
            temperature_x10: ((bytes[2] as u16) << 8) | bytes[3] as u16,
        }
    }

    /// Relative humidity in percent.
    pub fn humidity(&self) -> f32 {
        self.humidity_x10 as f32 / 10.0
    }

    /// Temperature in degrees Celsius.
    pub fn temperature(&self) -> f32 {
        let result = (self.temperature_x10 & 0x7FFF) as f32 / 10.0;
        if (self.temperature_x10 & 0x8000) != 0 {
            return -result;
        }
        result
    }

    fn is_valid(&self) -> bool {
        // 0-100 %RH and -40-80 degrees Celsius.
        let temp_is_negative = self.temperature_x10 & 0x8000 != 0;
        let magnitude = self.temperature_x10 & 0x7FFF;
        let temp_is_valid =
            (temp_is_negative && magnitude <= 400) || (!temp_is_negative && magnitude <= 800);
        self.humidity_x10 <= 1000 && temp_is_valid
    }
}

/// The outcome of one [`Dht22::read`], after the driver's own retry.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum ReadResult {
    Success(Reading),
    Failure(FailureKind),
}

impl ReadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ReadResult::Success(_))
    }

    pub fn reading(&self) -> Option<Reading> {
        match self {
            ReadResult::Success(reading) => Some(*reading),
            ReadResult::Failure(_) => None,
        }
    }

    pub fn temperature(&self) -> Option<f32> {
        self.reading().map(|r| r.temperature())
    }

    pub fn humidity(&self) -> Option<f32> {
        self.reading().map(|r| r.humidity())
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            ReadResult::Success(_) => None,
            ReadResult::Failure(kind) => Some(*kind),
        }
    }
}

/// The minimum read interval of a DHT22.
///
/// Measured from the start of one raw attempt to the start of the next, retries included.
pub const MIN_DHT22_READ_INTERVAL: Duration = Duration::from_millis(2000);

/// How long the sensor needs after power-on before it will answer.
pub const DHT22_POWER_ON_DELAY: Duration = Duration::from_millis(1000);

/// Options to modify the behavior of the DHT22 driver.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// The minimum time interval that must pass between raw attempts. Cannot be below
    /// [`MIN_DHT22_READ_INTERVAL`].
    ///
    /// The gap is measured on the 32-bit microsecond clock, which wraps every ~71.6 minutes. After
    /// an idle stretch longer than that, the next read may wait up to one extra interval. It never
    /// waits longer, and never starts early.
    pub min_read_interval: Duration,
    /// The maximum number of raw attempts for any call to [`Dht22::read`].
    ///
    /// Every failure kind is retried. Keep in mind the `min_read_interval` when setting this
    /// option: with the default 2 attempts a failing read takes over 4 seconds.
    pub max_attempts: u8,
    /// How long after construction the first attempt is held off.
    pub power_on_delay: Duration,
}

pub const DEFAULT_DHT22_OPTIONS: Options = Options {
    min_read_interval: MIN_DHT22_READ_INTERVAL,
    max_attempts: 2,
    power_on_delay: DHT22_POWER_ON_DELAY,
};

/// How long the line is driven high after the start signal, before it is released.
const RELEASE_HIGH_US: u32 = 30;
/// Settling time after switching the pin back to an input.
const RELEASE_SETTLE_US: u32 = 10;

/// A DHT22 on a single GPIO line with an external pull-up.
///
/// The line idles as an input so the pull-up holds it high between reads. The driver never
/// enables an internal pull-up: its extra capacitance rounds the edges that the bit timing
/// depends on.
#[derive(Debug)]
pub struct Dht22<TInputPin, TOutputPin, TClock, TCritical> {
    input_pin: Option<TInputPin>,
    clock: TClock,
    critical_section: TCritical,
    params: TimingParameters,
    options: Options,
    created_at: u32,
    last_attempt_start: Option<u32>,
    last_reading: Option<Reading>,
    last_read_succeeded: bool,
    _output_pin: PhantomData<fn() -> TOutputPin>,
}

impl<TInputPin, TOutputPin, TError, TClock, TCritical> Dht22<TInputPin, TOutputPin, TClock, TCritical>
where
    TInputPin: InputPin<Error = TError> + IoPin<TInputPin, TOutputPin, Error = TError>,
    TOutputPin: OutputPin<Error = TError> + IoPin<TInputPin, TOutputPin, Error = TError>,
    TClock: MicrosecondClock,
    TCritical: CriticalSection,
{
    /// Constructs a DHT22 sensor that reads from the given pin, which should be configured as an
    /// input with no internal pull.
    ///
    /// If options is `None`, then [`DEFAULT_DHT22_OPTIONS`] is used. The timing starts at
    /// [`TimingParameters::DEFAULT`]; use [`Dht22::restore_parameters`] or
    /// [`Dht22::configure`] to change it.
    ///
    /// The `clock` must count microseconds independently of interrupts. `critical_section` is
    /// held for the ~5ms it takes to wake the sensor and clock in its 40 bits.
    pub fn new(
        pin: TInputPin,
        clock: TClock,
        critical_section: TCritical,
        options: Option<Options>,
    ) -> Result<Dht22<TInputPin, TOutputPin, TClock, TCritical>, Error<TError>> {
        let options = match options {
            None => DEFAULT_DHT22_OPTIONS,
            Some(options) => {
                if options.min_read_interval < MIN_DHT22_READ_INTERVAL || options.max_attempts < 1
                {
                    return Err(Error::InvalidArgument);
                }
                options
            }
        };
        // Both waits are counted in microseconds on a 32-bit clock.
        if options.min_read_interval.as_micros() > u32::MAX as u128
            || options.power_on_delay.as_micros() > u32::MAX as u128
        {
            return Err(Error::InvalidArgument);
        }
        let created_at = clock.now_us();
        log::info!(
            "DHT22 init: {}us start, {}us response, {}us bit timeout, {}us threshold",
            TimingParameters::DEFAULT.start_signal_us,
            TimingParameters::DEFAULT.response_timeout_us,
            TimingParameters::DEFAULT.bit_timeout_us,
            TimingParameters::DEFAULT.bit_threshold_us,
        );
        Ok(Dht22 {
            input_pin: Some(pin),
            clock,
            critical_section,
            params: TimingParameters::DEFAULT,
            options,
            created_at,
            last_attempt_start: None,
            last_reading: None,
            last_read_succeeded: false,
            _output_pin: PhantomData,
        })
    }

    /// The active timing configuration.
    pub fn parameters(&self) -> TimingParameters {
        self.params
    }

    /// Replaces the whole timing configuration.
    ///
    /// Every field is checked before anything changes, so a rejected configuration leaves the
    /// previous one in place.
    pub fn configure(&mut self, params: TimingParameters) -> Result<(), InvalidParameter> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// Changes a single timing value.
    pub fn set_parameter(&mut self, parameter: Parameter, value: u16) -> Result<(), InvalidParameter> {
        self.params = self.params.with(parameter, value)?;
        Ok(())
    }

    /// Loads the saved configuration, or the defaults if nothing usable was saved, and applies it.
    pub fn restore_parameters<TStore: ParameterStore>(&mut self, store: &mut TStore) -> TimingParameters {
        // Already validated by `load_parameters`.
        self.params = store::load_parameters(store);
        self.params
    }

    /// The most recent successful reading, if any.
    pub fn last_reading(&self) -> Option<Reading> {
        self.last_reading
    }

    /// Whether the most recent call to [`Dht22::read`] succeeded.
    pub fn last_read_succeeded(&self) -> bool {
        self.last_read_succeeded
    }

    /// The clock value at the start of the most recent raw attempt.
    pub fn last_attempt_started_at(&self) -> Option<u32> {
        self.last_attempt_start
    }

    /// Gives back the pin, in input mode.
    pub fn release(self) -> Option<TInputPin> {
        self.input_pin
    }

    /// Reads data from the DHT22, retrying failed attempts up to [`Options::max_attempts`].
    ///
    /// This busy-waits, on the microsecond clock, until the minimum read interval has passed since
    /// the previous raw attempt. Each attempt then holds the critical section while it wakes the
    /// sensor and times the 40 data bits (about 5ms).
    ///
    /// A failed transaction is a normal outcome and comes back as [`ReadResult::Failure`] with the
    /// last attempt's [`FailureKind`]. `Err` is reserved for HAL errors.
    pub fn read(&mut self) -> Result<ReadResult, Error<TError>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt() {
                Ok(reading) => {
                    if attempt > 1 {
                        log::info!("DHT22 read succeeded on attempt {}", attempt);
                    }
                    self.last_reading = Some(reading);
                    self.last_read_succeeded = true;
                    return Ok(ReadResult::Success(reading));
                }
                Err(AttemptError::Failed(kind)) => {
                    if attempt < self.options.max_attempts {
                        log::warn!("DHT22 read attempt {} failed ({}), retrying", attempt, kind);
                        continue;
                    }
                    log::debug!("DHT22 read failed after {} attempts: {}", attempt, kind);
                    self.last_read_succeeded = false;
                    return Ok(ReadResult::Failure(kind));
                }
                Err(AttemptError::Io(err)) => {
                    self.last_read_succeeded = false;
                    return Err(err);
                }
            }
        }
    }

    fn attempt(&mut self) -> Result<Reading, AttemptError<TError>> {
        self.wait_for_read_window();
        self.last_attempt_start = Some(self.clock.now_us());

        let Dht22 {
            input_pin,
            clock,
            critical_section,
            params,
            ..
        } = self;
        let frame = critical_section.with(|| transfer::<_, TOutputPin, _, _>(input_pin, &*clock, params))?;
        Ok(decode(frame)?)
    }

    fn wait_for_read_window(&self) {
        let (since, interval) = match self.last_attempt_start {
            Some(start) => (start, self.options.min_read_interval),
            None => (self.created_at, self.options.power_on_delay),
        };
        let interval_us = interval.as_micros() as u32;
        while self.clock.elapsed_since(since) < interval_us {}
    }
}

impl<TInputPin, TOutputPin, TError, TClock, TCritical> TunableSensor
    for Dht22<TInputPin, TOutputPin, TClock, TCritical>
where
    TInputPin: InputPin<Error = TError> + IoPin<TInputPin, TOutputPin, Error = TError>,
    TOutputPin: OutputPin<Error = TError> + IoPin<TInputPin, TOutputPin, Error = TError>,
    TClock: MicrosecondClock,
    TCritical: CriticalSection,
{
    type Error = Error<TError>;

    fn parameters(&self) -> TimingParameters {
        Dht22::parameters(self)
    }

    fn configure(&mut self, params: TimingParameters) -> Result<(), InvalidParameter> {
        Dht22::configure(self, params)
    }

    fn read(&mut self) -> Result<ReadResult, Error<TError>> {
        Dht22::read(self)
    }
}

enum AttemptError<TError> {
    Failed(FailureKind),
    Io(Error<TError>),
}

impl<TError> From<FailureKind> for AttemptError<TError> {
    fn from(kind: FailureKind) -> AttemptError<TError> {
        AttemptError::Failed(kind)
    }
}

impl<TError> From<Error<TError>> for AttemptError<TError> {
    fn from(error: Error<TError>) -> AttemptError<TError> {
        AttemptError::Io(error)
    }
}

/// Wakes the sensor and clocks in its 5 bytes. Runs with the critical section held.
fn transfer<TInputPin, TOutputPin, TError, TClock>(
    input_pin: &mut Option<TInputPin>,
    clock: &TClock,
    params: &TimingParameters,
) -> Result<[u8; 5], AttemptError<TError>>
where
    TInputPin: InputPin<Error = TError> + IoPin<TInputPin, TOutputPin, Error = TError>,
    TOutputPin: OutputPin<Error = TError> + IoPin<TInputPin, TOutputPin, Error = TError>,
    TClock: MicrosecondClock,
{
    let pin = input_pin.take().ok_or(Error::PinUnavailable::<TError>)?;
    let mut output_pin = pin
        .into_output_pin(PinState::Low)
        .map_err(Error::Wrapped)?;
    timer::delay_us(clock, params.start_signal_us as u32);
    output_pin.set_high().map_err(Error::Wrapped)?;
    timer::delay_us(clock, RELEASE_HIGH_US);
    *input_pin = Some(output_pin.into_input_pin().map_err(Error::Wrapped)?);
    timer::delay_us(clock, RELEASE_SETTLE_US);

    let pin = input_pin.as_ref().ok_or(Error::PinUnavailable::<TError>)?;
    let response_timeout = params.response_timeout_us as u32;
    for level in [PinState::Low, PinState::High, PinState::Low] {
        if !wait_for_level(pin, clock, level, response_timeout)? {
            return Err(FailureKind::HandshakeTimeout.into());
        }
    }

    let bit_timeout = params.bit_timeout_us as u32;
    let mut frame = [0u8; 5];
    for byte in frame.iter_mut() {
        for bit in (0..8).rev() {
            if !wait_for_level(pin, clock, PinState::High, bit_timeout)? {
                return Err(FailureKind::BitTimeout.into());
            }
            let high_start = clock.now_us();
            if !wait_for_level(pin, clock, PinState::Low, bit_timeout)? {
                return Err(FailureKind::BitTimeout.into());
            }
            let high_duration = clock.elapsed_since(high_start);
            if classify_bit(high_duration, params.bit_threshold_us) {
                *byte |= 1 << bit;
            }
        }
    }
    Ok(frame)
}

/// Spins until the line reads `level`. Returns `false` if more than `timeout_us` passed first.
#[inline]
fn wait_for_level<TInput, TError, TClock>(
    input_pin: &TInput,
    clock: &TClock,
    level: PinState,
    timeout_us: u32,
) -> Result<bool, Error<TError>>
where
    TInput: InputPin<Error = TError>,
    TClock: MicrosecondClock,
{
    let start = clock.now_us();
    loop {
        let reached = match level {
            PinState::High => input_pin.is_high(),
            PinState::Low => input_pin.is_low(),
        }
        .map_err(Error::Wrapped)?;
        if reached {
            return Ok(true);
        }
        if clock.elapsed_since(start) > timeout_us {
            return Ok(false);
        }
    }
}

/// Whether a high pulse of `high_duration_us` encodes a 1. A pulse exactly at the threshold does.
#[inline]
pub fn classify_bit(high_duration_us: u32, threshold_us: u16) -> bool {
    high_duration_us >= threshold_us as u32
}

/// The checksum byte the sensor sends after the four data bytes.
pub fn checksum(data: &[u8; 4]) -> u8 {
    let sum: u16 = data.iter().map(|b| *b as u16).sum();
    sum.to_be_bytes()[1]
}

/// Validates and decodes a raw 5-byte frame.
pub fn decode(frame: [u8; 5]) -> Result<Reading, FailureKind> {
    let data = [frame[0], frame[1], frame[2], frame[3]];
    if checksum(&data) != frame[4] {
        return Err(FailureKind::ChecksumMismatch);
    }
    let reading = Reading::from_raw_bytes(data);
    if !reading.is_valid() {
        return Err(FailureKind::RangeViolation);
    }
    Ok(reading)
}
