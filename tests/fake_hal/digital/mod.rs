use super::concurrent;
use embedded_hal::digital::blocking::{InputPin, IoPin, OutputPin};
use embedded_hal::digital::PinState;

#[derive(Debug, PartialEq)]
pub enum Error {
    /// The pin could not be switched back to an input.
    ModeSwitch,
}

/// A stretch of constant level driven by the simulated sensor.
#[derive(Clone, Copy, Debug)]
pub struct Segment {
    pub high: bool,
    pub duration_us: u32,
}

const fn high(duration_us: u32) -> Segment {
    Segment {
        high: true,
        duration_us,
    }
}

const fn low(duration_us: u32) -> Segment {
    Segment {
        high: false,
        duration_us,
    }
}

pub const ZERO_PULSE_US: u32 = 26;
pub const ONE_PULSE_US: u32 = 70;

/// The sensor's answer to a start signal, followed by the given bits, MSB first per byte.
///
/// `one_us` is the length of the high pulse used for 1 bits.
pub fn response_with_pulses(bytes: &[u8], bit_count: usize, one_us: u32) -> Vec<Segment> {
    // Wait for the host to let go, then low 80us, high 80us.
    let mut segments = vec![high(20), low(80), high(80)];
    for i in 0..bit_count {
        let byte = bytes[i / 8];
        let bit = (byte >> (7 - (i % 8))) & 1;
        segments.push(low(50));
        segments.push(high(if bit == 1 { one_us } else { ZERO_PULSE_US }));
    }
    // End of transmission, then the pull-up takes over.
    segments.push(low(50));
    segments
}

/// A complete, well-formed transmission of `frame`.
pub fn response(frame: [u8; 5]) -> Vec<Segment> {
    response_with_pulses(&frame, 40, ONE_PULSE_US)
}

/// A transmission of `frame` that stops after `bit_count` bits.
pub fn truncated_response(frame: [u8; 5], bit_count: usize) -> Vec<Segment> {
    response_with_pulses(&frame, bit_count, ONE_PULSE_US)
}

/// A sensor that never answers.
pub fn silence() -> Vec<Segment> {
    Vec::new()
}

/// A simulated DHT22 data line.
///
/// Each time the host releases the line after a start signal, the pin plays back the next
/// scripted response, measured from the moment of release. Outside a response, and after all
/// responses are used up, the external pull-up holds the line high.
#[derive(Debug)]
pub struct Pin {
    name: &'static str,
    responses: Vec<Vec<Segment>>,
    releases: usize,
    released_at: Option<u32>,
    driven_low_at: Option<u32>,
    start_signals: Vec<u32>,
    fail_release: bool,
}

impl Pin {
    pub fn new(name: &'static str, responses: Vec<Vec<Segment>>) -> Pin {
        concurrent::reset_time(name);
        Pin {
            name,
            responses,
            releases: 0,
            released_at: None,
            driven_low_at: None,
            start_signals: Vec::new(),
            fail_release: false,
        }
    }

    /// A pin that errors, and is lost, the first time it is switched back to an input.
    pub fn with_failing_release(mut self) -> Pin {
        self.fail_release = true;
        self
    }

    /// How long the line was held low before each release.
    pub fn start_signals(&self) -> &[u32] {
        &self.start_signals
    }

    /// How many times the host released the line, i.e. how many raw attempts it made.
    pub fn attempts(&self) -> usize {
        self.releases
    }

    fn now(&self) -> u32 {
        concurrent::time(self.name)
    }

    fn level(&self) -> bool {
        let released_at = match self.released_at {
            None => return true,
            Some(released_at) => released_at,
        };
        let segments = match self.responses.get(self.releases - 1) {
            None => return true,
            Some(segments) => segments,
        };
        let t = self.now() - released_at;
        let mut end = 0;
        for segment in segments {
            end += segment.duration_us;
            if t < end {
                return segment.high;
            }
        }
        true
    }
}

impl InputPin for Pin {
    type Error = Error;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.level())
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.level())
    }
}

impl OutputPin for Pin {
    type Error = Error;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.driven_low_at = Some(self.now());
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if let Some(start) = self.driven_low_at.take() {
            self.start_signals.push(self.now() - start);
        }
        Ok(())
    }
}

impl IoPin<Pin, Pin> for Pin {
    type Error = Error;

    fn into_input_pin(mut self) -> Result<Pin, Self::Error> {
        if self.fail_release {
            return Err(Error::ModeSwitch);
        }
        self.releases += 1;
        self.released_at = Some(self.now());
        Ok(self)
    }

    fn into_output_pin(mut self, state: PinState) -> Result<Pin, Self::Error> {
        self.released_at = None;
        match state {
            PinState::Low => self.set_low()?,
            PinState::High => self.set_high()?,
        }
        Ok(self)
    }
}
