use dht22_tuner::dht22::{FailureKind, ReadResult, Reading};
use dht22_tuner::experiment::{ExperimentObserver, ExperimentStatus, Phase, TunableSensor};
use dht22_tuner::stats::{PhaseResult, PhaseSummary};
use dht22_tuner::store::ParameterStore;
use dht22_tuner::timing::{InvalidParameter, TimingParameters};

#[derive(Debug, PartialEq)]
pub struct SensorError();

/// A sensor whose reads succeed or fail according to `succeeds`, given the active configuration.
pub struct SimulatedSensor {
    pub params: TimingParameters,
    pub configured: Vec<TimingParameters>,
    pub reads: usize,
    /// Reads after which the sensor reports a hardware error instead of a result.
    pub broken_after: Option<usize>,
    succeeds: Box<dyn Fn(&TimingParameters) -> bool>,
}

impl SimulatedSensor {
    pub fn new(succeeds: impl Fn(&TimingParameters) -> bool + 'static) -> SimulatedSensor {
        SimulatedSensor {
            params: TimingParameters::DEFAULT,
            configured: Vec::new(),
            reads: 0,
            broken_after: None,
            succeeds: Box::new(succeeds),
        }
    }

    pub fn always_succeeds() -> SimulatedSensor {
        SimulatedSensor::new(|_| true)
    }
}

impl TunableSensor for SimulatedSensor {
    type Error = SensorError;

    fn parameters(&self) -> TimingParameters {
        self.params
    }

    fn configure(&mut self, params: TimingParameters) -> Result<(), InvalidParameter> {
        params.validate()?;
        self.params = params;
        self.configured.push(params);
        Ok(())
    }

    fn read(&mut self) -> Result<ReadResult, SensorError> {
        if let Some(limit) = self.broken_after {
            if self.reads >= limit {
                return Err(SensorError());
            }
        }
        self.reads += 1;
        if (self.succeeds)(&self.params) {
            Ok(ReadResult::Success(Reading {
                humidity_x10: 450,
                temperature_x10: 215,
            }))
        } else {
            Ok(ReadResult::Failure(FailureKind::ChecksumMismatch))
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct StoreError();

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub saved: Vec<TimingParameters>,
    pub fail_saves: bool,
}

impl ParameterStore for MemoryStore {
    type Error = StoreError;

    fn load(&mut self) -> Result<Option<TimingParameters>, StoreError> {
        Ok(self.saved.last().copied())
    }

    fn save(&mut self, params: &TimingParameters) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError());
        }
        self.saved.push(*params);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub candidates: Vec<(Phase, PhaseResult)>,
    pub summaries: Vec<PhaseSummary>,
    pub finished: Vec<(ExperimentStatus, Option<TimingParameters>)>,
}

impl ExperimentObserver for RecordingObserver {
    fn candidate_tested(&mut self, phase: Phase, result: &PhaseResult) {
        self.candidates.push((phase, *result));
    }

    fn phase_completed(&mut self, summary: &PhaseSummary) {
        self.summaries.push(*summary);
    }

    fn experiment_finished(&mut self, status: ExperimentStatus, applied: Option<&TimingParameters>) {
        self.finished.push((status, applied.copied()));
    }
}
