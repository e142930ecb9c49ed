use core::time::Duration;
use heapless::Vec;
use serde::Serialize;

use crate::dht22::{ReadResult, MIN_DHT22_READ_INTERVAL};
use crate::stats::{PhaseResult, PhaseSummary};
use crate::store::ParameterStore;
use crate::timing::{InvalidParameter, Parameter, TimingParameters};

/// Reads per tested value, unless overridden in [`ExperimentOptions`].
pub const DEFAULT_READS_PER_CANDIDATE: u16 = 30;

/// Capacity of a phase's result list; the longest phase has 16 candidates.
const MAX_CANDIDATES_PER_PHASE: usize = 16;

/// Candidates across all four phases.
pub const TOTAL_CANDIDATES: u16 = 13 + 16 + 15 + 11;

/// What the experiment needs from a sensor driver.
pub trait TunableSensor {
    type Error;

    fn parameters(&self) -> TimingParameters;

    fn configure(&mut self, params: TimingParameters) -> Result<(), InvalidParameter>;

    /// One read, including whatever retries the driver does internally.
    fn read(&mut self) -> Result<ReadResult, Self::Error>;
}

/// Receives results as the experiment produces them.
///
/// All methods default to doing nothing; `()` is an observer that ignores everything.
pub trait ExperimentObserver {
    fn candidate_tested(&mut self, _phase: Phase, _result: &PhaseResult) {}

    fn phase_completed(&mut self, _summary: &PhaseSummary) {}

    /// Called once per run. `applied` holds the committed parameters for a completed run.
    fn experiment_finished(&mut self, _status: ExperimentStatus, _applied: Option<&TimingParameters>) {}
}

impl ExperimentObserver for () {}

/// One sweep over a single parameter, holding the other three fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    StartSignal,
    ResponseTimeout,
    BitTimeout,
    BitThreshold,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::StartSignal,
        Phase::ResponseTimeout,
        Phase::BitTimeout,
        Phase::BitThreshold,
    ];

    /// 1-based position in the run.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    fn index(self) -> usize {
        match self {
            Phase::StartSignal => 0,
            Phase::ResponseTimeout => 1,
            Phase::BitTimeout => 2,
            Phase::BitThreshold => 3,
        }
    }

    pub fn parameter(self) -> Parameter {
        match self {
            Phase::StartSignal => Parameter::StartSignal,
            Phase::ResponseTimeout => Parameter::ResponseTimeout,
            Phase::BitTimeout => Parameter::BitTimeout,
            Phase::BitThreshold => Parameter::BitThreshold,
        }
    }

    /// The distance between tested values, in microseconds.
    pub fn step(self) -> u16 {
        match self {
            Phase::StartSignal => 100,
            Phase::ResponseTimeout => 10,
            Phase::BitTimeout => 5,
            Phase::BitThreshold => 2,
        }
    }

    /// How many values this phase tests. Every value in the parameter's bounds that lands on a
    /// step is tested.
    pub fn len(self) -> usize {
        let bounds = self.parameter().bounds();
        ((bounds.end() - bounds.start()) / self.step()) as usize + 1
    }

    /// The `index`th tested value, in ascending order.
    pub fn candidate(self, index: usize) -> Option<u16> {
        if index >= self.len() {
            return None;
        }
        Some(self.parameter().bounds().start() + index as u16 * self.step())
    }

    pub fn candidates(self) -> impl Iterator<Item = u16> {
        let bounds = self.parameter().bounds();
        (*bounds.start()..=*bounds.end()).step_by(self.step() as usize)
    }

    pub fn next(self) -> Option<Phase> {
        Phase::ALL.get(self.index() + 1).copied()
    }
}

/// Where a run is. Only `begin` and `cancel` are driven from outside; the rest is for monitoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ExperimentStatus {
    Idle,
    Starting,
    Running(Phase),
    Complete,
    Stopped,
}

impl ExperimentStatus {
    /// A stable string for dashboards.
    pub fn tag(self) -> &'static str {
        match self {
            ExperimentStatus::Idle => "idle",
            ExperimentStatus::Starting => "starting",
            ExperimentStatus::Running(Phase::StartSignal) => "phase1_start_signal",
            ExperimentStatus::Running(Phase::ResponseTimeout) => "phase2_response_timeout",
            ExperimentStatus::Running(Phase::BitTimeout) => "phase3_bit_timeout",
            ExperimentStatus::Running(Phase::BitThreshold) => "phase4_bit_threshold",
            ExperimentStatus::Complete => "complete",
            ExperimentStatus::Stopped => "stopped",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, ExperimentStatus::Starting | ExperimentStatus::Running(_))
    }
}

/// A snapshot of a run, for anything that polls.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ExperimentState {
    pub phase: Option<Phase>,
    pub status: ExperimentStatus,
    pub progress_pct: f32,
    pub started_at_ms: Option<u64>,
    /// Winners of finished phases, plus the current phase's best value so far.
    pub running_best: TimingParameters,
    /// Success rate of the current phase's best value so far.
    pub running_best_success_pct: f32,
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// All phases ran; the parameters were applied and saved.
    Complete(TimingParameters),
    /// Cancelled. Nothing was applied.
    Stopped,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("an experiment is already running")]
    AlreadyRunning,
    #[error("no experiment is running")]
    NotRunning,
    #[error("invalid argument")]
    InvalidArgument,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum StepError<TSensorError, TStoreError> {
    /// `tick` was called without a run in progress.
    #[error("no experiment is running")]
    NotRunning,
    /// The sensor failed outright; the run was stopped.
    #[error("sensor error: {0:?}")]
    Sensor(TSensorError),
    /// The sensor rejected a configuration; the run was stopped.
    #[error(transparent)]
    Configure(InvalidParameter),
    /// The results were applied but could not be saved. The run is still complete.
    #[error("failed to save parameters: {0:?}")]
    Store(TStoreError),
}

/// Options to modify the behavior of the experiment.
#[derive(Clone, Copy, Debug)]
pub struct ExperimentOptions {
    /// Reads per tested value. Must be at least 1.
    pub reads_per_candidate: u16,
}

pub const DEFAULT_EXPERIMENT_OPTIONS: ExperimentOptions = ExperimentOptions {
    reads_per_candidate: DEFAULT_READS_PER_CANDIDATE,
};

/// A one-factor-at-a-time search for the timing parameters that read most reliably.
///
/// The four phases run in [`Phase::ALL`] order. Each tests every candidate value of its parameter
/// while the other three are held at the winners of earlier phases, or at
/// [`TimingParameters::DEFAULT`] for phases that have not run yet. A phase's winner is the value
/// with the lowest fail rate, the first one tested on ties, and it stays fixed for the rest of the
/// run.
///
/// The experiment does not own a loop. Call [`Experiment::tick`] from the host's loop; each call
/// tests one candidate and then hands control back.
#[derive(Debug)]
pub struct Experiment {
    options: ExperimentOptions,
    status: ExperimentStatus,
    cancel_requested: bool,
    started_at_ms: Option<u64>,
    candidates_done: u16,
    candidate_index: usize,
    best: TimingParameters,
    phase_best: Option<PhaseResult>,
    results: [Vec<PhaseResult, MAX_CANDIDATES_PER_PHASE>; 4],
    summaries: Vec<PhaseSummary, 4>,
}

impl Experiment {
    /// If options is `None`, then [`DEFAULT_EXPERIMENT_OPTIONS`] is used.
    pub fn new(options: Option<ExperimentOptions>) -> Result<Experiment, LifecycleError> {
        let options = options.unwrap_or(DEFAULT_EXPERIMENT_OPTIONS);
        if options.reads_per_candidate < 1 {
            return Err(LifecycleError::InvalidArgument);
        }
        Ok(Experiment::with_options(options))
    }

    fn with_options(options: ExperimentOptions) -> Experiment {
        Experiment {
            options,
            status: ExperimentStatus::Idle,
            cancel_requested: false,
            started_at_ms: None,
            candidates_done: 0,
            candidate_index: 0,
            best: TimingParameters::DEFAULT,
            phase_best: None,
            results: Default::default(),
            summaries: Vec::new(),
        }
    }

    /// Starts a new run, discarding anything left from a previous one.
    ///
    /// `started_at_ms` is only recorded for reporting; it can come from any wall or uptime clock.
    pub fn begin(&mut self, started_at_ms: u64) -> Result<(), LifecycleError> {
        if self.status.is_running() {
            return Err(LifecycleError::AlreadyRunning);
        }
        self.status = ExperimentStatus::Starting;
        self.cancel_requested = false;
        self.started_at_ms = Some(started_at_ms);
        self.candidates_done = 0;
        self.candidate_index = 0;
        self.best = TimingParameters::DEFAULT;
        self.phase_best = None;
        for results in self.results.iter_mut() {
            results.clear();
        }
        self.summaries.clear();
        log::info!(
            "Experiment starting: {} candidates x {} reads",
            TOTAL_CANDIDATES,
            self.options.reads_per_candidate
        );
        Ok(())
    }

    /// Asks the run to stop. Takes effect at the next candidate boundary; a batch of reads that is
    /// already underway always finishes.
    pub fn cancel(&mut self) -> Result<(), LifecycleError> {
        if !self.status.is_running() {
            return Err(LifecycleError::NotRunning);
        }
        self.cancel_requested = true;
        Ok(())
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Candidates tested so far over all phases, as a percentage of [`TOTAL_CANDIDATES`].
    pub fn progress_pct(&self) -> f32 {
        self.candidates_done as f32 * 100.0 / TOTAL_CANDIDATES as f32
    }

    pub fn state(&self) -> ExperimentState {
        let phase = match self.status {
            ExperimentStatus::Running(phase) => Some(phase),
            _ => None,
        };
        let (running_best, running_best_success_pct) = match (phase, self.phase_best) {
            (Some(phase), Some(best)) => (
                self.best
                    .with(phase.parameter(), best.param_value)
                    .unwrap_or(self.best),
                best.success_rate_pct,
            ),
            _ => (self.best, 0.0),
        };
        ExperimentState {
            phase,
            status: self.status,
            progress_pct: self.progress_pct(),
            started_at_ms: self.started_at_ms,
            running_best,
            running_best_success_pct,
        }
    }

    /// Results recorded so far for `phase`, in ascending parameter order.
    pub fn results(&self, phase: Phase) -> &[PhaseResult] {
        &self.results[phase.index()]
    }

    /// Summaries of the phases finished so far, in phase order.
    pub fn summaries(&self) -> &[PhaseSummary] {
        &self.summaries
    }

    pub fn summary(&self, phase: Phase) -> Option<&PhaseSummary> {
        self.summaries.get(phase.index())
    }

    /// A rough estimate of how long the rest of the run takes, assuming every read waits out the
    /// sensor's minimum read interval once.
    pub fn estimated_remaining(&self) -> Duration {
        if !self.status.is_running() {
            return Duration::ZERO;
        }
        let remaining = (TOTAL_CANDIDATES - self.candidates_done) as u32
            * self.options.reads_per_candidate as u32;
        MIN_DHT22_READ_INTERVAL * remaining
    }

    /// Tests the next candidate.
    ///
    /// Returns `WouldBlock` while there is more to do, so `nb::block!` runs a whole experiment.
    /// At the end of the last phase the winning parameters are applied to `sensor` and saved to
    /// `store`. A pending cancellation is honoured before the next candidate is configured.
    ///
    /// A sensor error or rejected configuration stops the run. A failed save does not: the run is
    /// complete and the sensor keeps the new parameters, but the error is returned.
    pub fn tick<TSensor, TStore, TObserver>(
        &mut self,
        sensor: &mut TSensor,
        store: &mut TStore,
        observer: &mut TObserver,
    ) -> nb::Result<Outcome, StepError<TSensor::Error, TStore::Error>>
    where
        TSensor: TunableSensor,
        TStore: ParameterStore,
        TObserver: ExperimentObserver,
    {
        let phase = match self.status {
            ExperimentStatus::Starting => {
                self.enter_phase(Phase::StartSignal);
                Phase::StartSignal
            }
            ExperimentStatus::Running(phase) => phase,
            _ => return Err(nb::Error::Other(StepError::NotRunning)),
        };
        if self.take_cancel() {
            return Ok(self.stop(observer));
        }

        let value = match phase.candidate(self.candidate_index) {
            Some(value) => value,
            None => return self.finish_phase(phase, sensor, store, observer),
        };
        let params = self
            .best
            .with(phase.parameter(), value)
            .and_then(|params| sensor.configure(params).map(|_| params));
        let params = match params {
            Ok(params) => params,
            Err(err) => {
                log::error!("Candidate {}={} rejected: {}", phase.parameter().name(), value, err);
                self.stop(observer);
                return Err(nb::Error::Other(StepError::Configure(err)));
            }
        };

        let mut successes = 0u16;
        let mut failures = 0u16;
        for _ in 0..self.options.reads_per_candidate {
            match sensor.read() {
                Ok(result) if result.is_success() => successes += 1,
                Ok(_) => failures += 1,
                Err(err) => {
                    log::error!("Sensor failed during {}={}", phase.parameter().name(), value);
                    self.stop(observer);
                    return Err(nb::Error::Other(StepError::Sensor(err)));
                }
            }
        }
        let result = PhaseResult::new(value, successes, failures);
        log::debug!(
            "Phase {} {:?}: {:.1}% success",
            phase.number(),
            params,
            result.success_rate_pct
        );
        // Capacity covers the longest phase.
        let _ = self.results[phase.index()].push(result);
        match self.phase_best {
            Some(best) if best.fail_rate_pct() <= result.fail_rate_pct() => {}
            _ => self.phase_best = Some(result),
        }
        self.candidate_index += 1;
        self.candidates_done += 1;
        observer.candidate_tested(phase, &result);

        if self.take_cancel() {
            return Ok(self.stop(observer));
        }
        if self.candidate_index >= phase.len() {
            return self.finish_phase(phase, sensor, store, observer);
        }
        Err(nb::Error::WouldBlock)
    }

    fn enter_phase(&mut self, phase: Phase) {
        log::info!(
            "Phase {}: testing {} ({} values)",
            phase.number(),
            phase.parameter().name(),
            phase.len()
        );
        self.status = ExperimentStatus::Running(phase);
        self.candidate_index = 0;
        self.phase_best = None;
    }

    fn finish_phase<TSensor, TStore, TObserver>(
        &mut self,
        phase: Phase,
        sensor: &mut TSensor,
        store: &mut TStore,
        observer: &mut TObserver,
    ) -> nb::Result<Outcome, StepError<TSensor::Error, TStore::Error>>
    where
        TSensor: TunableSensor,
        TStore: ParameterStore,
        TObserver: ExperimentObserver,
    {
        if let Some(summary) = PhaseSummary::from_results(phase.parameter(), self.results(phase)) {
            log::info!(
                "Phase {} done: best {}={} ({:.1}% fail), avg {:.1}%, sd {:.2}, cv {:.1}%, z {:.2}, p {:.4}",
                phase.number(),
                phase.parameter().name(),
                summary.best_value,
                summary.best_fail_pct,
                summary.avg_fail_pct,
                summary.std_dev,
                summary.cv,
                summary.z_score,
                summary.p_value
            );
            // Winners come from the candidate list, so they are always in bounds.
            self.best = self
                .best
                .with(phase.parameter(), summary.best_value)
                .unwrap_or(self.best);
            let _ = self.summaries.push(summary);
            observer.phase_completed(&summary);
        }

        match phase.next() {
            Some(next) => {
                self.enter_phase(next);
                Err(nb::Error::WouldBlock)
            }
            None => self.complete(sensor, store, observer),
        }
    }

    fn complete<TSensor, TStore, TObserver>(
        &mut self,
        sensor: &mut TSensor,
        store: &mut TStore,
        observer: &mut TObserver,
    ) -> nb::Result<Outcome, StepError<TSensor::Error, TStore::Error>>
    where
        TSensor: TunableSensor,
        TStore: ParameterStore,
        TObserver: ExperimentObserver,
    {
        let best = self.best;
        if let Err(err) = sensor.configure(best) {
            self.stop(observer);
            return Err(nb::Error::Other(StepError::Configure(err)));
        }
        let saved = store.save(&best);
        self.status = ExperimentStatus::Complete;
        self.candidates_done = TOTAL_CANDIDATES;
        self.phase_best = None;
        log::info!("Experiment complete, applied {:?}", best);
        observer.experiment_finished(self.status, Some(&best));
        match saved {
            Ok(()) => Ok(Outcome::Complete(best)),
            Err(err) => {
                log::error!("Failed to save experiment results: {:?}", err);
                Err(nb::Error::Other(StepError::Store(err)))
            }
        }
    }

    fn take_cancel(&mut self) -> bool {
        core::mem::replace(&mut self.cancel_requested, false)
    }

    fn stop<TObserver: ExperimentObserver>(&mut self, observer: &mut TObserver) -> Outcome {
        log::warn!(
            "Experiment stopped at {:.0}% ({} of {} candidates)",
            self.progress_pct(),
            self.candidates_done,
            TOTAL_CANDIDATES
        );
        self.status = ExperimentStatus::Stopped;
        self.phase_best = None;
        observer.experiment_finished(self.status, None);
        Outcome::Stopped
    }
}

impl Default for Experiment {
    fn default() -> Self {
        Experiment::with_options(DEFAULT_EXPERIMENT_OPTIONS)
    }
}
