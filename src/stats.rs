use serde::Serialize;

use crate::timing::Parameter;

/// Smallest p-value ever reported.
pub const P_VALUE_FLOOR: f32 = 0.0001;

/// Below this, a mean or standard error is treated as zero.
const EPSILON: f32 = 1e-6;

/// The pass/fail tally for one tested value of a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PhaseResult {
    pub param_value: u16,
    pub success_count: u16,
    pub fail_count: u16,
    pub success_rate_pct: f32,
}

impl PhaseResult {
    pub fn new(param_value: u16, success_count: u16, fail_count: u16) -> PhaseResult {
        let total = success_count as u32 + fail_count as u32;
        let success_rate_pct = if total == 0 {
            0.0
        } else {
            success_count as f32 * 100.0 / total as f32
        };
        PhaseResult {
            param_value,
            success_count,
            fail_count,
            success_rate_pct,
        }
    }

    pub fn fail_rate_pct(&self) -> f32 {
        let total = self.success_count as u32 + self.fail_count as u32;
        if total == 0 {
            return 100.0;
        }
        self.fail_count as f32 * 100.0 / total as f32
    }
}

/// Statistics over all tested values of one parameter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PhaseSummary {
    pub parameter: Parameter,
    pub count: u16,
    pub avg_fail_pct: f32,
    pub best_fail_pct: f32,
    pub worst_fail_pct: f32,
    /// Population standard deviation of the fail rates.
    pub std_dev: f32,
    /// Coefficient of variation, in percent.
    pub cv: f32,
    /// How many standard errors the best fail rate sits below the mean.
    pub z_score: f32,
    pub p_value: f32,
    /// The first tested value that reached `best_fail_pct`.
    pub best_value: u16,
}

impl PhaseSummary {
    /// Summarizes a phase. Returns `None` if nothing was tested.
    pub fn from_results(parameter: Parameter, results: &[PhaseResult]) -> Option<PhaseSummary> {
        let first = results.first()?;
        let n = results.len() as f32;

        let mut sum = 0.0;
        let mut best_fail_pct = first.fail_rate_pct();
        let mut best_value = first.param_value;
        let mut worst_fail_pct = best_fail_pct;
        for result in results {
            let fail = result.fail_rate_pct();
            sum += fail;
            // Strictly lower, so the first of equal candidates wins.
            if fail < best_fail_pct {
                best_fail_pct = fail;
                best_value = result.param_value;
            }
            if fail > worst_fail_pct {
                worst_fail_pct = fail;
            }
        }
        let avg_fail_pct = sum / n;

        let variance = results
            .iter()
            .map(|r| {
                let diff = r.fail_rate_pct() - avg_fail_pct;
                diff * diff
            })
            .sum::<f32>()
            / n;
        let std_dev = libm::sqrtf(variance);

        let cv = if libm::fabsf(avg_fail_pct) < EPSILON {
            0.0
        } else {
            std_dev / avg_fail_pct * 100.0
        };

        let standard_error = std_dev / libm::sqrtf(n);
        let (z_score, p_value) = if results.len() <= 1 || standard_error < EPSILON {
            // Nothing separates the candidates, the winner is as certain as it gets.
            (0.0, P_VALUE_FLOOR)
        } else {
            let z = (avg_fail_pct - best_fail_pct) / standard_error;
            (z, one_tailed_p_value(z))
        };

        Some(PhaseSummary {
            parameter,
            count: results.len() as u16,
            avg_fail_pct,
            best_fail_pct,
            worst_fail_pct,
            std_dev,
            cv,
            z_score,
            p_value,
            best_value,
        })
    }
}

/// Upper-tail probability of the standard normal distribution at `z`, clamped to
/// `[P_VALUE_FLOOR, 1.0]`.
pub fn one_tailed_p_value(z: f32) -> f32 {
    let p = 0.5 * libm::erfcf(z / core::f32::consts::SQRT_2);
    p.clamp(P_VALUE_FLOOR, 1.0)
}
