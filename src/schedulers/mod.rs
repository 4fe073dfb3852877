//! # Schedulers
//!
//! Noise schedules describing how much variance the forward process adds at
//! every diffusion step.

use serde::{Deserialize, Serialize};

pub mod ddpm;

/// The curve betas follow from the first to the last training timestep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BetaSchedule {
    /// Betas evenly spaced from `beta_start` to `beta_end`, the schedule of the
    /// original DDPM paper.
    Linear,
    /// Evenly spaced in `sqrt(beta)`, then squared.
    ScaledLinear,
    /// Improved DDPM cosine schedule: `alpha_cumprod` follows a squared cosine
    /// offset by `epsilon`.
    SquaredcosCapV2,
}
