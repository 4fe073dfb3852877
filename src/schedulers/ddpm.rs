use burn::config::Config;
use tracing::debug;

use super::BetaSchedule;
use crate::error::{self, DiffusionError};

/// The configuration for the DDPM noise schedule.
#[derive(Config, Debug)]
pub struct NoiseScheduleConfig {
    /// number of diffusion steps used to train the model
    #[config(default = 1000)]
    pub train_timesteps: usize,
    /// How beta evolves during training.
    #[config(default = "BetaSchedule::SquaredcosCapV2")]
    pub beta_schedule: BetaSchedule,
    /// Offset of the cosine schedule, keeps the first betas away from zero.
    #[config(default = 0.008)]
    pub epsilon: f64,
    /// Every beta is clipped to this value.
    #[config(default = 0.999)]
    pub max_beta: f64,
    /// The value of beta at the beginning of training (linear schedules).
    #[config(default = 0.0001)]
    pub beta_start: f64,
    /// The value of beta at the end of training (linear schedules).
    #[config(default = 0.02)]
    pub beta_end: f64,
}

impl NoiseScheduleConfig {
    /// Computes the schedule constants.
    pub fn init(&self) -> error::Result<NoiseSchedule> {
        if self.train_timesteps == 0 {
            return Err(DiffusionError::InvalidConfig(
                "the number of timesteps must be at least 1".into(),
            ));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.) {
            return Err(DiffusionError::InvalidConfig(format!(
                "epsilon must be a positive number, got {}",
                self.epsilon
            )));
        }
        if !(self.max_beta > 0. && self.max_beta < 1.) {
            return Err(DiffusionError::InvalidConfig(format!(
                "max_beta must lie in (0, 1), got {}",
                self.max_beta
            )));
        }

        let betas = match self.beta_schedule {
            BetaSchedule::SquaredcosCapV2 => {
                squared_cos_betas(self.train_timesteps, self.epsilon, self.max_beta)
            }
            BetaSchedule::Linear | BetaSchedule::ScaledLinear => {
                if !(self.beta_start > 0. && self.beta_start < self.beta_end && self.beta_end < 1.)
                {
                    return Err(DiffusionError::InvalidConfig(format!(
                        "linear schedules need 0 < beta_start < beta_end < 1, got {}..{}",
                        self.beta_start, self.beta_end
                    )));
                }
                let betas = if self.beta_schedule == BetaSchedule::Linear {
                    linear_betas(self.beta_start, self.beta_end, self.train_timesteps)
                } else {
                    scaled_linear_betas(self.beta_start, self.beta_end, self.train_timesteps)
                };
                betas
                    .into_iter()
                    .map(|beta| beta.min(self.max_beta))
                    .collect()
            }
        };

        let schedule = NoiseSchedule::from_betas(betas);
        debug!(
            timesteps = schedule.len(),
            beta_schedule = ?self.beta_schedule,
            first_alpha_cumprod = schedule.alphas_cumprod[0],
            last_alpha_cumprod = schedule.alphas_cumprod[schedule.len() - 1],
            "built noise schedule"
        );

        Ok(schedule)
    }
}

/// Per-timestep constants of the forward diffusion process.
///
/// Only [NoiseScheduleConfig::init] builds one, so the betas always respect the
/// configured clip and `alphas_cumprod` is strictly decreasing.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSchedule {
    betas: Vec<f64>,
    alphas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
    sqrt_alphas_cumprod: Vec<f64>,
    sqrt_one_minus_alphas_cumprod: Vec<f64>,
}

impl NoiseSchedule {
    fn from_betas(betas: Vec<f64>) -> Self {
        let alphas: Vec<f64> = betas.iter().map(|beta| 1.0 - beta).collect();
        let mut alphas_cumprod: Vec<f64> = Vec::with_capacity(alphas.len());

        for alpha in &alphas {
            alphas_cumprod.push(alpha * alphas_cumprod.last().copied().unwrap_or(1.0))
        }

        let sqrt_alphas_cumprod = alphas_cumprod.iter().map(|a| a.sqrt()).collect();
        let sqrt_one_minus_alphas_cumprod =
            alphas_cumprod.iter().map(|a| (1.0 - a).sqrt()).collect();

        Self {
            betas,
            alphas,
            alphas_cumprod,
            sqrt_alphas_cumprod,
            sqrt_one_minus_alphas_cumprod,
        }
    }

    /// The number of diffusion steps T.
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    /// Companion of [NoiseSchedule::len]. Always false for a schedule built by
    /// [NoiseScheduleConfig::init], which rejects zero timesteps.
    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }

    pub fn sqrt_alphas_cumprod(&self) -> &[f64] {
        &self.sqrt_alphas_cumprod
    }

    pub fn sqrt_one_minus_alphas_cumprod(&self) -> &[f64] {
        &self.sqrt_one_minus_alphas_cumprod
    }

    /// Standard deviation of `q(x_{t-1} | x_t, x_0)`, zero at the terminal step.
    pub fn posterior_std(&self, timestep: usize) -> f64 {
        if timestep == 0 {
            return 0.;
        }
        let alpha_cumprod_prev = self.alphas_cumprod[timestep - 1];
        let variance = self.betas[timestep] * (1.0 - alpha_cumprod_prev)
            / (1.0 - self.alphas_cumprod[timestep]);

        variance.sqrt()
    }

    /// Checks that every timestep indexes into the schedule.
    pub fn check_timesteps(&self, timesteps: &[usize]) -> error::Result<()> {
        match timesteps.iter().find(|&&t| t >= self.len()) {
            Some(&timestep) => Err(DiffusionError::TimestepOutOfRange {
                timestep,
                timesteps: self.len(),
            }),
            None => Ok(()),
        }
    }
}

/// Creates `num_steps` betas evenly distributed over `start..=end`.
fn linear_betas(start: f64, end: f64, num_steps: usize) -> Vec<f64> {
    if num_steps == 1 {
        return vec![start];
    }
    let step_size = (end - start) / (num_steps - 1) as f64;

    (0..num_steps)
        .map(|i| start + step_size * i as f64)
        .collect()
}

fn scaled_linear_betas(start: f64, end: f64, num_steps: usize) -> Vec<f64> {
    linear_betas(start.sqrt(), end.sqrt(), num_steps)
        .into_iter()
        .map(|beta| beta * beta)
        .collect()
}

/// Betas discretizing the cosine `alpha_bar` curve, the cumulative product of
/// `1 - beta` over `s = 0..=T`:
///
/// `alpha_bar(s) = cos²(((s/T + epsilon) / (1 + epsilon)) · π/2)` and
/// `beta_t = 1 - alpha_bar(t+1) / alpha_bar(t)`, clipped to `[0, max_beta]`.
fn squared_cos_betas(num_diffusion_timesteps: usize, epsilon: f64, max_beta: f64) -> Vec<f64> {
    let alpha_bar = |time_step: usize| {
        let s = time_step as f64 / num_diffusion_timesteps as f64;
        f64::cos((s + epsilon) / (1.0 + epsilon) * core::f64::consts::FRAC_PI_2).powi(2)
    };

    (0..num_diffusion_timesteps)
        .map(|i| (1.0 - alpha_bar(i + 1) / alpha_bar(i)).clamp(0.0, max_beta))
        .collect()
}
