//! # Denoising diffusion probabilistic models
//!
//! The diffusion mathematics of a DDPM using [Burn](https://github.com/burn-rs/burn):
//! the cosine noise schedule, the noise-prediction training objective and ancestral
//! sampling. The noise-prediction network is any [Denoiser](models::Denoiser).

pub mod error;
pub mod models;
pub mod pipelines;
pub mod schedulers;

mod utils;

pub use error::{DiffusionError, Result};
pub use models::Denoiser;
pub use pipelines::ddpm::{Ddpm, DdpmConfig, DenoisingStep, ReverseProcess, SamplingMode};
pub use schedulers::ddpm::{NoiseSchedule, NoiseScheduleConfig};
pub use schedulers::BetaSchedule;

#[cfg(all(test, feature = "torch"))]
use burn::backend::libtorch;

#[cfg(all(test, feature = "wgpu"))]
use burn::backend::wgpu;

#[cfg(all(test, not(any(feature = "torch", feature = "wgpu"))))]
pub type TestBackend = burn::backend::NdArray<f32>;

#[cfg(all(test, feature = "torch"))]
pub type TestBackend = libtorch::LibTorch<f32>;

#[cfg(all(test, feature = "wgpu", not(feature = "torch")))]
pub type TestBackend = wgpu::Wgpu;
