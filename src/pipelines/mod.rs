//! # Pipelines
//!
//! Training and sampling loops tying a noise schedule to a denoiser.

pub mod ddpm;
