use thiserror::Error;

/// Errors raised by the noise schedule and the diffusion pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiffusionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("timestep {timestep} is out of range for a schedule of {timesteps} steps")]
    TimestepOutOfRange { timestep: usize, timesteps: usize },

    #[error("batch of {images} images was given {timesteps} timesteps")]
    BatchMismatch { images: usize, timesteps: usize },

    /// The image batch handed to the pipeline does not have the configured layout.
    #[error("expected an image batch of shape {expected:?}, got {actual:?}")]
    InvalidShape {
        expected: [usize; 4],
        actual: [usize; 4],
    },

    /// The denoiser did not return a tensor shaped like its input.
    #[error("denoiser returned shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },
}

pub type Result<T> = core::result::Result<T, DiffusionError>;
