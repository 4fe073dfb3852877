//! # Models
//!
//! The interface a noise-prediction network exposes to the diffusion loop.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// A network predicting the noise that was mixed into a batch of images.
///
/// # Shapes
///
/// - images: `[batch_size, channels, height, width]`
/// - timesteps: `[batch_size, 1]`, the diffusion step of every image as a float
/// - output: `[batch_size, channels, height, width]`
pub trait Denoiser<B: Backend> {
    fn predict_noise(&self, images: Tensor<B, 4>, timesteps: Tensor<B, 2>) -> Tensor<B, 4>;
}

impl<B, F> Denoiser<B> for F
where
    B: Backend,
    F: Fn(Tensor<B, 4>, Tensor<B, 2>) -> Tensor<B, 4>,
{
    fn predict_noise(&self, images: Tensor<B, 4>, timesteps: Tensor<B, 2>) -> Tensor<B, 4> {
        self(images, timesteps)
    }
}
