//! Denoising Diffusion Probabilistic Models
//!
//! Training objective and ancestral sampling of a DDPM with a pluggable
//! noise-prediction network.
//!
//! Denoising Diffusion Probabilistic Models, J. Ho and al, 2020.
//! https://arxiv.org/abs/2006.11239

use burn::config::Config;
use burn::nn::loss::{MseLoss, Reduction};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::Rng;
use tracing::{debug, trace};

use crate::error::{self, DiffusionError};
use crate::models::Denoiser;
use crate::schedulers::ddpm::{NoiseSchedule, NoiseScheduleConfig};
use crate::utils::{per_sample, randn, timestep_tensor};

/// The configuration for a [DDPM](Ddpm) pipeline.
#[derive(Config, Debug)]
pub struct DdpmConfig {
    /// Height and width of the square images.
    pub image_size: usize,
    /// The number of image channels.
    #[config(default = 1)]
    pub channels: usize,
    /// Size of the denoising network, handed untouched to its factory.
    #[config(default = 3)]
    pub denoiser_stages: usize,
    /// The forward process noise schedule.
    #[config(default = "NoiseScheduleConfig::new()")]
    pub schedule: NoiseScheduleConfig,
    /// Every `trace_stride`-th intermediate image is kept when sampling the whole process.
    #[config(default = 10)]
    pub trace_stride: usize,
}

impl DdpmConfig {
    /// Initialize a new [DDPM](Ddpm) pipeline, building the denoiser with `factory`.
    ///
    /// The factory receives `denoiser_stages`, `channels` and the device.
    pub fn init<B, D, F>(
        &self,
        device: &B::Device,
        factory: F,
    ) -> error::Result<Ddpm<B, D>>
    where
        B: Backend,
        D: Denoiser<B>,
        F: FnOnce(usize, usize, &B::Device) -> D,
    {
        let schedule = self.build_schedule()?;
        let denoiser = factory(self.denoiser_stages, self.channels, device);

        Ok(self.assemble(schedule, denoiser, device))
    }

    /// Initialize a new [DDPM](Ddpm) pipeline around an existing denoiser.
    pub fn init_with<B, D>(
        &self,
        denoiser: D,
        device: &B::Device,
    ) -> error::Result<Ddpm<B, D>>
    where
        B: Backend,
        D: Denoiser<B>,
    {
        let schedule = self.build_schedule()?;

        Ok(self.assemble(schedule, denoiser, device))
    }

    fn build_schedule(&self) -> error::Result<NoiseSchedule> {
        if self.image_size == 0 {
            return Err(DiffusionError::InvalidConfig(
                "image_size must be at least 1".into(),
            ));
        }
        if self.channels == 0 {
            return Err(DiffusionError::InvalidConfig(
                "channels must be at least 1".into(),
            ));
        }
        if self.trace_stride == 0 {
            return Err(DiffusionError::InvalidConfig(
                "trace_stride must be at least 1".into(),
            ));
        }

        self.schedule.init()
    }

    fn assemble<B: Backend, D>(
        &self,
        schedule: NoiseSchedule,
        denoiser: D,
        device: &B::Device,
    ) -> Ddpm<B, D> {
        debug!(
            image_size = self.image_size,
            channels = self.channels,
            timesteps = schedule.len(),
            "initialized ddpm pipeline"
        );

        Ddpm {
            config: self.clone(),
            schedule,
            denoiser,
            device: device.clone(),
        }
    }
}

/// What [Ddpm::sample] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Only the denoised images, `[amount, channels, size, size]`.
    FinalOnly,
    /// Every `trace_stride`-th intermediate image, concatenated along the height
    /// axis from pure noise down to the last reverse step.
    WholeProcess,
}

/// A DDPM pipeline: a fixed noise schedule driving a noise-prediction network.
pub struct Ddpm<B: Backend, D> {
    config: DdpmConfig,
    schedule: NoiseSchedule,
    denoiser: D,
    device: B::Device,
}

impl<B: Backend, D: Denoiser<B>> Ddpm<B, D> {
    pub fn config(&self) -> &DdpmConfig {
        &self.config
    }

    pub fn schedule(&self) -> &NoiseSchedule {
        &self.schedule
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn denoiser(&self) -> &D {
        &self.denoiser
    }

    /// Mutable access for the optimizer updating the denoiser between calls.
    pub fn denoiser_mut(&mut self) -> &mut D {
        &mut self.denoiser
    }

    pub fn into_denoiser(self) -> D {
        self.denoiser
    }

    /// Samples `x_t ~ q(x_t | x_0)`:
    /// `sqrt(alpha_cumprod_t) * original + sqrt(1 - alpha_cumprod_t) * noise`.
    pub fn add_noise(
        &self,
        original: Tensor<B, 4>,
        noise: Tensor<B, 4>,
        timesteps: &[usize],
    ) -> error::Result<Tensor<B, 4>> {
        let dims = self.check_images(&original)?;
        if noise.dims() != dims {
            return Err(DiffusionError::InvalidShape {
                expected: dims,
                actual: noise.dims(),
            });
        }
        self.check_timesteps(dims[0], timesteps)?;

        let device = original.device();
        let image_scale = self.lookup(self.schedule.sqrt_alphas_cumprod(), timesteps, &device);
        let noise_scale = self.lookup(
            self.schedule.sqrt_one_minus_alphas_cumprod(),
            timesteps,
            &device,
        );

        Ok(original * image_scale + noise * noise_scale)
    }

    /// The training objective for a batch of clean images.
    ///
    /// Draws the noise and one timestep per image from `rng`, then returns the
    /// mean squared error of the predicted noise. The loss stays attached to the
    /// denoiser's autodiff graph.
    pub fn training_loss<R: Rng + ?Sized>(
        &self,
        original: Tensor<B, 4>,
        rng: &mut R,
    ) -> error::Result<Tensor<B, 1>> {
        let dims = self.check_images(&original)?;

        let noise = randn(rng, dims, &original.device());
        let timesteps: Vec<usize> = (0..dims[0])
            .map(|_| rng.gen_range(0..self.schedule.len()))
            .collect();

        self.training_loss_with(original, noise, &timesteps)
    }

    /// [Ddpm::training_loss] with the noise and timesteps provided by the caller.
    pub fn training_loss_with(
        &self,
        original: Tensor<B, 4>,
        noise: Tensor<B, 4>,
        timesteps: &[usize],
    ) -> error::Result<Tensor<B, 1>> {
        let noisy = self.add_noise(original, noise.clone(), timesteps)?;
        let pred_noise = self.predict_noise(noisy, timesteps)?;

        Ok(MseLoss::new().forward(pred_noise, noise, Reduction::Mean))
    }

    /// Mean and standard deviation of `p(x_{t-1} | x_t)`.
    ///
    /// The standard deviation has shape `[batch_size, 1, 1, 1]` and is zero for
    /// every sample at timestep 0.
    pub fn posterior(
        &self,
        sample: Tensor<B, 4>,
        timesteps: &[usize],
    ) -> error::Result<(Tensor<B, 4>, Tensor<B, 4>)> {
        let dims = self.check_images(&sample)?;
        self.check_timesteps(dims[0], timesteps)?;

        let pred_noise = self.predict_noise(sample.clone(), timesteps)?;

        let device = sample.device();
        let alphas = self.schedule.alphas();
        let sqrt_one_minus_alphas_cumprod = self.schedule.sqrt_one_minus_alphas_cumprod();
        let noise_coef = per_sample(
            timesteps
                .iter()
                .map(|&t| (1.0 - alphas[t]) / sqrt_one_minus_alphas_cumprod[t]),
            &device,
        );
        let scale = per_sample(timesteps.iter().map(|&t| 1.0 / alphas[t].sqrt()), &device);
        let std = per_sample(
            timesteps.iter().map(|&t| self.schedule.posterior_std(t)),
            &device,
        );

        let mean = (sample - pred_noise * noise_coef) * scale;

        Ok((mean, std))
    }

    /// Perform a backward step, sampling `x_{t-1}` from `p(x_{t-1} | x_t)`.
    pub fn reverse_step<R: Rng + ?Sized>(
        &self,
        sample: Tensor<B, 4>,
        timesteps: &[usize],
        rng: &mut R,
    ) -> error::Result<Tensor<B, 4>> {
        let (mean, std) = self.posterior(sample, timesteps)?;

        // No noise is injected at the terminal step.
        if timesteps.iter().all(|&t| t == 0) {
            return Ok(mean);
        }
        let noise = randn(rng, mean.dims(), &mean.device());

        Ok(mean + std * noise)
    }

    /// Starts the reverse process from `amount` images of pure noise.
    ///
    /// The returned iterator runs one reverse step per item, from `T - 1` down
    /// to 1. Dropping it between steps abandons the sampling.
    pub fn reverse_process<'a, R: Rng + ?Sized>(
        &'a self,
        amount: usize,
        rng: &'a mut R,
    ) -> error::Result<ReverseProcess<'a, B, D, R>> {
        if amount == 0 {
            return Err(DiffusionError::InvalidConfig(
                "the amount of samples must be at least 1".into(),
            ));
        }
        let size = self.config.image_size;
        let dims = [amount, self.config.channels, size, size];
        let sample = randn(rng, dims, &self.device);

        Ok(ReverseProcess {
            ddpm: self,
            rng,
            sample,
            timestep: self.schedule.len() - 1,
        })
    }

    /// Generates `amount` images from noise.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        amount: usize,
        mode: SamplingMode,
        rng: &mut R,
    ) -> error::Result<Tensor<B, 4>> {
        if mode == SamplingMode::WholeProcess && self.schedule.len() < 2 {
            return Err(DiffusionError::InvalidConfig(
                "sampling the whole process needs at least two timesteps".into(),
            ));
        }
        debug!(amount, ?mode, timesteps = self.schedule.len(), "sampling");

        let stride = self.config.trace_stride;
        let mut frames = Vec::new();
        let mut process = self.reverse_process(amount, rng)?;

        for (index, step) in process.by_ref().enumerate() {
            let step = step?;
            if mode == SamplingMode::WholeProcess && index % stride == 0 {
                frames.push(step.noisy);
            }
        }

        match mode {
            SamplingMode::FinalOnly => Ok(process.into_sample()),
            SamplingMode::WholeProcess => {
                debug!(frames = frames.len(), "concatenating sampling trace");
                Ok(Tensor::cat(frames, 2))
            }
        }
    }

    fn predict_noise(
        &self,
        sample: Tensor<B, 4>,
        timesteps: &[usize],
    ) -> error::Result<Tensor<B, 4>> {
        let expected = sample.dims();
        let timesteps = timestep_tensor(timesteps, &sample.device());
        let pred_noise = self.denoiser.predict_noise(sample, timesteps);

        let actual = pred_noise.dims();
        if actual != expected {
            return Err(DiffusionError::ShapeMismatch { expected, actual });
        }

        Ok(pred_noise)
    }

    fn lookup(&self, values: &[f64], timesteps: &[usize], device: &B::Device) -> Tensor<B, 4> {
        per_sample(timesteps.iter().map(|&t| values[t]), device)
    }

    fn check_images(&self, images: &Tensor<B, 4>) -> error::Result<[usize; 4]> {
        let actual = images.dims();
        let size = self.config.image_size;
        let expected = [actual[0], self.config.channels, size, size];

        if actual[0] == 0 {
            return Err(DiffusionError::InvalidConfig(
                "the image batch is empty".into(),
            ));
        }
        if actual != expected {
            return Err(DiffusionError::InvalidShape { expected, actual });
        }

        Ok(actual)
    }

    fn check_timesteps(&self, batch_size: usize, timesteps: &[usize]) -> error::Result<()> {
        if timesteps.len() != batch_size {
            return Err(DiffusionError::BatchMismatch {
                images: batch_size,
                timesteps: timesteps.len(),
            });
        }

        self.schedule.check_timesteps(timesteps)
    }
}

/// One executed reverse step.
#[derive(Debug, Clone)]
pub struct DenoisingStep<B: Backend> {
    /// The timestep the step started from.
    pub timestep: usize,
    /// `x_t`, the batch before the step.
    pub noisy: Tensor<B, 4>,
    /// `x_{t-1}`, the batch after the step.
    pub denoised: Tensor<B, 4>,
}

/// Step-by-step iterator over the reverse diffusion process.
pub struct ReverseProcess<'a, B: Backend, D, R: ?Sized> {
    ddpm: &'a Ddpm<B, D>,
    rng: &'a mut R,
    sample: Tensor<B, 4>,
    timestep: usize,
}

impl<'a, B, D, R> ReverseProcess<'a, B, D, R>
where
    B: Backend,
    D: Denoiser<B>,
    R: Rng + ?Sized,
{
    /// The batch as of the last completed step.
    pub fn current_sample(&self) -> &Tensor<B, 4> {
        &self.sample
    }

    /// The number of reverse steps left to run.
    pub fn remaining_steps(&self) -> usize {
        self.timestep
    }

    pub fn into_sample(self) -> Tensor<B, 4> {
        self.sample
    }
}

impl<'a, B, D, R> Iterator for ReverseProcess<'a, B, D, R>
where
    B: Backend,
    D: Denoiser<B>,
    R: Rng + ?Sized,
{
    type Item = error::Result<DenoisingStep<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.timestep == 0 {
            return None;
        }
        let timestep = self.timestep;
        let noisy = self.sample.clone();
        let timesteps = vec![timestep; noisy.dims()[0]];

        match self
            .ddpm
            .reverse_step(noisy.clone(), &timesteps, &mut *self.rng)
        {
            Ok(denoised) => {
                trace!(timestep, "reverse step");
                self.sample = denoised.clone();
                self.timestep -= 1;
                Some(Ok(DenoisingStep {
                    timestep,
                    noisy,
                    denoised,
                }))
            }
            Err(err) => {
                self.timestep = 0;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.timestep))
    }
}
