//! The alternating adversarial training step.
//!
//! One step builds every loss term in a single forward pass:
//!
//! - the reconstruction MSE and the generator adversarial loss, which reaches
//!   the encoder through the discriminator's computation,
//! - the discriminator loss on prior samples against *detached* codes, so it
//!   has no path into the generator.
//!
//! Each optimizer differentiates its own loss with respect to its own
//! parameter list. No gradient buffer is shared between the two networks, and
//! the generator step is applied before the discriminator step.

use crate::{
    common::*,
    config::LossWeights,
    dataset::{TrainBatch, TrainLoader, TrainStream},
    error::{Error, Result, Stage, StageContext},
    message::{LossReport, StepReport},
    model::{Discriminator, Generator, Network},
    objective,
    optim::Optimizer,
};

/// Differentiable loss terms of one batch.
#[derive(Debug)]
pub struct Losses {
    pub reconstruction: Tensor,
    pub adversarial: Tensor,
    pub generator: Tensor,
    pub discriminator: Tensor,
}

impl Losses {
    pub fn report(&self) -> LossReport {
        LossReport {
            reconstruction: self.reconstruction.double_value(&[]),
            adversarial: self.adversarial.double_value(&[]),
            generator: self.generator.double_value(&[]),
            discriminator: self.discriminator.double_value(&[]),
        }
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Updater<G, D> {
    generator: Network<G>,
    discriminator: Network<D>,
    gen_opt: Optimizer,
    dis_opt: Optimizer,
    loader: TrainLoader,
    #[derivative(Debug = "ignore")]
    stream: Option<TrainStream>,
    loss_weights: LossWeights,
    epoch: usize,
    iteration: usize,
}

impl<G, D> Updater<G, D>
where
    G: Generator,
    D: Discriminator,
{
    /// Binds each optimizer to its own network. Shape disagreements between
    /// the networks and the training data are configuration errors.
    pub fn new(
        generator: Network<G>,
        discriminator: Network<D>,
        gen_opt: Optimizer,
        dis_opt: Optimizer,
        loader: TrainLoader,
        loss_weights: LossWeights,
    ) -> Result<Self> {
        let latent_dim = generator.model().latent_dim();
        let input_dim = discriminator.model().input_dim();
        if latent_dim != input_dim {
            return Err(Error::Config(format!(
                "generator latent width {} does not match discriminator input width {}",
                latent_dim, input_dim
            )));
        }

        let dataset = loader.dataset();
        if dataset.seq_len() as i64 != generator.model().seq_len()
            || dataset.feature_dim() as i64 != generator.model().feature_dim()
        {
            return Err(Error::Config(format!(
                "training sequences have shape ({}, {}), the generator expects ({}, {})",
                dataset.seq_len(),
                dataset.feature_dim(),
                generator.model().seq_len(),
                generator.model().feature_dim()
            )));
        }

        Ok(Self {
            generator,
            discriminator,
            gen_opt,
            dis_opt,
            loader,
            stream: None,
            loss_weights,
            epoch: 0,
            iteration: 0,
        })
    }

    pub fn generator(&self) -> &Network<G> {
        &self.generator
    }

    pub fn discriminator(&self) -> &Network<D> {
        &self.discriminator
    }

    pub fn gen_optimizer(&self) -> &Optimizer {
        &self.gen_opt
    }

    pub fn dis_optimizer(&self) -> &Optimizer {
        &self.dis_opt
    }

    pub fn optimizers_mut(&mut self) -> (&mut Optimizer, &mut Optimizer) {
        (&mut self.gen_opt, &mut self.dis_opt)
    }

    pub fn loader(&self) -> &TrainLoader {
        &self.loader
    }

    /// The epoch the next batch is drawn from.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Number of completed steps.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Sets the counters after a resume. The batch stream restarts at the
    /// beginning of `epoch`.
    pub fn restore(&mut self, epoch: usize, iteration: usize) {
        self.stream = None;
        self.epoch = epoch;
        self.iteration = iteration;
    }

    /// Multiplies the learning rate of both optimizers.
    pub fn shift_learning_rate(&mut self, rate: f64) {
        self.gen_opt.shift_lr(rate);
        self.dis_opt.shift_lr(rate);
    }

    /// Forward pass of both networks on a batch of real sequences.
    pub fn losses(&self, sequences: &Tensor) -> Result<Losses> {
        let generator = self.generator.model();
        let discriminator = self.discriminator.model();

        let latent = generator.encode(sequences, true)?;
        let recon = generator.decode(&latent, true)?;
        let reconstruction = objective::reconstruction_loss(&recon, sequences)?;

        let (batch_size, latent_dim) = latent.size2().stage(Stage::GeneratorForward)?;
        let prior = Tensor::f_randn(&[batch_size, latent_dim], (Kind::Float, latent.device()))
            .stage(Stage::DiscriminatorForward)?;

        let real_scores = discriminator.score(&prior, true)?;
        let fake_scores = discriminator.score(&latent.detach(), true)?;
        let discriminator_loss = objective::discriminator_loss(&real_scores, &fake_scores)?;

        // gradient flows through the discriminator into the encoder
        let adversarial = objective::generator_adversarial_loss(&discriminator.score(&latent, true)?)?;

        let LossWeights {
            reconstruction: w_rec,
            adversarial: w_adv,
        } = self.loss_weights;
        let generator_loss = &reconstruction * w_rec + &adversarial * w_adv;

        Ok(Losses {
            reconstruction,
            adversarial,
            generator: generator_loss,
            discriminator: discriminator_loss,
        })
    }

    /// Applies the generator loss to the generator parameters only.
    pub fn update_generator(&mut self, losses: &Losses) -> Result<()> {
        self.gen_opt.backward_step(&losses.generator)
    }

    /// Applies the discriminator loss to the discriminator parameters only.
    pub fn update_discriminator(&mut self, losses: &Losses) -> Result<()> {
        self.dis_opt.backward_step(&losses.discriminator)
    }

    /// One complete step on a given batch.
    pub fn update_batch(&mut self, sequences: &Tensor) -> Result<LossReport> {
        let losses = self.losses(sequences)?;

        let gen_grads = self.gen_opt.gradients(&losses.generator)?;
        let dis_grads = self.dis_opt.gradients(&losses.discriminator)?;
        self.gen_opt.step(gen_grads)?;
        self.dis_opt.step(dis_grads)?;

        let report = losses.report();
        if !report.is_finite() {
            warn!(
                "non-finite loss at iteration {}: {:?}",
                self.iteration + 1,
                report
            );
        }
        Ok(report)
    }

    /// Draws the next training batch and runs one step on it.
    pub fn update(&mut self) -> Result<StepReport> {
        let TrainBatch {
            epoch,
            is_epoch_end,
            sequences,
            ..
        } = self.next_batch()?;
        let sequences = sequences.to_device(self.generator.device());

        let losses = self.update_batch(&sequences)?;

        self.iteration += 1;
        self.epoch = if is_epoch_end { epoch + 1 } else { epoch };

        Ok(StepReport {
            epoch,
            iteration: self.iteration,
            is_epoch_end,
            losses,
        })
    }

    fn next_batch(&mut self) -> Result<TrainBatch> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => self.loader.stream(self.epoch)?,
        };
        self.stream
            .insert(stream)
            .next()
            .ok_or_else(|| Error::Data("the training stream stopped unexpectedly".into()))?
    }
}
