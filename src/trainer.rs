//! The training orchestrator.
//!
//! A fixed loop over epochs calls [`Updater::update`] once per step. Learning
//! rate shifts, evaluation, log records, and snapshots are independent
//! callbacks fired at epoch boundaries by interval predicates.

use crate::{
    checkpoint,
    common::*,
    config::{Config, LoggingConfig, LrShiftConfig, TrainingConfig},
    dataset::{PoseDataset, TrainLoaderInit},
    evaluator::Evaluator,
    message::StepReport,
    model::{ConvGenerator, ConvGeneratorInit, MlpDiscriminator, MlpDiscriminatorInit, Network},
    optim::Optimizer,
    params,
    report::{LogReport, RateCounter},
    updater::Updater,
};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug)]
pub struct Trainer {
    config: Config,
    result_dir: PathBuf,
    updater: Updater<ConvGenerator, MlpDiscriminator>,
    evaluator: Evaluator,
    report: LogReport,
}

impl Trainer {
    /// Prepares the result directory and every training component, then
    /// resumes from `config.resume` if it is set.
    pub fn new(config: Config) -> Fallible<Self> {
        config.validate()?;

        let Config {
            seed,
            device,
            ref dataset,
            ref model,
            ref training,
            ref logging,
            ref resume,
            ..
        } = config;
        let TrainingConfig {
            batch_size,
            test_batch_size,
            optimizer,
            loss_weights,
            prefetch,
            ..
        } = *training;

        let result_dir = {
            let name = match &logging.name {
                Some(name) => name.clone(),
                None => Local::now().format(params::RESULT_DIR_STRFTIME).to_string(),
            };
            logging.result_dir.join(name)
        };
        fs::create_dir_all(&result_dir).with_context(|| {
            format!("unable to create result directory {}", result_dir.display())
        })?;
        config.save(result_dir.join(CONFIG_FILE))?;
        info!("results are written to {}", result_dir.display());

        info!("loading dataset");
        let (train_set, test_set) = PoseDataset::from_config(dataset, model, seed)?;
        info!(
            "{} training sequences, {} test sequences",
            train_set.len(),
            test_set.len()
        );

        tch::manual_seed(seed as i64);
        let generator = Network::new(device, |root| ConvGeneratorInit::new(model).build(root));
        let discriminator =
            Network::new(device, |root| MlpDiscriminatorInit::new(model).build(root));
        let gen_opt = Optimizer::new(optimizer, generator.parameters());
        let dis_opt = Optimizer::new(optimizer, discriminator.parameters());

        let loader = TrainLoaderInit {
            batch_size,
            seed,
            prefetch,
        }
        .build(train_set)?;
        let mut updater = Updater::new(
            generator,
            discriminator,
            gen_opt,
            dis_opt,
            loader,
            loss_weights,
        )?;
        let evaluator = Evaluator::new(test_set, test_batch_size)?;

        if let Some(path) = resume {
            checkpoint::resume(path, &mut updater, model)
                .with_context(|| format!("unable to resume from {}", path.display()))?;
        }

        let report = LogReport::open(&result_dir)?;

        Ok(Self {
            config,
            result_dir,
            updater,
            evaluator,
            report,
        })
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn updater(&self) -> &Updater<ConvGenerator, MlpDiscriminator> {
        &self.updater
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Trains until the configured epoch count is reached or `shutdown` is
    /// raised. The flag is checked between steps.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Fallible<()> {
        let epochs = self.config.training.epochs;
        let batch_size = self.config.training.batch_size;
        let progress_interval = self.config.logging.progress_interval;

        let mut rate_counter = RateCounter::with_second_interval();
        let mut seeded_epoch = None;

        info!(
            "training from epoch {} to {}, {} iterations per epoch",
            self.updater.epoch(),
            epochs,
            self.updater.loader().iterations_per_epoch()
        );

        while self.updater.epoch() < epochs {
            if shutdown.load(Ordering::SeqCst) {
                warn!(
                    "stopped at epoch {}, iteration {}",
                    self.updater.epoch(),
                    self.updater.iteration()
                );
                return Ok(());
            }

            let epoch = self.updater.epoch();
            if seeded_epoch != Some(epoch) {
                tch::manual_seed(self.config.seed.wrapping_add(epoch as u64) as i64);
                seeded_epoch = Some(epoch);
            }

            let step = self.updater.update()?;
            self.report.observe(&step.losses);

            rate_counter.add(1.0);
            if step.iteration % progress_interval == 0 {
                if let Some(batch_rate) = rate_counter.rate() {
                    info!(
                        "iteration: {}\t{:.2} batch/s\t{:.2} sample/s",
                        step.iteration,
                        batch_rate,
                        batch_rate * batch_size as f64
                    );
                }
            }

            if step.is_epoch_end {
                self.end_epoch(&step)?;
            }
        }

        info!("training finished at iteration {}", self.updater.iteration());
        Ok(())
    }

    fn end_epoch(&mut self, step: &StepReport) -> Fallible<()> {
        let completed = step.epoch + 1;
        let LoggingConfig {
            log_interval,
            eval_interval,
            snapshot_interval,
            ..
        } = self.config.logging;

        if let Some(LrShiftConfig { rate, interval }) = self.config.training.lr_shift {
            if completed % interval == 0 {
                self.updater.shift_learning_rate(rate);
                info!(
                    "learning rate shifted to {:e}",
                    self.updater.gen_optimizer().lr()
                );
            }
        }

        if completed % eval_interval == 0 {
            let mse = self.evaluator.evaluate(self.updater.generator())?;
            self.report.observe_validation(mse);
        }

        if completed % log_interval == 0 {
            self.report.write(completed, step.iteration)?;
        }

        if completed % snapshot_interval == 0 {
            checkpoint::save(&self.result_dir, &self.updater, &self.config.model)?;
        }

        Ok(())
    }
}
