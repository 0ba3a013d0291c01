use crate::{
    common::*,
    dataset::PoseDataset,
    error::{Error, Result, Stage},
    model::{Generator, Network},
    objective,
};

/// Reconstruction error over the held-out set.
///
/// The set is walked once per call in storage order. Per-batch squared
/// errors and element counts are summed in double precision, so the result
/// is the exact mean even when the final batch is short.
#[derive(Debug)]
pub struct Evaluator {
    dataset: PoseDataset,
    batch_size: usize,
}

impl Evaluator {
    pub fn new(dataset: PoseDataset, batch_size: usize) -> Result<Self> {
        if dataset.is_empty() {
            return Err(Error::Config("the test set is empty".into()));
        }
        if batch_size == 0 {
            return Err(Error::Config("test_batch_size must be positive".into()));
        }
        Ok(Self {
            dataset,
            batch_size,
        })
    }

    pub fn dataset(&self) -> &PoseDataset {
        &self.dataset
    }

    /// Runs the generator in inference mode. Batch norm statistics are used,
    /// never updated.
    pub fn evaluate<G>(&self, generator: &Network<G>) -> Result<f64>
    where
        G: Generator,
    {
        let device = generator.device();

        let (sum, count) = tch::no_grad(|| -> Result<_> {
            let mut sum = 0.0;
            let mut count = 0;

            for batch in self.dataset.test_batches(self.batch_size) {
                let batch = batch.to_device(device);
                let recon = generator
                    .model()
                    .reconstruct(&batch, false)
                    .map_err(|err| err.restage(Stage::Evaluation))?;
                let (batch_sum, batch_count) = objective::squared_error_sum(&recon, &batch)
                    .map_err(|err| err.restage(Stage::Evaluation))?;
                sum += batch_sum;
                count += batch_count;
            }

            Ok((sum, count))
        })?;

        Ok(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConvGeneratorInit;

    fn generator(batch_norm: bool) -> Network<impl Generator> {
        Network::new(Device::Cpu, |root| {
            ConvGeneratorInit {
                seq_len: 4,
                feature_dim: 2,
                latent_dim: 8,
                channels: 4,
                batch_norm,
            }
            .build(root)
        })
    }

    #[test]
    fn batch_norm_state_is_untouched() {
        let generator = generator(true);
        let evaluator = Evaluator::new(PoseDataset::synthetic(23, 4, 2, 3).unwrap(), 10).unwrap();

        let before = generator.snapshot();
        let first = evaluator.evaluate(&generator).unwrap();
        let second = evaluator.evaluate(&generator).unwrap();
        let after = generator.snapshot();

        assert_eq!(first, second);
        assert!(before
            .iter()
            .zip(after.iter())
            .all(|((_, lhs), (_, rhs))| lhs.equal(rhs)));
    }

    #[test]
    fn empty_test_set_is_rejected() {
        let empty = PoseDataset::from_tensor(Tensor::zeros(&[0, 4, 2], (Kind::Float, Device::Cpu)))
            .unwrap();
        assert!(matches!(Evaluator::new(empty, 10), Err(Error::Config(_))));
    }
}
