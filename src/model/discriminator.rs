use super::{leaky_relu, Discriminator};
use crate::{
    common::*,
    config::ModelConfig,
    error::{Error, Result, Stage, StageContext},
};

#[derive(Debug, Clone)]
pub struct MlpDiscriminatorInit {
    pub input_dim: i64,
    pub hidden: i64,
}

impl MlpDiscriminatorInit {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            input_dim: config.discriminator_input_dim() as i64,
            hidden: config.discriminator_hidden as i64,
        }
    }

    pub fn build<'p, P>(self, path: P) -> MlpDiscriminator
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self { input_dim, hidden } = self;

        let fc1 = nn::linear(path / "fc1", input_dim, hidden, Default::default());
        let fc2 = nn::linear(path / "fc2", hidden, hidden, Default::default());
        let fc3 = nn::linear(path / "fc3", hidden, 1, Default::default());

        MlpDiscriminator {
            input_dim,
            fc1,
            fc2,
            fc3,
        }
    }
}

/// Scores latent codes, positive logits mean "drawn from the prior".
#[derive(Debug)]
pub struct MlpDiscriminator {
    input_dim: i64,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
}

impl Discriminator for MlpDiscriminator {
    fn input_dim(&self) -> i64 {
        self.input_dim
    }

    fn score(&self, latent: &Tensor, _train: bool) -> Result<Tensor> {
        let (batch_size, input_dim) = latent.size2().stage(Stage::DiscriminatorForward)?;
        if input_dim != self.input_dim {
            return Err(Error::Data(format!(
                "expect latent codes of width {}, get {:?}",
                self.input_dim,
                latent.size()
            )));
        }

        let xs = leaky_relu(&latent.apply(&self.fc1));
        let xs = leaky_relu(&xs.apply(&self.fc2));
        let scores = xs
            .apply(&self.fc3)
            .f_reshape(&[batch_size])
            .stage(Stage::DiscriminatorForward)?;

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    #[test]
    fn one_score_per_example() {
        let network = Network::new(Device::Cpu, |root| {
            MlpDiscriminatorInit {
                input_dim: 8,
                hidden: 16,
            }
            .build(root)
        });
        let latent = Tensor::randn(&[5, 8], (Kind::Float, Device::Cpu));
        let scores = network.model().score(&latent, true).unwrap();
        assert_eq!(scores.size(), vec![5]);

        let wrong = Tensor::randn(&[5, 1], (Kind::Float, Device::Cpu));
        assert!(network.model().score(&wrong, true).is_err());
    }
}
