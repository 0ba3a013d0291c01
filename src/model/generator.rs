use super::{leaky_relu, normalize, Generator};
use crate::{
    common::*,
    config::ModelConfig,
    error::{Error, Result, Stage, StageContext},
};

/// Temporal convolutional autoencoder over pose sequences.
#[derive(Debug, Clone)]
pub struct ConvGeneratorInit {
    pub seq_len: i64,
    pub feature_dim: i64,
    pub latent_dim: i64,
    pub channels: i64,
    pub batch_norm: bool,
}

impl ConvGeneratorInit {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            seq_len: config.seq_len as i64,
            feature_dim: config.feature_dim as i64,
            latent_dim: config.latent_dim as i64,
            channels: config.channels as i64,
            batch_norm: config.batch_norm,
        }
    }

    pub fn build<'p, P>(self, path: P) -> ConvGenerator
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            seq_len,
            feature_dim,
            latent_dim,
            channels,
            batch_norm,
        } = self;

        let conv_config = ConvConfig {
            padding: 1,
            ..Default::default()
        };
        let make_bn = |name: &str, dim: i64| {
            batch_norm.then(|| nn::batch_norm1d(path / name, dim, Default::default()))
        };

        // encoder
        let enc_conv1 = nn::conv1d(path / "enc_conv1", feature_dim, channels, 3, conv_config);
        let enc_bn1 = make_bn("enc_bn1", channels);
        let enc_conv2 = nn::conv1d(path / "enc_conv2", channels, channels, 3, conv_config);
        let enc_bn2 = make_bn("enc_bn2", channels);
        let enc_fc = nn::linear(
            path / "enc_fc",
            channels * seq_len,
            latent_dim,
            Default::default(),
        );

        // decoder
        let dec_fc = nn::linear(
            path / "dec_fc",
            latent_dim,
            channels * seq_len,
            Default::default(),
        );
        let dec_bn0 = make_bn("dec_bn0", channels * seq_len);
        let dec_conv1 = nn::conv1d(path / "dec_conv1", channels, channels, 3, conv_config);
        let dec_bn1 = make_bn("dec_bn1", channels);
        let dec_conv2 = nn::conv1d(path / "dec_conv2", channels, feature_dim, 3, conv_config);

        ConvGenerator {
            seq_len,
            feature_dim,
            latent_dim,
            channels,
            enc_conv1,
            enc_bn1,
            enc_conv2,
            enc_bn2,
            enc_fc,
            dec_fc,
            dec_bn0,
            dec_conv1,
            dec_bn1,
            dec_conv2,
        }
    }
}

#[derive(Debug)]
pub struct ConvGenerator {
    // params
    seq_len: i64,
    feature_dim: i64,
    latent_dim: i64,
    channels: i64,
    // encoder
    enc_conv1: Conv1D,
    enc_bn1: Option<BatchNorm>,
    enc_conv2: Conv1D,
    enc_bn2: Option<BatchNorm>,
    enc_fc: Linear,
    // decoder
    dec_fc: Linear,
    dec_bn0: Option<BatchNorm>,
    dec_conv1: Conv1D,
    dec_bn1: Option<BatchNorm>,
    dec_conv2: Conv1D,
}

impl Generator for ConvGenerator {
    fn seq_len(&self) -> i64 {
        self.seq_len
    }

    fn feature_dim(&self) -> i64 {
        self.feature_dim
    }

    fn latent_dim(&self) -> i64 {
        self.latent_dim
    }

    fn encode(&self, sequences: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, seq_len, feature_dim) =
            sequences.size3().stage(Stage::GeneratorForward)?;
        if seq_len != self.seq_len || feature_dim != self.feature_dim {
            return Err(Error::Data(format!(
                "expect sequences of shape (_, {}, {}), get {:?}",
                self.seq_len,
                self.feature_dim,
                sequences.size()
            )));
        }

        // channel first for temporal convolutions
        let xs = sequences
            .f_transpose(1, 2)
            .stage(Stage::GeneratorForward)?;

        let xs = leaky_relu(&normalize(xs.apply(&self.enc_conv1), &self.enc_bn1, train));
        let xs = leaky_relu(&normalize(xs.apply(&self.enc_conv2), &self.enc_bn2, train));

        let latent = xs
            .f_reshape(&[batch_size, self.channels * self.seq_len])
            .stage(Stage::GeneratorForward)?
            .apply(&self.enc_fc);

        Ok(latent)
    }

    fn decode(&self, latent: &Tensor, train: bool) -> Result<Tensor> {
        let (batch_size, latent_dim) = latent.size2().stage(Stage::GeneratorForward)?;
        if latent_dim != self.latent_dim {
            return Err(Error::Data(format!(
                "expect latent codes of width {}, get {:?}",
                self.latent_dim,
                latent.size()
            )));
        }

        let xs = leaky_relu(&normalize(latent.apply(&self.dec_fc), &self.dec_bn0, train));
        let xs = xs
            .f_reshape(&[batch_size, self.channels, self.seq_len])
            .stage(Stage::GeneratorForward)?;
        let xs = leaky_relu(&normalize(xs.apply(&self.dec_conv1), &self.dec_bn1, train));

        let sequences = xs
            .apply(&self.dec_conv2)
            .f_transpose(1, 2)
            .stage(Stage::GeneratorForward)?;

        Ok(sequences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    fn init(batch_norm: bool) -> ConvGeneratorInit {
        ConvGeneratorInit {
            seq_len: 4,
            feature_dim: 2,
            latent_dim: 8,
            channels: 6,
            batch_norm,
        }
    }

    #[test]
    fn encode_decode_shapes() {
        let network = Network::new(Device::Cpu, |root| init(false).build(root));
        let sequences = Tensor::randn(&[5, 4, 2], (Kind::Float, Device::Cpu));

        let latent = network.model().encode(&sequences, true).unwrap();
        assert_eq!(latent.size(), vec![5, 8]);

        let recon = network.model().decode(&latent, true).unwrap();
        assert_eq!(recon.size(), vec![5, 4, 2]);
    }

    #[test]
    fn wrong_sequence_shape_is_a_data_error() {
        let network = Network::new(Device::Cpu, |root| init(false).build(root));
        let sequences = Tensor::randn(&[5, 3, 2], (Kind::Float, Device::Cpu));
        assert!(matches!(
            network.model().encode(&sequences, true),
            Err(Error::Data(_))
        ));
    }

    #[test]
    fn batch_norm_statistics_only_move_in_training() {
        let network = Network::new(Device::Cpu, |root| init(true).build(root));
        let sequences = Tensor::randn(&[5, 4, 2], (Kind::Float, Device::Cpu)) * 3.0 + 1.0;

        let before = network.snapshot();
        let _ = tch::no_grad(|| network.model().reconstruct(&sequences, false)).unwrap();
        let after_eval = network.snapshot();
        assert!(before
            .iter()
            .zip(after_eval.iter())
            .all(|((_, lhs), (_, rhs))| lhs.equal(rhs)));

        let _ = tch::no_grad(|| network.model().reconstruct(&sequences, true)).unwrap();
        let after_train = network.snapshot();
        assert!(before
            .iter()
            .zip(after_train.iter())
            .any(|((_, lhs), (_, rhs))| !lhs.equal(rhs)));
    }
}
