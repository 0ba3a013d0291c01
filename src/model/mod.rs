//! Networks of the adversarial autoencoder.
//!
//! The training core only sees the capability traits below. Each network
//! lives in its own [`VarStore`] so the two parameter sets can never alias.

mod discriminator;
mod generator;

pub use discriminator::{MlpDiscriminator, MlpDiscriminatorInit};
pub use generator::{ConvGenerator, ConvGeneratorInit};

use crate::{common::*, error::Result, params};

/// Maps pose sequences `[batch, seq_len, feature_dim]` to latent codes
/// `[batch, latent_dim]` and back.
pub trait Generator {
    fn seq_len(&self) -> i64;
    fn feature_dim(&self) -> i64;
    fn latent_dim(&self) -> i64;
    fn encode(&self, sequences: &Tensor, train: bool) -> Result<Tensor>;
    fn decode(&self, latent: &Tensor, train: bool) -> Result<Tensor>;

    fn reconstruct(&self, sequences: &Tensor, train: bool) -> Result<Tensor> {
        let latent = self.encode(sequences, train)?;
        self.decode(&latent, train)
    }
}

/// Maps latent codes `[batch, input_dim]` to one realness logit per example.
pub trait Discriminator {
    fn input_dim(&self) -> i64;
    fn score(&self, latent: &Tensor, train: bool) -> Result<Tensor>;
}

/// A model together with the variable store that owns its parameters.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Network<M> {
    #[derivative(Debug = "ignore")]
    vs: VarStore,
    model: M,
}

impl<M> Network<M> {
    pub fn new<F>(device: Device, build: F) -> Self
    where
        F: FnOnce(nn::Path) -> M,
    {
        let vs = VarStore::new(device);
        let model = build(vs.root());
        Self { vs, model }
    }

    pub fn vs(&self) -> &VarStore {
        &self.vs
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// Trainable parameters sorted by name. The tensors share storage with
    /// the store.
    pub fn parameters(&self) -> Vec<(String, Tensor)> {
        self.vs
            .variables()
            .into_iter()
            .filter(|(_, tensor)| tensor.requires_grad())
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .collect()
    }

    /// Deep copies of every variable, running statistics included.
    pub fn snapshot(&self) -> Vec<(String, Tensor)> {
        self.vs
            .variables()
            .into_iter()
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .map(|(name, tensor)| (name, tensor.detach().copy()))
            .collect()
    }
}

fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.relu() - (-xs).relu() * params::LEAKY_SLOPE
}

fn normalize(xs: Tensor, bn: &Option<BatchNorm>, train: bool) -> Tensor {
    match bn {
        Some(bn) => xs.apply_t(bn, train),
        None => xs,
    }
}
