//! Error taxonomy of the training core.

use crate::common::*;
use thiserror::Error as ThisError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The part of the training pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Setup,
    GeneratorForward,
    DiscriminatorForward,
    Loss,
    Backward,
    OptimizerStep,
    Evaluation,
    Checkpoint,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Setup => "setup",
            Self::GeneratorForward => "generator forward",
            Self::DiscriminatorForward => "discriminator forward",
            Self::Loss => "loss computation",
            Self::Backward => "backward pass",
            Self::OptimizerStep => "optimizer step",
            Self::Evaluation => "evaluation pass",
            Self::Checkpoint => "checkpoint",
        };
        f.write_str(text)
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("resume mismatch: {0}")]
    ResumeMismatch(String),
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: TchError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Re-tags a stage failure, other errors pass through.
    pub fn restage(self, stage: Stage) -> Self {
        match self {
            Self::Stage { source, .. } => Self::Stage { stage, source },
            other => other,
        }
    }
}

pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageContext<T> for std::result::Result<T, TchError> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|source| Error::Stage { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tag_is_kept() {
        let err = Tensor::zeros(&[2, 3], (Kind::Float, Device::Cpu))
            .f_reshape(&[7])
            .stage(Stage::DiscriminatorForward)
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::DiscriminatorForward));
        assert!(err.to_string().starts_with("discriminator forward failed"));
    }
}
