use crate::{
    common::*,
    error::{Result, Stage, StageContext},
};

/// Mean squared error over every element.
pub fn reconstruction_loss(reconstruction: &Tensor, target: &Tensor) -> Result<Tensor> {
    reconstruction
        .f_mse_loss(target, Reduction::Mean)
        .stage(Stage::Loss)
}

/// Sum of squared errors in double precision and the number of elements
/// it was taken over.
pub fn squared_error_sum(reconstruction: &Tensor, target: &Tensor) -> Result<(f64, i64)> {
    let diff = reconstruction
        .to_kind(Kind::Double)
        .f_sub(&target.to_kind(Kind::Double))
        .stage(Stage::Loss)?;
    let sum = (&diff * &diff).sum(Kind::Double).double_value(&[]);
    let count = diff.size().iter().product();
    Ok((sum, count))
}

/// Binary adversarial loss driving prior samples towards label 1 and encoded
/// codes towards label 0.
pub fn discriminator_loss(real_scores: &Tensor, fake_scores: &Tensor) -> Result<Tensor> {
    let real_loss = real_scores
        .f_binary_cross_entropy_with_logits::<Tensor>(
            &real_scores.ones_like(),
            None,
            None,
            Reduction::Mean,
        )
        .stage(Stage::Loss)?;
    let fake_loss = fake_scores
        .f_binary_cross_entropy_with_logits::<Tensor>(
            &fake_scores.zeros_like(),
            None,
            None,
            Reduction::Mean,
        )
        .stage(Stage::Loss)?;
    Ok(real_loss + fake_loss)
}

/// The mirrored loss driving encoded codes towards label 1.
pub fn generator_adversarial_loss(fake_scores: &Tensor) -> Result<Tensor> {
    fake_scores
        .f_binary_cross_entropy_with_logits::<Tensor>(
            &fake_scores.ones_like(),
            None,
            None,
            Reduction::Mean,
        )
        .stage(Stage::Loss)
}
