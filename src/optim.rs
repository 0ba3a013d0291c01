//! First-order optimizers with explicit, serializable state.
//!
//! An optimizer is bound to one parameter list at construction. Gradients are
//! computed with respect to exactly that list, so a backward pass through
//! another network's computation never touches that network's parameters or
//! any shared gradient buffer.

use crate::{
    common::*,
    config::{AdamConfig, NesterovAgConfig, OptimizerConfig},
    error::{Error, Result, Stage, StageContext},
};

/// Gradients produced by [`Optimizer::gradients`], one per bound parameter.
#[derive(Debug)]
pub struct Gradients(Vec<Tensor>);

#[derive(Debug)]
enum Slot {
    Adam { m: Tensor, v: Tensor },
    NesterovAg { v: Tensor },
}

#[derive(Debug)]
pub struct Optimizer {
    config: OptimizerConfig,
    lr: f64,
    iteration: i64,
    params: Vec<(String, Tensor)>,
    slots: Vec<Slot>,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig, params: Vec<(String, Tensor)>) -> Self {
        let (lr, slots) = tch::no_grad(|| match config {
            OptimizerConfig::Adam(AdamConfig { alpha, .. }) => {
                let slots: Vec<Slot> = params
                    .iter()
                    .map(|(_, param)| Slot::Adam {
                        m: param.zeros_like(),
                        v: param.zeros_like(),
                    })
                    .collect();
                (alpha, slots)
            }
            OptimizerConfig::NesterovAg(NesterovAgConfig { lr, .. }) => {
                let slots: Vec<Slot> = params
                    .iter()
                    .map(|(_, param)| Slot::NesterovAg {
                        v: param.zeros_like(),
                    })
                    .collect();
                (lr, slots)
            }
        });

        Self {
            config,
            lr,
            iteration: 0,
            params,
            slots,
        }
    }

    /// The current learning rate, alpha for Adam.
    pub fn lr(&self) -> f64 {
        self.lr
    }

    pub fn shift_lr(&mut self, rate: f64) {
        self.lr *= rate;
    }

    /// Number of applied updates.
    pub fn iteration(&self) -> i64 {
        self.iteration
    }

    /// Gradients of `loss` with respect to the bound parameters only. Nothing
    /// is accumulated into any tensor's `.grad`.
    pub fn gradients(&self, loss: &Tensor) -> Result<Gradients> {
        let inputs: Vec<&Tensor> = self.params.iter().map(|(_, param)| param).collect();
        let grads = Tensor::f_run_backward(&[loss], &inputs, false, false).stage(Stage::Backward)?;
        Ok(Gradients(grads))
    }

    /// Applies one update to the bound parameters.
    pub fn step(&mut self, grads: Gradients) -> Result<()> {
        let Gradients(grads) = grads;
        debug_assert_eq!(grads.len(), self.params.len());

        self.iteration += 1;
        let lr = self.lr;
        let iteration = self.iteration;
        let config = self.config;

        tch::no_grad(|| -> Result<()> {
            for ((_, param), grad, slot) in izip!(&mut self.params, &grads, &mut self.slots) {
                // parameters unreachable from the loss
                if !grad.defined() {
                    continue;
                }

                match (config, slot) {
                    (
                        OptimizerConfig::Adam(AdamConfig {
                            beta1,
                            beta2,
                            eps,
                            weight_decay,
                            ..
                        }),
                        Slot::Adam { m, v },
                    ) => {
                        let grad = grad + &*param * weight_decay;
                        let new_m = &*m + (&grad - &*m) * (1.0 - beta1);
                        let new_v = &*v + (&grad * &grad - &*v) * (1.0 - beta2);

                        let t = iteration as i32;
                        let lr_t = lr * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));
                        let new_param = &*param - &new_m / (new_v.sqrt() + eps) * lr_t;

                        m.f_copy_(&new_m).stage(Stage::OptimizerStep)?;
                        v.f_copy_(&new_v).stage(Stage::OptimizerStep)?;
                        param.f_copy_(&new_param).stage(Stage::OptimizerStep)?;
                    }
                    (
                        OptimizerConfig::NesterovAg(NesterovAgConfig {
                            momentum,
                            weight_decay,
                            ..
                        }),
                        Slot::NesterovAg { v },
                    ) => {
                        let grad = grad + &*param * weight_decay;
                        let new_v = &*v * momentum - &grad * lr;
                        let new_param = &*param + &new_v * (momentum * momentum)
                            - &grad * ((1.0 + momentum) * lr);

                        v.f_copy_(&new_v).stage(Stage::OptimizerStep)?;
                        param.f_copy_(&new_param).stage(Stage::OptimizerStep)?;
                    }
                    _ => unreachable!("slots are created from the same config"),
                }
            }
            Ok(())
        })
    }

    /// Computes the gradients of `loss` and applies them.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = self.gradients(loss)?;
        self.step(grads)
    }

    /// Named state tensors: learning rate, iteration count, and per-parameter
    /// accumulators.
    pub fn state(&self) -> Vec<(String, Tensor)> {
        let mut state = vec![
            ("lr".to_string(), Tensor::from(self.lr)),
            ("iteration".to_string(), Tensor::from(self.iteration)),
        ];

        for ((name, _), slot) in self.params.iter().zip(self.slots.iter()) {
            match slot {
                Slot::Adam { m, v } => {
                    state.push((format!("m.{}", name), m.shallow_clone()));
                    state.push((format!("v.{}", name), v.shallow_clone()));
                }
                Slot::NesterovAg { v } => {
                    state.push((format!("v.{}", name), v.shallow_clone()));
                }
            }
        }

        state
    }

    /// Verifies that `state` was produced by [`Optimizer::state`] of the same
    /// optimizer family over parameters of the same names and shapes.
    pub fn check_state(&self, state: &HashMap<String, Tensor>) -> Result<()> {
        let expected = 2 + self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Adam { .. } => 2,
                Slot::NesterovAg { .. } => 1,
            })
            .sum::<usize>();
        if state.len() != expected {
            return Err(Error::ResumeMismatch(format!(
                "optimizer state has {} entries, expect {}",
                state.len(),
                expected
            )));
        }

        lookup(state, "lr", &[])?;
        lookup(state, "iteration", &[])?;
        for ((name, param), slot) in self.params.iter().zip(self.slots.iter()) {
            let shape = param.size();
            if let Slot::Adam { .. } = slot {
                lookup(state, &format!("m.{}", name), &shape)?;
            }
            lookup(state, &format!("v.{}", name), &shape)?;
        }
        Ok(())
    }

    /// Restores a state produced by [`Optimizer::state`]. The whole state is
    /// checked first, so on error the optimizer is left as it was.
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>) -> Result<()> {
        self.check_state(state)?;

        let lr = lookup(state, "lr", &[])?.double_value(&[]);
        let iteration = lookup(state, "iteration", &[])?.int64_value(&[]);

        tch::no_grad(|| -> Result<()> {
            for ((name, param), slot) in self.params.iter().zip(self.slots.iter_mut()) {
                let shape = param.size();
                match slot {
                    Slot::Adam { m, v } => {
                        m.f_copy_(lookup(state, &format!("m.{}", name), &shape)?)
                            .stage(Stage::Checkpoint)?;
                        v.f_copy_(lookup(state, &format!("v.{}", name), &shape)?)
                            .stage(Stage::Checkpoint)?;
                    }
                    Slot::NesterovAg { v } => {
                        v.f_copy_(lookup(state, &format!("v.{}", name), &shape)?)
                            .stage(Stage::Checkpoint)?;
                    }
                }
            }
            Ok(())
        })?;

        self.lr = lr;
        self.iteration = iteration;
        Ok(())
    }
}

fn lookup<'a>(state: &'a HashMap<String, Tensor>, name: &str, shape: &[i64]) -> Result<&'a Tensor> {
    let tensor = state
        .get(name)
        .ok_or_else(|| Error::ResumeMismatch(format!("optimizer state '{}' is missing", name)))?;
    if tensor.size() != shape {
        return Err(Error::ResumeMismatch(format!(
            "optimizer state '{}' has shape {:?}, expect {:?}",
            name,
            tensor.size(),
            shape
        )));
    }
    Ok(tensor)
}
