// configuration format
pub const CONFIG_VERSION: u32 = 1;
pub const CHECKPOINT_VERSION: u32 = 1;

// run
pub const SEED: u64 = 0;
pub const EPOCHS: usize = 200;
pub const BATCH_SIZE: usize = 16;
pub const TEST_BATCH_SIZE: usize = 32;
pub const PREFETCH: usize = 2;

// model
pub const SEQ_LEN: usize = 32;
pub const LATENT_DIM: usize = 64;
pub const CHANNELS: usize = 64;
pub const DISCRIMINATOR_HIDDEN: usize = 64;
pub const LEAKY_SLOPE: f64 = 0.2;

// Adam
pub const ADAM_ALPHA: f64 = 2e-4;
pub const ADAM_BETA1: f64 = 0.5;
pub const ADAM_BETA2: f64 = 0.999;
pub const ADAM_EPS: f64 = 1e-8;
pub const ADAM_WEIGHT_DECAY: f64 = 1e-5;

// Nesterov accelerated gradient
pub const NESTEROV_LR: f64 = 3e-4;
pub const NESTEROV_MOMENTUM: f64 = 0.9;
pub const NESTEROV_WEIGHT_DECAY: f64 = 1e-4;

// exponential learning rate shift
pub const LR_SHIFT_RATE: f64 = 0.1;
pub const LR_SHIFT_INTERVAL: usize = 100;

// logging
pub const RESULT_DIR: &str = "results";
pub const RESULT_DIR_STRFTIME: &str = "%Y-%m-%d_%H-%M-%S";
pub const PROGRESS_INTERVAL: usize = 10;
