use crate::{
    common::*,
    error::{Error, Result},
    params,
};

/// The run configuration. It is frozen once loaded and persisted next to
/// the run outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(
        serialize_with = "serialize_device",
        deserialize_with = "deserialize_device",
        default = "default_device"
    )]
    pub device: Device,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resume: Option<PathBuf>,
}

impl Config {
    pub fn open<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("json5");
        let config: Self = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&text)?,
            "json5" | "json" => json5::from_str(&text)?,
            other => bail!("unsupported config file extension '{}'", other),
        };

        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Checks every constraint that does not need the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.version != params::CONFIG_VERSION {
            return Err(Error::Config(format!(
                "unsupported config version {}, expect {}",
                self.version,
                params::CONFIG_VERSION
            )));
        }

        self.model.validate()?;
        self.training.validate()?;
        self.logging.validate()?;

        if let DatasetConfig::Synthetic(SyntheticDatasetConfig {
            train_size,
            test_size,
        }) = self.dataset
        {
            if train_size < self.training.batch_size {
                return Err(Error::Config(format!(
                    "batch_size {} exceeds the training set size {}",
                    self.training.batch_size, train_size
                )));
            }
            if test_size == 0 {
                return Err(Error::Config("the test set is empty".into()));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatasetConfig {
    #[serde(rename = "file")]
    File(FileDatasetConfig),
    #[serde(rename = "synthetic")]
    Synthetic(SyntheticDatasetConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDatasetConfig {
    pub train_file: PathBuf,
    pub test_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticDatasetConfig {
    pub train_size: usize,
    pub test_size: usize,
}

/// Every field that determines a parameter shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,
    pub feature_dim: usize,
    #[serde(default = "default_latent_dim")]
    pub latent_dim: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default)]
    pub batch_norm: bool,
    #[serde(default = "default_discriminator_hidden")]
    pub discriminator_hidden: usize,
    /// Input width of the discriminator, defaults to `latent_dim`.
    #[serde(default)]
    pub discriminator_input_dim: Option<usize>,
}

impl ModelConfig {
    pub fn discriminator_input_dim(&self) -> usize {
        self.discriminator_input_dim.unwrap_or(self.latent_dim)
    }

    fn validate(&self) -> Result<()> {
        let sizes = [
            ("seq_len", self.seq_len),
            ("feature_dim", self.feature_dim),
            ("latent_dim", self.latent_dim),
            ("channels", self.channels),
            ("discriminator_hidden", self.discriminator_hidden),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(Error::Config(format!("model.{} must be positive", name)));
        }

        if self.discriminator_input_dim() != self.latent_dim {
            return Err(Error::Config(format!(
                "discriminator input width {} does not match generator latent width {}",
                self.discriminator_input_dim(),
                self.latent_dim
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub optimizer: OptimizerConfig,
    pub lr_shift: Option<LrShiftConfig>,
    pub loss_weights: LossWeights,
    /// Number of training batches prepared ahead by the loader thread.
    pub prefetch: usize,
}

impl TrainingConfig {
    fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 || self.test_batch_size == 0 {
            return Err(Error::Config(
                "epochs, batch_size and test_batch_size must be positive".into(),
            ));
        }
        if let Some(LrShiftConfig { rate, interval }) = self.lr_shift {
            if interval == 0 || rate.is_nan() || rate <= 0.0 {
                return Err(Error::Config(
                    "lr_shift needs a positive rate and interval".into(),
                ));
            }
        }
        let LossWeights {
            reconstruction,
            adversarial,
        } = self.loss_weights;
        if !reconstruction.is_finite() || !adversarial.is_finite() {
            return Err(Error::Config("loss weights must be finite".into()));
        }
        Ok(())
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: params::EPOCHS,
            batch_size: params::BATCH_SIZE,
            test_batch_size: params::TEST_BATCH_SIZE,
            optimizer: OptimizerConfig::default(),
            lr_shift: None,
            loss_weights: LossWeights::default(),
            prefetch: params::PREFETCH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    #[serde(rename = "adam")]
    Adam(AdamConfig),
    #[serde(rename = "nesterov_ag")]
    NesterovAg(NesterovAgConfig),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam(AdamConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub alpha: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            alpha: params::ADAM_ALPHA,
            beta1: params::ADAM_BETA1,
            beta2: params::ADAM_BETA2,
            eps: params::ADAM_EPS,
            weight_decay: params::ADAM_WEIGHT_DECAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NesterovAgConfig {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
}

impl Default for NesterovAgConfig {
    fn default() -> Self {
        Self {
            lr: params::NESTEROV_LR,
            momentum: params::NESTEROV_MOMENTUM,
            weight_decay: params::NESTEROV_WEIGHT_DECAY,
        }
    }
}

/// Multiplies the learning rate of both optimizers by `rate` every
/// `interval` epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LrShiftConfig {
    pub rate: f64,
    pub interval: usize,
}

impl Default for LrShiftConfig {
    fn default() -> Self {
        Self {
            rate: params::LR_SHIFT_RATE,
            interval: params::LR_SHIFT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossWeights {
    pub reconstruction: f64,
    pub adversarial: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            reconstruction: 1.0,
            adversarial: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub result_dir: PathBuf,
    /// Run directory name, a timestamp when absent.
    pub name: Option<String>,
    pub log_interval: usize,
    pub eval_interval: usize,
    pub snapshot_interval: usize,
    pub progress_interval: usize,
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        let intervals = [
            self.log_interval,
            self.eval_interval,
            self.snapshot_interval,
            self.progress_interval,
        ];
        if intervals.iter().any(|&interval| interval == 0) {
            return Err(Error::Config("logging intervals must be positive".into()));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from(params::RESULT_DIR),
            name: None,
            log_interval: 1,
            eval_interval: 1,
            snapshot_interval: 1,
            progress_interval: params::PROGRESS_INTERVAL,
        }
    }
}

fn default_version() -> u32 {
    params::CONFIG_VERSION
}

fn default_seed() -> u64 {
    params::SEED
}

fn default_seq_len() -> usize {
    params::SEQ_LEN
}

fn default_latent_dim() -> usize {
    params::LATENT_DIM
}

fn default_channels() -> usize {
    params::CHANNELS
}

fn default_discriminator_hidden() -> usize {
    params::DISCRIMINATOR_HIDDEN
}

fn default_device() -> Device {
    Device::cuda_if_available()
}

fn serialize_device<S>(device: &Device, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let text = match device {
        Device::Cpu => "cpu".into(),
        Device::Cuda(n) => format!("cuda({})", n),
    };
    text.serialize(serializer)
}

fn deserialize_device<'de, D>(deserializer: D) -> Result<Device, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    let device = match name.as_str() {
        "cpu" => Device::Cpu,
        "cuda" => Device::cuda_if_available(),
        _ => {
            let prefix = "cuda(";
            let suffix = ")";
            if name.starts_with(prefix) && name.ends_with(suffix) {
                let number: usize = name[(prefix.len())..(name.len() - suffix.len())]
                    .parse()
                    .map_err(|_err| D::Error::custom(format!("invalid device name {}", name)))?;
                Device::Cuda(number)
            } else {
                return Err(D::Error::custom(format!("invalid device name {}", name)));
            }
        }
    };
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        device: "cpu",
        dataset: { synthetic: { train_size: 100, test_size: 20 } },
        model: { feature_dim: 2 },
    }"#;

    #[test]
    fn defaults_follow_params() {
        let config: Config = json5::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.model.seq_len, params::SEQ_LEN);
        assert_eq!(config.model.latent_dim, params::LATENT_DIM);
        assert_eq!(config.model.discriminator_input_dim(), params::LATENT_DIM);
        assert_eq!(config.training.batch_size, params::BATCH_SIZE);
        assert_eq!(config.training.optimizer, OptimizerConfig::Adam(AdamConfig::default()));
        assert!(config.training.lr_shift.is_none());
        assert!(!config.model.batch_norm);
    }

    #[test]
    fn optimizer_sections() {
        let text = r#"{
            device: "cuda(1)",
            dataset: { synthetic: { train_size: 100, test_size: 20 } },
            model: { feature_dim: 2 },
            training: {
                optimizer: { nesterov_ag: { lr: 0.01 } },
                lr_shift: { interval: 50 },
            },
        }"#;
        let config: Config = json5::from_str(text).unwrap();
        assert_eq!(config.device, Device::Cuda(1));

        match config.training.optimizer {
            OptimizerConfig::NesterovAg(opt) => {
                assert_eq!(opt.lr, 0.01);
                assert_eq!(opt.momentum, params::NESTEROV_MOMENTUM);
            }
            _ => panic!("expect nesterov_ag"),
        }
        let shift = config.training.lr_shift.unwrap();
        assert_eq!(shift.interval, 50);
        assert_eq!(shift.rate, params::LR_SHIFT_RATE);
    }

    #[test]
    fn unknown_optimizer_is_rejected() {
        let text = r#"{
            dataset: { synthetic: { train_size: 100, test_size: 20 } },
            model: { feature_dim: 2 },
            training: { optimizer: { rmsprop: {} } },
        }"#;
        assert!(json5::from_str::<Config>(text).is_err());
    }

    #[test]
    fn latent_width_mismatch_is_rejected() {
        let mut config: Config = json5::from_str(MINIMAL).unwrap();
        config.model.discriminator_input_dim = Some(1);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let mut config: Config = json5::from_str(MINIMAL).unwrap();
        config.training.batch_size = 101;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config: Config = json5::from_str(MINIMAL).unwrap();
        config.save(&path).unwrap();
        let reloaded = Config::open(&path).unwrap();

        assert_eq!(reloaded.model, config.model);
        assert_eq!(reloaded.training, config.training);
        assert_eq!(reloaded.dataset, config.dataset);
    }
}
