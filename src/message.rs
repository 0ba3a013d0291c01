use crate::common::*;

/// Host-side loss values of one training step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    /// gen/mse
    pub reconstruction: f64,
    pub adversarial: f64,
    /// gen/loss, the weighted sum of reconstruction and adversarial terms
    pub generator: f64,
    /// dis/loss
    pub discriminator: f64,
}

impl LossReport {
    pub fn is_finite(&self) -> bool {
        [
            self.reconstruction,
            self.adversarial,
            self.generator,
            self.discriminator,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Epoch the batch was drawn from.
    pub epoch: usize,
    /// Number of completed steps, this one included.
    pub iteration: usize,
    pub is_epoch_end: bool,
    pub losses: LossReport,
}

/// One record of the JSON log, keyed the way the console report prints it.
///
/// JSON has no NaN or infinity, so non-finite losses are written as the
/// strings `"NaN"`, `"inf"`, and `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: usize,
    pub iteration: usize,
    #[serde(
        rename = "gen/mse",
        serialize_with = "serialize_loss",
        deserialize_with = "deserialize_loss"
    )]
    pub gen_mse: f64,
    #[serde(
        rename = "gen/loss",
        serialize_with = "serialize_loss",
        deserialize_with = "deserialize_loss"
    )]
    pub gen_loss: f64,
    #[serde(
        rename = "gen/adv",
        serialize_with = "serialize_loss",
        deserialize_with = "deserialize_loss"
    )]
    pub gen_adv: f64,
    #[serde(
        rename = "dis/loss",
        serialize_with = "serialize_loss",
        deserialize_with = "deserialize_loss"
    )]
    pub dis_loss: f64,
    #[serde(
        rename = "validation/gen/mse",
        serialize_with = "serialize_optional_loss",
        deserialize_with = "deserialize_optional_loss"
    )]
    pub validation_gen_mse: Option<f64>,
    pub elapsed_time: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LossValue {
    Number(f64),
    Text(String),
}

impl From<f64> for LossValue {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            LossValue::Number(value)
        } else if value.is_nan() {
            LossValue::Text("NaN".into())
        } else if value > 0.0 {
            LossValue::Text("inf".into())
        } else {
            LossValue::Text("-inf".into())
        }
    }
}

impl LossValue {
    fn into_f64<E>(self) -> Result<f64, E>
    where
        E: DeserializeError,
    {
        match self {
            LossValue::Number(value) => Ok(value),
            LossValue::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                _ => Err(E::custom(format!("invalid loss value '{}'", text))),
            },
        }
    }
}

fn serialize_loss<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    LossValue::from(*value).serialize(serializer)
}

fn deserialize_loss<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    LossValue::deserialize(deserializer)?.into_f64()
}

fn serialize_optional_loss<S>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    value.map(LossValue::from).serialize(serializer)
}

fn deserialize_optional_loss<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<LossValue>::deserialize(deserializer)?
        .map(LossValue::into_f64)
        .transpose()
}
