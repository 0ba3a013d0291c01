//! Per-epoch snapshots and full-state resume.
//!
//! A snapshot at epoch `E` is four files in one directory:
//!
//! - `gen_epoch_E.ot` and `dis_epoch_E.ot` with the network variables,
//! - `trainer_epoch_E.ot` with both optimizer states, prefixed `gen.` and `dis.`,
//! - `trainer_epoch_E.json`, the [`TrainerState`] pointing at the other three.
//!
//! Snapshots are only taken at epoch boundaries, so resuming continues with
//! the exact batch order of an uninterrupted run.

use crate::{
    common::*,
    config::ModelConfig,
    error::{Error, Result, Stage, StageContext},
    model::{Discriminator, Generator},
    params,
    updater::Updater,
};

const GEN_PREFIX: &str = "gen.";
const DIS_PREFIX: &str = "dis.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub version: u32,
    /// Number of completed epochs.
    pub epoch: usize,
    pub iteration: usize,
    pub model: ModelConfig,
    pub generator_file: PathBuf,
    pub discriminator_file: PathBuf,
    pub optimizer_file: PathBuf,
}

/// Writes a snapshot of the updater into `dir` and returns the path of the
/// state file to resume from.
pub fn save<G, D>(dir: &Path, updater: &Updater<G, D>, model: &ModelConfig) -> Result<PathBuf>
where
    G: Generator,
    D: Discriminator,
{
    let epoch = updater.epoch();
    let state = TrainerState {
        version: params::CHECKPOINT_VERSION,
        epoch,
        iteration: updater.iteration(),
        model: model.clone(),
        generator_file: format!("gen_epoch_{}.ot", epoch).into(),
        discriminator_file: format!("dis_epoch_{}.ot", epoch).into(),
        optimizer_file: format!("trainer_epoch_{}.ot", epoch).into(),
    };

    updater
        .generator()
        .vs()
        .save(dir.join(&state.generator_file))
        .stage(Stage::Checkpoint)?;
    updater
        .discriminator()
        .vs()
        .save(dir.join(&state.discriminator_file))
        .stage(Stage::Checkpoint)?;

    let optimizer_state: Vec<(String, Tensor)> =
        prefixed(GEN_PREFIX, updater.gen_optimizer().state())
            .chain(prefixed(DIS_PREFIX, updater.dis_optimizer().state()))
            .collect();
    Tensor::save_multi(&optimizer_state, dir.join(&state.optimizer_file))
        .stage(Stage::Checkpoint)?;

    let path = dir.join(format!("trainer_epoch_{}.json", epoch));
    let writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer_pretty(writer, &state)?;

    info!("saved snapshot {}", path.display());
    Ok(path)
}

/// Restores parameters, optimizer state, and counters from a state file
/// written by [`save`]. Every file is checked against the updater before any
/// parameter, optimizer state, or counter is modified.
pub fn resume<G, D>(
    path: &Path,
    updater: &mut Updater<G, D>,
    model: &ModelConfig,
) -> Result<TrainerState>
where
    G: Generator,
    D: Discriminator,
{
    let state: TrainerState = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    if state.version != params::CHECKPOINT_VERSION {
        return Err(Error::ResumeMismatch(format!(
            "unsupported checkpoint version {}, expect {}",
            state.version,
            params::CHECKPOINT_VERSION
        )));
    }
    if &state.model != model {
        return Err(Error::ResumeMismatch(format!(
            "checkpoint model {:?} differs from the configured model {:?}",
            state.model, model
        )));
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let load = |file: &Path| -> Result<Vec<(String, Tensor)>> {
        Tensor::load_multi(dir.join(file)).stage(Stage::Checkpoint)
    };

    let gen_vars = matched_variables(
        "generator",
        &updater.generator().vs().variables(),
        load(state.generator_file.as_path())?,
    )?;
    let dis_vars = matched_variables(
        "discriminator",
        &updater.discriminator().vs().variables(),
        load(state.discriminator_file.as_path())?,
    )?;

    let mut gen_opt_state = HashMap::new();
    let mut dis_opt_state = HashMap::new();
    for (name, tensor) in load(state.optimizer_file.as_path())? {
        if let Some(name) = name.strip_prefix(GEN_PREFIX) {
            gen_opt_state.insert(name.to_string(), tensor);
        } else if let Some(name) = name.strip_prefix(DIS_PREFIX) {
            dis_opt_state.insert(name.to_string(), tensor);
        } else {
            return Err(Error::ResumeMismatch(format!(
                "unexpected optimizer state '{}'",
                name
            )));
        }
    }

    updater.gen_optimizer().check_state(&gen_opt_state)?;
    updater.dis_optimizer().check_state(&dis_opt_state)?;

    let (gen_opt, dis_opt) = updater.optimizers_mut();
    gen_opt.load_state(&gen_opt_state)?;
    dis_opt.load_state(&dis_opt_state)?;

    tch::no_grad(|| -> Result<()> {
        for (mut target, source) in gen_vars.into_iter().chain(dis_vars) {
            target.f_copy_(&source).stage(Stage::Checkpoint)?;
        }
        Ok(())
    })?;
    updater.restore(state.epoch, state.iteration);

    info!(
        "resumed from {} at epoch {}, iteration {}",
        path.display(),
        state.epoch,
        state.iteration
    );
    Ok(state)
}

fn prefixed(
    prefix: &'static str,
    state: Vec<(String, Tensor)>,
) -> impl Iterator<Item = (String, Tensor)> {
    state
        .into_iter()
        .map(move |(name, tensor)| (format!("{}{}", prefix, name), tensor))
}

/// Pairs each stored tensor with its variable. The name sets and every shape
/// must agree exactly.
fn matched_variables(
    network: &str,
    variables: &HashMap<String, Tensor>,
    stored: Vec<(String, Tensor)>,
) -> Result<Vec<(Tensor, Tensor)>> {
    if stored.len() != variables.len() {
        return Err(Error::ResumeMismatch(format!(
            "{} checkpoint has {} variables, the model has {}",
            network,
            stored.len(),
            variables.len()
        )));
    }

    stored
        .into_iter()
        .map(|(name, source)| {
            let target = variables.get(&name).ok_or_else(|| {
                Error::ResumeMismatch(format!(
                    "{} checkpoint has unknown variable '{}'",
                    network, name
                ))
            })?;
            if target.size() != source.size() {
                return Err(Error::ResumeMismatch(format!(
                    "{} variable '{}' has shape {:?} in the checkpoint, {:?} in the model",
                    network,
                    name,
                    source.size(),
                    target.size()
                )));
            }
            Ok((target.shallow_clone(), source.to_device(target.device())))
        })
        .collect()
}
