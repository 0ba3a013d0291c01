use pose_aae::{common::*, config::Config, trainer::Trainer};

lazy_static::lazy_static! {
    static ref SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
}

/// Adversarial autoencoder training on pose sequences.
#[derive(FromArgs)]
struct Args {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// resume from a trainer_epoch_*.json snapshot.
    #[argh(option)]
    resume: Option<PathBuf>,
    /// name of the run directory under the result directory.
    #[argh(option)]
    name: Option<String>,
}

fn main() -> Fallible<()> {
    pretty_env_logger::init();

    // Set signal handler
    ctrlc::set_handler(|| {
        warn!("Interrupted by user");
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    })?;

    // Parse arguments
    let Args {
        config: config_path,
        resume,
        name,
    } = argh::from_env();

    // load config
    let mut config = Config::open(&config_path)?;
    if resume.is_some() {
        config.resume = resume;
    }
    if name.is_some() {
        config.logging.name = name;
    }

    let mut trainer = Trainer::new(config)?;
    trainer.run(&SHUTDOWN_FLAG)?;

    Ok(())
}
