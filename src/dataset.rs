//! Pose sequence datasets and batch loaders.
//!
//! The training stream is infinite and reshuffles at every epoch boundary. Its
//! batches are prepared by a background thread and handed over through a
//! bounded channel, so consumers only ever see complete batches. The final
//! partial batch of every training epoch is dropped. The test batches are
//! finite, ordered, and keep the final short batch.

use crate::{
    common::*,
    config::{DatasetConfig, FileDatasetConfig, ModelConfig, SyntheticDatasetConfig},
    error::{Error, Result},
};
use crossbeam::channel::{self, Receiver};

/// A set of fixed-length pose sequences stored as one
/// `[num_sequences, seq_len, feature_dim]` float tensor on the CPU.
#[derive(Debug)]
pub struct PoseDataset {
    sequences: Tensor,
    seq_len: i64,
    feature_dim: i64,
}

impl PoseDataset {
    pub fn from_tensor(sequences: Tensor) -> Result<Self> {
        let (_num, seq_len, feature_dim) = sequences
            .size3()
            .map_err(|_| Error::Data(format!("expect 3-D pose data, get shape {:?}", sequences.size())))?;
        if seq_len == 0 || feature_dim == 0 {
            return Err(Error::Data(format!(
                "pose data has an empty dimension {:?}",
                sequences.size()
            )));
        }

        let sequences = sequences.to_device(Device::Cpu).to_kind(Kind::Float);
        Ok(Self {
            sequences,
            seq_len,
            feature_dim,
        })
    }

    /// Loads a `.npy` or `.ot` file. A `[frames, feature_dim]` recording is cut
    /// into non-overlapping windows of `seq_len` frames, the remainder is dropped.
    pub fn open<P>(path: P, seq_len: usize) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let tensor = match path.extension().and_then(|ext| ext.to_str()) {
            Some("npy") => Tensor::read_npy(path),
            _ => Tensor::load(path),
        }
        .map_err(|err| Error::Data(format!("unable to load {}: {}", path.display(), err)))?;

        let seq_len = seq_len as i64;
        let sequences = match tensor.size().as_slice() {
            &[_, len, _] if len == seq_len => tensor,
            &[_, len, _] => {
                return Err(Error::Data(format!(
                    "{} holds sequences of length {}, expect {}",
                    path.display(),
                    len,
                    seq_len
                )))
            }
            &[frames, feature_dim] => {
                let num = frames / seq_len;
                if num == 0 {
                    return Err(Error::Data(format!(
                        "{} has {} frames, fewer than one sequence of {}",
                        path.display(),
                        frames,
                        seq_len
                    )));
                }
                tensor
                    .narrow(0, 0, num * seq_len)
                    .view([num, seq_len, feature_dim])
            }
            shape => {
                return Err(Error::Data(format!(
                    "{} has unsupported shape {:?}",
                    path.display(),
                    shape
                )))
            }
        };

        let dataset = Self::from_tensor(sequences)?;
        info!("Loaded {} pose sequences from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    /// Generates smooth periodic trajectories with random amplitudes,
    /// frequencies, and phases.
    pub fn synthetic(num: usize, seq_len: usize, feature_dim: usize, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut values = Vec::with_capacity(num * seq_len * feature_dim);

        for _ in 0..num {
            let params: Vec<(f32, f32, f32)> = (0..feature_dim)
                .map(|_| {
                    let amplitude = rng.gen_range(0.5..1.0);
                    let frequency = rng.gen_range(0.5..2.0);
                    let phase = rng.gen_range(0.0..std::f32::consts::TAU);
                    (amplitude, frequency, phase)
                })
                .collect();

            for step in 0..seq_len {
                let time = step as f32 / seq_len as f32;
                values.extend(params.iter().map(|&(amplitude, frequency, phase)| {
                    amplitude * (std::f32::consts::TAU * frequency * time + phase).sin()
                }));
            }
        }

        let sequences =
            Tensor::of_slice(&values).view([num as i64, seq_len as i64, feature_dim as i64]);
        Self::from_tensor(sequences)
    }

    /// Builds the (train, test) pair the config asks for and checks it
    /// against the model shape.
    pub fn from_config(
        config: &DatasetConfig,
        model: &ModelConfig,
        seed: u64,
    ) -> Result<(Self, Self)> {
        let (train, test) = match config {
            DatasetConfig::File(FileDatasetConfig {
                train_file,
                test_file,
            }) => (
                Self::open(train_file, model.seq_len)?,
                Self::open(test_file, model.seq_len)?,
            ),
            DatasetConfig::Synthetic(SyntheticDatasetConfig {
                train_size,
                test_size,
            }) => (
                Self::synthetic(*train_size, model.seq_len, model.feature_dim, seed)?,
                Self::synthetic(
                    *test_size,
                    model.seq_len,
                    model.feature_dim,
                    seed.wrapping_add(1),
                )?,
            ),
        };

        for (name, dataset) in [("training", &train), ("test", &test)] {
            if dataset.seq_len() != model.seq_len || dataset.feature_dim() != model.feature_dim {
                return Err(Error::Config(format!(
                    "{} data has sequence shape ({}, {}), the model expects ({}, {})",
                    name,
                    dataset.seq_len(),
                    dataset.feature_dim(),
                    model.seq_len,
                    model.feature_dim
                )));
            }
        }
        if test.is_empty() {
            return Err(Error::Config("the test set is empty".into()));
        }

        Ok((train, test))
    }

    pub fn len(&self) -> usize {
        self.sequences.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len as usize
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim as usize
    }

    pub fn sequences(&self) -> &Tensor {
        &self.sequences
    }

    /// Ordered batches over the whole set, the last one may be shorter.
    pub fn test_batches(&self, batch_size: usize) -> impl Iterator<Item = Tensor> {
        self.sequences.split(batch_size as i64, 0).into_iter()
    }
}

/// A training batch together with its position in the epoch.
#[derive(Debug)]
pub struct TrainBatch {
    pub epoch: usize,
    pub index: usize,
    pub is_epoch_end: bool,
    pub sequences: Tensor,
}

#[derive(Debug, Clone)]
pub struct TrainLoaderInit {
    pub batch_size: usize,
    pub seed: u64,
    pub prefetch: usize,
}

impl TrainLoaderInit {
    pub fn build(self, dataset: PoseDataset) -> Result<TrainLoader> {
        let Self {
            batch_size,
            seed,
            prefetch,
        } = self;

        if batch_size == 0 || batch_size > dataset.len() {
            return Err(Error::Config(format!(
                "batch_size {} does not fit the training set of {} sequences",
                batch_size,
                dataset.len()
            )));
        }

        Ok(TrainLoader {
            dataset,
            batch_size,
            seed,
            prefetch,
        })
    }
}

#[derive(Debug)]
pub struct TrainLoader {
    dataset: PoseDataset,
    batch_size: usize,
    seed: u64,
    prefetch: usize,
}

impl TrainLoader {
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn iterations_per_epoch(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    pub fn dataset(&self) -> &PoseDataset {
        &self.dataset
    }

    pub fn epoch_order(&self, epoch: usize) -> Vec<i64> {
        epoch_order(self.seed, epoch, self.dataset.len())
    }

    /// Starts an infinite stream at the beginning of `start_epoch`.
    pub fn stream(&self, start_epoch: usize) -> Result<TrainStream> {
        let (tx, rx) = channel::bounded(self.prefetch.max(1));
        let sequences = self.dataset.sequences.shallow_clone();
        let num_sequences = self.dataset.len();
        let batch_size = self.batch_size;
        let num_batches = self.iterations_per_epoch();
        let seed = self.seed;

        let handle = thread::Builder::new()
            .name("train_loader".into())
            .spawn(move || {
                for epoch in start_epoch.. {
                    let order = epoch_order(seed, epoch, num_sequences);

                    for (index, chunk) in order.chunks_exact(batch_size).enumerate() {
                        let batch = sequences
                            .f_index_select(0, &Tensor::of_slice(chunk))
                            .map_err(|err| Error::Data(format!("unable to gather batch: {}", err)))
                            .map(|sequences| TrainBatch {
                                epoch,
                                index,
                                is_epoch_end: index + 1 == num_batches,
                                sequences,
                            });

                        if tx.send(batch).is_err() {
                            debug!("train loader stopped");
                            return;
                        }
                    }
                }
            })?;

        Ok(TrainStream {
            rx: Some(rx),
            handle: Some(handle),
        })
    }
}

/// The sample order of an epoch depends on the seed and the epoch only.
fn epoch_order(seed: u64, epoch: usize, len: usize) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
    let mut indices: Vec<i64> = (0..len as i64).collect();
    indices.shuffle(&mut rng);
    indices
}

/// The infinite training batch stream.
#[derive(Debug)]
pub struct TrainStream {
    rx: Option<Receiver<Result<TrainBatch>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Iterator for TrainStream {
    type Item = Result<TrainBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for TrainStream {
    fn drop(&mut self) {
        // disconnect first so a blocked sender wakes up
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(num: usize, batch_size: usize) -> TrainLoader {
        let dataset = PoseDataset::synthetic(num, 4, 2, 0).unwrap();
        TrainLoaderInit {
            batch_size,
            seed: 7,
            prefetch: 2,
        }
        .build(dataset)
        .unwrap()
    }

    #[test]
    fn synthetic_shape_and_determinism() {
        let lhs = PoseDataset::synthetic(10, 4, 3, 42).unwrap();
        let rhs = PoseDataset::synthetic(10, 4, 3, 42).unwrap();
        assert_eq!(lhs.sequences().size(), vec![10, 4, 3]);
        assert!(lhs.sequences().equal(rhs.sequences()));
    }

    #[test]
    fn training_epochs_drop_partial_batches() {
        let loader = loader(23, 10);
        assert_eq!(loader.iterations_per_epoch(), 2);

        let batches: Vec<_> = loader.stream(0).unwrap().take(6).map(|batch| batch.unwrap()).collect();
        let positions: Vec<_> = batches
            .iter()
            .map(|batch| (batch.epoch, batch.index, batch.is_epoch_end))
            .collect();
        assert_eq!(
            positions,
            vec![
                (0, 0, false),
                (0, 1, true),
                (1, 0, false),
                (1, 1, true),
                (2, 0, false),
                (2, 1, true)
            ]
        );
        assert!(batches
            .iter()
            .all(|batch| batch.sequences.size() == vec![10, 4, 2]));
    }

    #[test]
    fn epochs_are_reshuffled_and_reproducible() {
        let loader = loader(50, 10);
        let first = loader.epoch_order(0);
        let second = loader.epoch_order(1);
        assert_ne!(first, second);
        assert_eq!(first, loader.epoch_order(0));

        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..50).collect::<Vec<i64>>());
    }

    #[test]
    fn stream_resumes_at_epoch() {
        let loader = loader(30, 10);
        let from_start: Vec<_> = loader.stream(0).unwrap().skip(3).take(3).map(|b| b.unwrap()).collect();
        let resumed: Vec<_> = loader.stream(1).unwrap().take(3).map(|b| b.unwrap()).collect();

        for (lhs, rhs) in from_start.iter().zip(resumed.iter()) {
            assert_eq!(lhs.epoch, rhs.epoch);
            assert!(lhs.sequences.equal(&rhs.sequences));
        }
    }

    #[test]
    fn test_batches_keep_remainder() {
        let dataset = PoseDataset::synthetic(23, 4, 2, 0).unwrap();
        let sizes: Vec<_> = dataset.test_batches(10).map(|batch| batch.size()[0]).collect();
        assert_eq!(sizes, vec![10, 10, 3]);
    }

    #[test]
    fn recordings_are_windowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.ot");
        Tensor::arange(22, (Kind::Float, Device::Cpu))
            .view([11, 2])
            .save(&path)
            .unwrap();

        let dataset = PoseDataset::open(&path, 4).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.sequences().size(), vec![2, 4, 2]);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let dataset = PoseDataset::synthetic(5, 4, 2, 0).unwrap();
        let result = TrainLoaderInit {
            batch_size: 6,
            seed: 0,
            prefetch: 1,
        }
        .build(dataset);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
