//! Interval log accumulation and the JSON log sink.

use crate::{
    common::*,
    error::Result,
    message::{LogEntry, LossReport},
};

const LOG_FILE: &str = "log.json";

#[derive(Debug, Default, Clone, Copy)]
struct LossSums {
    count: usize,
    gen_mse: f64,
    gen_loss: f64,
    gen_adv: f64,
    dis_loss: f64,
}

/// Collects per-step losses and writes their interval means as records of a
/// JSON array in `log.json`.
#[derive(Debug)]
pub struct LogReport {
    path: PathBuf,
    start: Instant,
    elapsed_offset: f64,
    entries: Vec<LogEntry>,
    sums: LossSums,
    validation: Option<f64>,
}

impl LogReport {
    /// Continues an existing `log.json` in `dir` if there is one.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(LOG_FILE);
        let entries: Vec<LogEntry> = if path.exists() {
            serde_json::from_reader(BufReader::new(File::open(&path)?))?
        } else {
            vec![]
        };
        let elapsed_offset = entries.last().map(|entry| entry.elapsed_time).unwrap_or(0.0);

        Ok(Self {
            path,
            start: Instant::now(),
            elapsed_offset,
            entries,
            sums: LossSums::default(),
            validation: None,
        })
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn observe(&mut self, losses: &LossReport) {
        let sums = &mut self.sums;
        sums.count += 1;
        sums.gen_mse += losses.reconstruction;
        sums.gen_loss += losses.generator;
        sums.gen_adv += losses.adversarial;
        sums.dis_loss += losses.discriminator;
    }

    pub fn observe_validation(&mut self, mse: f64) {
        self.validation = Some(mse);
    }

    /// Closes the current interval, prints it, and rewrites the log file.
    pub fn write(&mut self, epoch: usize, iteration: usize) -> Result<LogEntry> {
        let LossSums {
            count,
            gen_mse,
            gen_loss,
            gen_adv,
            dis_loss,
        } = self.sums;
        let mean = |sum: f64| {
            if count > 0 {
                sum / count as f64
            } else {
                f64::NAN
            }
        };

        let entry = LogEntry {
            epoch,
            iteration,
            gen_mse: mean(gen_mse),
            gen_loss: mean(gen_loss),
            gen_adv: mean(gen_adv),
            dis_loss: mean(dis_loss),
            validation_gen_mse: self.validation.take(),
            elapsed_time: self.elapsed_offset + self.start.elapsed().as_secs_f64(),
        };
        self.sums = LossSums::default();

        let validation = entry
            .validation_gen_mse
            .map(|mse| format!("{:.6}", mse))
            .unwrap_or_default();
        info!(
            "epoch: {}\titeration: {}\tgen/mse: {:.6}\tgen/loss: {:.6}\tgen/adv: {:.6}\tdis/loss: {:.6}\tvalidation/gen/mse: {}",
            entry.epoch,
            entry.iteration,
            entry.gen_mse,
            entry.gen_loss,
            entry.gen_adv,
            entry.dis_loss,
            validation
        );

        self.entries.push(entry.clone());
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(writer, &self.entries)?;

        Ok(entry)
    }
}

/// Counts events and reports their rate once per interval.
#[derive(Debug)]
pub struct RateCounter {
    interval: f64,
    count: f64,
    last: Instant,
}

impl RateCounter {
    pub fn with_second_interval() -> Self {
        Self::new(1.0)
    }

    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            count: 0.0,
            last: Instant::now(),
        }
    }

    pub fn add(&mut self, count: f64) {
        self.count += count;
    }

    /// Events per second since the last report, once the interval has passed.
    pub fn rate(&mut self) -> Option<f64> {
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed < self.interval {
            return None;
        }

        let rate = self.count / elapsed;
        self.count = 0.0;
        self.last = Instant::now();
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn losses(value: f64) -> LossReport {
        LossReport {
            reconstruction: value,
            adversarial: 0.5 * value,
            generator: 2.0 * value,
            discriminator: 3.0 * value,
        }
    }

    #[test]
    fn interval_means_and_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = LogReport::open(dir.path()).unwrap();

        report.observe(&losses(1.0));
        report.observe(&losses(3.0));
        report.observe_validation(0.5);
        let first = report.write(1, 2).unwrap();
        assert_eq!(first.gen_mse, 2.0);
        assert_eq!(first.gen_loss, 4.0);
        assert_eq!(first.gen_adv, 1.0);
        assert_eq!(first.dis_loss, 6.0);
        assert_eq!(first.validation_gen_mse, Some(0.5));

        report.observe(&losses(1.0));
        let second = report.write(2, 3).unwrap();
        assert_eq!(second.gen_mse, 1.0);
        assert_eq!(second.validation_gen_mse, None);
    }

    #[test]
    fn log_file_is_continued() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut report = LogReport::open(dir.path()).unwrap();
            report.observe(&losses(1.0));
            report.write(1, 1).unwrap();
        }

        let text = fs::read_to_string(dir.path().join(LOG_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["gen/mse"], 1.0);
        assert!(value[0]["validation/gen/mse"].is_null());

        let mut report = LogReport::open(dir.path()).unwrap();
        report.observe(&losses(2.0));
        report.write(2, 2).unwrap();
        assert_eq!(report.entries().len(), 2);
        assert_eq!(report.entries()[1].epoch, 2);
    }

    #[test]
    fn non_finite_losses_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut report = LogReport::open(dir.path()).unwrap();
            report.observe(&losses(1.0));
            report.observe(&losses(f64::NAN));
            report.observe_validation(f64::INFINITY);
            let entry = report.write(1, 2).unwrap();
            assert!(entry.gen_mse.is_nan());
        }

        let mut report = LogReport::open(dir.path()).unwrap();
        let entry = &report.entries()[0];
        assert!(entry.gen_mse.is_nan());
        assert!(entry.gen_loss.is_nan());
        assert!(entry.gen_adv.is_nan());
        assert!(entry.dis_loss.is_nan());
        assert_eq!(entry.validation_gen_mse, Some(f64::INFINITY));

        report.observe(&losses(1.0));
        report.write(2, 3).unwrap();
        assert_eq!(LogReport::open(dir.path()).unwrap().entries().len(), 2);
    }

    #[test]
    fn rate_waits_for_the_interval() {
        let mut counter = RateCounter::new(3600.0);
        counter.add(10.0);
        assert!(counter.rate().is_none());

        let mut counter = RateCounter::new(0.0);
        counter.add(10.0);
        assert!(counter.rate().unwrap() > 0.0);
    }
}
