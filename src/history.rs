//! Per-epoch training records: a JSON summary and a scalar event stream.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    training::EpochMetrics,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub test_loss: f64,
    pub test_accuracy: f64,
}

impl EpochRecord {
    pub fn new(epoch: usize, train: EpochMetrics, val: EpochMetrics, test: EpochMetrics) -> Self {
        Self {
            epoch,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            test_loss: test.loss,
            test_accuracy: test.accuracy,
        }
    }

    pub fn scalars(&self) -> [(&'static str, f64); 6] {
        [
            ("loss/train", self.train_loss),
            ("accuracy/train", self.train_accuracy),
            ("loss/val", self.val_loss),
            ("accuracy/val", self.val_accuracy),
            ("loss/test", self.test_loss),
            ("accuracy/test", self.test_accuracy),
        ]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingLog {
    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn best_val_accuracy(&self) -> Option<&EpochRecord> {
        self.epochs
            .iter()
            .max_by(|a, b| a.val_accuracy.total_cmp(&b.val_accuracy))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| Error::io(path, source))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|source| Error::io(path, source))?;
        serde_json::from_str(&json).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Serialize)]
struct ScalarEvent<'a> {
    tag: &'a str,
    step: usize,
    value: f64,
}

/// Appends `{tag, step, value}` lines, one JSON object per scalar.
pub struct ScalarWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ScalarWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::io(path, source))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let event = ScalarEvent { tag, step, value };
        serde_json::to_writer(&mut self.writer, &event).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })?;
        self.writer
            .write_all(b"\n")
            .map_err(|source| Error::io(&self.path, source))
    }

    pub fn add_record(&mut self, record: &EpochRecord) -> Result<()> {
        for (tag, value) in record.scalars() {
            self.add_scalar(tag, value, record.epoch)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|source| Error::io(&self.path, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(loss: f64, accuracy: f64) -> EpochMetrics {
        EpochMetrics { loss, accuracy }
    }

    #[test]
    fn training_log_round_trips_through_json() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("training_log.json");
        let mut log = TrainingLog::default();
        log.push(EpochRecord::new(1, metrics(1.5, 0.25), metrics(1.25, 0.5), metrics(1.75, 0.25)));
        log.push(EpochRecord::new(2, metrics(0.5, 0.625), metrics(1.0, 0.75), metrics(1.0, 0.5)));

        log.save(&path).unwrap();

        assert_eq!(TrainingLog::load(&path).unwrap(), log);
        assert_eq!(log.best_val_accuracy().map(|record| record.epoch), Some(2));
    }

    #[test]
    fn scalar_writer_emits_one_line_per_scalar() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("scalars.jsonl");
        let record = EpochRecord::new(3, metrics(0.5, 0.875), metrics(0.625, 0.75), metrics(0.75, 0.5));

        let mut writer = ScalarWriter::create(&path).unwrap();
        writer.add_record(&record).unwrap();

        let lines: Vec<serde_json::Value> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0]["tag"], "loss/train");
        assert_eq!(lines[3]["value"], 0.75);
        assert!(lines.iter().all(|line| line["step"] == 3));
    }
}
