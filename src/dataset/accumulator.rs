//! Append-only store for submitted training rows

use crate::dataset::table::{example_row, load_table, row_writer, write_header, write_row, Table};
use crate::error::{Result, ServiceError};
use crate::types::LabeledExample;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Sole writer of the accumulated-dataset file.
///
/// Appends and snapshots take the same lock, so a snapshot never observes a
/// half-written row and no two appends interleave.
pub struct DatasetAccumulator {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DatasetAccumulator {
    /// Accumulator for the file at `path`; nothing is created until first use.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the accumulated CSV.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with only a header row if it does not exist.
    /// Returns whether it was created.
    pub fn ensure_exists(&self) -> Result<bool> {
        let _guard = self.guard();
        if self.path.exists() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ServiceError::io(parent, e))?;
        }
        let file = File::create(&self.path).map_err(|e| ServiceError::io(&self.path, e))?;
        let mut writer = row_writer(file);
        write_header(&mut writer).map_err(|e| ServiceError::csv(&self.path, e))?;
        writer.flush().map_err(|e| ServiceError::io(&self.path, e))?;

        info!(path = %self.path.display(), "Created accumulated dataset");
        Ok(true)
    }

    /// Append one row in canonical column order.
    pub fn append(&self, example: &LabeledExample) -> Result<()> {
        let _guard = self.guard();

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ServiceError::io(&self.path, e))?;

        // Buffered until the flush, so the row lands in one write under the lock
        let mut writer = row_writer(file);
        if needs_header {
            write_header(&mut writer).map_err(|e| ServiceError::csv(&self.path, e))?;
        }
        write_row(&mut writer, &example_row(example))
            .map_err(|e| ServiceError::csv(&self.path, e))?;
        writer.flush().map_err(|e| ServiceError::io(&self.path, e))?;

        debug!(path = %self.path.display(), price = example.price, "Row appended");
        Ok(())
    }

    /// Consistent read of every accumulated row.
    pub fn snapshot(&self) -> Result<Table> {
        let _guard = self.guard();
        load_table(&self.path)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The lock protects no data, so a poisoned lock is still usable.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureVector;
    use std::sync::Arc;

    #[test]
    fn test_ensure_exists_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = DatasetAccumulator::new(dir.path().join("datasets/additional.csv"));

        assert!(accumulator.ensure_exists().unwrap());
        assert!(!accumulator.ensure_exists().unwrap());

        let text = std::fs::read_to_string(accumulator.path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with("size_of_vehicle,price\n"));
        assert!(accumulator.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_append_then_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = DatasetAccumulator::new(dir.path().join("additional.csv"));

        // No ensure_exists: the first append writes the header itself
        accumulator
            .append(&LabeledExample::new(FeatureVector::example(), 10.5))
            .unwrap();
        accumulator
            .append(&LabeledExample::new(FeatureVector::example(), 10.5))
            .unwrap();

        let table = accumulator.snapshot().unwrap();
        assert_eq!(table.len(), 2, "duplicates are kept");
        assert_eq!(table.targets(), vec![10.5, 10.5]);
    }

    #[test]
    fn test_appended_rows_match_full_table_format() {
        let dir = tempfile::tempdir().unwrap();
        let appended = dir.path().join("additional.csv");
        let written = dir.path().join("combined.csv");
        let example = LabeledExample::new(FeatureVector::example(), 10.25);

        DatasetAccumulator::new(&appended).append(&example).unwrap();
        crate::dataset::write_table(&written, &Table::from_examples(&[example])).unwrap();

        assert_eq!(
            std::fs::read_to_string(&appended).unwrap(),
            std::fs::read_to_string(&written).unwrap()
        );
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let accumulator = Arc::new(DatasetAccumulator::new(dir.path().join("additional.csv")));
        accumulator.ensure_exists().unwrap();

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let accumulator = accumulator.clone();
                std::thread::spawn(move || {
                    let mut features = FeatureVector::example();
                    features.mileage = i as f64;
                    accumulator
                        .append(&LabeledExample::new(features, 9.0 + i as f64 / 100.0))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let table = accumulator.snapshot().unwrap();
        assert_eq!(table.len(), 100);

        let mut mileages: Vec<i64> = table.rows().iter().map(|r| r[8] as i64).collect();
        mileages.sort_unstable();
        assert_eq!(mileages, (0..100).collect::<Vec<_>>());
    }
}
