//! RocksDB storage layer

use crate::config::StorageConfig;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

/// One write in a batch; `None` deletes the key
pub type BatchItem = (Vec<u8>, Option<Vec<u8>>);

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        Self::open(path, &StorageConfig::default())
    }

    pub fn new_with_config(config: &StorageConfig) -> Result<Self, rocksdb::Error> {
        if config.clear_on_start {
            let _ = std::fs::remove_dir_all(&config.data_directory);
        }
        Self::open(&config.data_directory, config)
    }

    fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, rocksdb::Error> {
        self.db.get(key)
    }

    /// Apply all items atomically: either every write lands or none does
    pub fn write_batch(&self, items: Vec<BatchItem>) -> Result<(), rocksdb::Error> {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        self.db.write(batch)
    }

    /// Newest-first scan of keys under `prefix`, at most `limit` rows.
    ///
    /// Keys under the prefix must sort by a big-endian suffix for "newest" to hold.
    pub fn scan_prefix_reverse(&self, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, rocksdb::Error> {
        let mut rows = Vec::new();
        if limit == 0 {
            return Ok(rows);
        }
        self.visit_prefix_reverse(prefix, |key, value| {
            rows.push((key.to_vec(), value.to_vec()));
            Ok::<_, rocksdb::Error>(rows.len() < limit)
        })?;
        Ok(rows)
    }

    /// Walk keys under `prefix` newest first until `visit` returns `false`.
    ///
    /// The iterator reads from one implicit snapshot, so a concurrent batch is seen
    /// either entirely or not at all. Rows are decoded one at a time.
    pub fn visit_prefix_reverse<E, F>(&self, prefix: &[u8], mut visit: F) -> Result<(), E>
    where
        E: From<rocksdb::Error>,
        F: FnMut(&[u8], &[u8]) -> Result<bool, E>,
    {
        let mut upper = prefix.to_vec();
        upper.extend_from_slice(&[0xff; 16]);

        for item in self.db.iterator(IteratorMode::From(&upper, Direction::Reverse)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                if key.as_ref() < prefix {
                    break;
                }
                continue;
            }
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_batch_and_reverse_scan() {
        let temp = TempDir::new().unwrap();
        let storage = OptimizedStorage::new(temp.path()).unwrap();

        let items: Vec<BatchItem> = (0u64..5)
            .map(|i| {
                let mut key = b"p:".to_vec();
                key.extend_from_slice(&i.to_be_bytes());
                (key, Some(vec![i as u8]))
            })
            .chain(std::iter::once((b"q:other".to_vec(), Some(vec![9]))))
            .collect();
        storage.write_batch(items).unwrap();

        let rows = storage.scan_prefix_reverse(b"p:", 3).unwrap();
        let values: Vec<u8> = rows.iter().map(|(_, v)| v[0]).collect();
        assert_eq!(values, vec![4, 3, 2]);

        assert!(storage.scan_prefix_reverse(b"z:", 3).unwrap().is_empty());
        assert!(storage.scan_prefix_reverse(b"p:", 0).unwrap().is_empty());

        // Stops as soon as the visitor says so
        let mut seen = Vec::new();
        storage
            .visit_prefix_reverse(b"p:", |_, value| {
                seen.push(value[0]);
                Ok::<_, rocksdb::Error>(value[0] != 3)
            })
            .unwrap();
        assert_eq!(seen, vec![4, 3]);
    }
}
