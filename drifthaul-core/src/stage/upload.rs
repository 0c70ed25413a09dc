//! Chunked, parallel upload of a payload into a stage directory.

use rayon::prelude::*;
use tracing::{debug, info, instrument};

use super::compress::{compress, suffix};
use super::Stage;
use crate::config::CompressionKind;
use crate::error::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub chunk_size: usize,
    pub compression: CompressionKind,
    /// Object extension without the compression suffix, e.g. `json`.
    pub extension: &'static str,
    /// Treat the first record as a header and repeat it in every chunk.
    pub repeat_header: bool,
}

/// Split `payload` on record boundaries into chunks of at most `chunk_size`
/// bytes. A record larger than `chunk_size` becomes its own chunk.
pub fn split_chunks(payload: &[u8], chunk_size: usize, repeat_header: bool) -> Vec<Vec<u8>> {
    let mut records = payload
        .split_inclusive(|b| *b == b'\n')
        .filter(|record| !record.iter().all(u8::is_ascii_whitespace));

    let header: &[u8] = if repeat_header {
        records.next().unwrap_or_default()
    } else {
        &[]
    };

    let mut chunks = Vec::new();
    let mut current = header.to_vec();
    for record in records {
        if current.len() > header.len() && current.len() + record.len() > chunk_size {
            chunks.push(std::mem::replace(&mut current, header.to_vec()));
        }
        current.extend_from_slice(record);
    }
    if current.len() > header.len() || (chunks.is_empty() && !current.is_empty()) {
        chunks.push(current);
    }
    chunks
}

/// Threads that compress and store chunks, shared by every upload of a wrapper.
pub struct UploadPool {
    pool: rayon::ThreadPool,
}

impl UploadPool {
    pub fn new(parallelism: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(|i| format!("stage-upload-{i}"))
            .build()
            .map_err(|err| CoreError::Resource(format!("failed to build upload pool: {err}")))?;
        debug!(threads = pool.current_num_threads(), "built stage upload pool");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Upload `payload` under `dir` and return the created object keys in order.
    #[instrument(skip(self, stage, payload, settings), fields(bytes = payload.len()))]
    pub fn upload(
        &self,
        stage: &dyn Stage,
        dir: &str,
        payload: &[u8],
        settings: &UploadSettings,
    ) -> Result<Vec<String>> {
        let chunks = split_chunks(payload, settings.chunk_size.max(1), settings.repeat_header);
        if chunks.is_empty() {
            return Err(CoreError::Validation(
                "bulk load payload is empty".to_string(),
            ));
        }

        let object_suffix = suffix(settings.compression);
        let keys = self.pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .map(|(index, chunk)| -> Result<String> {
                    let key = format!("{dir}data_{index}.{}{object_suffix}", settings.extension);
                    let body = compress(settings.compression, chunk)?;
                    stage.put(&key, &body)?;
                    debug!(key, raw = chunk.len(), stored = body.len(), "uploaded chunk");
                    Ok(key)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        info!(dir, objects = keys.len(), "uploaded payload to stage");
        Ok(keys)
    }
}
