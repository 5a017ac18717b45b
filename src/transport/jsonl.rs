//! Directory-backed shard log
//!
//! `{root}/{stream}/{shardId}.jsonl`, one record per line. A record's
//! sequence number is its 1-based line number, so appends never renumber
//! existing records.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    decode_iterator, encode_iterator, iterator_offset, sequence_number, RecordsPage,
    ShardDescriptor, ShardLogClient, ShardRecord,
};
use crate::error::{TransportError, TransportResult};
use crate::types::{decode_body, encode_body, BodyEncoding, IteratorMode};

/// One line of a shard file
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonlRecord {
    #[serde(default)]
    partition_key: String,
    data: String,
    #[serde(default)]
    data_encoding: BodyEncoding,
    #[serde(default = "Utc::now")]
    approximate_arrival: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    metadata: BTreeMap<String, String>,
}

/// Shard log stored as JSONL files
#[derive(Debug, Clone)]
pub struct JsonlShardLog {
    root: PathBuf,
}

impl JsonlShardLog {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn stream_dir(&self, stream: &str) -> TransportResult<PathBuf> {
        let dir = self.root.join(stream);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(TransportError::StreamNotFound(stream.to_string()))
        }
    }

    fn shard_path(&self, stream: &str, shard_id: &str) -> TransportResult<PathBuf> {
        let path = self.stream_dir(stream)?.join(format!("{}.jsonl", shard_id));
        if path.is_file() {
            Ok(path)
        } else {
            Err(TransportError::StreamNotFound(format!("{}/{}", stream, shard_id)))
        }
    }

    /// Append a record, creating the stream and shard as needed.
    /// Returns the new record's sequence number.
    pub fn append(
        &self,
        stream: &str,
        shard_id: &str,
        partition_key: &str,
        data: &[u8],
        arrival: DateTime<Utc>,
    ) -> TransportResult<String> {
        let dir = self.root.join(stream);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.jsonl", shard_id));

        let existing = if path.exists() {
            BufReader::new(File::open(&path)?).lines().count()
        } else {
            0
        };

        let (data, data_encoding) = encode_body(data);
        let record = JsonlRecord {
            partition_key: partition_key.to_string(),
            data,
            data_encoding,
            approximate_arrival: arrival,
            metadata: BTreeMap::new(),
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        file.sync_all()?;

        Ok(sequence_number(existing))
    }

    fn line_count(path: &Path) -> TransportResult<usize> {
        Ok(BufReader::new(File::open(path)?).lines().count())
    }
}

impl ShardLogClient for JsonlShardLog {
    fn list_shards(&self, stream: &str) -> TransportResult<Vec<ShardDescriptor>> {
        let dir = self.stream_dir(stream)?;
        let mut shards: Vec<ShardDescriptor> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .map(|shard_id| ShardDescriptor {
                shard_id,
                starting_sequence_number: sequence_number(0),
            })
            .collect();
        shards.sort_by(|a, b| a.shard_id.cmp(&b.shard_id));
        Ok(shards)
    }

    fn get_iterator(
        &self,
        stream: &str,
        shard_id: &str,
        mode: &IteratorMode,
    ) -> TransportResult<String> {
        let path = self.shard_path(stream, shard_id)?;
        let len = match mode {
            IteratorMode::Latest => Self::line_count(&path)?,
            _ => 0,
        };
        let offset = iterator_offset(mode, len)?;
        Ok(encode_iterator(stream, shard_id, offset))
    }

    fn get_records(&self, iterator: &str, limit: usize) -> TransportResult<RecordsPage> {
        let (stream, shard_id, offset) = decode_iterator(iterator)?;
        let path = self.shard_path(&stream, &shard_id)?;
        let reader = BufReader::new(File::open(&path)?);

        let mut records = Vec::new();
        let mut next = offset;
        for (idx, line) in reader.lines().enumerate().skip(offset) {
            if records.len() >= limit {
                break;
            }
            let line = line?;
            next = idx + 1;
            if line.trim().is_empty() {
                continue;
            }

            let record: JsonlRecord = serde_json::from_str(&line)?;
            let data = decode_body(&record.data, record.data_encoding).map_err(|e| {
                TransportError::request("get_records", format!("line {}: {}", idx + 1, e))
            })?;
            records.push(ShardRecord {
                sequence_number: sequence_number(idx),
                partition_key: record.partition_key,
                data,
                approximate_arrival: record.approximate_arrival,
            });
        }

        Ok(RecordsPage {
            records,
            next_iterator: Some(encode_iterator(&stream, &shard_id, next)),
        })
    }
}
