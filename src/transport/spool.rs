//! Directory-backed queue
//!
//! Each queue is a directory of message files,
//! `{root}/{queue}/{sentMillis}-{seq}-{messageId}.json`, so file-name order is send
//! order. Leases (visibility timeouts) live in this process only; a restarted
//! consumer sees every undeleted message again, which is the usual
//! at-least-once contract.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{select_attributes, QueueClient, QueueMessage, ReceiveRequest, SendReceipt};
use crate::error::{TransportError, TransportResult};
use crate::types::{decode_body, encode_body, BodyEncoding, SENT_TIMESTAMP};
use crate::utils::atomic::{atomic_write, is_temp_file};
use crate::utils::time::current_timestamp_millis;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Message file contents
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpoolMessage {
    message_id: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    body: String,
    #[serde(default)]
    body_encoding: BodyEncoding,
}

#[derive(Debug, Clone)]
struct Lease {
    receipt: String,
    path: PathBuf,
    until: Instant,
}

/// Queue spooled to a local directory
pub struct SpoolQueue {
    root: PathBuf,
    /// queue -> message id -> lease
    leases: Mutex<HashMap<String, HashMap<String, Lease>>>,
    next_receipt: AtomicU64,
    next_sequence: AtomicU64,
    poll_interval: Duration,
}

impl SpoolQueue {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            leases: Mutex::new(HashMap::new()),
            next_receipt: AtomicU64::new(1),
            next_sequence: AtomicU64::new(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often an empty queue is re-scanned while long-polling
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create the queue directory if needed
    pub fn create_queue(&self, queue: &str) -> TransportResult<()> {
        fs::create_dir_all(self.root.join(queue))?;
        Ok(())
    }

    /// Enqueue with explicit attributes
    pub fn send_with_attributes(
        &self,
        queue: &str,
        body: &[u8],
        mut attributes: BTreeMap<String, String>,
    ) -> TransportResult<SendReceipt> {
        let dir = self.queue_dir(queue)?;
        let sent = current_timestamp_millis();
        attributes
            .entry(SENT_TIMESTAMP.to_string())
            .or_insert_with(|| sent.to_string());

        let message_id = uuid::Uuid::new_v4().to_string();
        let (body, body_encoding) = encode_body(body);
        let message = SpoolMessage {
            message_id: message_id.clone(),
            attributes,
            body,
            body_encoding,
        };

        let seq = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let path = dir.join(format!("{:013}-{:08}-{}.json", sent, seq, message_id));
        atomic_write(&path, &serde_json::to_vec_pretty(&message)?)?;
        Ok(SendReceipt { message_id })
    }

    fn queue_dir(&self, queue: &str) -> TransportResult<PathBuf> {
        let dir = self.root.join(queue);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(TransportError::QueueNotFound(queue.to_string()))
        }
    }

    fn message_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && !is_temp_file(p))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn try_lease(
        &self,
        queue: &str,
        dir: &Path,
        request: &ReceiveRequest,
    ) -> TransportResult<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        let queue_leases = leases.entry(queue.to_string()).or_default();
        let mut batch = Vec::new();

        for path in Self::message_files(dir)? {
            if batch.len() >= request.max_messages {
                break;
            }

            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                // Deleted by another consumer between listing and read
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let message: SpoolMessage = match serde_json::from_slice(&raw) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable spool message");
                    continue;
                }
            };

            if queue_leases
                .get(&message.message_id)
                .is_some_and(|lease| lease.until > now)
            {
                continue;
            }

            let body = match decode_body(&message.body, message.body_encoding) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable spool message");
                    continue;
                }
            };

            let receipt = format!(
                "{}#{}",
                message.message_id,
                self.next_receipt.fetch_add(1, Ordering::SeqCst)
            );
            queue_leases.insert(
                message.message_id.clone(),
                Lease {
                    receipt: receipt.clone(),
                    path: path.clone(),
                    until: now + request.visibility_timeout,
                },
            );

            batch.push(QueueMessage {
                message_id: message.message_id,
                receipt_handle: receipt,
                body,
                attributes: select_attributes(&message.attributes, &request.attribute_names),
            });
        }

        Ok(batch)
    }
}

impl QueueClient for SpoolQueue {
    fn receive(&self, queue: &str, request: &ReceiveRequest) -> TransportResult<Vec<QueueMessage>> {
        let dir = self.queue_dir(queue)?;
        let deadline = Instant::now() + request.wait;

        loop {
            let batch = self.try_lease(queue, &dir, request)?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    fn delete(&self, queue: &str, receipt_handles: &[String]) -> TransportResult<()> {
        self.queue_dir(queue)?;
        let mut leases = self.leases.lock();
        let queue_leases = leases.entry(queue.to_string()).or_default();

        let mut rejected = Vec::new();
        for handle in receipt_handles {
            let found = queue_leases
                .iter()
                .find(|(_, lease)| &lease.receipt == handle)
                .map(|(id, lease)| (id.clone(), lease.path.clone()));

            match found {
                Some((message_id, path)) => {
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                    queue_leases.remove(&message_id);
                }
                None => rejected.push(handle.clone()),
            }
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(TransportError::InvalidAckTokens(rejected))
        }
    }

    fn send(&self, queue: &str, body: &[u8]) -> TransportResult<SendReceipt> {
        self.send_with_attributes(queue, body, BTreeMap::new())
    }
}
