// src/publish/memory.rs
//! In-process bus: an append-only log partitioned by key. Used for local runs
//! and tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::bus::{BusRecord, BusTransport, ProducerSettings};
use crate::error::PublishError;
use crate::event::CanonicalIngestionEvent;

#[derive(Debug, Default)]
pub struct MemoryBus {
    inner: Mutex<Log>,
}

#[derive(Debug, Default)]
struct Log {
    records: Vec<BusRecord>,
    seen: HashSet<String>,
    duplicates: usize,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Log> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All records in arrival order.
    pub fn records(&self) -> Vec<BusRecord> {
        self.log().records.clone()
    }

    pub fn len(&self) -> usize {
        self.log().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retried sends that were dropped as duplicates.
    pub fn duplicates(&self) -> usize {
        self.log().duplicates
    }

    /// Records grouped by partition key, each group in arrival order.
    pub fn partitions(&self) -> HashMap<String, Vec<BusRecord>> {
        let mut out: HashMap<String, Vec<BusRecord>> = HashMap::new();
        for rec in self.log().records.iter() {
            out.entry(rec.key.clone()).or_default().push(rec.clone());
        }
        out
    }

    /// Decoded events in arrival order; undecodable records are skipped.
    pub fn events(&self) -> Vec<CanonicalIngestionEvent> {
        self.log()
            .records
            .iter()
            .filter_map(|r| r.event().ok())
            .collect()
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    async fn send(&self, record: &BusRecord, settings: &ProducerSettings) -> Result<(), PublishError> {
        let mut log = self.log();
        if settings.idempotent && !log.seen.insert(record.message_id.clone()) {
            log.duplicates += 1;
            return Ok(());
        }
        log.records.push(record.clone());
        Ok(())
    }
}
