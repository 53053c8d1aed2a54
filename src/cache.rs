//! TTL cache of capture results keyed by request URL
//!
//! Expiry is lazy: an entry older than the TTL is reported as a miss by `get`
//! but stays in the map, along with its enrichment, until the same URL is
//! captured again.

use crate::CaptureArtifact;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Text extracted from a capture after the fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrichment {
    pub text: String,
    pub enriched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentStatus {
    /// No entry, or no pass has completed for the current capture
    Absent,
    Pending,
    Ready(Enrichment),
}

#[derive(Debug, Clone)]
enum EnrichmentSlot {
    Idle,
    Running,
    Done(Enrichment),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    artifact: Arc<CaptureArtifact>,
    created_at: Instant,
    generation: u64,
    enrichment: EnrichmentSlot,
}

/// Consistent snapshot of one cache entry
#[derive(Debug, Clone)]
pub struct CachedCapture {
    pub artifact: Arc<CaptureArtifact>,
    pub enrichment: Option<Enrichment>,
    pub age: Duration,
    pub generation: u64,
}

pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    next_generation: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Fresh entry for `key`, or `None` once it is `ttl` old.
    pub fn get(&self, key: &str) -> Option<CachedCapture> {
        let entry = self.entries.get(key)?;
        let age = entry.created_at.elapsed();
        if age >= self.ttl {
            debug!("Cache entry for {} expired ({:?} old)", key, age);
            return None;
        }

        let enrichment = match &entry.enrichment {
            EnrichmentSlot::Done(enrichment) => Some(enrichment.clone()),
            _ => None,
        };
        Some(CachedCapture {
            artifact: entry.artifact.clone(),
            enrichment,
            age,
            generation: entry.generation,
        })
    }

    /// Insert or overwrite the entry for `key`, clearing any prior enrichment.
    /// Returns the generation of the new entry.
    pub fn put(&self, key: &str, artifact: Arc<CaptureArtifact>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                artifact,
                created_at: Instant::now(),
                generation,
                enrichment: EnrichmentSlot::Idle,
            },
        );
        debug!("Cached capture for {} (generation {})", key, generation);
        generation
    }

    /// Attach text to whatever entry `key` currently holds, expired or not.
    /// Returns false when there is no entry.
    pub fn attach_enrichment(&self, key: &str, text: String) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.enrichment = EnrichmentSlot::Done(Enrichment {
                    text,
                    enriched_at: Utc::now(),
                });
                true
            }
            None => false,
        }
    }

    /// Mark an enrichment pass as running for `generation`.
    pub fn begin_enrichment(&self, key: &str, generation: u64) -> bool {
        self.update_generation(key, generation, |slot| *slot = EnrichmentSlot::Running)
    }

    /// Like [`attach_enrichment`](Self::attach_enrichment), but only if the
    /// entry is still the capture the pass was started for.
    pub fn attach_enrichment_for(&self, key: &str, generation: u64, text: String) -> bool {
        self.update_generation(key, generation, |slot| {
            *slot = EnrichmentSlot::Done(Enrichment {
                text,
                enriched_at: Utc::now(),
            })
        })
    }

    /// Return a running slot to idle after a failed pass.
    pub fn abandon_enrichment(&self, key: &str, generation: u64) -> bool {
        self.update_generation(key, generation, |slot| {
            if matches!(slot, EnrichmentSlot::Running) {
                *slot = EnrichmentSlot::Idle;
            }
        })
    }

    fn update_generation<F>(&self, key: &str, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut EnrichmentSlot),
    {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.generation == generation => {
                update(&mut entry.enrichment);
                true
            }
            Some(_) => {
                debug!("Skipping enrichment update for {}: entry was refreshed", key);
                false
            }
            None => false,
        }
    }

    /// Enrichment state for `key`. Not subject to the TTL.
    pub fn enrichment(&self, key: &str) -> EnrichmentStatus {
        match self.entries.get(key) {
            Some(entry) => match &entry.enrichment {
                EnrichmentSlot::Idle => EnrichmentStatus::Absent,
                EnrichmentSlot::Running => EnrichmentStatus::Pending,
                EnrichmentSlot::Done(enrichment) => EnrichmentStatus::Ready(enrichment.clone()),
            },
            None => EnrichmentStatus::Absent,
        }
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
