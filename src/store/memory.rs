// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use tokio::sync::{RwLock, Semaphore, SemaphorePermit};

use crate::{
    aggregate::{BucketDoc, BucketKey, SlotDelta},
    config::{DbConfig, TruncationPolicy},
    error::{Result, SthError},
    raw::RawEvent,
    store::{BucketSelector, EventFilter, FetchWindow, HashMapping, StorageBackend},
};

struct Collection {
    truncation: TruncationPolicy,
    events: RwLock<Vec<RawEvent>>,
    buckets: DashMap<BucketKey, BucketDoc>,
}

impl Collection {
    fn new(truncation: TruncationPolicy) -> Self {
        Self {
            truncation,
            events: RwLock::new(Vec::new()),
            buckets: DashMap::new(),
        }
    }
}

#[derive(Default)]
struct Database {
    collections: DashMap<String, Arc<Collection>>,
    // mapping collection name -> hashed collection name -> origin record
    mappings: DashMap<String, DashMap<String, HashMapping>>,
}

/// Embedded document store. Every operation passes through a bounded
/// permit pool, mirroring the connection pool of a networked driver.
pub struct MemoryStore {
    uri: String,
    pool: Semaphore,
    databases: DashMap<String, Arc<Database>>,
}

impl MemoryStore {
    pub fn new(db: &DbConfig) -> Self {
        Self {
            uri: db.uri.clone(),
            pool: Semaphore::new(db.pool_size.max(1)),
            databases: DashMap::new(),
        }
    }

    async fn checkout(&self) -> Result<SemaphorePermit<'_>> {
        self.pool
            .acquire()
            .await
            .map_err(|_| SthError::store("store connection pool is closed"))
    }

    fn database(&self, db: &str) -> Arc<Database> {
        self.databases
            .entry(db.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn collection(&self, db: &str, collection: &str) -> Option<Arc<Collection>> {
        self.databases
            .get(db)
            .and_then(|d| d.collections.get(collection).map(|c| c.value().clone()))
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn connect(&self) -> Result<()> {
        if !self.uri.starts_with("memory://") {
            tracing::warn!(uri = %self.uri, "unrecognised store URI scheme, using embedded store");
        }
        tracing::info!(uri = %self.uri, pool_size = self.pool.available_permits(), "store connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close();
        tracing::info!("store disconnected");
        Ok(())
    }

    async fn ensure_collection(
        &self,
        db: &str,
        collection: &str,
        truncation: &TruncationPolicy,
    ) -> Result<bool> {
        let _permit = self.checkout().await?;
        let database = self.database(db);
        let mut created = false;
        database
            .collections
            .entry(collection.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Collection::new(truncation.clone()))
            });
        if created {
            tracing::debug!(db = %db, collection = %collection, "collection created");
        }
        Ok(created)
    }

    async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool> {
        let _permit = self.checkout().await?;
        Ok(self.collection(db, collection).is_some())
    }

    async fn append_event(&self, db: &str, collection: &str, event: RawEvent) -> Result<()> {
        let _permit = self.checkout().await?;
        let collection = self
            .collection(db, collection)
            .ok_or_else(|| SthError::store(format!("collection {collection} does not exist")))?;

        let mut events = collection.events.write().await;
        events.push(event);

        // Truncation is drop-only; surviving documents are never rewritten.
        let policy = &collection.truncation;
        if policy.expire_secs > 0 {
            let horizon = Utc::now() - Duration::seconds(policy.expire_secs as i64);
            events.retain(|e| e.recv_time >= horizon);
        }
        if policy.size > 0 && events.len() > policy.size as usize {
            let excess = events.len() - policy.size as usize;
            events.drain(..excess);
        }
        Ok(())
    }

    async fn fetch_events(
        &self,
        db: &str,
        collection: &str,
        filter: &EventFilter,
    ) -> Result<Vec<RawEvent>> {
        let _permit = self.checkout().await?;
        let Some(collection) = self.collection(db, collection) else {
            return Ok(Vec::new());
        };

        let events = collection.events.read().await;
        let mut matched: Vec<RawEvent> = events
            .iter()
            .filter(|e| {
                e.entity_id == filter.entity_id
                    && e.entity_type == filter.entity_type
                    && e.attr_name == filter.attr_name
                    && filter.from.is_none_or(|from| e.recv_time >= from)
                    && filter.to.is_none_or(|to| e.recv_time <= to)
            })
            .cloned()
            .collect();
        drop(events);

        // Insertion order is the tie-break within equal receive times, so a
        // stable sort is enough.
        matched.sort_by_key(|e| e.recv_time);

        Ok(match filter.window {
            FetchWindow::All => matched,
            FetchWindow::LastN(n) => {
                let skip = matched.len().saturating_sub(n);
                matched.split_off(skip)
            }
            FetchWindow::Offset { limit, offset } => {
                matched.into_iter().skip(offset).take(limit).collect()
            }
        })
    }

    async fn apply_slot_delta(
        &self,
        db: &str,
        collection: &str,
        key: BucketKey,
        slot: usize,
        delta: &SlotDelta,
    ) -> Result<()> {
        let _permit = self.checkout().await?;
        let collection = self
            .collection(db, collection)
            .ok_or_else(|| SthError::store(format!("collection {collection} does not exist")))?;

        // The map entry holds its shard lock for the whole scope, making the
        // skeleton insert and the slot mutation atomic as a pair.
        let mut bucket = collection
            .buckets
            .entry(key.clone())
            .or_insert_with(|| BucketDoc::skeleton(key));
        let points = &mut bucket.value_mut().points;
        let cell = points
            .get_mut(slot)
            .ok_or_else(|| SthError::store(format!("slot {slot} out of range")))?;
        cell.apply(delta)
    }

    async fn fetch_buckets(
        &self,
        db: &str,
        collection: &str,
        selector: &BucketSelector,
    ) -> Result<Vec<BucketDoc>> {
        let _permit = self.checkout().await?;
        let Some(collection) = self.collection(db, collection) else {
            return Ok(Vec::new());
        };

        let mut buckets: Vec<BucketDoc> = collection
            .buckets
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.entity_id == selector.entity_id
                    && key.entity_type == selector.entity_type
                    && key.attr_name == selector.attr_name
                    && key.resolution == selector.resolution
                    && key.origin >= selector.origin_from
                    && key.origin <= selector.origin_to
            })
            .map(|entry| entry.value().clone())
            .collect();
        buckets.sort_by_key(|b| b.key.origin);
        Ok(buckets)
    }

    async fn record_hash_mapping(
        &self,
        db: &str,
        mapping_collection: &str,
        mapping: HashMapping,
    ) -> Result<()> {
        let _permit = self.checkout().await?;
        let database = self.database(db);
        database
            .mappings
            .entry(mapping_collection.to_string())
            .or_default()
            .entry(mapping.collection.clone())
            .or_insert(mapping);
        Ok(())
    }
}
