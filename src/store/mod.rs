// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

pub mod memory;
pub mod provider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    aggregate::{BucketDoc, BucketKey, Resolution, SlotDelta},
    config::TruncationPolicy,
    error::Result,
    raw::RawEvent,
};

/// How many raw documents a read wants, beyond the identity/time filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchWindow {
    /// The N most recent matches, returned in ascending order.
    LastN(usize),
    /// Up to `limit` matches starting at `offset`, ascending.
    Offset { limit: usize, offset: usize },
    /// Every match, ascending.
    All,
}

#[derive(Debug, Clone)]
pub struct EventFilter {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub window: FetchWindow,
}

#[derive(Debug, Clone)]
pub struct BucketSelector {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub resolution: Resolution,
    pub origin_from: DateTime<Utc>,
    pub origin_to: DateTime<Utc>,
}

/// One record of the hash-to-origin side mapping kept when hash encoding is
/// active, so operators can reverse a collection name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashMapping {
    pub collection: String,
    pub service: String,
    #[serde(rename = "servicePath")]
    pub service_path: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "attrName")]
    pub attr_name: String,
    #[serde(rename = "isAggregated")]
    pub is_aggregated: bool,
}

/// The document-store driver seam. Everything above this trait is
/// store-agnostic; a networked driver plugs in here. All operations go
/// through the backend's bounded connection pool.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Creates the collection if absent, applying the truncation policy on
    /// first creation only. Returns whether it was newly created.
    async fn ensure_collection(
        &self,
        db: &str,
        collection: &str,
        truncation: &TruncationPolicy,
    ) -> Result<bool>;

    async fn collection_exists(&self, db: &str, collection: &str) -> Result<bool>;

    /// Appends one raw document. Concurrent appends are independent.
    async fn append_event(&self, db: &str, collection: &str, event: RawEvent) -> Result<()>;

    /// Returns matching events ordered ascending by receive time, ties
    /// broken by insertion order.
    async fn fetch_events(
        &self,
        db: &str,
        collection: &str,
        filter: &EventFilter,
    ) -> Result<Vec<RawEvent>>;

    /// Upsert-then-update on one bucket document: inserts the skeleton if
    /// the bucket is absent and applies the delta to one slot, atomically
    /// as a pair.
    async fn apply_slot_delta(
        &self,
        db: &str,
        collection: &str,
        key: BucketKey,
        slot: usize,
        delta: &SlotDelta,
    ) -> Result<()>;

    /// Point lookup of buckets whose origin lies in the selector's range,
    /// ordered ascending by origin.
    async fn fetch_buckets(
        &self,
        db: &str,
        collection: &str,
        selector: &BucketSelector,
    ) -> Result<Vec<BucketDoc>>;

    /// Records one hash-to-origin pair. Insert-if-absent; duplicates and
    /// concurrent inserts are ignored.
    async fn record_hash_mapping(
        &self,
        db: &str,
        mapping_collection: &str,
        mapping: HashMapping,
    ) -> Result<()>;
}
