// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    config::{NameEncoding, SthConfig, TruncationPolicy},
    error::Result,
    namespace::{CollectionFamily, NamespaceResolver, NamespaceTuple},
    store::{HashMapping, StorageBackend},
};

/// Locator of one collection within its logical database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub db: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    pub family: CollectionFamily,
    pub create: bool,
    pub store_hash: bool,
}

/// Locates or creates the raw and aggregated collections for a namespace
/// tuple, memoising resolved handles to keep the ingest hot path cheap.
pub struct CollectionProvider {
    backend: Arc<dyn StorageBackend>,
    resolver: NamespaceResolver,
    truncation: TruncationPolicy,
    hash_mode: bool,
    mapping_collection: String,
    ensured: DashMap<(String, String), ()>,
}

impl CollectionProvider {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &SthConfig) -> Self {
        Self {
            backend,
            resolver: NamespaceResolver::new(config.name_encoding, &config.db),
            truncation: config.truncation.clone(),
            hash_mode: config.name_encoding == NameEncoding::Hash,
            mapping_collection: format!("{}collection_names", config.db.collection_prefix),
            ensured: DashMap::new(),
        }
    }

    /// Resolves the tuple to a handle. With `create = false` an absent
    /// collection yields `Ok(None)`, which the query path treats as "no
    /// data". With `create = true` the collection is created idempotently,
    /// the truncation policy applies on first creation, and in hash mode
    /// one reverse-mapping record is inserted per collection.
    pub async fn get_collection(
        &self,
        tuple: &NamespaceTuple,
        opts: GetOptions,
    ) -> Result<Option<CollectionHandle>> {
        let db = self.resolver.database_name(&tuple.service);
        let name = self.resolver.resolve(tuple, opts.family)?;
        let handle = CollectionHandle {
            db: db.clone(),
            name: name.clone(),
        };

        if self.ensured.contains_key(&(db.clone(), name.clone())) {
            return Ok(Some(handle));
        }

        if !opts.create {
            if self.backend.collection_exists(&db, &name).await? {
                self.ensured.insert((db, name), ());
                return Ok(Some(handle));
            }
            return Ok(None);
        }

        let created = self
            .backend
            .ensure_collection(&db, &name, &self.truncation)
            .await?;
        if created && opts.store_hash && self.hash_mode {
            self.backend
                .record_hash_mapping(
                    &db,
                    &self.mapping_collection,
                    HashMapping {
                        collection: name.clone(),
                        service: tuple.service.clone(),
                        service_path: tuple.service_path.clone(),
                        entity_id: tuple.entity_id.clone(),
                        entity_type: tuple.entity_type.clone(),
                        attr_name: tuple.attr_name.clone(),
                        is_aggregated: opts.family == CollectionFamily::Aggregated,
                    },
                )
                .await?;
        }
        self.ensured.insert((db, name), ());
        Ok(Some(handle))
    }
}
