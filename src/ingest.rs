// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{FutureExt, future::BoxFuture};
use serde::Deserialize;

use crate::{
    aggregate::AggregateEngine,
    config::StoreMode,
    error::{Result, SthError, ValidationSource},
    namespace::{CollectionFamily, NamespaceTuple},
    raw::{AttrValue, RawEvent, RawStore},
    store::provider::{CollectionProvider, GetOptions},
};

pub const TIME_INSTANT: &str = "TimeInstant";

#[derive(Debug, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "subscriptionId", default)]
    pub subscription_id: Option<String>,
    #[serde(rename = "contextResponses")]
    pub context_responses: Vec<ContextResponse>,
}

#[derive(Debug, Deserialize)]
pub struct ContextResponse {
    #[serde(rename = "contextElement")]
    pub context_element: ContextElement,
}

#[derive(Debug, Deserialize)]
pub struct ContextElement {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: Vec<NotifiedAttribute>,
}

#[derive(Debug, Deserialize)]
pub struct NotifiedAttribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub attr_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub metadatas: Vec<AttributeMetadata>,
}

impl NotifiedAttribute {
    /// An upstream `TimeInstant` metadata entry overrides the server
    /// receive time for this attribute's writes.
    fn time_instant(&self) -> Option<DateTime<Utc>> {
        self.metadatas
            .iter()
            .find(|m| m.name == TIME_INSTANT)
            .and_then(|m| m.value.as_str())
            .and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(rename = "type", default)]
    pub md_type: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Parses notifications, filters non-aggregatable values, fans the retained
/// attributes out to the raw and aggregate write paths, and settles on one
/// outcome: the first observed error, or success.
pub struct IngestionCoordinator {
    provider: Arc<CollectionProvider>,
    raw: Arc<RawStore>,
    aggregates: Arc<AggregateEngine>,
    mode: StoreMode,
    ignore_blank_spaces: bool,
}

impl IngestionCoordinator {
    pub fn new(
        provider: Arc<CollectionProvider>,
        raw: Arc<RawStore>,
        aggregates: Arc<AggregateEngine>,
        mode: StoreMode,
        ignore_blank_spaces: bool,
    ) -> Self {
        Self {
            provider,
            raw,
            aggregates,
            mode,
            ignore_blank_spaces,
        }
    }

    /// Handles one parsed notification. Returns the number of attended
    /// attributes on success. All subtasks always run to completion; the
    /// reply carries the first error if any subtask failed.
    pub async fn handle_notification(
        &self,
        service: &str,
        service_path: &str,
        payload: &NotificationPayload,
        recv_time: DateTime<Utc>,
    ) -> Result<usize> {
        let mut retained: Vec<(NamespaceTuple, RawEvent)> = Vec::new();
        for response in &payload.context_responses {
            let element = &response.context_element;
            for attr in &element.attributes {
                let Some(value) = AttrValue::from_notified(&attr.value) else {
                    tracing::debug!(
                        entity_id = %element.id,
                        attr_name = %attr.name,
                        "dropping attribute with non-aggregatable value"
                    );
                    continue;
                };
                if self.ignore_blank_spaces && value.is_blank() {
                    tracing::debug!(
                        entity_id = %element.id,
                        attr_name = %attr.name,
                        "dropping attribute with blank value"
                    );
                    continue;
                }
                let tuple = NamespaceTuple {
                    service: service.to_string(),
                    service_path: service_path.to_string(),
                    entity_id: element.id.clone(),
                    entity_type: element.entity_type.clone(),
                    attr_name: attr.name.clone(),
                };
                let event = RawEvent {
                    recv_time: attr.time_instant().unwrap_or(recv_time),
                    entity_id: element.id.clone(),
                    entity_type: element.entity_type.clone(),
                    attr_name: attr.name.clone(),
                    attr_type: attr.attr_type.clone(),
                    attr_value: value,
                };
                retained.push((tuple, event));
            }
        }

        if retained.is_empty() {
            return Err(SthError::validation(
                ValidationSource::Payload,
                &["attributes"],
            ));
        }

        let attended = retained.len();
        let mut subtasks: Vec<BoxFuture<'_, Result<()>>> = Vec::new();
        for (tuple, event) in &retained {
            if self.mode.stores_raw() {
                subtasks.push(self.raw_subtask(tuple, event).boxed());
            }
            if self.mode.stores_aggregated() {
                subtasks.push(self.aggregate_subtask(tuple, event).boxed());
            }
        }

        let outcomes = futures::future::join_all(subtasks).await;
        for outcome in outcomes {
            if let Err(err) = outcome {
                tracing::warn!(error = %err, "ingest subtask failed");
                return Err(err);
            }
        }
        Ok(attended)
    }

    async fn raw_subtask(&self, tuple: &NamespaceTuple, event: &RawEvent) -> Result<()> {
        let handle = self
            .provider
            .get_collection(
                tuple,
                GetOptions {
                    family: CollectionFamily::Raw,
                    create: true,
                    store_hash: true,
                },
            )
            .await?
            .ok_or_else(|| SthError::store("raw collection unavailable"))?;
        self.raw.store(&handle, event.clone()).await
    }

    async fn aggregate_subtask(&self, tuple: &NamespaceTuple, event: &RawEvent) -> Result<()> {
        let handle = self
            .provider
            .get_collection(
                tuple,
                GetOptions {
                    family: CollectionFamily::Aggregated,
                    create: true,
                    store_hash: true,
                },
            )
            .await?
            .ok_or_else(|| SthError::store("aggregated collection unavailable"))?;
        self.aggregates.update(&handle, event).await
    }
}
