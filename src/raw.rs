// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{Result, SthError},
    store::{EventFilter, FetchWindow, StorageBackend, provider::CollectionHandle},
};

/// An attribute value as received. Anything that is neither a string nor a
/// number never reaches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    Text(String),
}

impl AttrValue {
    /// Extracts a storable value from an arbitrary notification value.
    /// Numeric strings are kept as numbers, matching how upstream brokers
    /// serialise attribute values.
    pub fn from_notified(value: &serde_json::Value) -> Option<AttrValue> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number),
            serde_json::Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) if !s.trim().is_empty() => Some(AttrValue::Number(n)),
                _ => Some(AttrValue::Text(s.clone())),
            },
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, AttrValue::Text(s) if s.trim().is_empty())
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Number(v) => write!(f, "{v}"),
            AttrValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One observation as received, stored verbatim with the server timestamp.
/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "recvTime")]
    pub recv_time: DateTime<Utc>,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(rename = "attrName")]
    pub attr_name: String,
    #[serde(rename = "attrType")]
    pub attr_type: String,
    #[serde(rename = "attrValue")]
    pub attr_value: AttrValue,
}

/// One of the three disjoint raw retrieval modes.
#[derive(Debug, Clone, PartialEq)]
pub enum RawQuery {
    LastN {
        n: usize,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
    Window {
        h_limit: usize,
        h_offset: usize,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
    Csv {
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    },
}

/// Raw query results are either an in-memory list or a materialised file
/// the HTTP layer streams and then deletes.
#[derive(Debug)]
pub enum RawQueryResult {
    Inline(Vec<RawEvent>),
    File(PathBuf),
}

/// Identity filter for raw reads; the time window comes from the query mode.
#[derive(Debug, Clone)]
pub struct RawFilter {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
}

/// Append-only access to raw event collections.
pub struct RawStore {
    backend: Arc<dyn StorageBackend>,
}

impl RawStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends a single observation. No deduplication; concurrent appends
    /// are independent.
    pub async fn store(&self, handle: &CollectionHandle, event: RawEvent) -> Result<()> {
        self.backend
            .append_event(&handle.db, &handle.name, event)
            .await
    }

    pub async fn query(
        &self,
        handle: &CollectionHandle,
        filter: &RawFilter,
        query: &RawQuery,
    ) -> Result<RawQueryResult> {
        let (window, from, to) = match query {
            RawQuery::LastN { n, from, to } => (FetchWindow::LastN(*n), *from, *to),
            RawQuery::Window {
                h_limit,
                h_offset,
                from,
                to,
            } => (
                FetchWindow::Offset {
                    limit: *h_limit,
                    offset: *h_offset,
                },
                *from,
                *to,
            ),
            RawQuery::Csv { from, to } => (FetchWindow::All, *from, *to),
        };

        let events = self
            .backend
            .fetch_events(
                &handle.db,
                &handle.name,
                &EventFilter {
                    entity_id: filter.entity_id.clone(),
                    entity_type: filter.entity_type.clone(),
                    attr_name: filter.attr_name.clone(),
                    from,
                    to,
                    window,
                },
            )
            .await?;

        match query {
            RawQuery::Csv { .. } => {
                let path = write_csv(&filter.attr_name, &events).await?;
                Ok(RawQueryResult::File(path))
            }
            _ => Ok(RawQueryResult::Inline(events)),
        }
    }
}

/// Materialises the matching events as a CSV file under the system temp
/// directory. The caller owns the file and removes it once streamed.
async fn write_csv(attr_name: &str, events: &[RawEvent]) -> Result<PathBuf> {
    let mut content = String::from("recvTime,entityId,entityType,attrName,attrType,attrValue\n");
    for event in events {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_field(&event.recv_time.to_rfc3339()),
            csv_field(&event.entity_id),
            csv_field(&event.entity_type),
            csv_field(&event.attr_name),
            csv_field(&event.attr_type),
            csv_field(&event.attr_value.to_string()),
        ));
    }

    let file_name = format!("sth-{}-{}.csv", sanitize(attr_name), Uuid::new_v4());
    let path = std::env::temp_dir().join(file_name);
    tokio::fs::write(&path, content)
        .await
        .map_err(|err| SthError::store(format!("failed to materialise CSV file: {err}")))?;
    Ok(path)
}

fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
