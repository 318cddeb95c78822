// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::{Result, SthError},
    raw::{AttrValue, RawEvent},
    store::{BucketSelector, StorageBackend, provider::CollectionHandle},
};

/// Granularity of one aggregate slot. Buckets are keyed by the parent unit:
/// a minute-resolution bucket spans one hour, a second-resolution bucket one
/// minute, a month-resolution bucket one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Second,
    Minute,
    Hour,
    Day,
    Month,
}

impl Resolution {
    pub fn all() -> Vec<Resolution> {
        vec![
            Resolution::Second,
            Resolution::Minute,
            Resolution::Hour,
            Resolution::Day,
            Resolution::Month,
        ]
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Second => "second",
            Resolution::Minute => "minute",
            Resolution::Hour => "hour",
            Resolution::Day => "day",
            Resolution::Month => "month",
        }
    }

    /// Number of sub-unit slots in one bucket of this resolution.
    pub fn slots(self) -> usize {
        match self {
            Resolution::Second | Resolution::Minute => 60,
            Resolution::Hour => 24,
            Resolution::Day => 31,
            Resolution::Month => 12,
        }
    }

    /// Truncates an instant to the start of the bucket containing it, i.e.
    /// to this resolution's parent unit.
    pub fn origin(self, t: DateTime<Utc>) -> DateTime<Utc> {
        let (y, mo, d, h, mi) = (t.year(), t.month(), t.day(), t.hour(), t.minute());
        let truncated = match self {
            Resolution::Second => Utc.with_ymd_and_hms(y, mo, d, h, mi, 0),
            Resolution::Minute => Utc.with_ymd_and_hms(y, mo, d, h, 0, 0),
            Resolution::Hour => Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0),
            Resolution::Day => Utc.with_ymd_and_hms(y, mo, 1, 0, 0, 0),
            Resolution::Month => Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0),
        };
        truncated.single().unwrap_or(t)
    }

    /// 0-based index of the slot an instant lands in within its bucket.
    pub fn slot_index(self, t: DateTime<Utc>) -> usize {
        match self {
            Resolution::Second => t.second() as usize,
            Resolution::Minute => t.minute() as usize,
            Resolution::Hour => t.hour() as usize,
            Resolution::Day => t.day() as usize - 1,
            Resolution::Month => t.month() as usize - 1,
        }
    }
}

impl FromStr for Resolution {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "second" => Ok(Resolution::Second),
            "minute" => Ok(Resolution::Minute),
            "hour" => Ok(Resolution::Hour),
            "day" => Ok(Resolution::Day),
            "month" => Ok(Resolution::Month),
            _ => Err(()),
        }
    }
}

/// Projection requested by an aggregate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggrMethod {
    Min,
    Max,
    Sum,
    Sum2,
    Occur,
}

impl AggrMethod {
    pub fn label(self) -> &'static str {
        match self {
            AggrMethod::Min => "min",
            AggrMethod::Max => "max",
            AggrMethod::Sum => "sum",
            AggrMethod::Sum2 => "sum2",
            AggrMethod::Occur => "occur",
        }
    }
}

impl FromStr for AggrMethod {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "min" => Ok(AggrMethod::Min),
            "max" => Ok(AggrMethod::Max),
            "sum" => Ok(AggrMethod::Sum),
            "sum2" => Ok(AggrMethod::Sum2),
            "occur" => Ok(AggrMethod::Occur),
            _ => Err(()),
        }
    }
}

/// The per-event contribution applied to one slot. Both variants are
/// commutative, so concurrent ingest may apply them in any order.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotDelta {
    Numeric(f64),
    Textual(String),
}

impl From<&AttrValue> for SlotDelta {
    fn from(value: &AttrValue) -> Self {
        match value {
            AttrValue::Number(v) => SlotDelta::Numeric(*v),
            AttrValue::Text(s) => SlotDelta::Textual(s.clone()),
        }
    }
}

/// One sub-unit cell of a bucket's `points` array. A slot stays `Empty`
/// until the first event lands in its sub-unit; an `Empty` slot is
/// equivalent to `samples = 0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Empty,
    Numeric {
        samples: u64,
        sum: f64,
        sum2: f64,
        min: f64,
        max: f64,
    },
    Textual {
        samples: u64,
        occur: BTreeMap<String, u64>,
    },
}

impl Slot {
    pub fn samples(&self) -> u64 {
        match self {
            Slot::Empty => 0,
            Slot::Numeric { samples, .. } | Slot::Textual { samples, .. } => *samples,
        }
    }

    /// Applies one event's delta. Must be called under the backend's bucket
    /// lock so the insert-if-missing and the field update stay atomic as a
    /// pair.
    pub fn apply(&mut self, delta: &SlotDelta) -> Result<()> {
        match (&mut *self, delta) {
            (Slot::Empty, SlotDelta::Numeric(v)) => {
                *self = Slot::Numeric {
                    samples: 1,
                    sum: *v,
                    sum2: v * v,
                    min: *v,
                    max: *v,
                };
                Ok(())
            }
            (Slot::Empty, SlotDelta::Textual(s)) => {
                let mut occur = BTreeMap::new();
                occur.insert(s.clone(), 1);
                *self = Slot::Textual { samples: 1, occur };
                Ok(())
            }
            (
                Slot::Numeric {
                    samples,
                    sum,
                    sum2,
                    min,
                    max,
                },
                SlotDelta::Numeric(v),
            ) => {
                *samples += 1;
                *sum += v;
                *sum2 += v * v;
                *min = min.min(*v);
                *max = max.max(*v);
                Ok(())
            }
            (Slot::Textual { samples, occur }, SlotDelta::Textual(s)) => {
                *samples += 1;
                *occur.entry(s.clone()).or_insert(0) += 1;
                Ok(())
            }
            _ => Err(SthError::store(
                "attribute value type changed within an aggregation slot",
            )),
        }
    }
}

/// Identity of one bucket document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub resolution: Resolution,
    pub origin: DateTime<Utc>,
}

/// One bucket document: all sub-unit aggregates of one resolution for one
/// parent-unit origin.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDoc {
    pub key: BucketKey,
    pub points: Vec<Slot>,
}

impl BucketDoc {
    /// Pre-materialises the full `points` array so later updates are pure
    /// in-place slot mutations.
    pub fn skeleton(key: BucketKey) -> Self {
        let points = vec![Slot::Empty; key.resolution.slots()];
        Self { key, points }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub method: AggrMethod,
    pub resolution: Resolution,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub filter_empty: bool,
}

/// Maintains per-resolution pre-aggregate buckets on ingest and answers
/// aggregate queries by point lookup over the origin range. Nothing outside
/// this engine mutates a bucket.
pub struct AggregateEngine {
    backend: Arc<dyn StorageBackend>,
    resolutions: Vec<Resolution>,
}

impl AggregateEngine {
    pub fn new(backend: Arc<dyn StorageBackend>, resolutions: Vec<Resolution>) -> Self {
        Self {
            backend,
            resolutions,
        }
    }

    /// Applies one event to every enabled resolution. Each resolution is a
    /// single atomic upsert-then-update on its bucket document.
    pub async fn update(&self, handle: &CollectionHandle, event: &RawEvent) -> Result<()> {
        let delta = SlotDelta::from(&event.attr_value);
        let updates = self.resolutions.iter().map(|resolution| {
            let key = BucketKey {
                entity_id: event.entity_id.clone(),
                entity_type: event.entity_type.clone(),
                attr_name: event.attr_name.clone(),
                resolution: *resolution,
                origin: resolution.origin(event.recv_time),
            };
            let slot = resolution.slot_index(event.recv_time);
            let delta = delta.clone();
            async move {
                self.backend
                    .apply_slot_delta(&handle.db, &handle.name, key, slot, &delta)
                    .await
            }
        });
        futures::future::try_join_all(updates).await?;
        Ok(())
    }

    /// Returns the buckets whose origin falls in the queried range, each
    /// projected to the requested method.
    pub async fn query(&self, handle: &CollectionHandle, query: &AggregateQuery) -> Result<Vec<Value>> {
        let selector = BucketSelector {
            entity_id: query.entity_id.clone(),
            entity_type: query.entity_type.clone(),
            attr_name: query.attr_name.clone(),
            resolution: query.resolution,
            origin_from: query.resolution.origin(query.from),
            origin_to: query.resolution.origin(query.to),
        };
        let buckets = self
            .backend
            .fetch_buckets(&handle.db, &handle.name, &selector)
            .await?;
        buckets
            .iter()
            .map(|bucket| project(bucket, query.method, query.filter_empty))
            .collect()
    }
}

fn project(bucket: &BucketDoc, method: AggrMethod, filter_empty: bool) -> Result<Value> {
    let mut points = Vec::new();
    for (offset, slot) in bucket.points.iter().enumerate() {
        match slot {
            Slot::Empty => {
                if !filter_empty {
                    let zero = match method {
                        AggrMethod::Occur => json!({}),
                        _ => json!(0),
                    };
                    points.push(json!({
                        "offset": offset,
                        "samples": 0,
                        (method.label()): zero,
                    }));
                }
            }
            Slot::Numeric {
                samples,
                sum,
                sum2,
                min,
                max,
            } => {
                let value = match method {
                    AggrMethod::Min => *min,
                    AggrMethod::Max => *max,
                    AggrMethod::Sum => *sum,
                    AggrMethod::Sum2 => *sum2,
                    AggrMethod::Occur => {
                        return Err(SthError::TypeMismatch(
                            "occur is not applicable to numeric attribute values".to_string(),
                        ));
                    }
                };
                points.push(json!({
                    "offset": offset,
                    "samples": samples,
                    (method.label()): value,
                }));
            }
            Slot::Textual { samples, occur } => {
                if method != AggrMethod::Occur {
                    return Err(SthError::TypeMismatch(format!(
                        "{} is not applicable to string attribute values",
                        method.label()
                    )));
                }
                points.push(json!({
                    "offset": offset,
                    "samples": samples,
                    "occur": occur,
                }));
            }
        }
    }
    Ok(json!({
        "origin": bucket.key.origin.to_rfc3339(),
        "resolution": bucket.key.resolution.label(),
        "points": points,
    }))
}
