// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::{
    aggregate::{AggrMethod, AggregateEngine, AggregateQuery, Resolution},
    error::{Result, SthError, ValidationSource},
    namespace::{CollectionFamily, NamespaceTuple},
    raw::{RawFilter, RawQuery, RawQueryResult, RawStore},
    store::provider::{CollectionProvider, GetOptions},
};

pub const QUERY_KEYS: &[&str] = &[
    "lastN",
    "hLimit",
    "hOffset",
    "filetype",
    "aggrMethod",
    "aggrPeriod",
];

/// The recognised query parameters, individually validated.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub last_n: Option<usize>,
    pub h_limit: Option<usize>,
    pub h_offset: Option<usize>,
    pub aggr_method: Option<AggrMethod>,
    pub aggr_period: Option<Resolution>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub filetype: Option<String>,
}

impl QueryParams {
    pub fn from_map(params: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            last_n: parse_param(params, "lastN", |v| v.parse().ok())?,
            h_limit: parse_param(params, "hLimit", |v| v.parse().ok())?,
            h_offset: parse_param(params, "hOffset", |v| v.parse().ok())?,
            aggr_method: parse_param(params, "aggrMethod", |v| v.parse().ok())?,
            aggr_period: parse_param(params, "aggrPeriod", |v| v.parse().ok())?,
            date_from: parse_param(params, "dateFrom", |v| v.parse().ok())?,
            date_to: parse_param(params, "dateTo", |v| v.parse().ok())?,
            filetype: params.get("filetype").cloned(),
        })
    }
}

fn parse_param<T>(
    params: &HashMap<String, String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => parse(raw)
            .map(Some)
            .ok_or_else(|| SthError::validation(ValidationSource::Query, &[key])),
    }
}

/// The two disjoint retrieval paths.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    Raw(RawQuery),
    Aggregated {
        method: AggrMethod,
        resolution: Resolution,
    },
}

/// Dispatch rule, first match wins: raw on any of `lastN` /
/// (`hLimit` + `hOffset`) / `filetype=csv`; aggregated on the
/// `aggrMethod` + `aggrPeriod` pair; otherwise a validation error naming
/// every recognised key.
pub fn plan(params: &QueryParams) -> Result<QueryPlan> {
    let from = params.date_from;
    let to = params.date_to;

    if let Some(n) = params.last_n {
        return Ok(QueryPlan::Raw(RawQuery::LastN { n, from, to }));
    }
    if params.h_limit.is_some() || params.h_offset.is_some() {
        return match (params.h_limit, params.h_offset) {
            (Some(h_limit), Some(h_offset)) => Ok(QueryPlan::Raw(RawQuery::Window {
                h_limit,
                h_offset,
                from,
                to,
            })),
            (Some(_), None) => Err(SthError::validation(ValidationSource::Query, &["hOffset"])),
            _ => Err(SthError::validation(ValidationSource::Query, &["hLimit"])),
        };
    }
    if params.filetype.as_deref() == Some("csv") {
        return Ok(QueryPlan::Raw(RawQuery::Csv { from, to }));
    }
    if let (Some(method), Some(resolution)) = (params.aggr_method, params.aggr_period) {
        return Ok(QueryPlan::Aggregated { method, resolution });
    }
    Err(SthError::validation(ValidationSource::Query, QUERY_KEYS))
}

/// What a query produced: a value list for the envelope, or a file the HTTP
/// layer streams and removes.
#[derive(Debug)]
pub enum QueryOutcome {
    Values(Vec<Value>),
    File(PathBuf),
}

/// Dispatches queries to the raw or aggregated path and shapes the
/// response envelope.
pub struct QueryPlanner {
    provider: Arc<CollectionProvider>,
    raw: Arc<RawStore>,
    aggregates: Arc<AggregateEngine>,
    filter_out_empty: bool,
}

impl QueryPlanner {
    pub fn new(
        provider: Arc<CollectionProvider>,
        raw: Arc<RawStore>,
        aggregates: Arc<AggregateEngine>,
        filter_out_empty: bool,
    ) -> Self {
        Self {
            provider,
            raw,
            aggregates,
            filter_out_empty,
        }
    }

    pub async fn execute(
        &self,
        tuple: &NamespaceTuple,
        params: &QueryParams,
    ) -> Result<QueryOutcome> {
        let plan = plan(params)?;
        let family = match &plan {
            QueryPlan::Raw(_) => CollectionFamily::Raw,
            QueryPlan::Aggregated { .. } => CollectionFamily::Aggregated,
        };

        // An absent collection is not an error on the query path.
        let Some(handle) = self
            .provider
            .get_collection(
                tuple,
                GetOptions {
                    family,
                    create: false,
                    store_hash: false,
                },
            )
            .await?
        else {
            return Ok(QueryOutcome::Values(Vec::new()));
        };

        match plan {
            QueryPlan::Raw(query) => {
                let filter = RawFilter {
                    entity_id: tuple.entity_id.clone(),
                    entity_type: tuple.entity_type.clone(),
                    attr_name: tuple.attr_name.clone(),
                };
                match self.raw.query(&handle, &filter, &query).await? {
                    RawQueryResult::Inline(events) => {
                        let values = events
                            .iter()
                            .map(|e| {
                                serde_json::to_value(e)
                                    .map_err(|err| SthError::store(err.to_string()))
                            })
                            .collect::<Result<Vec<Value>>>()?;
                        Ok(QueryOutcome::Values(values))
                    }
                    RawQueryResult::File(path) => Ok(QueryOutcome::File(path)),
                }
            }
            QueryPlan::Aggregated { method, resolution } => {
                let query = AggregateQuery {
                    entity_id: tuple.entity_id.clone(),
                    entity_type: tuple.entity_type.clone(),
                    attr_name: tuple.attr_name.clone(),
                    method,
                    resolution,
                    from: params.date_from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    to: params.date_to.unwrap_or_else(Utc::now),
                    filter_empty: self.filter_out_empty,
                };
                let values = self.aggregates.query(&handle, &query).await?;
                Ok(QueryOutcome::Values(values))
            }
        }
    }
}

/// The fixed response envelope, emitted regardless of emptiness.
pub fn envelope(tuple: &NamespaceTuple, values: Vec<Value>) -> Value {
    json!({
        "contextResponses": [{
            "contextElement": {
                "id": tuple.entity_id,
                "type": tuple.entity_type,
                "isPattern": false,
                "attributes": [{
                    "name": tuple.attr_name,
                    "values": values,
                }]
            },
            "statusCode": {
                "code": "200",
                "reasonPhrase": "OK"
            }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SthConfig, store::memory::MemoryStore};

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn last_n_dispatches_to_raw() {
        let p = QueryParams::from_map(&params(&[("lastN", "5")])).unwrap();
        assert_eq!(
            plan(&p).unwrap(),
            QueryPlan::Raw(RawQuery::LastN {
                n: 5,
                from: None,
                to: None
            })
        );
    }

    #[test]
    fn raw_path_wins_over_aggregated() {
        let p = QueryParams::from_map(&params(&[
            ("lastN", "5"),
            ("aggrMethod", "sum"),
            ("aggrPeriod", "minute"),
        ]))
        .unwrap();
        assert!(matches!(plan(&p).unwrap(), QueryPlan::Raw(_)));
    }

    #[test]
    fn window_requires_both_parameters() {
        let p = QueryParams::from_map(&params(&[("hLimit", "10"), ("hOffset", "0")])).unwrap();
        assert!(matches!(
            plan(&p).unwrap(),
            QueryPlan::Raw(RawQuery::Window { .. })
        ));

        let p = QueryParams::from_map(&params(&[("hLimit", "10")])).unwrap();
        match plan(&p) {
            Err(SthError::Validation { keys, .. }) => assert_eq!(keys, vec!["hOffset"]),
            other => panic!("unexpected plan: {other:?}"),
        }

        let p = QueryParams::from_map(&params(&[("hOffset", "3")])).unwrap();
        match plan(&p) {
            Err(SthError::Validation { keys, .. }) => assert_eq!(keys, vec!["hLimit"]),
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn csv_filetype_dispatches_to_raw() {
        let p = QueryParams::from_map(&params(&[("filetype", "csv")])).unwrap();
        assert!(matches!(
            plan(&p).unwrap(),
            QueryPlan::Raw(RawQuery::Csv { .. })
        ));
    }

    #[test]
    fn aggregated_pair_dispatches_to_aggregated() {
        let p = QueryParams::from_map(&params(&[
            ("aggrMethod", "occur"),
            ("aggrPeriod", "second"),
        ]))
        .unwrap();
        assert_eq!(
            plan(&p).unwrap(),
            QueryPlan::Aggregated {
                method: AggrMethod::Occur,
                resolution: Resolution::Second
            }
        );
    }

    #[test]
    fn no_recognised_combination_lists_every_key() {
        let p = QueryParams::from_map(&params(&[])).unwrap();
        match plan(&p) {
            Err(SthError::Validation { at, keys }) => {
                assert_eq!(at, ValidationSource::Query);
                for key in QUERY_KEYS {
                    assert!(keys.contains(&key.to_string()));
                }
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn malformed_parameter_values_are_rejected() {
        let err = QueryParams::from_map(&params(&[("lastN", "many")]));
        match err {
            Err(SthError::Validation { keys, .. }) => assert_eq!(keys, vec!["lastN"]),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let err = QueryParams::from_map(&params(&[("aggrPeriod", "fortnight")]));
        assert!(matches!(err, Err(SthError::Validation { .. })));

        let err = QueryParams::from_map(&params(&[("dateFrom", "yesterday")]));
        assert!(matches!(err, Err(SthError::Validation { .. })));
    }

    #[test]
    fn envelope_has_the_fixed_shape() {
        let tuple = NamespaceTuple {
            service: "s".to_string(),
            service_path: "/p".to_string(),
            entity_id: "Room1".to_string(),
            entity_type: "Room".to_string(),
            attr_name: "temperature".to_string(),
        };
        let body = envelope(&tuple, Vec::new());
        let element = &body["contextResponses"][0]["contextElement"];
        assert_eq!(element["id"], "Room1");
        assert_eq!(element["type"], "Room");
        assert_eq!(element["isPattern"], false);
        assert_eq!(element["attributes"][0]["name"], "temperature");
        assert_eq!(element["attributes"][0]["values"], json!([]));
        assert_eq!(
            body["contextResponses"][0]["statusCode"]["code"],
            "200"
        );
    }

    #[tokio::test]
    async fn unknown_namespace_yields_empty_values() {
        let config = SthConfig::default();
        let backend = Arc::new(MemoryStore::new(&config.db));
        let provider = Arc::new(CollectionProvider::new(backend.clone(), &config));
        let raw = Arc::new(RawStore::new(backend.clone()));
        let aggregates = Arc::new(AggregateEngine::new(backend, config.aggregation_by.clone()));
        let planner = QueryPlanner::new(provider, raw, aggregates, true);

        let tuple = NamespaceTuple {
            service: "nowhere".to_string(),
            service_path: "/nothing".to_string(),
            entity_id: "ghost".to_string(),
            entity_type: "Ghost".to_string(),
            attr_name: "ectoplasm".to_string(),
        };
        let p = QueryParams::from_map(&params(&[("lastN", "3")])).unwrap();
        match planner.execute(&tuple, &p).await.unwrap() {
            QueryOutcome::Values(values) => assert!(values.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
