// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::Resolution;

/// Which families the ingest pipeline writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreMode {
    OnlyRaw,
    OnlyAggregated,
    #[default]
    Both,
}

impl StoreMode {
    pub fn stores_raw(self) -> bool {
        matches!(self, StoreMode::OnlyRaw | StoreMode::Both)
    }

    pub fn stores_aggregated(self) -> bool {
        matches!(self, StoreMode::OnlyAggregated | StoreMode::Both)
    }
}

/// How collection identifiers are derived from the namespace tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NameEncoding {
    #[default]
    Path,
    Hash,
}

/// Cap/TTL policy applied to a collection at first creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TruncationPolicy {
    /// Maximum number of raw documents kept per collection. 0 disables the cap.
    #[serde(default)]
    pub size: u64,
    /// Maximum age of raw documents in seconds. 0 disables expiry.
    #[serde(default)]
    pub expire_secs: u64,
}

impl TruncationPolicy {
    pub fn is_none(&self) -> bool {
        self.size == 0 && self.expire_secs == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_db_uri")]
    pub uri: String,
    #[serde(default)]
    pub authentication: Option<String>,
    #[serde(default)]
    pub replica_set: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_db_prefix")]
    pub db_prefix: String,
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    #[serde(default = "default_name_len")]
    pub max_collection_name_len: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            uri: default_db_uri(),
            authentication: None,
            replica_set: None,
            pool_size: default_pool_size(),
            db_prefix: default_db_prefix(),
            collection_prefix: default_collection_prefix(),
            max_collection_name_len: default_name_len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SthConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub should_store: StoreMode,
    #[serde(default = "default_true")]
    pub ignore_blank_spaces: bool,
    #[serde(default = "default_true")]
    pub filter_out_empty: bool,
    #[serde(default = "default_correlator_header")]
    pub correlator_header: String,
    #[serde(default = "default_service")]
    pub default_service: String,
    #[serde(default = "default_service_path")]
    pub default_service_path: String,
    #[serde(default)]
    pub name_encoding: NameEncoding,
    #[serde(default)]
    pub truncation: TruncationPolicy,
    #[serde(default = "Resolution::all")]
    pub aggregation_by: Vec<Resolution>,
    #[serde(default = "default_kpi_interval")]
    pub kpi_interval_secs: u64,
}

impl Default for SthConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            db: DbConfig::default(),
            should_store: StoreMode::default(),
            ignore_blank_spaces: true,
            filter_out_empty: true,
            correlator_header: default_correlator_header(),
            default_service: default_service(),
            default_service_path: default_service_path(),
            name_encoding: NameEncoding::default(),
            truncation: TruncationPolicy::default(),
            aggregation_by: Resolution::all(),
            kpi_interval_secs: default_kpi_interval(),
        }
    }
}

impl SthConfig {
    /// Loads the YAML config file when present, otherwise starts from
    /// defaults. Environment variables override either way.
    pub fn from_file_or_default(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            tracing::info!(path = %path, "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("STH_HOST") {
            self.host = v;
        }
        if let Ok(v) = env::var("STH_PORT")
            && let Ok(port) = v.parse()
        {
            self.port = port;
        }
        if let Ok(v) = env::var("DB_URI") {
            self.db.uri = v;
        }
        if let Ok(v) = env::var("DB_AUTHENTICATION") {
            self.db.authentication = Some(v);
        }
        if let Ok(v) = env::var("REPLICA_SET") {
            self.db.replica_set = Some(v);
        }
        if let Ok(v) = env::var("POOL_SIZE")
            && let Ok(size) = v.parse()
        {
            self.db.pool_size = size;
        }
        if let Ok(v) = env::var("DB_PREFIX") {
            self.db.db_prefix = v;
        }
        if let Ok(v) = env::var("COLLECTION_PREFIX") {
            self.db.collection_prefix = v;
        }
        if let Ok(v) = env::var("MAX_COLLECTION_NAME_LEN")
            && let Ok(len) = v.parse()
        {
            self.db.max_collection_name_len = len;
        }
        if let Ok(v) = env::var("DEFAULT_SERVICE") {
            self.default_service = v;
        }
        if let Ok(v) = env::var("DEFAULT_SERVICE_PATH") {
            self.default_service_path = v;
        }
        if let Ok(v) = env::var("SHOULD_STORE")
            && let Ok(mode) = serde_yaml::from_str(&v)
        {
            self.should_store = mode;
        }
        if let Ok(v) = env::var("IGNORE_BLANK_SPACES") {
            self.ignore_blank_spaces = parse_bool(&v);
        }
        if let Ok(v) = env::var("FILTER_OUT_EMPTY") {
            self.filter_out_empty = parse_bool(&v);
        }
        if let Ok(v) = env::var("UNICA_CORRELATOR_HEADER") {
            self.correlator_header = v;
        }
        if let Ok(v) = env::var("NAME_ENCODING")
            && let Ok(encoding) = serde_yaml::from_str(&v)
        {
            self.name_encoding = encoding;
        }
        if let Ok(v) = env::var("TRUNCATION_SIZE")
            && let Ok(size) = v.parse()
        {
            self.truncation.size = size;
        }
        if let Ok(v) = env::var("TRUNCATION_EXPIRE_SECS")
            && let Ok(secs) = v.parse()
        {
            self.truncation.expire_secs = secs;
        }
        if let Ok(v) = env::var("KPI_INTERVAL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.kpi_interval_secs = secs;
        }
    }
}

fn parse_bool(v: &str) -> bool {
    v == "true" || v == "1"
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8666
}

fn default_db_uri() -> String {
    "memory://localhost".to_string()
}

fn default_pool_size() -> usize {
    5
}

fn default_db_prefix() -> String {
    "sth_".to_string()
}

fn default_collection_prefix() -> String {
    "sth_".to_string()
}

// The classic namespace budget of document stores.
fn default_name_len() -> usize {
    113
}

fn default_true() -> bool {
    true
}

fn default_correlator_header() -> String {
    "Unica-Correlator".to_string()
}

fn default_service() -> String {
    "testservice".to_string()
}

fn default_service_path() -> String {
    "/testservicepath".to_string()
}

fn default_kpi_interval() -> u64 {
    60
}
