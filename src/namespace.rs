// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use sha2::{Digest, Sha256};

use crate::{
    config::{DbConfig, NameEncoding},
    error::{Result, SthError},
};

pub const AGGREGATED_SUFFIX: &str = ".aggr";

/// The identity of one time series: tenant scoping plus the attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceTuple {
    pub service: String,
    pub service_path: String,
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
}

/// The two collection families kept per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionFamily {
    Raw,
    Aggregated,
}

/// Maps namespace tuples to stable collection identifiers. Pure function of
/// its inputs and the configured encoding.
#[derive(Debug, Clone)]
pub struct NamespaceResolver {
    encoding: NameEncoding,
    db_prefix: String,
    collection_prefix: String,
    max_name_len: usize,
}

impl NamespaceResolver {
    pub fn new(encoding: NameEncoding, db: &DbConfig) -> Self {
        Self {
            encoding,
            db_prefix: db.db_prefix.clone(),
            collection_prefix: db.collection_prefix.clone(),
            max_name_len: db.max_collection_name_len,
        }
    }

    /// One logical database per service.
    pub fn database_name(&self, service: &str) -> String {
        format!("{}{}", self.db_prefix, service)
    }

    /// Derives the collection identifier for a tuple and family. Path mode
    /// preserves the tuple fields; hash mode digests them and always fits
    /// the identifier limit by construction.
    pub fn resolve(&self, tuple: &NamespaceTuple, family: CollectionFamily) -> Result<String> {
        let suffix = match family {
            CollectionFamily::Raw => "",
            CollectionFamily::Aggregated => AGGREGATED_SUFFIX,
        };
        match self.encoding {
            NameEncoding::Path => {
                let name = format!(
                    "{}{}{}",
                    self.collection_prefix,
                    concatenate(tuple),
                    suffix
                );
                if name.len() > self.max_name_len {
                    return Err(SthError::IdentifierTooLong {
                        limit: self.max_name_len,
                    });
                }
                Ok(name)
            }
            NameEncoding::Hash => {
                let digest = hex::encode(Sha256::digest(concatenate(tuple).as_bytes()));
                let budget = self
                    .max_name_len
                    .saturating_sub(self.collection_prefix.len() + AGGREGATED_SUFFIX.len());
                let digest = &digest[..budget.min(digest.len())];
                Ok(format!("{}{}{}", self.collection_prefix, digest, suffix))
            }
        }
    }
}

fn concatenate(tuple: &NamespaceTuple) -> String {
    format!(
        "{}_{}_{}_{}",
        tuple.service_path, tuple.entity_id, tuple.entity_type, tuple.attr_name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> NamespaceTuple {
        NamespaceTuple {
            service: "smartcity".to_string(),
            service_path: "/gardens".to_string(),
            entity_id: "e1".to_string(),
            entity_type: "Room".to_string(),
            attr_name: "temperature".to_string(),
        }
    }

    fn resolver(encoding: NameEncoding, max_len: usize) -> NamespaceResolver {
        let db = DbConfig {
            max_collection_name_len: max_len,
            ..DbConfig::default()
        };
        NamespaceResolver::new(encoding, &db)
    }

    #[test]
    fn path_mode_preserves_tuple_fields() {
        let r = resolver(NameEncoding::Path, 113);
        let name = r.resolve(&tuple(), CollectionFamily::Raw).unwrap();
        assert_eq!(name, "sth_/gardens_e1_Room_temperature");
        let aggr = r.resolve(&tuple(), CollectionFamily::Aggregated).unwrap();
        assert_eq!(aggr, "sth_/gardens_e1_Room_temperature.aggr");
    }

    #[test]
    fn path_mode_rejects_overlong_identifiers() {
        let r = resolver(NameEncoding::Path, 16);
        let err = r.resolve(&tuple(), CollectionFamily::Raw);
        assert!(matches!(
            err,
            Err(SthError::IdentifierTooLong { limit: 16 })
        ));
    }

    #[test]
    fn hash_mode_fits_the_limit() {
        let r = resolver(NameEncoding::Hash, 32);
        let raw = r.resolve(&tuple(), CollectionFamily::Raw).unwrap();
        let aggr = r.resolve(&tuple(), CollectionFamily::Aggregated).unwrap();
        assert!(raw.len() <= 32);
        assert!(aggr.len() <= 32);
        assert!(aggr.ends_with(AGGREGATED_SUFFIX));
        assert_eq!(aggr.strip_suffix(AGGREGATED_SUFFIX).unwrap(), raw);
    }

    #[test]
    fn hash_mode_distinguishes_tuples() {
        let r = resolver(NameEncoding::Hash, 113);
        let a = r.resolve(&tuple(), CollectionFamily::Raw).unwrap();
        let mut other = tuple();
        other.attr_name = "humidity".to_string();
        let b = r.resolve(&other, CollectionFamily::Raw).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn database_name_carries_the_prefix() {
        let r = resolver(NameEncoding::Path, 113);
        assert_eq!(r.database_name("smartcity"), "sth_smartcity");
    }
}
