// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SthError>;

/// Where a validation failure was detected, reported back to the client
/// inside the structured `validation` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSource {
    Headers,
    Query,
    Payload,
}

#[derive(Error, Debug)]
pub enum SthError {
    #[error("validation failed ({at:?}): {keys:?}")]
    Validation {
        at: ValidationSource,
        keys: Vec<String>,
    },

    #[error("not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(String),

    #[error("aggregation method incompatible with attribute type: {0}")]
    TypeMismatch(String),

    #[error("collection identifier exceeds the {limit} character limit")]
    IdentifierTooLong { limit: usize },
}

impl SthError {
    pub fn validation(at: ValidationSource, keys: &[&str]) -> Self {
        SthError::Validation {
            at,
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        SthError::Store(msg.into())
    }
}

impl IntoResponse for SthError {
    fn into_response(self) -> Response {
        match self {
            SthError::Validation { at, keys } => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "validation": { "source": at, "keys": keys } })),
            )
                .into_response(),
            SthError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not found" })),
            )
                .into_response(),
            SthError::TypeMismatch(reason) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": reason })),
            )
                .into_response(),
            SthError::Store(reason) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": reason })),
            )
                .into_response(),
            SthError::IdentifierTooLong { limit } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": format!("collection identifier exceeds the {limit} character limit")
                })),
            )
                .into_response(),
        }
    }
}
