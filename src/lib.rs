// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ingest;
pub mod kpi;
pub mod logging;
pub mod namespace;
pub mod query;
pub mod raw;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use config::SthConfig;
pub use error::{Result, SthError};
pub use server::SthServer;
