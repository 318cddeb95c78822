// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

/// Process-wide counters. Increments are atomic; reads are KPI-only.
#[derive(Default)]
pub struct KpiRegistry {
    attended_requests: AtomicU64,
}

impl KpiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_request(&self) {
        self.attended_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attended_requests(&self) -> u64 {
        self.attended_requests.load(Ordering::Relaxed)
    }

    /// Returns the current count and starts the next KPI window.
    pub fn reset(&self) -> u64 {
        self.attended_requests.swap(0, Ordering::Relaxed)
    }
}

/// Periodically logs and resets the KPI counters until shutdown.
pub async fn run_kpi_loop(
    kpis: Arc<KpiRegistry>,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval_secs == 0 {
        return;
    }
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    // The first tick fires immediately; skip it so the first window is full.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let attended = kpis.reset();
                tracing::info!(attended_requests = attended, "KPI window");
            }
            _ = shutdown.changed() => break,
        }
    }
}
