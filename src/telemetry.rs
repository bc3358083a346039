// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tracing subscriber setup.
//!
//! Hosts embedding the pipeline call [`init_tracing`] once at startup.
//! `LOG_FORMAT=json` selects structured JSON output for log aggregation;
//! anything else gets the human-readable pretty format. Filtering follows
//! `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; subsequent calls are ignored rather than
/// panicking so test binaries can call it freely.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    // Already set by the host or an earlier call; keep the existing one.
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
