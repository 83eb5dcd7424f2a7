//! Shared application state and global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use axum::extract::State;

use bandwidth_core::MetricsRegistry;

pub(crate) type SharedMetrics = Arc<MetricsRegistry>;

pub(crate) type AppState = State<SharedMetrics>;
