// Copyright 2026 Skipqueue Project Authors. Licensed under Apache-2.0.

//! A concurrent lock-free priority queue over a probabilistically balanced
//! skip list.
//!
//! Many threads may [`push`](KvPriorityQueue::push) and
//! [`try_pop`](KvPriorityQueue::try_pop) concurrently; deletion is logical
//! (a mark bit packed into each link) and traversals help complete the
//! physical unlinking. Memory is reclaimed through epoch-based reclamation,
//! so a node stays addressable for as long as any thread still holds a
//! reference into the list.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod list;
mod node;

/// Default number of skip-list levels. Node heights are drawn uniformly
/// from `1..=LEVELS`.
pub const DEFAULT_LEVELS: usize = 5;

pub use list::{KvPriorityQueue, PriorityQueue};
