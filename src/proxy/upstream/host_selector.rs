//! Backend host selection

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::HostSelection;

/// Picks which configured backend host serves the next call
#[derive(Debug)]
pub enum HostSelector {
    /// Uniformly random per call, no affinity
    Random,
    /// Shared cursor advanced atomically on every call
    RoundRobin { cursor: AtomicUsize },
}

impl HostSelector {
    pub fn new(selection: HostSelection) -> Self {
        match selection {
            HostSelection::Random => HostSelector::Random,
            HostSelection::RoundRobin => HostSelector::RoundRobin {
                cursor: AtomicUsize::new(0),
            },
        }
    }

    /// Index of the next host out of `host_count` (which must be non-zero)
    pub fn next_index(&self, host_count: usize) -> usize {
        debug_assert!(host_count > 0);
        if host_count <= 1 {
            return 0;
        }
        match self {
            HostSelector::Random => rand::thread_rng().gen_range(0..host_count),
            HostSelector::RoundRobin { cursor } => cursor.fetch_add(1, Ordering::Relaxed) % host_count,
        }
    }
}
