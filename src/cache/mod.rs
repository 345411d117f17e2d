//! Versioned artifact cache for offline operation.
//!
//! This module provides:
//! - Atomic precaching of an asset list under a version tag (install)
//! - Wholesale eviction of every other version (activate)
//! - Network-first request handling with write-through and offline fallback

mod key;
mod layer;

pub use layer::ArtifactCache;
