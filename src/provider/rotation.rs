//! Round-robin credential rotation.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::Provider;
use crate::config::{ApiKey, ProvidersConfig};

/// Ordered key pool with a shared wrapping cursor.
///
/// The cursor is advanced with a single atomic read-modify-write, so concurrent
/// callers never observe or store a stale index.
#[derive(Debug)]
pub struct CredentialPool {
    keys: Vec<ApiKey>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(keys: Vec<ApiKey>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Take the key under the cursor and advance it, wrapping at the pool size.
    ///
    /// Returns `None` for an empty pool.
    pub fn next(&self) -> Option<ApiKey> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }
        let index = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| Some((i + 1) % len))
            .ok()?;
        self.keys.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// First key in rotation order, for diagnostics.
    pub fn first(&self) -> Option<&ApiKey> {
        self.keys.first()
    }
}

/// One credential pool per provider, built once at startup.
#[derive(Debug)]
pub struct Credentials {
    openrouter: CredentialPool,
    google: CredentialPool,
}

impl Credentials {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            openrouter: CredentialPool::new(config.openrouter.api_keys.clone()),
            google: CredentialPool::new(config.google.api_keys.clone()),
        }
    }

    pub fn pool(&self, provider: Provider) -> &CredentialPool {
        match provider {
            Provider::OpenRouter => &self.openrouter,
            Provider::Google => &self.google,
        }
    }

    /// Next credential for `provider`, or `None` when its pool is empty.
    pub fn next(&self, provider: Provider) -> Option<ApiKey> {
        self.pool(provider).next()
    }
}
