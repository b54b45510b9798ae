//! In-memory secret backend
//!
//! Useful for tests and for running without any persistent storage. It can
//! be switched unavailable or made slow to exercise fallback paths.

use super::{Backend, SecretBackend, SecretKind, StorageError};
use crate::Secret;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct MemoryBackend {
    backend: Backend,
    secrets: RwLock<HashMap<(String, SecretKind), Secret>>,
    available: AtomicBool,
    read_only: AtomicBool,
    delay: RwLock<Option<Duration>>,
}

impl MemoryBackend {
    /// Create an empty backend reporting itself as `backend`
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            secrets: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
            delay: RwLock::new(None),
        }
    }

    /// Make every operation fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Keep serving reads but reject writes and deletes
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Delay every operation, simulating a hung daemon
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn check(&self) -> Result<(), StorageError> {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!("{} backend disabled", self.backend)))
        }
    }

    async fn check_writable(&self) -> Result<(), StorageError> {
        self.check().await?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("{} backend is read-only", self.backend)));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn get(&self, name: &str, kind: SecretKind) -> Result<Option<Secret>, StorageError> {
        self.check().await?;
        Ok(self.secrets.read().get(&(name.to_string(), kind)).cloned())
    }

    async fn set(&self, name: &str, kind: SecretKind, value: &Secret) -> Result<(), StorageError> {
        self.check_writable().await?;
        self.secrets
            .write()
            .insert((name.to_string(), kind), value.clone());
        Ok(())
    }

    async fn delete(&self, name: &str, kind: SecretKind) -> Result<bool, StorageError> {
        self.check_writable().await?;
        Ok(self.secrets.write().remove(&(name.to_string(), kind)).is_some())
    }
}
