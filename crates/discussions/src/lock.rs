use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;

/// A lock held for the duration of one search-then-create sequence.
#[async_trait]
pub trait HeldLock: Send {
    async fn release(self: Box<Self>);
}

pub struct CreationGuard {
    held: Option<Box<dyn HeldLock>>,
}

impl CreationGuard {
    pub fn new(held: Box<dyn HeldLock>) -> Self {
        Self { held: Some(held) }
    }

    /// Releases eagerly. Dropping the guard also releases, without awaiting.
    pub async fn release(mut self) {
        if let Some(held) = self.held.take() {
            held.release().await;
        }
    }
}

/// Serializes discussion creation per key (the docId).
#[async_trait]
pub trait CreationLock: Send + Sync {
    async fn acquire(&self, key: &str) -> Result<CreationGuard>;
}

/// In-process keyed mutex. Covers concurrent requests within one process only.
#[derive(Default)]
pub struct KeyedMutexLock {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedMutexLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }
}

struct MutexHeld(OwnedMutexGuard<()>);

#[async_trait]
impl HeldLock for MutexHeld {
    async fn release(self: Box<Self>) {
        drop(self.0);
    }
}

#[async_trait]
impl CreationLock for KeyedMutexLock {
    async fn acquire(&self, key: &str) -> Result<CreationGuard> {
        let guard = self.slot(key).lock_owned().await;
        Ok(CreationGuard::new(Box::new(MutexHeld(guard))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_waits_other_keys_do_not() {
        let lock = Arc::new(KeyedMutexLock::new());
        let held = lock.acquire("abc").await.unwrap();

        let other = tokio::time::timeout(Duration::from_millis(50), lock.acquire("xyz")).await;
        assert!(other.is_ok(), "different key is independent");

        let contender = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("abc").await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        held.release().await;
        contender.await.unwrap().unwrap();
    }
}
