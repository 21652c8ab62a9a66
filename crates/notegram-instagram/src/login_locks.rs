use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-account login serialization.
///
/// Each account name maps to its own async mutex, created on demand, so at
/// most one login/probe sequence runs per account while unrelated accounts
/// proceed independently. Holding the returned guard marks the critical
/// region; it releases on drop.
#[derive(Default)]
pub struct LoginLockMap {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LoginLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, account_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(account_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
