//! Reusable command envelopes.
//!
//! A call takes an envelope with [`CommandPool::acquire`] and owns it
//! exclusively until the [`PooledCommand`] guard is dropped, which clears it
//! and hands it back. Purely an allocation saver.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::protocol::Command;

pub const DEFAULT_POOL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct CommandPool {
    idle: Mutex<Vec<Command>>,
    capacity: usize,
}

impl Default for CommandPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl CommandPool {
    /// Creates a pool that keeps at most `capacity` idle envelopes.
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn acquire(&self) -> PooledCommand<'_> {
        let command = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        PooledCommand {
            pool: self,
            command: Some(command),
        }
    }

    /// Clears `command` and keeps it for reuse if the pool has room.
    pub fn release(&self, mut command: Command) {
        command.reset();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push(command);
        }
    }

    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive handle to a pooled envelope.
#[derive(Debug)]
pub struct PooledCommand<'a> {
    pool: &'a CommandPool,
    command: Option<Command>,
}

impl Deref for PooledCommand<'_> {
    type Target = Command;

    fn deref(&self) -> &Command {
        self.command.as_ref().expect("pooled command already released")
    }
}

impl DerefMut for PooledCommand<'_> {
    fn deref_mut(&mut self) -> &mut Command {
        self.command.as_mut().expect("pooled command already released")
    }
}

impl Drop for PooledCommand<'_> {
    fn drop(&mut self) {
        if let Some(command) = self.command.take() {
            self.pool.release(command);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn released_envelope_is_cleared_and_reused() {
        let pool = CommandPool::new(4);
        {
            let mut cmd = pool.acquire();
            cmd.name.push_str("getCandles");
            cmd.payload = Some(json!({"count": 10}));
        }
        assert_eq!(pool.idle_len(), 1);

        let cmd = pool.acquire();
        assert!(cmd.name.is_empty());
        assert!(cmd.payload.is_none());
        assert!(cmd.name.capacity() >= "getCandles".len());
        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn concurrent_holders_get_distinct_envelopes() {
        let pool = CommandPool::new(4);
        let mut a = pool.acquire();
        let mut b = pool.acquire();
        a.name.push_str("a");
        b.name.push_str("b");
        assert_eq!(a.name, "a");
        assert_eq!(b.name, "b");
        drop(a);
        drop(b);
        assert_eq!(pool.idle_len(), 2);
    }

    #[test]
    fn capacity_bounds_idle_envelopes() {
        let pool = CommandPool::new(1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_len(), 1);
    }
}
