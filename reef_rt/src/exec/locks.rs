//! Per-(method, object) reentrancy locks.
//!
//! Each key is a small state machine: free, or held by one task with a
//! re-entry count. A task acquiring a key held by another task parks on
//! the notification condvar until the holder releases; a task that
//! already holds the key just bumps the count. The guard releases exactly
//! the acquisition it represents, on every exit path.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use reef_core::{MapT, ObjectId};

/// Identity of a logical task. Tasks map onto OS threads.
pub(crate) type TaskId = ThreadId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockKey {
    method: usize,
    object: ObjectId,
}

#[derive(Debug)]
struct LockState {
    owner: TaskId,
    refcount: usize,
}

#[derive(Debug, Default)]
pub(crate) struct MethodLocks {
    held: Mutex<MapT<LockKey, LockState>>,
    freed: Condvar,
}

impl MethodLocks {
    /// Block until the (method, object) key is acquirable by the current
    /// task, then hold it.
    pub fn acquire(&self, method: usize, object: &ObjectId) -> MethodLockGuard<'_> {
        let key = LockKey {
            method,
            object: object.clone(),
        };
        let me = thread::current().id();

        let mut held = self.held.lock();
        loop {
            if let Some(state) = held.get_mut(&key) {
                if state.owner == me {
                    state.refcount += 1;
                    break;
                }
                self.freed.wait(&mut held);
                continue;
            }
            held.insert(
                key.clone(),
                LockState {
                    owner: me,
                    refcount: 1,
                },
            );
            break;
        }

        MethodLockGuard { locks: self, key }
    }

    fn release(&self, key: &LockKey) {
        let mut held = self.held.lock();
        if let Some(state) = held.get_mut(key) {
            state.refcount -= 1;
            if state.refcount == 0 {
                held.remove(key);
                self.freed.notify_all();
            }
        }
    }
}

pub(crate) struct MethodLockGuard<'a> {
    locks: &'a MethodLocks,
    key: LockKey,
}

impl Drop for MethodLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
    }
}
