//! A writer-preferring reader/writer lock (§5).
//!
//! `tokio::sync::RwLock` admits readers and writers in arrival order,
//! which lets a steady stream of readers starve a waiting writer. The
//! engine instead needs: once a writer is waiting, no reader that
//! arrives later runs before it; and when a writer releases, either the
//! next writer runs alone, or — if none is queued — every reader queued
//! so far is admitted together. This is a small, purpose-built
//! primitive rather than a general-purpose lock; it exists for exactly
//! one call site (the engine's single shared lock over collections and
//! the plugin manager).

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct State {
    active_writer: bool,
    active_readers: usize,
    waiting_writers: VecDeque<oneshot::Sender<()>>,
    waiting_readers: VecDeque<oneshot::Sender<()>>,
}

impl State {
    /// Called with the active holder count already decremented to zero
    /// for writers, or to zero for readers. Hands the lock to the next
    /// writer alone, or to every currently-waiting reader at once.
    fn wake_next(&mut self) {
        if let Some(tx) = self.waiting_writers.pop_front() {
            self.active_writer = true;
            let _ = tx.send(());
        } else if !self.waiting_readers.is_empty() {
            self.active_readers += self.waiting_readers.len();
            for tx in self.waiting_readers.drain(..) {
                let _ = tx.send(());
            }
        }
    }
}

pub struct RwPreferWriteLock {
    state: Mutex<State>,
}

impl RwPreferWriteLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub async fn read(&self) -> ReadGuard<'_> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if !state.active_writer && state.waiting_writers.is_empty() {
                state.active_readers += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiting_readers.push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        ReadGuard { lock: self }
    }

    pub async fn write(&self) -> WriteGuard<'_> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if !state.active_writer && state.active_readers == 0 {
                state.active_writer = true;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiting_writers.push_back(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
        WriteGuard { lock: self }
    }

    fn release_read(&self) {
        let mut state = self.state.lock().unwrap();
        state.active_readers -= 1;
        if state.active_readers == 0 {
            state.wake_next();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.active_writer = false;
        state.wake_next();
    }
}

impl Default for RwPreferWriteLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ReadGuard<'a> {
    lock: &'a RwPreferWriteLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a RwPreferWriteLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
