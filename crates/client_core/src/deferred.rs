//! A value that shows up later.
//!
//! [`Deferred`] is a single slot that readers can await before anything has
//! been put in it. Every assignment replaces the previous value, and readers
//! always observe the newest one, including readers that started waiting
//! before the assignment happened.

use std::fmt;

use tokio::sync::watch;

pub struct Deferred<T> {
    slot: watch::Sender<Option<T>>,
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// Wait until a value has been assigned at least once, then return the
    /// latest one.
    pub async fn get(&self) -> T {
        let mut rx = self.slot.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().as_ref() {
                return value.clone();
            }
            // `self` owns the sender, so the channel cannot close under us.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Assign or reassign the value, waking every pending reader.
    pub fn set(&self, value: T) {
        self.slot.send_replace(Some(value));
    }

    pub fn try_get(&self) -> Option<T> {
        self.slot.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("is_set", &self.slot.borrow().is_some())
            .finish()
    }
}
