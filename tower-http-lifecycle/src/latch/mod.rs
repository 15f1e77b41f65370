//! A write-once latch and the guards that settle it.
//!
//! A [`Latch`] moves from unset to settled exactly once. The first writer wins
//! and every later attempt is a no-op. The same primitive backs the abort
//! outcome of a [`RequestScope`], and the single-owner [`SettleGuard`] drives
//! the "finished or closed, whichever comes first" events of the abort
//! detector, request logging and request metrics.
//!
//! [`RequestScope`]: crate::scope::RequestScope

mod body;
mod future;
mod guard;

pub use self::{
    body::SettleBody,
    future::SettleFuture,
    guard::{OnSettle, SettleGuard, Settled},
};

use once_cell::sync::OnceCell;

/// A two-state value: unset, then settled.
///
/// Settling is a compare-and-set and is safe to race from several threads.
#[derive(Debug)]
pub struct Latch<T> {
    cell: OnceCell<T>,
}

impl<T> Latch<T> {
    /// Create an unset latch.
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Settle the latch with `value`.
    ///
    /// Returns `true` if this call settled it, `false` if it was already
    /// settled. The stored value never changes once set.
    pub fn settle(&self, value: T) -> bool {
        self.cell.set(value).is_ok()
    }

    /// The settled value, if any.
    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// Whether the latch has been settled.
    pub fn is_settled(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_writer_wins() {
        let latch = Latch::new();
        assert!(!latch.is_settled());

        assert!(latch.settle("closed"));
        assert!(!latch.settle("finished"));

        assert_eq!(latch.get(), Some(&"closed"));
    }

    #[test]
    fn racing_threads_settle_once() {
        let latch = Arc::new(Latch::new());

        let winners = (0..8)
            .map(|n| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.settle(n))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(latch.is_settled());
    }
}
