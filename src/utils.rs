use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

thread_local! {
    /// One past the highest rank currently locked by this thread, 0 if none.
    static HELD: Cell<u8> = const { Cell::new(0) };
}

/// A mutex with a fixed position in the lock hierarchy.
///
/// A thread holding a lock of rank `n` may only acquire locks of rank
/// greater than `n`. Debug builds check this on every acquisition.
pub(crate) struct RankedMutex<T> {
    rank: u8,
    inner: Mutex<T>,
}

impl<T> RankedMutex<T> {
    pub(crate) const fn new(rank: u8, value: T) -> Self {
        Self {
            rank,
            inner: Mutex::new(value),
        }
    }

    pub(crate) fn lock(&self) -> RankedGuard<'_, T> {
        let previous = HELD.get();
        debug_assert!(
            previous <= self.rank,
            "lock order violation: acquiring rank {} while holding rank {}",
            self.rank,
            previous.saturating_sub(1),
        );

        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        HELD.set(self.rank + 1);

        RankedGuard { guard, previous }
    }
}

pub(crate) struct RankedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    previous: u8,
}

impl<T> Drop for RankedGuard<'_, T> {
    fn drop(&mut self) {
        HELD.set(self.previous);
    }
}

impl<T> Deref for RankedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RankedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Locks a plain mutex, ignoring poisoning. State guarded this way is only
/// ever updated in single assignments, so a panic elsewhere cannot leave it
/// half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn get_style_fragments() -> Result<indicatif::ProgressStyle, indicatif::style::TemplateError> {
    Ok(indicatif::ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_acquisition() {
        let outer = RankedMutex::new(0, 1);
        let inner = RankedMutex::new(1, 2);

        let a = outer.lock();
        let b = inner.lock();
        assert_eq!(*a + *b, 3);
        drop(b);
        drop(a);

        // Dropping everything resets the hierarchy.
        let _b = inner.lock();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock order violation")]
    fn test_inverted_acquisition() {
        let outer = RankedMutex::new(0, ());
        let inner = RankedMutex::new(1, ());

        let _b = inner.lock();
        let _a = outer.lock();
    }
}
