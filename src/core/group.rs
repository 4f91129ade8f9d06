//! JT-009: Bounded fan-out/fan-in for run groups.
//!
//! Items are handed to at most `limit` scoped worker threads in declaration
//! order. The first error raises a shared cancel flag: runs already started
//! finish, runs not yet started never start, and that first error is
//! returned. Results come back in declaration order, whatever the
//! completion order.

use super::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Run `f` over `items` with at most `limit` in flight.
///
/// `None`, `Some(0)` and `Some(1)` run sequentially on the calling thread.
pub fn run_bounded<T, R, F>(items: &[T], limit: Option<usize>, f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> Result<R> + Sync,
{
    let workers = limit.unwrap_or(1).min(items.len());
    if workers <= 1 {
        return items.iter().enumerate().map(|(i, item)| f(i, item)).collect();
    }

    let next = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    let slots: Mutex<Vec<Option<R>>> = Mutex::new(items.iter().map(|_| None).collect());
    let first_error: Mutex<Option<Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(i) else {
                    break;
                };
                // A sibling may have failed between the check and the claim.
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                match f(i, item) {
                    Ok(r) => slots.lock().unwrap_or_else(PoisonError::into_inner)[i] = Some(r),
                    Err(e) => {
                        cancelled.store(true, Ordering::SeqCst);
                        let mut first = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                        if first.is_none() {
                            *first = Some(e);
                        }
                        break;
                    }
                }
            });
        }
    });

    if let Some(e) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
        return Err(e);
    }
    let slots = slots.into_inner().unwrap_or_else(PoisonError::into_inner);
    Ok(slots.into_iter().flatten().collect())
}
