//! # cancellable_loops
//!
//! Loops that stop early once an abort flag is set, used by the long-running steps of the
//! deconvolution (per pixel iterations and spatial deconvolution).
//!
//! ## Features
//!
//! - Sequential loop with cancellation support
//! - Sequential loop that may additionally stop on its own (e.g. on convergence)
//! - Sequential loop reporting its progress
//! - Parallel loop with cancellation support using Rayon
//! - Parallel map that returns nothing when it was cancelled
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use cancellable_loops::{for_each_cancellable_while, LoopOutcome};
//!
//! let abort_flag = AtomicBool::new(false);
//! let mut residual = 1.0_f32;
//!
//! // iterate until converged, unless somebody aborts
//! let outcome = for_each_cancellable_while(0..100, &abort_flag, |_| {
//!     residual *= 0.5;
//!     residual > 1e-3
//! });
//!
//! assert_eq!(outcome, LoopOutcome::Stopped);
//! ```

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a loop with an early exit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// All items were processed.
    Completed,
    /// The loop body asked to stop.
    Stopped,
    /// The abort flag was set.
    Aborted,
}

/// Executes a sequential loop that can be cancelled via an abort flag.
///
/// # Arguments
///
/// * `iter` - Any iterator to process
/// * `abort_flag` - An atomic boolean that can be set to `true` to cancel the loop
/// * `func` - A function to apply to each element in the iterator
///
/// Returns `false` if the loop was cancelled.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use cancellable_loops::for_each_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let mut sum = 0;
///
/// let completed = for_each_cancellable(1..=10, &abort_flag, |i| {
///     sum += i;
///     if sum > 15 {
///         abort_flag.store(true, Ordering::Relaxed);
///     }
/// });
///
/// // cancelled after processing 1+2+3+4+5+6
/// assert!(!completed);
/// assert_eq!(sum, 21);
/// ```
pub fn for_each_cancellable<I, F, T>(iter: I, abort_flag: &AtomicBool, mut func: F) -> bool
where
    I: IntoIterator<Item = T>,
    F: FnMut(T),
{
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            return false;
        }
        func(item);
    }
    true
}

/// Executes a sequential loop as long as `func` returns `true` and the abort flag is not set.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use cancellable_loops::{for_each_cancellable_while, LoopOutcome};
///
/// let abort_flag = AtomicBool::new(false);
/// let mut seen = vec![];
/// let outcome = for_each_cancellable_while(0..10, &abort_flag, |i| {
///     seen.push(i);
///     i < 3
/// });
/// assert_eq!(outcome, LoopOutcome::Stopped);
/// assert_eq!(seen, vec![0, 1, 2, 3]);
/// ```
pub fn for_each_cancellable_while<I, F, T>(
    iter: I,
    abort_flag: &AtomicBool,
    mut func: F,
) -> LoopOutcome
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> bool,
{
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            return LoopOutcome::Aborted;
        }
        if !func(item) {
            return LoopOutcome::Stopped;
        }
    }
    LoopOutcome::Completed
}

/// Like [`for_each_cancellable`], reporting the fraction of processed items after each one.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use cancellable_loops::for_each_cancellable_with_progress;
///
/// let abort_flag = AtomicBool::new(false);
/// let mut progress = vec![];
/// let completed =
///     for_each_cancellable_with_progress(0..4, &abort_flag, |p| progress.push(p), |_| {});
/// assert!(completed);
/// assert_eq!(progress, vec![0.25, 0.5, 0.75, 1.0]);
/// ```
pub fn for_each_cancellable_with_progress<I, F, P, T>(
    iter: I,
    abort_flag: &AtomicBool,
    mut on_progress: P,
    mut func: F,
) -> bool
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
    F: FnMut(T),
    P: FnMut(f32),
{
    let iter = iter.into_iter();
    let total = iter.len().max(1) as f32;
    for (i, item) in iter.enumerate() {
        if abort_flag.load(Ordering::Relaxed) {
            return false;
        }
        func(item);
        on_progress((i + 1) as f32 / total);
    }
    true
}

/// Executes a parallel loop that can be cancelled via an abort flag.
///
/// Items that were not started when the flag was set are skipped.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
/// use cancellable_loops::par_for_each_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let counter = AtomicUsize::new(0);
///
/// par_for_each_cancellable(0..100, &abort_flag, |_| {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
///
/// assert_eq!(counter.load(Ordering::Relaxed), 100);
/// ```
pub fn par_for_each_cancellable<I, F>(iter: I, abort_flag: &AtomicBool, func: F)
where
    I: IntoParallelIterator,
    F: Fn(I::Item) + Sync + Send,
    I::Item: Send,
{
    iter.into_par_iter()
        .try_for_each(|item| {
            if abort_flag.load(Ordering::Relaxed) {
                Err(())
            } else {
                func(item);
                Ok(())
            }
        })
        .ok();
}

/// Maps all items in parallel, keeping their order.
///
/// Returns `None` if the abort flag was set before all items were processed.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use cancellable_loops::par_map_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let squares = par_map_cancellable(0..5_u32, &abort_flag, |i| i * i);
/// assert_eq!(squares, Some(vec![0, 1, 4, 9, 16]));
///
/// abort_flag.store(true, Ordering::Relaxed);
/// assert_eq!(par_map_cancellable(0..5_u32, &abort_flag, |i| i * i), None);
/// ```
pub fn par_map_cancellable<I, F, R>(iter: I, abort_flag: &AtomicBool, func: F) -> Option<Vec<R>>
where
    I: IntoParallelIterator,
    F: Fn(I::Item) -> R + Sync + Send,
    I::Item: Send,
    R: Send,
{
    iter.into_par_iter()
        .map(|item| {
            if abort_flag.load(Ordering::Relaxed) {
                None
            } else {
                Some(func(item))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_each_cancellable_stops_immediately_when_aborted() {
        let abort_flag = AtomicBool::new(true);
        let mut count = 0;
        assert!(!for_each_cancellable(0..10, &abort_flag, |_| count += 1));
        assert_eq!(count, 0);
    }

    #[test]
    fn test_for_each_cancellable_while_completes() {
        let abort_flag = AtomicBool::new(false);
        let outcome = for_each_cancellable_while(0..5, &abort_flag, |_| true);
        assert_eq!(outcome, LoopOutcome::Completed);
    }

    #[test]
    fn test_for_each_cancellable_while_aborts() {
        let abort_flag = AtomicBool::new(false);
        let outcome = for_each_cancellable_while(0..5, &abort_flag, |i| {
            if i == 2 {
                abort_flag.store(true, Ordering::Relaxed);
            }
            true
        });
        assert_eq!(outcome, LoopOutcome::Aborted);
    }

    #[test]
    fn test_progress_stops_on_abort() {
        let abort_flag = AtomicBool::new(false);
        let mut last = 0.0;
        let completed = for_each_cancellable_with_progress(
            0..10,
            &abort_flag,
            |p| last = p,
            |i| {
                if i == 4 {
                    abort_flag.store(true, Ordering::Relaxed);
                }
            },
        );
        assert!(!completed);
        assert_eq!(last, 0.5);
    }

    #[test]
    fn test_par_map_keeps_order() {
        let abort_flag = AtomicBool::new(false);
        let values = par_map_cancellable(0..1000_usize, &abort_flag, |i| 2 * i);
        assert_eq!(values, Some((0..1000).map(|i| 2 * i).collect::<Vec<_>>()));
    }
}
