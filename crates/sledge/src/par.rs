//! The work-distribution contract
//!
//! Kernel operations that are pure with respect to the current graph
//! (canonicalising an insert batch, searching rules) go through a
//! [`ParallelMap`]; everything that mutates stays sequential. Cooperative
//! cancellation is checked once per dispatched item, and surfaces as
//! [`Canceled`], which the strategy wrappers convert into a no-change result.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::trace;

/// The cooperative cancellation signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation canceled")]
pub struct Canceled;

#[derive(Debug, Default)]
struct TokenState {
    flag: AtomicBool,
    deadline: Option<Instant>,
}

/// A shared flag, optionally with a deadline, polled at parallel boundaries
#[derive(Debug, Clone, Default)]
#[repr(transparent)]
pub struct CancelToken(Arc<TokenState>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A token that fires on its own once `after` has elapsed
    #[must_use]
    pub fn with_deadline(after: Duration) -> Self {
        Self(Arc::new(TokenState {
            flag: AtomicBool::new(false),
            deadline: Instant::now().checked_add(after),
        }))
    }

    pub fn cancel(&self) { self.0.flag.store(true, Ordering::Relaxed); }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.flag.load(Ordering::Relaxed)
            || self.0.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// # Errors
    /// Returns [`Canceled`] if the token has fired.
    pub fn check(&self) -> Result<(), Canceled> {
        if self.is_canceled() { Err(Canceled) } else { Ok(()) }
    }
}

pub trait ParallelMap: Sized + Sync {
    /// Apply `f` to every item, preserving input order in the output
    ///
    /// # Errors
    /// Returns [`Canceled`] if the installed token fires; items dispatched
    /// before the cancellation may or may not have run.
    fn map<A: Send, B: Send, F: Fn(A) -> B + Send + Sync>(
        &self,
        items: Vec<A>,
        f: F,
    ) -> Result<Vec<B>, Canceled>;

    /// Run a block in this distributor's context
    fn run<B, F: FnOnce() -> B>(&self, f: F) -> B { f() }

    /// A sub-distributor labelled for diagnostics
    #[must_use]
    fn child(&self, label: &str) -> Self;

    /// The same distributor, checking the given token at every boundary
    #[must_use]
    fn cancelable(&self, token: CancelToken) -> Self;

    fn token(&self) -> Option<&CancelToken>;

    /// # Errors
    /// Returns [`Canceled`] if the installed token has fired.
    fn check(&self) -> Result<(), Canceled> { self.token().map_or(Ok(()), CancelToken::check) }
}

/// In-order, single-threaded execution
#[derive(Debug, Clone, Default)]
pub struct Sequential {
    label: String,
    token: Option<CancelToken>,
}

impl Sequential {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

impl ParallelMap for Sequential {
    fn map<A: Send, B: Send, F: Fn(A) -> B + Send + Sync>(
        &self,
        items: Vec<A>,
        f: F,
    ) -> Result<Vec<B>, Canceled> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            self.check()?;
            out.push(f(item));
        }
        Ok(out)
    }

    fn child(&self, label: &str) -> Self {
        trace!(parent = %self.label, label, "sequential child map");
        Self {
            label: format!("{}/{label}", self.label),
            token: self.token.clone(),
        }
    }

    fn cancelable(&self, token: CancelToken) -> Self {
        Self {
            label: self.label.clone(),
            token: Some(token),
        }
    }

    fn token(&self) -> Option<&CancelToken> { self.token.as_ref() }
}

/// Work-stealing execution on the global rayon pool
#[derive(Debug, Clone, Default)]
pub struct Threaded {
    label: String,
    token: Option<CancelToken>,
}

impl Threaded {
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

impl ParallelMap for Threaded {
    fn map<A: Send, B: Send, F: Fn(A) -> B + Send + Sync>(
        &self,
        items: Vec<A>,
        f: F,
    ) -> Result<Vec<B>, Canceled> {
        self.check()?;
        items
            .into_par_iter()
            .map(|item| {
                self.check()?;
                Ok(f(item))
            })
            .collect()
    }

    fn child(&self, label: &str) -> Self {
        trace!(parent = %self.label, label, "threaded child map");
        Self {
            label: format!("{}/{label}", self.label),
            token: self.token.clone(),
        }
    }

    fn cancelable(&self, token: CancelToken) -> Self {
        Self {
            label: self.label.clone(),
            token: Some(token),
        }
    }

    fn token(&self) -> Option<&CancelToken> { self.token.as_ref() }
}

#[cfg(test)]
mod test {
    use super::{CancelToken, Canceled, ParallelMap, Sequential, Threaded};

    #[test]
    fn sequential_preserves_order() {
        let out = Sequential::new().map(vec![1, 2, 3], |x| x * 2).unwrap();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    fn threaded_matches_sequential() {
        let items: Vec<u64> = (0..256).collect();
        let seq = Sequential::new().map(items.clone(), |x| x * x).unwrap();
        let par = Threaded::new().map(items, |x| x * x).unwrap();
        assert_eq!(seq, par);
    }

    #[test]
    fn canceled_token_stops_the_map() {
        let token = CancelToken::new();
        token.cancel();
        let par = Sequential::new().cancelable(token);
        assert_eq!(par.map(vec![1, 2, 3], |x| x), Err(Canceled));
    }

    #[test]
    fn deadline_in_the_past_fires() {
        let token = CancelToken::with_deadline(std::time::Duration::ZERO);
        assert!(token.check().is_err());
    }
}
