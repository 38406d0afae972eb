//! Lazy, cancellable iteration over line-delimited stores
//!
//! A [`ForEach`] producer takes a [`CancelToken`] and yields `Result<T, ScanError>`
//! pairs. Two combinators sit on top of it:
//!
//! - [`select`] lazily forwards the items matching a predicate
//! - [`detect`] returns the first matching item and stops the scan
//!
//! Errors come in two kinds. A malformed record ([`ScanError::Malformed`]) is
//! local to one line: `select` surfaces it and keeps going, `detect` skips it.
//! I/O and predicate failures are fatal and end the whole pipeline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Scan errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("malformed record at {path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("predicate failed: {0}")]
    Predicate(String),
}

impl ScanError {
    /// Whether this error ends the scan
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScanError::Malformed { .. })
    }
}

/// Cooperative cancellation signal shared between a scan and its consumers
///
/// Producers check the token before each item; cancelling never interrupts a
/// read already in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this token to stop
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A cancellable producer of scan items
///
/// Implemented for any `FnOnce(CancelToken) -> Result<I, ScanError>` so a
/// store method can be passed directly: `select(|c| file.all(c), ...)`.
pub trait ForEach {
    type Item;
    type Iter: Iterator<Item = Result<Self::Item, ScanError>>;

    /// Start producing; fails when the source cannot be opened
    fn start(self, cancel: CancelToken) -> Result<Self::Iter, ScanError>;
}

impl<F, I, T> ForEach for F
where
    F: FnOnce(CancelToken) -> Result<I, ScanError>,
    I: Iterator<Item = Result<T, ScanError>>,
{
    type Item = T;
    type Iter = I;

    fn start(self, cancel: CancelToken) -> Result<I, ScanError> {
        self(cancel)
    }
}

/// Lazily select the items satisfying `predicate`
///
/// Malformed records are forwarded as errors without stopping. The first
/// fatal error (I/O or predicate) is forwarded and then the scan is cancelled.
pub fn select<S, P>(for_each: S, predicate: P) -> Result<Select<S::Iter, P>, ScanError>
where
    S: ForEach,
    P: FnMut(&S::Item) -> Result<bool, ScanError>,
{
    let cancel = CancelToken::new();
    let inner = for_each.start(cancel.clone())?;
    Ok(Select {
        inner,
        predicate,
        cancel,
        done: false,
    })
}

/// Iterator returned by [`select`]
pub struct Select<I, P> {
    inner: I,
    predicate: P,
    cancel: CancelToken,
    done: bool,
}

impl<I, P> Select<I, P> {
    fn stop(&mut self) {
        self.done = true;
        self.cancel.cancel();
    }
}

impl<I, P, T> Iterator for Select<I, P>
where
    I: Iterator<Item = Result<T, ScanError>>,
    P: FnMut(&T) -> Result<bool, ScanError>,
{
    type Item = Result<T, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.inner.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Ok(item)) => match (self.predicate)(&item) {
                    Ok(true) => return Some(Ok(item)),
                    Ok(false) => continue,
                    Err(e) => {
                        self.stop();
                        return Some(Err(e));
                    }
                },
                Some(Err(e)) => {
                    if e.is_fatal() {
                        self.stop();
                    }
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<I, P> Drop for Select<I, P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Find the first item satisfying `predicate`
///
/// Malformed records are skipped. Returns `Ok(None)` when the source is
/// exhausted without a match.
pub fn detect<S, P>(for_each: S, mut predicate: P) -> Result<Option<S::Item>, ScanError>
where
    S: ForEach,
    P: FnMut(&S::Item) -> Result<bool, ScanError>,
{
    let cancel = CancelToken::new();
    let items = for_each.start(cancel.clone())?;

    let mut detected = None;
    for item in items {
        match item {
            Ok(item) => match predicate(&item) {
                Ok(true) => {
                    detected = Some(item);
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            },
            Err(e) if e.is_fatal() => {
                cancel.cancel();
                return Err(e);
            }
            Err(_) => {}
        }
    }

    cancel.cancel();
    Ok(detected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn malformed(line: usize) -> ScanError {
        ScanError::Malformed {
            path: PathBuf::from("test.log"),
            line,
            reason: "bad".to_string(),
        }
    }

    /// Producer over a fixed list that honors cancellation and counts pulls
    fn source(
        items: Vec<Result<u32, ScanError>>,
        pulled: Rc<Cell<usize>>,
    ) -> impl FnOnce(CancelToken) -> Result<Box<dyn Iterator<Item = Result<u32, ScanError>>>, ScanError>
    {
        move |cancel: CancelToken| {
            let iter = items.into_iter().take_while(move |_| {
                pulled.set(pulled.get() + 1);
                !cancel.is_cancelled()
            });
            Ok(Box::new(iter) as Box<dyn Iterator<Item = _>>)
        }
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_select_filters_lazily() {
        let pulled = Rc::new(Cell::new(0));
        let mut selected = select(
            source(vec![Ok(1), Ok(2), Ok(3), Ok(4)], pulled.clone()),
            |n: &u32| Ok(n % 2 == 0),
        )
        .unwrap();

        assert_eq!(selected.next().unwrap().unwrap(), 2);
        assert_eq!(pulled.get(), 2);
        assert_eq!(selected.next().unwrap().unwrap(), 4);
        assert!(selected.next().is_none());
    }

    #[test]
    fn test_select_surfaces_malformed_and_continues() {
        let pulled = Rc::new(Cell::new(0));
        let results: Vec<_> = select(
            source(vec![Ok(1), Err(malformed(2)), Ok(3)], pulled),
            |_: &u32| Ok(true),
        )
        .unwrap()
        .collect();

        assert_eq!(results.len(), 3);
        assert!(matches!(results[1], Err(ScanError::Malformed { line: 2, .. })));
        assert_eq!(*results[2].as_ref().unwrap(), 3);
    }

    #[test]
    fn test_select_stops_on_predicate_error() {
        let pulled = Rc::new(Cell::new(0));
        let results: Vec<_> = select(source(vec![Ok(1), Ok(2), Ok(3)], pulled), |n: &u32| {
            if *n == 2 {
                Err(ScanError::Predicate("two".to_string()))
            } else {
                Ok(true)
            }
        })
        .unwrap()
        .collect();

        assert_eq!(results.len(), 2);
        assert!(matches!(results[1], Err(ScanError::Predicate(_))));
    }

    #[test]
    fn test_select_stops_on_io_error() {
        let pulled = Rc::new(Cell::new(0));
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let results: Vec<_> = select(
            source(vec![Ok(1), Err(ScanError::Io(io)), Ok(3)], pulled),
            |_: &u32| Ok(true),
        )
        .unwrap()
        .collect();

        assert_eq!(results.len(), 2);
        assert!(results[1].as_ref().unwrap_err().is_fatal());
    }

    #[test]
    fn test_detect_short_circuits() {
        let pulled = Rc::new(Cell::new(0));
        let found = detect(
            source(vec![Ok(1), Ok(2), Ok(3), Ok(4)], pulled.clone()),
            |n: &u32| Ok(*n == 2),
        )
        .unwrap();

        assert_eq!(found, Some(2));
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn test_detect_skips_malformed_and_reports_none() {
        let pulled = Rc::new(Cell::new(0));
        let found = detect(
            source(vec![Err(malformed(1)), Ok(1)], pulled),
            |n: &u32| Ok(*n == 9),
        )
        .unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_open_failure_propagates() {
        let failing = |_cancel: CancelToken| -> Result<std::vec::IntoIter<Result<u32, ScanError>>, ScanError> {
            Err(ScanError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "nope",
            )))
        };
        assert!(detect(failing, |_: &u32| Ok(true)).is_err());
    }
}
