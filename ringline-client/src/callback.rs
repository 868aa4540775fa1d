//! Single-shot completion callbacks.

use std::fmt;
use std::task::Waker;

use crate::error::ClientError;

type Handler<T> = Box<dyn FnOnce(Result<T, ClientError>)>;

/// A completion handler invoked exactly once with the outcome of an operation.
///
/// `complete` consumes the callback. A callback dropped without being
/// completed (for example when the connection it was queued on goes away)
/// is invoked with [`ClientError::ConnectionClosed`], so every submitted
/// callback observes exactly one outcome.
pub struct Callback<T> {
    handler: Option<Handler<T>>,
}

impl<T> Callback<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<T, ClientError>) + 'static,
    {
        Self {
            handler: Some(Box::new(f)),
        }
    }

    /// Build a callback from separate success and failure handlers.
    pub fn from_parts<S, E>(on_success: S, on_failure: E) -> Self
    where
        S: FnOnce(T) + 'static,
        E: FnOnce(ClientError) + 'static,
        T: 'static,
    {
        Self::new(move |result| match result {
            Ok(value) => on_success(value),
            Err(err) => on_failure(err),
        })
    }

    /// A callback that ignores its outcome.
    pub fn noop() -> Self
    where
        T: 'static,
    {
        Self::new(|_| {})
    }

    pub fn complete(mut self, result: Result<T, ClientError>) {
        if let Some(handler) = self.handler.take() {
            handler(result);
        }
    }

    /// Drop without invoking. Used when the caller is told synchronously.
    pub(crate) fn disarm(mut self) {
        self.handler = None;
    }
}

impl<T> Drop for Callback<T> {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler(Err(ClientError::ConnectionClosed));
        }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("armed", &self.handler.is_some())
            .finish()
    }
}

/// Whoever is waiting on an outcome: a callback, or a future's waker.
pub(crate) enum Listener<T> {
    Callback(Callback<T>),
    Waker(Waker),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, Callback<u32>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let cb = Callback::new(move |r: Result<u32, ClientError>| {
            sink.borrow_mut().push(match r {
                Ok(v) => format!("ok {v}"),
                Err(e) => format!("err {e}"),
            });
        });
        (log, cb)
    }

    #[test]
    fn complete_invokes_once() {
        let (log, cb) = recorder();
        cb.complete(Ok(7));
        assert_eq!(*log.borrow(), vec!["ok 7".to_string()]);
    }

    #[test]
    fn drop_reports_connection_closed() {
        let (log, cb) = recorder();
        drop(cb);
        assert_eq!(*log.borrow(), vec!["err connection closed".to_string()]);
    }

    #[test]
    fn disarm_is_silent() {
        let (log, cb) = recorder();
        cb.disarm();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn from_parts_routes_outcome() {
        let hits = Rc::new(RefCell::new((0, 0)));
        let (a, b) = (hits.clone(), hits.clone());
        let cb: Callback<u8> = Callback::from_parts(
            move |_| a.borrow_mut().0 += 1,
            move |_| b.borrow_mut().1 += 1,
        );
        cb.complete(Err(ClientError::ConnectionUpgraded));
        assert_eq!(*hits.borrow(), (0, 1));
    }
}
