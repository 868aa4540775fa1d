use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

/// A notification deferred until the connection's state borrow is released.
pub(crate) type Deferred = Box<dyn FnOnce()>;

/// Per-connection queue of pending notifications.
///
/// Connection code collects notifications while it holds the state borrow,
/// then hands them here. The outermost caller drains the queue; a listener
/// that re-enters the connection only appends, so notifications always run
/// in the order they were produced.
#[derive(Default)]
pub(crate) struct Dispatcher {
    queue: RefCell<VecDeque<Deferred>>,
    draining: Cell<bool>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn extend(&self, pending: Vec<Deferred>) {
        if !pending.is_empty() {
            self.queue.borrow_mut().extend(pending);
        }
    }

    /// Run queued notifications unless an outer frame is already doing so.
    pub(crate) fn drain(&self) {
        if self.draining.replace(true) {
            return;
        }
        loop {
            // The queue borrow ends before the notification runs.
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(f) => f(),
                None => break,
            }
        }
        self.draining.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn runs_in_order() {
        let d = Dispatcher::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pending: Vec<Deferred> = Vec::new();
        for i in 0..3 {
            let log = log.clone();
            pending.push(Box::new(move || log.borrow_mut().push(i)));
        }
        d.extend(pending);
        d.drain();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn reentrant_pushes_run_after_earlier_work() {
        let d = Rc::new(Dispatcher::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let (d2, log1) = (d.clone(), log.clone());
        let first: Deferred = Box::new(move || {
            log1.borrow_mut().push("first");
            let log3 = log1.clone();
            d2.extend(vec![Box::new(move || log3.borrow_mut().push("nested"))]);
            d2.drain();
        });
        let log2 = log.clone();
        let second: Deferred = Box::new(move || log2.borrow_mut().push("second"));

        d.extend(vec![first, second]);
        d.drain();
        assert_eq!(*log.borrow(), vec!["first", "second", "nested"]);
    }
}
