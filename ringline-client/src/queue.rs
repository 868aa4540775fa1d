//! Request queue and pipeliner.
//!
//! Submitted requests wait in a FIFO until the pipeliner admits them. An
//! admitted request becomes an in-flight exchange; in-flight exchanges are
//! matched to responses strictly in admission order.

use std::collections::VecDeque;

use crate::callback::Callback;
use crate::codec::{Codec, WriteProgress};
use crate::exchange::{Exchange, ExchangeId, ExchangeRef};

/// A submitted request waiting for admission.
pub(crate) struct Pending<C: Codec> {
    pub(crate) id: ExchangeId,
    pub(crate) request: C::Request,
    pub(crate) callback: Callback<Exchange<C>>,
}

/// Connection-level inputs to the admission decision.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Admission {
    pub(crate) pipelining: bool,
    pub(crate) max_depth: usize,
    /// Total bytes written to the transport so far.
    pub(crate) flushed: u64,
}

pub(crate) struct Pipeline<C: Codec> {
    queued: VecDeque<Pending<C>>,
    in_flight: VecDeque<ExchangeRef<C>>,
}

impl<C: Codec> Pipeline<C> {
    pub(crate) fn new() -> Self {
        Self {
            queued: VecDeque::new(),
            in_flight: VecDeque::new(),
        }
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn push(&mut self, pending: Pending<C>) {
        self.queued.push_back(pending);
    }

    /// True if the queue head may be admitted now.
    ///
    /// The head waits while an earlier request is still writing its head,
    /// while the codec's framing forbids starting a request behind the
    /// previous one, while any exchange awaits its response and pipelining
    /// is off, while the pipeline is at depth, and while an upgrade request
    /// is unanswered. An upgrade request itself waits for an empty pipeline.
    pub(crate) fn can_admit(&self, codec: &C, policy: Admission) -> bool {
        let Some(next) = self.queued.front() else {
            return false;
        };
        if let Some(last) = self.in_flight.back() {
            let progress = last.borrow().write_progress(policy.flushed);
            if progress == WriteProgress::HeadPending || !codec.can_begin(progress) {
                return false;
            }
        }
        if self.in_flight.len() >= policy.max_depth {
            return false;
        }
        if !policy.pipelining && self.in_flight.iter().any(|ex| !ex.borrow().read_complete) {
            return false;
        }
        if self.in_flight.iter().any(|ex| {
            let ex = ex.borrow();
            ex.upgrade && !ex.head_received
        }) {
            return false;
        }
        if codec.is_upgrade_request(&next.request) && !self.in_flight.is_empty() {
            return false;
        }
        true
    }

    pub(crate) fn pop_queued(&mut self) -> Option<Pending<C>> {
        self.queued.pop_front()
    }

    pub(crate) fn admit(&mut self, exchange: ExchangeRef<C>) {
        self.in_flight.push_back(exchange);
    }

    /// The oldest exchange still reading its response.
    pub(crate) fn reading(&self) -> Option<ExchangeRef<C>> {
        self.in_flight
            .iter()
            .find(|ex| !ex.borrow().read_complete)
            .cloned()
    }

    /// Drop exchanges that finished both directions. Returns how many.
    pub(crate) fn retire(&mut self) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|ex| !ex.borrow().is_complete());
        before - self.in_flight.len()
    }

    pub(crate) fn take_queued(&mut self) -> VecDeque<Pending<C>> {
        std::mem::take(&mut self.queued)
    }

    pub(crate) fn take_in_flight(&mut self) -> VecDeque<ExchangeRef<C>> {
        std::mem::take(&mut self.in_flight)
    }
}
