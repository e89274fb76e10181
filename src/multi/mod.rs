//! The I/O multiplexer: many transfers, one poll loop, one thread.
//!
//! A [`Multi`] owns a registry of transfers and a `mio::Poll`. `perform`
//! runs the whole poll/dispatch loop on the calling thread: refresh the
//! descriptor-interest set from the registry, poll with a short bounded
//! timeout, step every ready exchange, dispatch completions, repeat until
//! the registry is empty. No worker threads are spawned; suspension only
//! happens inside the bounded poll wait.

use mio::{Events, Poll, Token};
use std::io;
use std::time::Duration;

use crate::base::MultiError;
use crate::http::exchange::{Exchange, StepOutcome};
use crate::transfer::{Transfer, TransferSink};

mod registry;
pub mod batch;

use registry::Registry;

pub use batch::{get, post, PostSpec};

/// Bounded poll wait. Short enough that the idle hook and liveness checks
/// run regularly even with no socket activity.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

const EVENTS_CAPACITY: usize = 1024;

/// A multiplexer driving many concurrent transfers from one thread.
///
/// Reusable: after `perform` drains the registry, new transfers may be
/// added and performed again. `Multi` (like [`Transfer`]) is deliberately
/// not `Send`; independent instances on separate threads are fine as long
/// as no transfer is shared between them, which double-registration
/// checks and `Rc` ownership both enforce.
pub struct Multi {
    poll: Poll,
    events: Events,
    registry: Registry,
}

impl Multi {
    /// Create an empty multiplexer.
    ///
    /// Fails only if the OS poll context cannot be created (descriptor
    /// exhaustion).
    pub fn new() -> Result<Self, MultiError> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            registry: Registry::new(),
        })
    }

    /// Register a transfer; its socket joins the next poll cycle.
    ///
    /// Fails with [`MultiError::AlreadyRegistered`] if the transfer is
    /// currently registered with any multiplexer.
    pub fn add(&mut self, transfer: &Transfer) -> Result<(), MultiError> {
        self.registry.add(transfer.clone())
    }

    /// Remove a transfer without firing its callbacks. Idempotent.
    pub fn remove(&mut self, transfer: &Transfer) {
        self.registry.remove(transfer);
    }

    /// Drop every transfer without firing callbacks. After this returns
    /// the registry is empty and no further events reach the dropped
    /// transfers; their sockets close with their entries. Safe when empty.
    pub fn cancel_all(&mut self) {
        if !self.registry.is_idle() {
            tracing::debug!(count = self.registry.len(), "canceling all transfers");
        }
        self.registry.cancel_all();
    }

    /// True iff no transfers are registered.
    pub fn is_idle(&self) -> bool {
        self.registry.is_idle()
    }

    /// Snapshot of the registered transfers, registration order.
    pub fn list_active(&self) -> Vec<Transfer> {
        self.registry.list()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_idle()
    }

    /// Drive every registered transfer to completion.
    ///
    /// Returns when the registry is empty. Individual transfer failures
    /// are reported through each transfer's `on_failure` and never abort
    /// the loop; an error here means the multiplexing mechanism itself
    /// failed.
    pub fn perform(&mut self) -> Result<(), MultiError> {
        self.drive(None)
    }

    /// Like [`perform`](Multi::perform), with a cooperative yield hook
    /// invoked at most once per poll iteration that saw no socket
    /// activity. Never invoked when the registry is empty at call start.
    pub fn perform_with_idle<F: FnMut()>(&mut self, mut idle: F) -> Result<(), MultiError> {
        self.drive(Some(&mut idle))
    }

    fn drive(&mut self, mut idle: Option<&mut dyn FnMut()>) -> Result<(), MultiError> {
        if self.registry.is_idle() {
            return Ok(());
        }
        tracing::debug!(count = self.registry.len(), "perform starting");

        loop {
            self.start_pending();
            self.dispatch_completed();
            if self.registry.is_idle() {
                tracing::debug!("perform complete");
                return Ok(());
            }

            self.refresh_interest()?;

            if let Err(e) = self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            if self.events.is_empty() {
                tracing::trace!("poll iteration saw no activity");
                if let Some(hook) = idle.as_mut() {
                    (**hook)();
                }
                continue;
            }

            let ready: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in ready {
                self.step_ready(token);
            }
            self.dispatch_completed();
        }
    }

    /// Start exchanges for freshly added transfers. A start error (bad
    /// URL, resolve failure) is terminal without the descriptor ever
    /// joining the interest set.
    fn start_pending(&mut self) {
        for entry in self.registry.iter_mut() {
            if entry.started {
                continue;
            }
            entry.started = true;
            let mut exchange = Box::new(entry.transfer.make_exchange());
            match exchange.start() {
                Ok(()) => entry.exchange = Some(exchange),
                Err(e) => entry.outcome = Some(Err(e)),
            }
        }
    }

    /// Keep the poll's interest set in sync with what each exchange
    /// currently needs.
    fn refresh_interest(&mut self) -> Result<(), MultiError> {
        let poll_registry = self.poll.registry();
        for entry in self.registry.iter_mut() {
            if entry.outcome.is_some() {
                continue;
            }
            let Some(exchange) = entry.exchange.as_mut() else {
                continue;
            };
            let Some((stream, interest)) = exchange.readiness() else {
                continue;
            };
            match entry.registered {
                None => {
                    poll_registry.register(stream, entry.token, interest)?;
                    entry.registered = Some(interest);
                }
                Some(current) if current != interest => {
                    poll_registry.reregister(stream, entry.token, interest)?;
                    entry.registered = Some(interest);
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Advance one ready exchange as far as its socket allows. Entries
    /// already terminal this iteration are skipped, so a transfer that
    /// completed earlier in the batch is never revisited.
    fn step_ready(&mut self, token: Token) {
        let Some(entry) = self.registry.by_token(token) else {
            return;
        };
        if entry.outcome.is_some() {
            return;
        }
        let Some(exchange) = entry.exchange.as_mut() else {
            return;
        };
        let mut sink = TransferSink::new(entry.transfer.clone());
        match exchange.step(&mut sink) {
            StepOutcome::Blocked => {}
            StepOutcome::Success(code) => entry.outcome = Some(Ok(code)),
            StepOutcome::Failure(e) => entry.outcome = Some(Err(e)),
        }
    }

    /// Dispatch queued completions: exactly one of success/failure per
    /// transfer, fired while the transfer is still a registry member,
    /// then remove it.
    fn dispatch_completed(&mut self) {
        while let Some(pos) = self.registry.first_completed() {
            let (transfer, outcome) = {
                let entry = self.registry.entry_at(pos);
                // Dropping the exchange closes the socket; any events
                // still in flight for it are discarded by token lookup.
                entry.exchange = None;
                (entry.transfer.clone(), entry.outcome.take())
            };
            match outcome {
                Some(Ok(code)) => {
                    tracing::debug!(id = transfer.id(), code, "transfer succeeded");
                    transfer.complete_success(code);
                }
                Some(Err(e)) => {
                    tracing::debug!(id = transfer.id(), error = %e, "transfer failed");
                    transfer.complete_failure(e);
                }
                None => {}
            }
            self.registry.remove_at(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferState;

    #[test]
    fn test_fresh_multi_is_idle() {
        let m = Multi::new().unwrap();
        assert!(m.is_idle());
        assert!(m.list_active().is_empty());
    }

    #[test]
    fn test_add_makes_non_idle() {
        let mut m = Multi::new().unwrap();
        let t = Transfer::new("http://example.com/");
        m.add(&t).unwrap();
        assert!(!m.is_idle());
        assert_eq!(m.len(), 1);
        assert_eq!(t.state(), TransferState::Registered);
    }

    #[test]
    fn test_perform_on_empty_returns_immediately() {
        let mut m = Multi::new().unwrap();
        m.perform().unwrap();
    }

    #[test]
    fn test_idle_hook_not_invoked_when_empty_at_start() {
        let mut m = Multi::new().unwrap();
        let mut calls = 0;
        m.perform_with_idle(|| calls += 1).unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_double_add_across_multis_fails() {
        let mut a = Multi::new().unwrap();
        let mut b = Multi::new().unwrap();
        let t = Transfer::new("http://example.com/");
        a.add(&t).unwrap();
        assert!(matches!(b.add(&t), Err(MultiError::AlreadyRegistered)));
    }

    #[test]
    fn test_cancel_all_leaves_empty_without_callbacks() {
        let mut m = Multi::new().unwrap();
        m.cancel_all();

        let transfers: Vec<_> = (0..10)
            .map(|i| Transfer::new(format!("http://example.com/{i}")))
            .collect();
        for t in &transfers {
            m.add(t).unwrap();
        }
        m.cancel_all();
        assert!(m.is_idle());
        assert!(m.list_active().is_empty());
        for t in &transfers {
            assert_eq!(t.state(), TransferState::Unregistered);
            assert!(t.response_code().is_none());
            assert!(t.error().is_none());
        }
    }

    #[test]
    fn test_remove_then_readd() {
        let mut m = Multi::new().unwrap();
        let t = Transfer::new("http://example.com/");
        m.add(&t).unwrap();
        m.remove(&t);
        assert!(m.is_idle());
        m.add(&t).unwrap();
        assert_eq!(m.len(), 1);
    }
}
