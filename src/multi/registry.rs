//! The live set of transfers owned by one multiplexer.

use mio::{Interest, Token};

use crate::base::{MultiError, TransferError};
use crate::http::exchange::Exchange;
use crate::transfer::Transfer;

/// Bookkeeping for one registered transfer.
pub(crate) struct Entry {
    pub(crate) transfer: Transfer,
    /// The protocol exchange, once started.
    pub(crate) exchange: Option<Box<dyn Exchange>>,
    pub(crate) token: Token,
    /// Interest currently registered with the poll, if any.
    pub(crate) registered: Option<Interest>,
    pub(crate) started: bool,
    /// Terminal outcome awaiting dispatch. A set outcome also marks the
    /// entry dead for the rest of the current event batch.
    pub(crate) outcome: Option<Result<u16, TransferError>>,
}

/// Registration-ordered set of transfers. Owned exclusively by one
/// [`Multi`](crate::multi::Multi); empty exactly when the multiplexer is
/// idle.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
    next_token: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a transfer. Fails if it is registered anywhere already.
    pub(crate) fn add(&mut self, transfer: Transfer) -> Result<(), MultiError> {
        transfer.mark_registered()?;
        let token = Token(self.next_token);
        self.next_token = self.next_token.wrapping_add(1);
        tracing::debug!(id = transfer.id(), token = token.0, "transfer registered");
        self.entries.push(Entry {
            transfer,
            exchange: None,
            token,
            registered: None,
            started: false,
            outcome: None,
        });
        Ok(())
    }

    /// Remove a transfer without callbacks. Idempotent.
    pub(crate) fn remove(&mut self, transfer: &Transfer) {
        if let Some(pos) = self.entries.iter().position(|e| e.transfer == *transfer) {
            let entry = self.entries.remove(pos);
            entry.transfer.mark_unregistered();
            tracing::debug!(id = entry.transfer.id(), "transfer removed");
        }
    }

    /// Remove the entry at `pos` after its completion was dispatched.
    pub(crate) fn remove_at(&mut self, pos: usize) {
        let entry = self.entries.remove(pos);
        entry.transfer.mark_unregistered();
    }

    /// Drop every transfer without firing callbacks. Further events for
    /// them are discarded because their sockets close with the entries.
    pub(crate) fn cancel_all(&mut self) {
        for entry in self.entries.drain(..) {
            entry.transfer.mark_unregistered();
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of the registered transfers, registration order.
    pub(crate) fn list(&self) -> Vec<Transfer> {
        self.entries.iter().map(|e| e.transfer.clone()).collect()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
        self.entries.iter_mut()
    }

    pub(crate) fn by_token(&mut self, token: Token) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.token == token)
    }

    /// Position of the first entry with a pending terminal outcome.
    pub(crate) fn first_completed(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.outcome.is_some())
    }

    pub(crate) fn entry_at(&mut self, pos: usize) -> &mut Entry {
        &mut self.entries[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_list_in_registration_order() {
        let mut reg = Registry::new();
        let a = Transfer::new("http://example.com/a");
        let b = Transfer::new("http://example.com/b");
        reg.add(a.clone()).unwrap();
        reg.add(b.clone()).unwrap();

        let listed = reg.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0], a);
        assert_eq!(listed[1], b);
    }

    #[test]
    fn test_double_add_is_rejected() {
        let mut reg = Registry::new();
        let t = Transfer::new("http://example.com/");
        reg.add(t.clone()).unwrap();
        assert!(matches!(
            reg.add(t.clone()),
            Err(MultiError::AlreadyRegistered)
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_add_rejected_across_registries() {
        let mut one = Registry::new();
        let mut two = Registry::new();
        let t = Transfer::new("http://example.com/");
        one.add(t.clone()).unwrap();
        assert!(two.add(t.clone()).is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut reg = Registry::new();
        let t = Transfer::new("http://example.com/");
        reg.add(t.clone()).unwrap();
        reg.remove(&t);
        reg.remove(&t);
        assert!(reg.is_idle());
        // Removed without completing: may be registered again.
        assert!(reg.add(t).is_ok());
    }

    #[test]
    fn test_cancel_all_empty_is_noop() {
        let mut reg = Registry::new();
        reg.cancel_all();
        assert!(reg.is_idle());
    }

    #[test]
    fn test_cancel_all_releases_transfers() {
        let mut reg = Registry::new();
        let transfers: Vec<_> = (0..10)
            .map(|i| Transfer::new(format!("http://example.com/{i}")))
            .collect();
        for t in &transfers {
            reg.add(t.clone()).unwrap();
        }
        reg.cancel_all();
        assert!(reg.is_idle());
        for t in &transfers {
            assert_eq!(t.state(), crate::transfer::TransferState::Unregistered);
        }
    }

    #[test]
    fn test_tokens_are_unique() {
        let mut reg = Registry::new();
        let a = Transfer::new("http://example.com/a");
        let b = Transfer::new("http://example.com/b");
        reg.add(a.clone()).unwrap();
        reg.remove(&a);
        reg.add(b).unwrap();
        // The token of a removed entry is never reused for a live one.
        assert_eq!(reg.list().len(), 1);
    }
}
