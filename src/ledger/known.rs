use crate::ledger::types::TransferId;
use serde::Serialize;
use std::collections::BTreeSet;

/// Transfers the gateway has seen the ledger accept.
///
/// Reconciliation matches statement references against this set, either by
/// end-to-end id or by the transfer id's text form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KnownTransfers {
    transfer_ids: BTreeSet<TransferId>,
    end_to_end_ids: BTreeSet<String>,
}

impl KnownTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: TransferId, end_to_end_id: Option<&str>) {
        self.transfer_ids.insert(id);
        if let Some(e2e) = end_to_end_id.map(str::trim).filter(|s| !s.is_empty()) {
            self.end_to_end_ids.insert(e2e.to_string());
        }
    }

    pub fn contains_transfer(&self, id: TransferId) -> bool {
        self.transfer_ids.contains(&id)
    }

    /// Whether a statement reference names a known transfer.
    pub fn contains_reference(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if self.end_to_end_ids.contains(reference) {
            return true;
        }
        reference
            .parse::<TransferId>()
            .map(|id| self.transfer_ids.contains(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.transfer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfer_ids.is_empty()
    }
}
