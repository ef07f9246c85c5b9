//! Shared devnet transaction pool.
//!
//! One pool serves every in-process node: leaders select pending
//! transactions from it, and verifiers fetch proposal transactions from it
//! by code. Transactions stay fetchable after inclusion so a late verifier
//! can still re-execute an older proposal.
//!
//! `DashMap` holds the transactions; a `parking_lot::Mutex` keeps arrival
//! order for selection.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::consensus::error::FetchError;
use crate::consensus::traits::{FetchedTxs, TransactionSource};
use crate::types::{Address, Transaction, TxCode};

#[derive(Default)]
pub struct MemoryTxPool {
    txs: DashMap<TxCode, Transaction>,
    order: Mutex<Vec<TxCode>>,
    /// Code -> height of the block that included it.
    included: DashMap<TxCode, u64>,
    fetch_delay: Option<Duration>,
}

impl MemoryTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool whose fetches take `delay` to answer.
    pub fn with_fetch_delay(delay: Duration) -> Self {
        Self {
            fetch_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Adds a transaction. Resubmitting a known one is a no-op.
    pub fn submit(&self, tx: Transaction) -> TxCode {
        let code = tx.code();
        if self.txs.insert(code, tx).is_none() {
            self.order.lock().push(code);
            trace!(tx = %code.short(), "transaction pooled");
        }
        code
    }

    pub fn get(&self, code: &TxCode) -> Option<Transaction> {
        self.txs.get(code).map(|entry| entry.value().clone())
    }

    /// Transactions for `codes`, in order, or `None` if any is unknown.
    pub fn get_many(&self, codes: &[TxCode]) -> Option<Vec<Transaction>> {
        codes.iter().map(|code| self.get(code)).collect()
    }

    /// Up to `max` not-yet-included transactions in arrival order.
    pub fn pending(&self, max: usize) -> Vec<Transaction> {
        let order = self.order.lock();
        order
            .iter()
            .filter(|code| !self.included.contains_key(*code))
            .filter_map(|code| self.get(code))
            .take(max)
            .collect()
    }

    pub fn mark_included(&self, codes: &[TxCode], height: u64) {
        for code in codes {
            self.included.entry(*code).or_insert(height);
        }
        debug!(height, txs = codes.len(), "transactions marked included");
    }

    pub fn included_at(&self, code: &TxCode) -> Option<u64> {
        self.included.get(code).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.txs.len().saturating_sub(self.included.len())
    }
}

#[async_trait]
impl TransactionSource for MemoryTxPool {
    async fn fetch_by_reference(
        &self,
        codes: &[TxCode],
        seq: u64,
        leader: Address,
    ) -> Result<FetchedTxs, FetchError> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let txs = codes
            .iter()
            .map(|code| self.get(code).ok_or(FetchError::Missing(*code)))
            .collect::<Result<Vec<_>, _>>()?;
        trace!(seq, leader = %leader, txs = txs.len(), "transactions fetched");
        Ok(FetchedTxs { seq, txs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(nonce: u64) -> Transaction {
        Transaction {
            from: Address([1; 20]),
            to: Address([2; 20]),
            amount: 1,
            nonce,
            gas: 21_000,
        }
    }

    #[test]
    fn pending_skips_included_and_keeps_order() {
        let pool = MemoryTxPool::new();
        let codes: Vec<TxCode> = (0..4).map(|n| pool.submit(tx(n))).collect();
        assert_eq!(pool.submit(tx(0)), codes[0], "resubmission");
        assert_eq!(pool.len(), 4);

        pool.mark_included(&codes[..2], 1);
        let pending = pool.pending(10);
        assert_eq!(pending, vec![tx(2), tx(3)]);
        assert_eq!(pool.pending(1), vec![tx(2)]);
        assert_eq!(pool.pending_len(), 2);
        assert_eq!(pool.included_at(&codes[0]), Some(1));
        assert_eq!(pool.get_many(&codes).map(|t| t.len()), Some(4));
    }

    #[tokio::test]
    async fn fetch_tags_sequence_and_reports_missing() {
        let pool = MemoryTxPool::new();
        let code = pool.submit(tx(0));

        let fetched = pool
            .fetch_by_reference(&[code], 7, Address([3; 20]))
            .await
            .expect("fetch");
        assert_eq!(fetched.seq, 7);
        assert_eq!(fetched.txs, vec![tx(0)]);

        let unknown = tx(9).code();
        let err = pool
            .fetch_by_reference(&[code, unknown], 8, Address([3; 20]))
            .await
            .expect_err("missing");
        assert_eq!(err, FetchError::Missing(unknown));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_fetch_waits() {
        let pool = MemoryTxPool::with_fetch_delay(Duration::from_secs(10));
        let code = pool.submit(tx(0));
        let started = tokio::time::Instant::now();
        pool.fetch_by_reference(&[code], 1, Address::ZERO)
            .await
            .expect("fetch");
        assert!(started.elapsed() >= Duration::from_secs(10));
    }
}
