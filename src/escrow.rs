//! Escrow state machine helpers
//!
//! Pure functions over the ledger snapshot: funding acceptance with
//! fee-slippage tolerance, platform fee math, materialization of a
//! funded pending escrow into a live task, and refund-source location.
//! The task manager drives these under its write-lock scope.

use uuid::Uuid;

use crate::models::{Escrow, EscrowStatus, PendingEscrow, Task, TransactionType};
use crate::store::LedgerSnapshot;

/// Allowed funding shortfall in basis points, absorbing network-fee slippage
pub const FUNDING_TOLERANCE_BPS: u64 = 100;

/// Accept funding when the observed balance covers the expected amount
/// minus the tolerance.
pub fn funding_accepted(expected: u64, observed: u64) -> bool {
    let tolerance = (expected as u128 * FUNDING_TOLERANCE_BPS as u128 / 10_000) as u64;
    observed >= expected.saturating_sub(tolerance)
}

/// Platform fee for an escrow amount, in minor units
pub fn platform_fee(amount: u64, fee_bps: u64) -> u64 {
    (amount as u128 * fee_bps as u128 / 10_000) as u64
}

/// What triggered a refund; maps to the transaction type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundTrigger {
    /// Client deleted the task
    Manual,
    /// Expiry sweep
    Expired,
    /// Any other caller
    Generic,
}

impl RefundTrigger {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Self::Manual => TransactionType::RefundManual,
            Self::Expired => TransactionType::RefundExpired,
            Self::Generic => TransactionType::Refund,
        }
    }
}

/// The record a refund will consume, removed from its set by the caller
#[derive(Debug, Clone)]
pub enum RefundSource {
    Funded(Escrow),
    Pending(PendingEscrow),
}

impl RefundSource {
    pub fn amount(&self) -> u64 {
        match self {
            Self::Funded(e) => e.amount,
            Self::Pending(p) => p.amount,
        }
    }

    pub fn currency(&self) -> crate::models::Currency {
        match self {
            Self::Funded(e) => e.currency,
            Self::Pending(p) => p.currency,
        }
    }

    pub fn escrow_address(&self) -> &str {
        match self {
            Self::Funded(e) => &e.escrow_address,
            Self::Pending(p) => &p.escrow_address,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            Self::Funded(e) => &e.client_id,
            Self::Pending(p) => &p.client_id,
        }
    }
}

/// Locate and remove the refund source for a task: the funded escrow set
/// is checked by task id first, then the pending set by task id or
/// client id. Pending records carry a required client id from creation,
/// so lookups never match on embedded task data. Returns `None` when
/// there is nothing to refund.
pub fn take_refund_source(
    work: &mut LedgerSnapshot,
    task_id: Uuid,
    client_id: &str,
) -> Option<RefundSource> {
    if let Some(pos) = work.escrows.iter().position(|e| e.task_id == task_id) {
        return Some(RefundSource::Funded(work.escrows.remove(pos)));
    }

    if let Some(pos) = work
        .pending_escrows
        .iter()
        .position(|p| p.task_id == Some(task_id) || p.client_id == client_id)
    {
        return Some(RefundSource::Pending(work.pending_escrows.remove(pos)));
    }

    None
}

/// Turn a funded pending escrow into a live open task plus a durable
/// escrow record. The pending record must already be removed from its
/// set; this only builds the replacement records.
pub fn materialize(pending: &PendingEscrow, fee_bps: u64) -> (Task, Escrow) {
    let task = Task::from_draft(&pending.task_data, &pending.client_id, pending.escrow_id);
    let fee = platform_fee(pending.amount, fee_bps);
    let escrow = Escrow {
        escrow_id: pending.escrow_id,
        task_id: task.id,
        escrow_address: pending.escrow_address.clone(),
        client_id: pending.client_id.clone(),
        amount: pending.amount,
        currency: pending.currency,
        status: EscrowStatus::Funded,
        fee,
        net_amount: pending.amount - fee,
        created_at: pending.created_at,
        funded_at: pending.funded_at.unwrap_or(task.created_at),
    };
    (task, escrow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Currency, Money, TaskDraft, TaskStatus};
    use chrono::Utc;

    #[test]
    fn test_funding_tolerance_absorbs_one_percent() {
        assert!(funding_accepted(10_000, 10_000));
        assert!(funding_accepted(10_000, 9_900));
        assert!(!funding_accepted(10_000, 9_899));
        // Tiny amounts where the tolerance rounds to zero require the full amount
        assert!(funding_accepted(50, 50));
        assert!(!funding_accepted(50, 49));
    }

    #[test]
    fn test_platform_fee_math() {
        assert_eq!(platform_fee(10_000, 250), 250);
        assert_eq!(platform_fee(0, 250), 0);
        assert_eq!(platform_fee(u64::MAX, 0), 0);
    }

    fn pending(client_id: &str) -> PendingEscrow {
        let deadline = Utc::now() + chrono::Duration::days(3);
        PendingEscrow {
            escrow_id: Uuid::new_v4(),
            escrow_address: "esc-addr".to_string(),
            encrypted_secret: "sealed".to_string(),
            client_id: client_id.to_string(),
            task_id: None,
            amount: 1_000_000,
            currency: Currency::Sol,
            status: EscrowStatus::Funded,
            task_data: TaskDraft {
                title: "Write docs".to_string(),
                description: "API reference".to_string(),
                reward: Money::new(1_000_000, Currency::Sol),
                deadline,
            },
            created_at: Utc::now(),
            funded_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_materialize_links_task_and_escrow() {
        let pending = pending("client-7");
        let (task, escrow) = materialize(&pending, 250);

        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.escrow_id, Some(pending.escrow_id));
        assert_eq!(escrow.task_id, task.id);
        assert_eq!(escrow.fee, 25_000);
        assert_eq!(escrow.net_amount, 975_000);
        assert_eq!(escrow.status, EscrowStatus::Funded);
    }

    #[test]
    fn test_refund_source_prefers_funded_escrow() {
        let mut work = LedgerSnapshot::default();
        let p = pending("client-7");
        let (task, escrow) = materialize(&p, 0);
        work.escrows.push(escrow.clone());
        work.pending_escrows.push(p);

        let source = take_refund_source(&mut work, task.id, "client-7").unwrap();
        match source {
            RefundSource::Funded(e) => assert_eq!(e.escrow_id, escrow.escrow_id),
            RefundSource::Pending(_) => panic!("expected funded escrow first"),
        }
        assert!(work.escrows.is_empty());
        // The pending record is untouched by the funded-path refund
        assert_eq!(work.pending_escrows.len(), 1);
    }

    #[test]
    fn test_refund_source_falls_back_to_pending_by_client() {
        let mut work = LedgerSnapshot::default();
        work.pending_escrows.push(pending("client-9"));

        let source = take_refund_source(&mut work, Uuid::new_v4(), "client-9").unwrap();
        assert!(matches!(source, RefundSource::Pending(_)));
        assert!(work.pending_escrows.is_empty());
    }

    #[test]
    fn test_refund_source_none_when_nothing_held() {
        let mut work = LedgerSnapshot::default();
        assert!(take_refund_source(&mut work, Uuid::new_v4(), "nobody").is_none());
    }
}
