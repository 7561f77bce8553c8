//! Wallet accounting - credit operations paired with ledger transactions
//!
//! Every balance mutation appends exactly one transaction record. Both
//! changes land on the caller's working copy of the snapshot, so they
//! commit together when the snapshot is saved or vanish together when
//! the enclosing operation aborts.

use chrono::Utc;
use uuid::Uuid;

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::models::{Currency, Transaction, TransactionType};
use crate::store::LedgerSnapshot;

/// Everything a credit needs to describe itself in the transaction log
#[derive(Debug, Clone)]
pub struct CreditDraft {
    pub tx_type: TransactionType,
    pub task_id: Option<Uuid>,
    pub escrow_address: String,
    pub description: String,
}

/// Credit `amount` of `currency` to the user's wallet and record the
/// matching transaction. Fails `WalletNotFound` if no wallet exists for
/// the user; a missing wallet during a refund is a data-integrity error
/// that must surface, not silently succeed.
pub fn credit(
    work: &mut LedgerSnapshot,
    user_id: &str,
    amount: u64,
    currency: Currency,
    draft: CreditDraft,
) -> EscrowResult<Transaction> {
    let wallet = work
        .wallet_mut(user_id)
        .ok_or_else(|| EscrowError::WalletNotFound(user_id.to_string()))?;

    let balance = wallet.balances.entry(currency).or_insert(0);
    *balance = balance.checked_add(amount).ok_or_else(|| {
        EscrowError::internal(format!("balance overflow for {user_id} in {currency}"))
    })?;
    wallet.last_updated = Utc::now();

    let transaction = Transaction {
        id: Uuid::new_v4(),
        tx_type: draft.tx_type,
        user_id: user_id.to_string(),
        task_id: draft.task_id,
        escrow_address: draft.escrow_address,
        amount,
        currency,
        timestamp: Utc::now(),
        description: draft.description,
    };
    work.transactions.push(transaction.clone());

    Ok(transaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Wallet;

    fn refund_draft() -> CreditDraft {
        CreditDraft {
            tx_type: TransactionType::Refund,
            task_id: None,
            escrow_address: "addr".to_string(),
            description: "test refund".to_string(),
        }
    }

    #[test]
    fn test_credit_updates_balance_and_appends_transaction() {
        let mut work = LedgerSnapshot::default();
        work.wallets.push(Wallet::new("alice".to_string()));

        let tx = credit(&mut work, "alice", 2_500, Currency::Usdt, refund_draft()).unwrap();

        assert_eq!(work.wallets[0].balance(Currency::Usdt), 2_500);
        assert_eq!(work.transactions.len(), 1);
        assert_eq!(work.transactions[0].id, tx.id);
        assert_eq!(tx.amount, 2_500);
        assert_eq!(tx.currency, Currency::Usdt);
    }

    #[test]
    fn test_credit_without_wallet_fails_and_mutates_nothing() {
        let mut work = LedgerSnapshot::default();

        let result = credit(&mut work, "ghost", 100, Currency::Sol, refund_draft());

        match result {
            Err(EscrowError::WalletNotFound(user)) => assert_eq!(user, "ghost"),
            other => panic!("expected WalletNotFound, got {other:?}"),
        }
        assert!(work.transactions.is_empty());
    }
}
