//! Core data models for the marketplace escrow system
//!
//! This module contains the persisted entity types, state machine enums,
//! and the request/report types used by the task lifecycle controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EscrowResult;
use crate::error::EscrowError;

/// Supported settlement currencies, stored as integer minor units
/// (lamports for SOL, 10^-6 units for the stablecoins and the platform token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Sol,
    Usdt,
    Usdc,
    /// Platform token
    Work,
}

impl Currency {
    /// Parse a wire-level currency code
    pub fn from_code(code: &str) -> EscrowResult<Self> {
        match code.to_ascii_uppercase().as_str() {
            "SOL" => Ok(Self::Sol),
            "USDT" => Ok(Self::Usdt),
            "USDC" => Ok(Self::Usdc),
            "WORK" => Ok(Self::Work),
            other => Err(EscrowError::UnsupportedCurrency(other.to_string())),
        }
    }

    /// Canonical wire code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sol => "SOL",
            Self::Usdt => "USDT",
            Self::Usdc => "USDC",
            Self::Work => "WORK",
        }
    }

    /// Decimal places of the minor-unit representation
    pub fn decimals(&self) -> u32 {
        match self {
            Self::Sol => 9,
            Self::Usdt | Self::Usdc | Self::Work => 6,
        }
    }

    /// Whether the chain observer can check a native balance for this currency.
    /// Token-account balance checking is an external collaborator not yet wired in.
    pub fn native_observable(&self) -> bool {
        matches!(self, Self::Sol)
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// An amount in integer minor units of one currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: u64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: u64, currency: Currency) -> Self {
        Self { amount, currency }
    }
}

/// Task state machine enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Live and accepting applications
    Open,
    /// An application was accepted; work underway
    InProgress,
    /// Both parties confirmed; escrow settled
    Completed,
    /// Deleted by the client after refund
    Cancelled,
    /// Expired but the refund failed; quarantined for manual resolution
    RefundFailed,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check if this state accepts applications
    pub fn can_apply(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Transaction type tags identifying what triggered a balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Client deleted an open task
    RefundManual,
    /// Expiry sweep returned the escrow
    RefundExpired,
    /// Generic refund
    Refund,
    /// Escrow released to the worker on completion
    Settlement,
}

/// Marketplace task, materialized only after its escrow is funded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub reward: Money,
    pub deadline: DateTime<Utc>,
    pub status: TaskStatus,

    // Parties
    pub created_by: String,
    pub assigned_to: Option<String>,

    // Escrow linkage
    pub escrow_id: Option<Uuid>,

    // Counters
    pub applicant_count: u32,
    pub view_count: u64,

    // Two-phase completion handshake
    pub worker_confirmed: bool,
    pub client_confirmed: bool,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The task-to-be held inside a pending escrow until funding is observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub reward: Money,
    pub deadline: DateTime<Utc>,
}

/// Escrow status. `pending_payment` records live in the pending set,
/// `funded` records in the durable escrow set; the transition is a move
/// between sets, not a field update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    PendingPayment,
    Funded,
}

/// Escrow awaiting observed on-chain funding; no task exists yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEscrow {
    pub escrow_id: Uuid,
    pub escrow_address: String,
    /// Opaque ciphertext held for the external custodian
    pub encrypted_secret: String,
    pub client_id: String,
    /// Set at materialization; pending records are otherwise located by client_id
    pub task_id: Option<Uuid>,
    pub amount: u64,
    pub currency: Currency,
    pub status: EscrowStatus,
    pub task_data: TaskDraft,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
}

impl PendingEscrow {
    pub fn is_funded(&self) -> bool {
        self.status == EscrowStatus::Funded
    }
}

/// Funded, materialized escrow tied to a live task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    pub escrow_id: Uuid,
    pub task_id: Uuid,
    pub escrow_address: String,
    pub client_id: String,
    pub amount: u64,
    pub currency: Currency,
    pub status: EscrowStatus,
    /// Platform fee retained at settlement
    pub fee: u64,
    /// Amount released to the worker at settlement
    pub net_amount: u64,
    pub created_at: DateTime<Utc>,
    pub funded_at: DateTime<Utc>,
}

/// One wallet per user; mutated only through wallet accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub balances: std::collections::BTreeMap<Currency, u64>,
    pub last_updated: DateTime<Utc>,
}

impl Wallet {
    /// Create an empty wallet with every supported balance zeroed
    pub fn new(user_id: String) -> Self {
        let balances = [Currency::Sol, Currency::Usdt, Currency::Usdc, Currency::Work]
            .into_iter()
            .map(|c| (c, 0))
            .collect();
        Self {
            user_id,
            balances,
            last_updated: Utc::now(),
        }
    }

    /// Current balance in one currency
    pub fn balance(&self, currency: Currency) -> u64 {
        self.balances.get(&currency).copied().unwrap_or(0)
    }
}

/// Immutable ledger entry; append-only, never mutated or deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub user_id: String,
    pub task_id: Option<Uuid>,
    pub escrow_address: String,
    pub amount: u64,
    pub currency: Currency,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// Application status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A worker's application to an open task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub task_id: Uuid,
    pub applicant_id: String,
    pub message: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

/// Decision on a pending application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationDecision {
    Accepted,
    Rejected,
}

/// Outcome of a funding poll. A shortfall is a valid result, not an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingCheck {
    pub funded: bool,
    pub observed: u64,
    pub shortfall: u64,
}

impl FundingCheck {
    pub fn funded(observed: u64) -> Self {
        Self {
            funded: true,
            observed,
            shortfall: 0,
        }
    }

    pub fn short(observed: u64, expected: u64) -> Self {
        Self {
            funded: false,
            observed,
            shortfall: expected.saturating_sub(observed),
        }
    }
}

/// Result of a refund attempt. `refunded_amount` is zero when no escrow
/// record existed for the task ("nothing to refund").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refunded_amount: u64,
    pub currency: Option<Currency>,
    pub transaction_id: Option<Uuid>,
}

impl RefundOutcome {
    pub fn nothing() -> Self {
        Self {
            refunded_amount: 0,
            currency: None,
            transaction_id: None,
        }
    }
}

/// Structured report returned by the expiry sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    /// Expired tasks and pending escrows examined
    pub processed: usize,
    /// Refunds executed (including zero-amount "nothing to refund")
    pub refunded: usize,
    /// Tasks quarantined because their refund failed
    pub failed: usize,
    /// Open tasks left after the sweep
    pub remaining: usize,
}

impl Task {
    /// Materialize a task from a funded escrow's embedded draft
    pub fn from_draft(draft: &TaskDraft, client_id: &str, escrow_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            reward: draft.reward,
            deadline: draft.deadline,
            status: TaskStatus::Open,
            created_by: client_id.to_string(),
            assigned_to: None,
            escrow_id: Some(escrow_id),
            applicant_count: 0,
            view_count: 0,
            worker_confirmed: false,
            client_confirmed: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Expiry comparison is inclusive: a deadline equal to `now` is expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }
}

impl Application {
    pub fn new(task_id: Uuid, applicant_id: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            applicant_id: applicant_id.to_string(),
            message,
            status: ApplicationStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_codes_round_trip() {
        for code in ["SOL", "USDT", "USDC", "WORK"] {
            let currency = Currency::from_code(code).unwrap();
            assert_eq!(currency.code(), code);
        }

        match Currency::from_code("DOGE") {
            Err(EscrowError::UnsupportedCurrency(code)) => assert_eq!(code, "DOGE"),
            other => panic!("expected UnsupportedCurrency, got {other:?}"),
        }
    }

    #[test]
    fn test_deadline_expiry_is_inclusive() {
        let now = Utc::now();
        let draft = TaskDraft {
            title: "t".to_string(),
            description: String::new(),
            reward: Money::new(1, Currency::Usdc),
            deadline: now,
        };
        let task = Task::from_draft(&draft, "client", Uuid::new_v4());
        assert!(task.is_expired(now));
        assert!(!task.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_new_wallet_has_all_balances_zeroed() {
        let wallet = Wallet::new("alice".to_string());
        for currency in [Currency::Sol, Currency::Usdt, Currency::Usdc, Currency::Work] {
            assert_eq!(wallet.balance(currency), 0);
        }
    }
}
