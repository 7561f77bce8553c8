//! Task Manager - coordinates task lifecycle and escrow reconciliation
//!
//! This module owns every externally triggered operation: task creation
//! through a pending escrow, funding confirmation, materialization,
//! applications, the two-phase completion handshake, deletion with a
//! strict refund-first rule, and the expiry sweep. All mutations run on
//! a working copy of the ledger snapshot under a single write lock and
//! commit only after the store accepts the whole snapshot, so a
//! concurrent delete and sweep can never both refund the same escrow.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::EscrowResult;
use crate::error::EscrowError;
use crate::escrow::{self, RefundSource, RefundTrigger};
use crate::keys::EscrowKeyProvider;
use crate::models::{
    Application, ApplicationDecision, ApplicationStatus, EscrowStatus, FundingCheck, PendingEscrow,
    RefundOutcome, SweepReport, Task, TaskDraft, TaskStatus, Transaction, Wallet,
};
use crate::observer::ChainObserver;
use crate::store::{LedgerSnapshot, LedgerStore};
use crate::wallet::{self, CreditDraft};

/// Configuration for the task manager
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Platform fee retained at settlement, in basis points
    pub fee_bps: u64,
    /// Minimum task title length after trimming
    pub min_title_len: usize,
    /// Maximum task title length
    pub max_title_len: usize,
    /// Maximum task description length
    pub max_description_len: usize,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            fee_bps: 250, // 2.5%
            min_title_len: 3,
            max_title_len: 200,
            max_description_len: 5_000,
        }
    }
}

/// Main task manager that coordinates the escrow-backed task lifecycle
pub struct TaskManager {
    config: TaskManagerConfig,
    /// In-memory truth, hydrated from the store at startup
    state: Arc<RwLock<LedgerSnapshot>>,
    store: Arc<dyn LedgerStore>,
    observer: Arc<dyn ChainObserver>,
    keys: Arc<dyn EscrowKeyProvider>,
}

impl TaskManager {
    /// Create a task manager, hydrating state from the store
    pub fn new(
        config: TaskManagerConfig,
        store: Arc<dyn LedgerStore>,
        observer: Arc<dyn ChainObserver>,
        keys: Arc<dyn EscrowKeyProvider>,
    ) -> EscrowResult<Self> {
        let snapshot = store.load()?;
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(snapshot)),
            store,
            observer,
            keys,
        })
    }

    /// Run a mutation on a working copy and commit it only after the
    /// store accepts the whole snapshot. Any error leaves no state.
    async fn with_write<T>(
        &self,
        op: impl FnOnce(&mut LedgerSnapshot) -> EscrowResult<T>,
    ) -> EscrowResult<T> {
        let mut state = self.state.write().await;
        let mut work = state.clone();
        let out = op(&mut work)?;
        if let Err(e) = self.store.save(&work) {
            error!("ledger commit failed: {}", e);
            return Err(EscrowError::store_unavailable("ledger write failed"));
        }
        *state = work;
        Ok(out)
    }

    // ---- wallets -------------------------------------------------------

    /// Registration-time wallet creation. Refund paths never call this;
    /// a wallet missing at refund time is a data-integrity error.
    pub async fn create_wallet(&self, user_id: &str) -> EscrowResult<Wallet> {
        let user_id = user_id.to_string();
        self.with_write(move |work| {
            if work.wallets.iter().any(|w| w.user_id == user_id) {
                return Err(EscrowError::invalid_state(format!(
                    "wallet already exists for user {user_id}"
                )));
            }
            let wallet = Wallet::new(user_id);
            work.wallets.push(wallet.clone());
            Ok(wallet)
        })
        .await
    }

    pub async fn get_wallet(&self, user_id: &str) -> EscrowResult<Wallet> {
        self.state
            .read()
            .await
            .wallets
            .iter()
            .find(|w| w.user_id == user_id)
            .cloned()
            .ok_or_else(|| EscrowError::WalletNotFound(user_id.to_string()))
    }

    // ---- task creation and funding -------------------------------------

    /// Open a pending escrow for a task-to-be. No task record is
    /// persisted until funding is observed and the escrow materializes,
    /// so an abandoned payment never produces a visible task.
    pub async fn create_task(&self, client_id: &str, draft: TaskDraft) -> EscrowResult<PendingEscrow> {
        self.validate_draft(&draft)?;

        let keys = self.keys.new_escrow_keys()?;
        let client_id = client_id.to_string();

        let pending = self
            .with_write(move |work| {
                let pending = PendingEscrow {
                    escrow_id: Uuid::new_v4(),
                    escrow_address: keys.address,
                    encrypted_secret: keys.encrypted_secret,
                    client_id,
                    task_id: None,
                    amount: draft.reward.amount,
                    currency: draft.reward.currency,
                    status: EscrowStatus::PendingPayment,
                    task_data: draft,
                    created_at: Utc::now(),
                    funded_at: None,
                };
                work.pending_escrows.push(pending.clone());
                Ok(pending)
            })
            .await?;

        info!(
            "opened pending escrow {} for client {} ({} {})",
            pending.escrow_id, pending.client_id, pending.amount, pending.currency
        );

        Ok(pending)
    }

    /// Poll the chain observer for escrow funding. Safe to retry
    /// indefinitely: once funded, repeated calls return the same success
    /// without touching the observer or the ledger again. A shortfall is
    /// a valid poll outcome, not an error.
    pub async fn check_funding(&self, escrow_id: Uuid, caller_id: &str) -> EscrowResult<FundingCheck> {
        let (address, amount, currency) = {
            let state = self.state.read().await;
            let pending = state
                .pending_escrows
                .iter()
                .find(|p| p.escrow_id == escrow_id)
                .ok_or_else(|| EscrowError::not_found(format!("pending escrow {escrow_id}")))?;
            if pending.client_id != caller_id {
                return Err(EscrowError::forbidden(
                    "only the escrow's client can check funding",
                ));
            }
            if pending.is_funded() {
                return Ok(FundingCheck::funded(pending.amount));
            }
            (
                pending.escrow_address.clone(),
                pending.amount,
                pending.currency,
            )
        };

        if !currency.native_observable() {
            return Err(EscrowError::unsupported_operation(format!(
                "funding checks for {currency} are not supported yet"
            )));
        }

        let observed = self.observer.observe_balance(&address, currency).await?;

        if !escrow::funding_accepted(amount, observed) {
            info!(
                "escrow {} not yet funded: observed {} of {}",
                escrow_id, observed, amount
            );
            return Ok(FundingCheck::short(observed, amount));
        }

        self.with_write(move |work| {
            let pending = work
                .pending_escrows
                .iter_mut()
                .find(|p| p.escrow_id == escrow_id)
                .ok_or_else(|| EscrowError::not_found(format!("pending escrow {escrow_id}")))?;
            // A concurrent poll may have won the race; funding is recorded once.
            if !pending.is_funded() {
                pending.status = EscrowStatus::Funded;
                pending.funded_at = Some(Utc::now());
                info!("escrow {} funded with {} observed", escrow_id, observed);
            }
            Ok(FundingCheck::funded(observed))
        })
        .await
    }

    /// Turn a funded pending escrow into a live task plus a durable
    /// escrow record. The only path by which a task comes into existence.
    pub async fn materialize(&self, escrow_id: Uuid, caller_id: &str) -> EscrowResult<Task> {
        let caller_id = caller_id.to_string();
        let fee_bps = self.config.fee_bps;

        let task = self
            .with_write(move |work| {
                let pos = work
                    .pending_escrows
                    .iter()
                    .position(|p| p.escrow_id == escrow_id)
                    .ok_or_else(|| EscrowError::not_found(format!("pending escrow {escrow_id}")))?;
                if work.pending_escrows[pos].client_id != caller_id {
                    return Err(EscrowError::forbidden(
                        "only the escrow's client can materialize the task",
                    ));
                }
                if !work.pending_escrows[pos].is_funded() {
                    return Err(EscrowError::invalid_state(format!(
                        "escrow {escrow_id} is not funded"
                    )));
                }

                let pending = work.pending_escrows.remove(pos);
                let (task, escrow) = escrow::materialize(&pending, fee_bps);
                work.escrows.push(escrow);
                work.tasks.push(task.clone());
                Ok(task)
            })
            .await?;

        info!("materialized task {} from escrow {}", task.id, escrow_id);

        Ok(task)
    }

    // ---- applications ---------------------------------------------------

    /// Apply to an open task
    pub async fn apply_to_task(
        &self,
        applicant_id: &str,
        task_id: Uuid,
        message: String,
    ) -> EscrowResult<Application> {
        let applicant_id = applicant_id.to_string();
        self.with_write(move |work| {
            let now = Utc::now();
            let task = work
                .task(task_id)
                .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))?;

            if !task.status.can_apply() || task.is_expired(now) {
                return Err(EscrowError::invalid_state(format!(
                    "task {task_id} is not open for applications"
                )));
            }
            if task.created_by == applicant_id {
                return Err(EscrowError::validation(
                    "clients cannot apply to their own tasks",
                ));
            }
            if work
                .applications
                .iter()
                .any(|a| a.task_id == task_id && a.applicant_id == applicant_id)
            {
                return Err(EscrowError::validation(format!(
                    "user {applicant_id} already applied to task {task_id}"
                )));
            }

            let application = Application::new(task_id, &applicant_id, message);
            work.applications.push(application.clone());

            let task = work.task_mut(task_id).expect("task looked up above");
            task.applicant_count += 1;
            task.updated_at = now;
            Ok(application)
        })
        .await
    }

    /// Accept or reject a pending application. Acceptance assigns the
    /// task and rejects every rival pending application in the same
    /// commit; the first acceptance wins.
    pub async fn decide_application(
        &self,
        task_id: Uuid,
        application_id: Uuid,
        decider_id: &str,
        decision: ApplicationDecision,
    ) -> EscrowResult<Application> {
        let decider_id = decider_id.to_string();
        let decided = self
            .with_write(move |work| {
                let task = work
                    .task(task_id)
                    .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))?;
                if task.created_by != decider_id {
                    return Err(EscrowError::forbidden(
                        "only the task creator can decide applications",
                    ));
                }

                let application = work
                    .applications
                    .iter()
                    .find(|a| a.id == application_id && a.task_id == task_id)
                    .ok_or_else(|| EscrowError::not_found(format!("application {application_id}")))?;
                if application.status != ApplicationStatus::Pending {
                    return Err(EscrowError::invalid_state(format!(
                        "application {application_id} is not pending"
                    )));
                }
                let applicant_id = application.applicant_id.clone();

                match decision {
                    ApplicationDecision::Accepted => {
                        let task = work.task_mut(task_id).expect("task looked up above");
                        if task.status != TaskStatus::Open || task.assigned_to.is_some() {
                            return Err(EscrowError::invalid_state(format!(
                                "task {task_id} is already assigned"
                            )));
                        }
                        task.status = TaskStatus::InProgress;
                        task.assigned_to = Some(applicant_id.clone());
                        task.updated_at = Utc::now();

                        // Accepting one application settles the whole field.
                        for rival in work
                            .applications
                            .iter_mut()
                            .filter(|a| a.task_id == task_id)
                        {
                            rival.status = if rival.id == application_id {
                                ApplicationStatus::Accepted
                            } else if rival.status == ApplicationStatus::Pending {
                                ApplicationStatus::Rejected
                            } else {
                                rival.status
                            };
                        }
                    }
                    ApplicationDecision::Rejected => {
                        let application = work
                            .applications
                            .iter_mut()
                            .find(|a| a.id == application_id)
                            .expect("application looked up above");
                        application.status = ApplicationStatus::Rejected;
                    }
                }

                Ok(work
                    .applications
                    .iter()
                    .find(|a| a.id == application_id)
                    .cloned()
                    .expect("application looked up above"))
            })
            .await?;

        info!(
            "application {} on task {} decided: {:?}",
            application_id, task_id, decided.status
        );

        Ok(decided)
    }

    // ---- completion -----------------------------------------------------

    /// Record one party's completion confirmation. Completion itself is
    /// a separate step requiring both confirmations.
    pub async fn confirm_completion(&self, task_id: Uuid, caller_id: &str) -> EscrowResult<Task> {
        let caller_id = caller_id.to_string();
        self.with_write(move |work| {
            let task = work
                .task_mut(task_id)
                .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))?;
            if task.status != TaskStatus::InProgress {
                return Err(EscrowError::invalid_state(format!(
                    "task {task_id} is not in progress"
                )));
            }
            if task.created_by == caller_id {
                task.client_confirmed = true;
            } else if task.assigned_to.as_deref() == Some(caller_id.as_str()) {
                task.worker_confirmed = true;
            } else {
                return Err(EscrowError::forbidden(
                    "only the client or assigned worker can confirm completion",
                ));
            }
            task.updated_at = Utc::now();
            Ok(task.clone())
        })
        .await
    }

    /// Complete a task after the two-phase handshake and settle its
    /// escrow to the worker. Single-party confirmation never releases
    /// escrow.
    pub async fn complete_task(&self, task_id: Uuid, caller_id: &str) -> EscrowResult<Task> {
        let caller_id = caller_id.to_string();
        let task = self
            .with_write(move |work| {
                let task = work
                    .task(task_id)
                    .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))?;
                if task.created_by != caller_id {
                    return Err(EscrowError::forbidden(
                        "only the task creator can complete the task",
                    ));
                }
                if task.status == TaskStatus::Completed {
                    return Err(EscrowError::invalid_state(format!(
                        "task {task_id} is already completed"
                    )));
                }
                if !(task.worker_confirmed && task.client_confirmed) {
                    return Err(EscrowError::invalid_state(format!(
                        "task {task_id} completion confirmation pending"
                    )));
                }
                let worker_id = task
                    .assigned_to
                    .clone()
                    .ok_or_else(|| EscrowError::internal("confirmed task has no assignee"))?;

                if let Some(pos) = work.escrows.iter().position(|e| e.task_id == task_id) {
                    let escrow = work.escrows.remove(pos);
                    wallet::credit(
                        work,
                        &worker_id,
                        escrow.net_amount,
                        escrow.currency,
                        CreditDraft {
                            tx_type: crate::models::TransactionType::Settlement,
                            task_id: Some(task_id),
                            escrow_address: escrow.escrow_address.clone(),
                            description: format!("settlement for task {task_id}"),
                        },
                    )?;
                } else {
                    warn!("completing task {} with no escrow to settle", task_id);
                }

                let task = work.task_mut(task_id).expect("task looked up above");
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
                task.updated_at = Utc::now();
                Ok(task.clone())
            })
            .await?;

        info!("completed and settled task {}", task_id);

        Ok(task)
    }

    // ---- deletion and expiry -------------------------------------------

    /// Delete an open, unassigned task. Strict two-phase: the refund
    /// must succeed (or confirm "nothing to refund") before the task
    /// record is removed; a refund failure aborts the whole deletion.
    pub async fn delete_task(&self, task_id: Uuid, caller_id: &str) -> EscrowResult<RefundOutcome> {
        let caller_id = caller_id.to_string();
        let outcome = self
            .with_write(move |work| {
                let task = work
                    .task(task_id)
                    .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))?;
                if task.created_by != caller_id {
                    return Err(EscrowError::forbidden(
                        "only the task creator can delete the task",
                    ));
                }
                if task.status != TaskStatus::Open || task.assigned_to.is_some() {
                    return Err(EscrowError::invalid_state(format!(
                        "task {task_id} is not open and unassigned"
                    )));
                }

                let outcome = refund_into(work, task_id, &caller_id, RefundTrigger::Manual)
                    .map_err(|e| EscrowError::refund_failed(e.to_string()))?;

                work.tasks.retain(|t| t.id != task_id);
                reject_pending_applications(work, task_id);
                Ok(outcome)
            })
            .await?;

        info!(
            "deleted task {} (refunded {})",
            task_id, outcome.refunded_amount
        );

        Ok(outcome)
    }

    /// Expiry sweep over open tasks and stale pending escrows. Expired
    /// tasks are refunded and removed; a task whose refund fails is
    /// quarantined as `refund_failed` for administrative resolution
    /// rather than deleted with funds stranded.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> EscrowResult<SweepReport> {
        let report = self
            .with_write(move |work| {
                let mut report = SweepReport::default();

                // Stale pending escrows: unfunded ones are dropped with
                // nothing to refund; funded-but-unmaterialized ones are
                // refunded to the client.
                let stale: Vec<Uuid> = work
                    .pending_escrows
                    .iter()
                    .filter(|p| p.task_data.deadline <= now)
                    .map(|p| p.escrow_id)
                    .collect();
                for escrow_id in stale {
                    report.processed += 1;
                    let pos = work
                        .pending_escrows
                        .iter()
                        .position(|p| p.escrow_id == escrow_id)
                        .expect("collected above");
                    if !work.pending_escrows[pos].is_funded() {
                        work.pending_escrows.remove(pos);
                        report.refunded += 1;
                        continue;
                    }
                    let pending = work.pending_escrows.remove(pos);
                    // On failure credit_refund restores the record itself.
                    match credit_refund(work, RefundSource::Pending(pending), None, RefundTrigger::Expired) {
                        Ok(_) => report.refunded += 1,
                        Err(e) => {
                            warn!(
                                "refund of stale pending escrow {} failed: {}",
                                escrow_id, e
                            );
                            report.failed += 1;
                        }
                    }
                }

                // Expired open tasks.
                let expired: Vec<Uuid> = work
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Open && t.is_expired(now))
                    .map(|t| t.id)
                    .collect();
                for task_id in expired {
                    report.processed += 1;
                    let client_id = work
                        .task(task_id)
                        .map(|t| t.created_by.clone())
                        .expect("collected above");
                    match refund_into(work, task_id, &client_id, RefundTrigger::Expired) {
                        Ok(_) => {
                            work.tasks.retain(|t| t.id != task_id);
                            reject_pending_applications(work, task_id);
                            report.refunded += 1;
                        }
                        Err(e) => {
                            warn!("refund of expired task {} failed: {}", task_id, e);
                            let task = work.task_mut(task_id).expect("collected above");
                            task.status = TaskStatus::RefundFailed;
                            task.updated_at = Utc::now();
                            report.failed += 1;
                        }
                    }
                }

                report.remaining = work
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Open)
                    .count();
                Ok(report)
            })
            .await?;

        info!(
            "expiry sweep: processed={} refunded={} failed={} remaining={}",
            report.processed, report.refunded, report.failed, report.remaining
        );

        Ok(report)
    }

    // ---- reads ----------------------------------------------------------

    /// Fetch a task, bumping its view counter by exactly one
    pub async fn view_task(&self, task_id: Uuid) -> EscrowResult<Task> {
        self.with_write(move |work| {
            let task = work
                .task_mut(task_id)
                .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))?;
            task.view_count += 1;
            Ok(task.clone())
        })
        .await
    }

    pub async fn get_task(&self, task_id: Uuid) -> EscrowResult<Task> {
        self.state
            .read()
            .await
            .task(task_id)
            .cloned()
            .ok_or_else(|| EscrowError::not_found(format!("task {task_id}")))
    }

    pub async fn list_open_tasks(&self) -> Vec<Task> {
        self.state
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Open)
            .cloned()
            .collect()
    }

    /// Tasks the user created or is assigned to
    pub async fn list_user_tasks(&self, user_id: &str) -> Vec<Task> {
        self.state
            .read()
            .await
            .tasks
            .iter()
            .filter(|t| t.created_by == user_id || t.assigned_to.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// Pending escrows a client still has open (the funding addresses to pay)
    pub async fn list_pending_escrows(&self, client_id: &str) -> Vec<PendingEscrow> {
        self.state
            .read()
            .await
            .pending_escrows
            .iter()
            .filter(|p| p.client_id == client_id)
            .cloned()
            .collect()
    }

    /// The durable escrow backing a task, if one exists
    pub async fn get_escrow_for_task(&self, task_id: Uuid) -> Option<crate::models::Escrow> {
        self.state
            .read()
            .await
            .escrows
            .iter()
            .find(|e| e.task_id == task_id)
            .cloned()
    }

    pub async fn list_applications_for_task(&self, task_id: Uuid) -> Vec<Application> {
        self.state
            .read()
            .await
            .applications
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn list_transactions(&self, user_id: &str) -> Vec<Transaction> {
        self.state
            .read()
            .await
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    // ---- validation -----------------------------------------------------

    fn validate_draft(&self, draft: &TaskDraft) -> EscrowResult<()> {
        let title_len = draft.title.trim().chars().count();
        if title_len < self.config.min_title_len || title_len > self.config.max_title_len {
            return Err(EscrowError::validation(format!(
                "title must be {}..={} characters",
                self.config.min_title_len, self.config.max_title_len
            )));
        }
        if draft.description.chars().count() > self.config.max_description_len {
            return Err(EscrowError::validation(format!(
                "description exceeds {} characters",
                self.config.max_description_len
            )));
        }
        if draft.reward.amount == 0 {
            return Err(EscrowError::validation("reward must be greater than 0"));
        }
        if draft.deadline <= Utc::now() {
            return Err(EscrowError::validation("deadline must be in the future"));
        }
        Ok(())
    }
}

/// Refund whatever the ledger holds for a task back to the client.
/// Locates the funded escrow by task id first, then a pending escrow by
/// task id or client id. No record found is a zero-amount success; a
/// found record with a missing wallet surfaces `WalletNotFound` and the
/// working copy is left as it was.
fn refund_into(
    work: &mut LedgerSnapshot,
    task_id: Uuid,
    client_id: &str,
    trigger: RefundTrigger,
) -> EscrowResult<RefundOutcome> {
    let Some(source) = escrow::take_refund_source(work, task_id, client_id) else {
        warn!("nothing to refund for task {}", task_id);
        return Ok(RefundOutcome::nothing());
    };
    credit_refund(work, source, Some(task_id), trigger)
}

/// Credit a refund source back to its client, restoring the source
/// record if the wallet credit fails so no funds are destroyed.
fn credit_refund(
    work: &mut LedgerSnapshot,
    source: RefundSource,
    task_id: Option<Uuid>,
    trigger: RefundTrigger,
) -> EscrowResult<RefundOutcome> {
    let amount = source.amount();
    let currency = source.currency();
    let client_id = source.client_id().to_string();
    let draft = CreditDraft {
        tx_type: trigger.transaction_type(),
        task_id,
        escrow_address: source.escrow_address().to_string(),
        description: format!("escrow refund to {client_id}"),
    };

    match wallet::credit(work, &client_id, amount, currency, draft) {
        Ok(tx) => Ok(RefundOutcome {
            refunded_amount: amount,
            currency: Some(currency),
            transaction_id: Some(tx.id),
        }),
        Err(e) => {
            match source {
                RefundSource::Funded(escrow) => work.escrows.push(escrow),
                RefundSource::Pending(pending) => work.pending_escrows.push(pending),
            }
            Err(e)
        }
    }
}

/// Pending applications on a removed task have nothing left to decide
fn reject_pending_applications(work: &mut LedgerSnapshot, task_id: Uuid) {
    for application in work
        .applications
        .iter_mut()
        .filter(|a| a.task_id == task_id && a.status == ApplicationStatus::Pending)
    {
        application.status = ApplicationStatus::Rejected;
    }
}
