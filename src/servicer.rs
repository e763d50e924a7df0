//! Transactional loan servicer.
//!
//! Each loan lives in a [`LoanBook`] behind its own mutex. A write locks the
//! book, stages every change on a clone and swaps the clone in only when the
//! whole operation succeeded, so a failed payment, reversal or recalculation
//! leaves nothing behind. Different loans are serviced in parallel; batch
//! classification and the daily tick fan out over a rayon pool.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use hourglass_rs::SafeTimeProvider;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{
    ClassificationView, PaymentResponse, PaymentSubmission, RecalculateRequest, RecalculationResponse,
    ReversalResponse, ReverseRequest, ScheduleRowView,
};
use crate::classification::{
    apply_outcome, ClassificationEngine, ClassificationHistory, ClassificationOutcome, ClassificationPolicy,
    ClassificationRecord, ClassificationTrigger, ProvisioningReport,
};
use crate::config::ServicingConfig;
use crate::decimal::Money;
use crate::delay;
use crate::errors::{Result, ServicingError};
use crate::events::{Event, EventStore};
use crate::ledger::{PaymentTransaction, ReversalRequest, TransactionKind, TransactionLedger};
use crate::loan::{Disbursement, LoanAccount, LoanBuilder};
use crate::payments::PaymentAllocator;
use crate::penalty::PenaltyEngine;
use crate::schedule::{InstallmentSchedule, ScheduleRecalculator};
use crate::types::{LoanId, LoanStatus, TransactionId};

/// everything the servicer keeps for one loan
#[derive(Debug, Clone)]
pub struct LoanBook {
    pub loan: LoanAccount,
    pub schedule: InstallmentSchedule,
    pub ledger: TransactionLedger,
    pub classifications: ClassificationHistory,
    pub events: EventStore,
}

impl LoanBook {
    pub fn new(disbursement: Disbursement) -> Self {
        let Disbursement { loan, schedule } = disbursement;
        Self {
            ledger: TransactionLedger::new(loan.id),
            classifications: ClassificationHistory::new(),
            events: EventStore::new(),
            loan,
            schedule,
        }
    }

    fn belongs_to(&self, organization_id: &str) -> bool {
        self.loan.organization_id == organization_id
    }

    /// evaluate, record and apply a classification
    fn reclassify(
        &mut self,
        policy: &ClassificationPolicy,
        as_of: NaiveDate,
        trigger: ClassificationTrigger,
        now: DateTime<Utc>,
    ) -> ClassificationOutcome {
        let outcome = ClassificationEngine::new(policy).evaluate(&self.loan, &self.schedule, as_of, trigger);
        let record_id = self
            .classifications
            .append(ClassificationRecord::from_outcome(&outcome, now));
        apply_outcome(&mut self.loan, &outcome, record_id);

        if outcome.was_reclassified {
            self.events.emit(Event::LoanReclassified {
                loan_id: self.loan.id,
                old_status: outcome.previous_status,
                new_status: outcome.new_status,
                days_in_arrears: outcome.days_overdue,
                provisioning_rate: outcome.provisioning_rate,
                trigger,
                timestamp: now,
            });
        }

        outcome
    }

    /// refresh balances and lifecycle after a schedule change
    fn settle(&mut self, as_of: NaiveDate, now: DateTime<Utc>) {
        let was_active = self.loan.is_active();
        self.loan.sync_balances(&self.schedule, as_of);
        self.loan.updated_at = now;

        if was_active && self.loan.status == LoanStatus::Closed {
            self.events.emit(Event::LoanClosed {
                loan_id: self.loan.id,
                total_paid: self.loan.total_paid,
                timestamp: now,
            });
        }
    }

    /// latest payment date among payments still standing
    fn standing_payment_date(&self) -> Option<NaiveDate> {
        self.ledger
            .entries()
            .iter()
            .filter(|e| e.kind == TransactionKind::Payment && !self.ledger.is_reversed(e.id))
            .map(|e| e.transaction_date)
            .max()
    }

    fn schedule_view(&self, today: NaiveDate) -> Vec<ScheduleRowView> {
        self.schedule
            .active()
            .map(|row| ScheduleRowView::from_installment(row, today))
            .collect()
    }
}

/// result of one daily tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub as_of: Option<NaiveDate>,
    pub loans_processed: usize,
    pub reclassified: usize,
    pub delays_refreshed: usize,
    pub penalties_accrued: Money,
}

impl TickSummary {
    fn merge(mut self, other: TickSummary) -> TickSummary {
        self.as_of = self.as_of.or(other.as_of);
        self.loans_processed += other.loans_processed;
        self.reclassified += other.reclassified;
        self.delays_refreshed += other.delays_refreshed;
        self.penalties_accrued += other.penalties_accrued;
        self
    }
}

type BookHandle = Arc<Mutex<LoanBook>>;

/// multi-loan, multi-organization servicer
pub struct LoanServicer {
    config: ServicingConfig,
    time_provider: SafeTimeProvider,
    books: DashMap<LoanId, BookHandle>,
    /// transaction id to owning loan
    transactions: DashMap<TransactionId, LoanId>,
    pool: rayon::ThreadPool,
}

impl LoanServicer {
    pub fn new(config: ServicingConfig, time_provider: SafeTimeProvider) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("loan-servicer-{}", i))
            .build()
            .map_err(|e| ServicingError::InvalidConfiguration {
                message: format!("worker pool: {}", e),
            })?;

        Ok(Self {
            config,
            time_provider,
            books: DashMap::new(),
            transactions: DashMap::new(),
            pool,
        })
    }

    /// servicer on the system clock
    pub fn with_system_time(config: ServicingConfig) -> Result<Self> {
        Self::new(config, SafeTimeProvider::new(hourglass_rs::TimeSource::System))
    }

    pub fn config(&self) -> &ServicingConfig {
        &self.config
    }

    pub fn time_provider(&self) -> &SafeTimeProvider {
        &self.time_provider
    }

    pub fn loan_count(&self) -> usize {
        self.books.len()
    }

    fn today(&self) -> (DateTime<Utc>, NaiveDate) {
        let now = self.time_provider.now();
        (now, now.date_naive())
    }

    fn handle(&self, loan_id: LoanId) -> Result<BookHandle> {
        self.books
            .get(&loan_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ServicingError::LoanNotFound { loan_id })
    }

    /// run a write against a staged copy of the book, committing on success
    fn write<T>(
        &self,
        organization_id: &str,
        loan_id: LoanId,
        operation: &'static str,
        f: impl FnOnce(&mut LoanBook) -> Result<T>,
    ) -> Result<T> {
        let handle = self.handle(loan_id)?;
        let mut book = handle.lock();
        if !book.belongs_to(organization_id) {
            return Err(ServicingError::LoanNotFound { loan_id });
        }

        let mut staged = book.clone();
        match f(&mut staged) {
            Ok(value) => {
                *book = staged;
                Ok(value)
            }
            Err(e) => {
                warn!(loan_id = %loan_id, operation, code = e.code(), error = %e, "operation rejected");
                Err(e)
            }
        }
    }

    fn read<T>(&self, organization_id: &str, loan_id: LoanId, f: impl FnOnce(&LoanBook) -> T) -> Result<T> {
        let handle = self.handle(loan_id)?;
        let book = handle.lock();
        if !book.belongs_to(organization_id) {
            return Err(ServicingError::LoanNotFound { loan_id });
        }
        Ok(f(&book))
    }

    /// books of one organization
    fn organization_books(&self, organization_id: &str) -> Vec<BookHandle> {
        self.books
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| handle.lock().belongs_to(organization_id))
            .collect()
    }

    /// disburse a new loan and record its opening classification
    pub fn disburse(&self, builder: LoanBuilder) -> Result<LoanAccount> {
        let disbursement = builder.build(&self.time_provider)?;
        self.register(disbursement)
    }

    /// take over a loan disbursed elsewhere
    pub fn register(&self, disbursement: Disbursement) -> Result<LoanAccount> {
        let (now, today) = self.today();
        let loan_id = disbursement.loan.id;
        let mut book = LoanBook::new(disbursement);

        book.events.emit(Event::LoanDisbursed {
            loan_id,
            amount: book.loan.principal_disbursed,
            installments: book.schedule.active().count() as u32,
            first_due_date: book.schedule.next_due().map_or(book.loan.disbursement_date, |i| i.due_date),
            timestamp: now,
        });
        let as_of = today.max(book.loan.disbursement_date);
        book.reclassify(&self.config.classification, as_of, ClassificationTrigger::Disbursement, now);
        let loan = book.loan.clone();

        match self.books.entry(loan_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(loan_id = %loan_id, "loan already registered");
                Err(ServicingError::DuplicateLoan { loan_id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(book)));
                info!(
                    loan_id = %loan_id,
                    organization = %loan.organization_id,
                    amount = %loan.principal_disbursed,
                    "loan disbursed"
                );
                Ok(loan)
            }
        }
    }

    /// allocate a payment and commit it with its ledger entry and classification
    pub fn submit_payment(
        &self,
        organization_id: &str,
        loan_id: LoanId,
        submission: PaymentSubmission,
    ) -> Result<PaymentResponse> {
        let (now, today) = self.today();
        let request = submission.into_request(now);
        let allocator = PaymentAllocator::new(self.config.duplicate_cooldown(), self.config.excess_policy);
        let policy = &self.config.classification;

        let response = self.write(organization_id, loan_id, "submit_payment", |book| {
            let outcome = allocator.allocate(&book.loan, &book.schedule, &request, today)?;
            book.schedule.apply_all(&outcome.deltas, today)?;

            let entry = PaymentTransaction::payment(&book.loan, &request, &outcome, book.ledger.next_sequence(), now);
            book.ledger.record(entry.clone())?;

            book.loan.credit_balance += outcome.allocation.excess_amount;
            book.loan.total_paid += request.amount;
            book.loan.last_payment_date = book.loan.last_payment_date.max(Some(request.payment_date));

            book.events.emit(Event::PaymentProcessed {
                loan_id,
                transaction_id: entry.id,
                amount: request.amount,
                penalty_paid: outcome.allocation.penalty_paid,
                interest_paid: outcome.allocation.interest_paid,
                principal_paid: outcome.allocation.principal_paid,
                excess_amount: outcome.allocation.excess_amount,
                timestamp: now,
            });
            for delta in &outcome.deltas {
                if let Some(row) = book.schedule.get(delta.installment_id).filter(|r| r.is_paid) {
                    book.events.emit(Event::InstallmentSettled {
                        loan_id,
                        installment_id: row.id,
                        installment_number: row.installment_number,
                        delayed_days: row.delayed_days,
                        timestamp: now,
                    });
                }
            }

            book.settle(today, now);
            let classification = book.reclassify(policy, today, ClassificationTrigger::Payment, now);
            Ok(PaymentResponse::new(&entry, &book.loan, &classification))
        })?;

        self.transactions.insert(response.transaction_id, loan_id);
        info!(
            loan_id = %loan_id,
            transaction_id = %response.transaction_id,
            amount = %response.amount,
            excess = %response.allocation.excess_amount,
            status = ?response.classification.new_status,
            "payment committed"
        );
        Ok(response)
    }

    /// active schedule rows in installment order
    pub fn schedule(&self, organization_id: &str, loan_id: LoanId) -> Result<Vec<ScheduleRowView>> {
        let (_, today) = self.today();
        self.read(organization_id, loan_id, |book| book.schedule_view(today))
    }

    /// re-amortize the unpaid tail of a schedule
    pub fn recalculate_schedule(
        &self,
        organization_id: &str,
        loan_id: LoanId,
        request: RecalculateRequest,
    ) -> Result<RecalculationResponse> {
        let (now, today) = self.today();
        let policy = &self.config.classification;

        let response = self.write(organization_id, loan_id, "recalculate_schedule", |book| {
            let plan = ScheduleRecalculator::recalculate(&book.loan, &book.schedule, request.into())?;
            plan.commit(&mut book.schedule, today);

            book.loan.installment_amount = plan.new_installment_amount;
            book.loan.term_periods = book.schedule.active().count() as u32;
            book.events.emit(Event::ScheduleRecalculated {
                loan_id,
                recalculation_type: plan.recalculation_type,
                effective_date: plan.effective_date,
                previous_periods: plan.previous_periods,
                new_periods: plan.new_periods,
                new_installment_amount: plan.new_installment_amount,
                timestamp: now,
            });

            book.settle(today, now);
            let classification = book.reclassify(policy, today, ClassificationTrigger::Recalculation, now);
            Ok(RecalculationResponse::new(&plan, book.schedule_view(today), &book.loan, &classification))
        })?;

        info!(
            loan_id = %loan_id,
            recalculation = ?response.recalculation_type,
            previous_periods = response.previous_periods,
            new_periods = response.new_periods,
            installment = %response.new_installment_amount,
            "schedule recalculated"
        );
        Ok(response)
    }

    /// undo a committed payment
    pub fn reverse_transaction(
        &self,
        organization_id: &str,
        transaction_id: TransactionId,
        request: ReverseRequest,
    ) -> Result<ReversalResponse> {
        let (now, today) = self.today();
        let loan_id = self
            .transactions
            .get(&transaction_id)
            .map(|entry| *entry.value())
            .ok_or(ServicingError::TransactionNotFound { transaction_id })?;
        let policy = &self.config.classification;
        let reversal = ReversalRequest {
            transaction_id,
            reason: request.reason,
            requested_by: request.requested_by,
        };

        let response = self
            .write(organization_id, loan_id, "reverse_transaction", |book| {
                let plan = book
                    .ledger
                    .plan_reversal(&book.loan, &book.schedule, &reversal, today, now)?;
                book.schedule.apply_all(&plan.entry.deltas, today)?;
                book.ledger.record(plan.entry.clone())?;

                book.loan.credit_balance -= plan.credit_release;
                book.loan.total_paid -= plan.entry.amount;
                book.loan.last_payment_date = book.standing_payment_date();

                book.events.emit(Event::PaymentReversed {
                    loan_id,
                    transaction_id,
                    reversal_id: plan.entry.id,
                    amount: plan.entry.amount,
                    reason: reversal.reason.clone(),
                    timestamp: now,
                });

                book.settle(today, now);
                let classification = book.reclassify(policy, today, ClassificationTrigger::Reversal, now);
                Ok(ReversalResponse::new(&plan.entry, transaction_id, &book.loan, &classification))
            })
            .map_err(|e| match e {
                // other organizations' transactions stay invisible
                ServicingError::LoanNotFound { .. } => ServicingError::TransactionNotFound { transaction_id },
                other => other,
            })?;

        self.transactions.insert(response.reversal_id, loan_id);
        info!(
            loan_id = %loan_id,
            transaction_id = %transaction_id,
            reversal_id = %response.reversal_id,
            amount = %response.amount,
            status = ?response.classification.new_status,
            "payment reversed"
        );
        Ok(response)
    }

    fn evaluate_organization(&self, organization_id: &str, as_of: NaiveDate) -> Vec<(LoanAccount, ClassificationOutcome)> {
        let handles = self.organization_books(organization_id);
        let policy = &self.config.classification;

        let mut evaluated: Vec<(LoanAccount, ClassificationOutcome)> = self.pool.install(|| {
            handles
                .par_iter()
                .map(|handle| {
                    let book = handle.lock();
                    let outcome = ClassificationEngine::new(policy).evaluate(
                        &book.loan,
                        &book.schedule,
                        as_of,
                        ClassificationTrigger::Backfill,
                    );
                    (book.loan.clone(), outcome)
                })
                .collect()
        });
        evaluated.sort_by(|a, b| a.0.account_number.cmp(&b.0.account_number));
        evaluated
    }

    /// read-only classification of every loan of an organization as of today
    pub fn classifications(&self, organization_id: &str) -> Vec<ClassificationView> {
        let (_, today) = self.today();
        self.evaluate_organization(organization_id, today)
            .iter()
            .map(|(loan, outcome)| ClassificationView::new(loan, outcome))
            .collect()
    }

    /// provisioning requirement of an organization as of today
    pub fn provisioning_report(&self, organization_id: &str) -> ProvisioningReport {
        let (_, today) = self.today();
        let outcomes: Vec<ClassificationOutcome> = self
            .evaluate_organization(organization_id, today)
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect();
        ProvisioningReport::build(organization_id, today, &self.config.classification, &outcomes)
    }

    /// refresh delays, accrue penalties and reclassify every active loan
    pub fn run_daily_tick(&self) -> TickSummary {
        let (now, today) = self.today();
        let handles: Vec<BookHandle> = self.books.iter().map(|entry| Arc::clone(entry.value())).collect();
        let policy = &self.config.classification;
        let penalties = self.config.penalty.clone().map(PenaltyEngine::new);
        let penalties = penalties.as_ref();

        let summary = self.pool.install(|| {
            handles
                .par_iter()
                .map(|handle| {
                    let mut book = handle.lock();
                    if !book.loan.is_active() {
                        return TickSummary::default();
                    }

                    let mut staged = book.clone();
                    let loan_id = staged.loan.id;
                    let delays_refreshed = delay::refresh_delays(&mut staged.schedule, today);

                    let mut penalties_accrued = Money::ZERO;
                    if let Some(engine) = penalties {
                        for accrual in engine.accrue(&mut staged.schedule, today) {
                            penalties_accrued += accrual.amount;
                            staged.events.emit(Event::PenaltyAccrued {
                                loan_id,
                                installment_id: accrual.installment_id,
                                amount: accrual.amount,
                                days_charged: accrual.days_charged,
                                timestamp: now,
                            });
                        }
                    }

                    staged.settle(today, now);
                    let outcome = staged.reclassify(policy, today, ClassificationTrigger::DailyTick, now);
                    if outcome.was_reclassified {
                        info!(
                            loan_id = %loan_id,
                            from = ?outcome.previous_status,
                            to = ?outcome.new_status,
                            days_in_arrears = outcome.days_overdue,
                            "loan reclassified"
                        );
                    }
                    debug!(loan_id = %loan_id, delays_refreshed, penalties = %penalties_accrued, "tick applied");
                    *book = staged;

                    TickSummary {
                        as_of: Some(today),
                        loans_processed: 1,
                        reclassified: usize::from(outcome.was_reclassified),
                        delays_refreshed,
                        penalties_accrued,
                    }
                })
                .reduce(TickSummary::default, TickSummary::merge)
        });

        info!(
            as_of = %today,
            loans = summary.loans_processed,
            reclassified = summary.reclassified,
            penalties = %summary.penalties_accrued,
            "daily tick complete"
        );
        TickSummary {
            as_of: Some(today),
            ..summary
        }
    }

    pub fn classification_history(&self, organization_id: &str, loan_id: LoanId) -> Result<Vec<ClassificationRecord>> {
        self.read(organization_id, loan_id, |book| book.classifications.records().to_vec())
    }

    pub fn transactions(&self, organization_id: &str, loan_id: LoanId) -> Result<Vec<PaymentTransaction>> {
        self.read(organization_id, loan_id, |book| book.ledger.entries().to_vec())
    }

    pub fn loan(&self, organization_id: &str, loan_id: LoanId) -> Result<LoanAccount> {
        self.read(organization_id, loan_id, |book| book.loan.clone())
    }

    /// drain events emitted for a loan since the last call
    pub fn take_events(&self, organization_id: &str, loan_id: LoanId) -> Result<Vec<Event>> {
        let handle = self.handle(loan_id)?;
        let mut book = handle.lock();
        if !book.belongs_to(organization_id) {
            return Err(ServicingError::LoanNotFound { loan_id });
        }
        Ok(book.events.take_events())
    }
}
