//! wire shapes of the servicer operations
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::ClassificationOutcome;
use crate::decimal::{Money, Rate};
use crate::delay;
use crate::ledger::{InstallmentAllocation, PaymentTransaction};
use crate::loan::LoanAccount;
use crate::payments::{AllocationMode, PaymentRequest};
use crate::schedule::{Installment, RecalculationOptions, RecalculationPlan};
use crate::types::{
    Allocation, ClassificationStatus, InstallmentId, LoanId, LoanStatus, PaymentMethod, PaymentStatus,
    RecalculationType, TransactionId,
};

/// payment as submitted by a collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
    pub received_by: String,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// omitted for a general payment
    #[serde(default)]
    pub installment_id: Option<InstallmentId>,
}

impl PaymentSubmission {
    pub fn into_request(self, attempted_at: DateTime<Utc>) -> PaymentRequest {
        PaymentRequest {
            amount: self.amount,
            payment_date: self.payment_date,
            method: self.payment_method,
            reference: self.reference,
            received_by: self.received_by,
            approved_by: self.approved_by,
            notes: self.notes,
            target_installment: self.installment_id,
            attempted_at,
        }
    }
}

/// loan balances after an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancesView {
    pub outstanding_principal: Money,
    pub accrued_interest: Money,
    pub accrued_penalties: Money,
    pub overdue_amount: Money,
    pub total_outstanding: Money,
    pub credit_balance: Money,
    pub total_paid: Money,
    pub loan_status: LoanStatus,
}

impl BalancesView {
    pub fn from_loan(loan: &LoanAccount) -> Self {
        Self {
            outstanding_principal: loan.outstanding_principal,
            accrued_interest: loan.accrued_interest,
            accrued_penalties: loan.accrued_penalties,
            overdue_amount: loan.overdue_amount,
            total_outstanding: loan.total_outstanding(),
            credit_balance: loan.credit_balance,
            total_paid: loan.total_paid,
            loan_status: loan.status,
        }
    }
}

/// classification effect of a write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationChange {
    pub previous_status: ClassificationStatus,
    pub new_status: ClassificationStatus,
    pub was_reclassified: bool,
    pub days_in_arrears: u32,
    pub provisioning_rate: Rate,
    pub provision_required: Money,
}

impl From<&ClassificationOutcome> for ClassificationChange {
    fn from(outcome: &ClassificationOutcome) -> Self {
        Self {
            previous_status: outcome.previous_status,
            new_status: outcome.new_status,
            was_reclassified: outcome.was_reclassified,
            days_in_arrears: outcome.days_overdue,
            provisioning_rate: outcome.provisioning_rate,
            provision_required: outcome.provision_required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub transaction_id: TransactionId,
    pub sequence: u64,
    pub loan_id: LoanId,
    pub mode: AllocationMode,
    pub amount: Money,
    pub allocation: Allocation,
    pub installments: Vec<InstallmentAllocation>,
    pub balances: BalancesView,
    pub classification: ClassificationChange,
}

impl PaymentResponse {
    pub fn new(entry: &PaymentTransaction, loan: &LoanAccount, outcome: &ClassificationOutcome) -> Self {
        Self {
            transaction_id: entry.id,
            sequence: entry.sequence,
            loan_id: loan.id,
            mode: entry.mode,
            amount: entry.amount,
            allocation: entry.allocation,
            installments: entry.lines(),
            balances: BalancesView::from_loan(loan),
            classification: outcome.into(),
        }
    }
}

/// one active installment as shown to collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRowView {
    pub installment_id: InstallmentId,
    pub installment_number: u32,
    pub schedule_version: u32,
    pub due_date: NaiveDate,
    pub principal_due: Money,
    pub interest_due: Money,
    pub penalty_due: Money,
    pub principal_paid: Money,
    pub interest_paid: Money,
    pub penalty_paid: Money,
    pub total_due: Money,
    pub total_paid: Money,
    pub remaining_amount: Money,
    pub outstanding_principal_after: Money,
    pub delayed_days: u32,
    pub payment_status: PaymentStatus,
    pub last_payment_date: Option<NaiveDate>,
}

impl ScheduleRowView {
    /// status and delay are read as of `today` for rows still open
    pub fn from_installment(row: &Installment, today: NaiveDate) -> Self {
        let delayed_days = delay::current_delay(row, today);

        Self {
            installment_id: row.id,
            installment_number: row.installment_number,
            schedule_version: row.schedule_version,
            due_date: row.due_date,
            principal_due: row.due_principal,
            interest_due: row.due_interest,
            penalty_due: row.due_penalty,
            principal_paid: row.paid_principal,
            interest_paid: row.paid_interest,
            penalty_paid: row.paid_penalty,
            total_due: row.due_total(),
            total_paid: row.paid_total(),
            remaining_amount: row.remaining_amount(),
            outstanding_principal_after: row.outstanding_principal_after,
            delayed_days,
            payment_status: row.derive_status(today),
            last_payment_date: row.last_payment_date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculateRequest {
    #[serde(rename = "type")]
    pub recalculation_type: RecalculationType,
    pub effective_date: NaiveDate,
}

impl From<RecalculateRequest> for RecalculationOptions {
    fn from(request: RecalculateRequest) -> Self {
        RecalculationOptions {
            recalculation_type: request.recalculation_type,
            effective_date: request.effective_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalculationResponse {
    pub loan_id: LoanId,
    #[serde(rename = "type")]
    pub recalculation_type: RecalculationType,
    pub effective_date: NaiveDate,
    pub principal_amortized: Money,
    pub previous_installment_amount: Money,
    pub new_installment_amount: Money,
    pub previous_periods: u32,
    pub new_periods: u32,
    pub schedule: Vec<ScheduleRowView>,
    pub balances: BalancesView,
    pub classification: ClassificationChange,
}

impl RecalculationResponse {
    pub fn new(
        plan: &RecalculationPlan,
        schedule: Vec<ScheduleRowView>,
        loan: &LoanAccount,
        outcome: &ClassificationOutcome,
    ) -> Self {
        Self {
            loan_id: plan.loan_id,
            recalculation_type: plan.recalculation_type,
            effective_date: plan.effective_date,
            principal_amortized: plan.principal_amortized,
            previous_installment_amount: plan.previous_installment_amount,
            new_installment_amount: plan.new_installment_amount,
            previous_periods: plan.previous_periods,
            new_periods: plan.new_periods,
            schedule,
            balances: BalancesView::from_loan(loan),
            classification: outcome.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseRequest {
    pub reason: String,
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalResponse {
    pub reversal_id: TransactionId,
    pub reversed_transaction_id: TransactionId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub allocation: Allocation,
    pub installments: Vec<InstallmentAllocation>,
    pub balances: BalancesView,
    pub classification: ClassificationChange,
}

impl ReversalResponse {
    pub fn new(
        entry: &PaymentTransaction,
        reversed: TransactionId,
        loan: &LoanAccount,
        outcome: &ClassificationOutcome,
    ) -> Self {
        Self {
            reversal_id: entry.id,
            reversed_transaction_id: reversed,
            loan_id: loan.id,
            amount: entry.amount,
            allocation: entry.allocation,
            installments: entry.lines(),
            balances: BalancesView::from_loan(loan),
            classification: outcome.into(),
        }
    }
}

/// read-only classification of one loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationView {
    pub loan_id: LoanId,
    pub account_number: String,
    pub borrower_id: String,
    pub as_of: NaiveDate,
    pub status: ClassificationStatus,
    /// status currently on file, before this evaluation
    pub recorded_status: ClassificationStatus,
    pub days_in_arrears: u32,
    pub provisioning_rate: Rate,
    pub outstanding_principal: Money,
    pub net_exposure: Money,
    pub provision_required: Money,
}

impl ClassificationView {
    pub fn new(loan: &LoanAccount, outcome: &ClassificationOutcome) -> Self {
        Self {
            loan_id: loan.id,
            account_number: loan.account_number.clone(),
            borrower_id: loan.borrower_id.clone(),
            as_of: outcome.classification_date,
            status: outcome.new_status,
            recorded_status: outcome.previous_status,
            days_in_arrears: outcome.days_overdue,
            provisioning_rate: outcome.provisioning_rate,
            outstanding_principal: outcome.outstanding_principal,
            net_exposure: outcome.net_exposure,
            provision_required: outcome.provision_required,
        }
    }
}
