pub mod amortization;
pub mod recalculation;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::types::{InstallmentId, LoanId, PaymentStatus, TransactionId};

pub use amortization::{ScheduleGenerator, ScheduleTerms};
pub use recalculation::{RecalculationOptions, RecalculationPlan, ScheduleRecalculator};

/// one scheduled due date with its split and payment state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub id: InstallmentId,
    pub loan_id: LoanId,
    pub installment_number: u32,
    pub schedule_version: u32,
    pub due_date: NaiveDate,

    pub due_principal: Money,
    pub due_interest: Money,
    pub due_penalty: Money,
    pub paid_principal: Money,
    pub paid_interest: Money,
    pub paid_penalty: Money,

    /// scheduled principal balance once this installment is met
    pub outstanding_principal_after: Money,

    pub is_paid: bool,
    pub status: PaymentStatus,
    pub delayed_days: u32,
    pub last_payment_attempt: Option<DateTime<Utc>>,
    pub last_payment_date: Option<NaiveDate>,
    pub last_transaction: Option<TransactionId>,
    pub penalty_accrued_through: Option<NaiveDate>,

    /// replaced by a recalculation, kept for audit only
    pub superseded: bool,

    pub applied_transactions: Vec<TransactionId>,
    pub reverted_transactions: Vec<TransactionId>,
}

impl Installment {
    pub fn new(
        loan_id: LoanId,
        installment_number: u32,
        schedule_version: u32,
        due_date: NaiveDate,
        due_principal: Money,
        due_interest: Money,
        outstanding_principal_after: Money,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id,
            installment_number,
            schedule_version,
            due_date,
            due_principal,
            due_interest,
            due_penalty: Money::ZERO,
            paid_principal: Money::ZERO,
            paid_interest: Money::ZERO,
            paid_penalty: Money::ZERO,
            outstanding_principal_after,
            is_paid: false,
            status: PaymentStatus::Pending,
            delayed_days: 0,
            last_payment_attempt: None,
            last_payment_date: None,
            last_transaction: None,
            penalty_accrued_through: None,
            superseded: false,
            applied_transactions: Vec::new(),
            reverted_transactions: Vec::new(),
        }
    }

    pub fn due_total(&self) -> Money {
        self.due_principal + self.due_interest + self.due_penalty
    }

    pub fn paid_total(&self) -> Money {
        self.paid_principal + self.paid_interest + self.paid_penalty
    }

    pub fn remaining_amount(&self) -> Money {
        self.due_total() - self.paid_total()
    }

    pub fn remaining_principal(&self) -> Money {
        self.due_principal - self.paid_principal
    }

    pub fn remaining_interest(&self) -> Money {
        self.due_interest - self.paid_interest
    }

    pub fn remaining_penalty(&self) -> Money {
        self.due_penalty - self.paid_penalty
    }

    /// part of the active schedule
    pub fn is_active(&self) -> bool {
        !self.superseded
    }

    /// active and still owing money
    pub fn is_open(&self) -> bool {
        !self.superseded && !self.is_paid
    }

    pub fn is_past_due(&self, as_of: NaiveDate) -> bool {
        self.is_open() && self.due_date < as_of
    }

    /// last money received on or before the due date
    pub fn paid_on_time(&self) -> bool {
        self.last_payment_date.map_or(false, |d| d <= self.due_date)
    }

    pub fn derive_status(&self, as_of: NaiveDate) -> PaymentStatus {
        if self.remaining_amount().is_zero() {
            PaymentStatus::Paid
        } else if self.paid_total().is_positive() {
            PaymentStatus::Partial
        } else if self.due_date < as_of {
            PaymentStatus::Overdue
        } else {
            PaymentStatus::Pending
        }
    }

    pub fn refresh_status(&mut self, as_of: NaiveDate) {
        self.is_paid = self.remaining_amount().is_zero();
        self.status = self.derive_status(as_of);
    }

    pub fn marks(&self) -> InstallmentMarks {
        InstallmentMarks {
            delayed_days: self.delayed_days,
            last_payment_date: self.last_payment_date,
            last_payment_attempt: self.last_payment_attempt,
            last_transaction: self.last_transaction,
        }
    }

    fn restore(&mut self, marks: &InstallmentMarks) {
        self.delayed_days = marks.delayed_days;
        self.last_payment_date = marks.last_payment_date;
        self.last_payment_attempt = marks.last_payment_attempt;
        self.last_transaction = marks.last_transaction;
    }
}

/// row bookkeeping a delta overwrites and a reversal puts back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentMarks {
    pub delayed_days: u32,
    pub last_payment_date: Option<NaiveDate>,
    pub last_payment_attempt: Option<DateTime<Utc>>,
    pub last_transaction: Option<TransactionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaDirection {
    Apply,
    Revert,
}

/// apply-once change to a single installment, keyed by transaction id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDelta {
    pub transaction_id: TransactionId,
    pub installment_id: InstallmentId,
    pub installment_number: u32,
    pub direction: DeltaDirection,
    pub penalty: Money,
    pub interest: Money,
    pub principal: Money,
    /// row marks once the delta is applied
    pub after: InstallmentMarks,
    /// row marks before the payment touched it
    pub before: InstallmentMarks,
}

impl ScheduleDelta {
    pub fn amount(&self) -> Money {
        self.penalty + self.interest + self.principal
    }

    /// delta that undoes this one
    pub fn inverse(&self) -> ScheduleDelta {
        ScheduleDelta {
            direction: match self.direction {
                DeltaDirection::Apply => DeltaDirection::Revert,
                DeltaDirection::Revert => DeltaDirection::Apply,
            },
            after: self.before,
            before: self.after,
            ..self.clone()
        }
    }
}

/// ordered installments of one loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    loan_id: LoanId,
    installments: Vec<Installment>,
}

impl InstallmentSchedule {
    pub fn new(loan_id: LoanId, mut installments: Vec<Installment>) -> Self {
        installments.sort_by_key(|i| (i.installment_number, i.schedule_version));
        Self { loan_id, installments }
    }

    pub fn loan_id(&self) -> LoanId {
        self.loan_id
    }

    /// every row ever created, superseded ones included
    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    /// current rows in installment order
    pub fn active(&self) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(|i| i.is_active())
    }

    /// current rows still owing money, in installment order
    pub fn open(&self) -> impl Iterator<Item = &Installment> {
        self.installments.iter().filter(|i| i.is_open())
    }

    pub fn get(&self, id: InstallmentId) -> Option<&Installment> {
        self.installments.iter().find(|i| i.id == id)
    }

    pub(crate) fn active_mut(&mut self) -> impl Iterator<Item = &mut Installment> {
        self.installments.iter_mut().filter(|i| i.is_active())
    }

    /// look up a current row, superseded rows count as missing
    pub fn find_active(&self, id: InstallmentId) -> Result<&Installment> {
        self.get(id)
            .filter(|i| i.is_active())
            .ok_or(ServicingError::ScheduleNotFound {
                loan_id: self.loan_id,
                installment_id: Some(id),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.active().next().is_none()
    }

    pub fn current_version(&self) -> u32 {
        self.installments.iter().map(|i| i.schedule_version).max().unwrap_or(0)
    }

    /// principal still owed across the active schedule
    pub fn outstanding_principal(&self) -> Money {
        self.active().map(|i| i.remaining_principal()).sum()
    }

    /// scheduled interest still owed on rows due on or before `as_of`
    pub fn accrued_interest(&self, as_of: NaiveDate) -> Money {
        self.active()
            .filter(|i| i.due_date <= as_of)
            .map(|i| i.remaining_interest())
            .sum()
    }

    pub fn outstanding_penalties(&self) -> Money {
        self.active().map(|i| i.remaining_penalty()).sum()
    }

    /// everything still owed, due or not
    pub fn total_remaining(&self) -> Money {
        self.active().map(|i| i.remaining_amount()).sum()
    }

    /// amount past due as of a date
    pub fn overdue_amount(&self, as_of: NaiveDate) -> Money {
        self.active()
            .filter(|i| i.is_past_due(as_of))
            .map(|i| i.remaining_amount())
            .sum()
    }

    pub fn next_due(&self) -> Option<&Installment> {
        self.open().next()
    }

    /// due date of the latest paid current row
    pub fn last_paid_due_date(&self) -> Option<NaiveDate> {
        self.active().filter(|i| i.is_paid).map(|i| i.due_date).max()
    }

    pub fn is_fully_paid(&self) -> bool {
        !self.is_empty() && self.open().next().is_none()
    }

    /// apply a delta once; `Ok(false)` when it was already applied
    pub fn apply(&mut self, delta: &ScheduleDelta, as_of: NaiveDate) -> Result<bool> {
        let loan_id = self.loan_id;
        let row = self
            .installments
            .iter_mut()
            .find(|i| i.id == delta.installment_id)
            .ok_or(ServicingError::ScheduleNotFound {
                loan_id,
                installment_id: Some(delta.installment_id),
            })?;

        match delta.direction {
            DeltaDirection::Apply => {
                if row.applied_transactions.contains(&delta.transaction_id) {
                    return Ok(false);
                }
                if row.superseded {
                    return Err(ServicingError::ScheduleNotFound {
                        loan_id,
                        installment_id: Some(row.id),
                    });
                }
                if delta.penalty > row.remaining_penalty()
                    || delta.interest > row.remaining_interest()
                    || delta.principal > row.remaining_principal()
                {
                    return Err(ServicingError::CalculationError {
                        message: format!(
                            "delta {} exceeds remaining on installment {}",
                            delta.amount(),
                            row.installment_number
                        ),
                    });
                }

                row.paid_penalty += delta.penalty;
                row.paid_interest += delta.interest;
                row.paid_principal += delta.principal;
                row.restore(&delta.after);
                row.last_transaction = Some(delta.transaction_id);
                row.applied_transactions.push(delta.transaction_id);
            }
            DeltaDirection::Revert => {
                if row.reverted_transactions.contains(&delta.transaction_id) {
                    return Ok(false);
                }
                if !row.applied_transactions.contains(&delta.transaction_id) {
                    return Err(ServicingError::NotReversible {
                        transaction_id: delta.transaction_id,
                        message: format!("not applied to installment {}", row.installment_number),
                    });
                }
                if row.superseded {
                    return Err(ServicingError::NotReversible {
                        transaction_id: delta.transaction_id,
                        message: format!("installment {} was superseded by a recalculation", row.installment_number),
                    });
                }
                if delta.penalty > row.paid_penalty
                    || delta.interest > row.paid_interest
                    || delta.principal > row.paid_principal
                {
                    return Err(ServicingError::NotReversible {
                        transaction_id: delta.transaction_id,
                        message: format!("installment {} paid total would go negative", row.installment_number),
                    });
                }

                row.paid_penalty -= delta.penalty;
                row.paid_interest -= delta.interest;
                row.paid_principal -= delta.principal;
                // marks only roll back when nothing touched the row afterwards
                if row.last_transaction == Some(delta.transaction_id) {
                    row.restore(&delta.after);
                }
                row.reverted_transactions.push(delta.transaction_id);
            }
        }

        row.refresh_status(as_of);
        Ok(true)
    }

    /// apply a batch of deltas, returning how many changed the schedule
    pub fn apply_all(&mut self, deltas: &[ScheduleDelta], as_of: NaiveDate) -> Result<usize> {
        let mut changed = 0;
        for delta in deltas {
            if self.apply(delta, as_of)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// check that a batch would apply cleanly without touching the schedule
    pub fn check(&self, deltas: &[ScheduleDelta], as_of: NaiveDate) -> Result<()> {
        let mut scratch = self.clone();
        scratch.apply_all(deltas, as_of).map(|_| ())
    }

    /// mark rows as replaced by a recalculation
    pub fn supersede(&mut self, ids: &[InstallmentId]) {
        for row in self.installments.iter_mut().filter(|i| ids.contains(&i.id)) {
            row.superseded = true;
        }
    }

    /// add a batch of freshly generated rows
    pub fn extend(&mut self, rows: Vec<Installment>) {
        self.installments.extend(rows);
        self.installments.sort_by_key(|i| (i.installment_number, i.schedule_version));
    }

    pub fn refresh_statuses(&mut self, as_of: NaiveDate) {
        for row in self.active_mut() {
            row.refresh_status(as_of);
        }
    }
}
