//! Append-only payment ledger of a loan.
//!
//! Entries are never edited. A reversal is its own entry pointing back at
//! the payment it undoes, carrying the inverse schedule deltas.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::loan::LoanAccount;
use crate::payments::{AllocationMode, AllocationOutcome, PaymentRequest};
use crate::schedule::{InstallmentSchedule, ScheduleDelta};
use crate::types::{Allocation, InstallmentId, LoanId, OrganizationId, PaymentMethod, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Payment,
    Reversal,
}

/// the part of a transaction that landed on one installment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstallmentAllocation {
    pub installment_id: InstallmentId,
    pub installment_number: u32,
    pub penalty: Money,
    pub interest: Money,
    pub principal: Money,
}

/// ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: TransactionId,
    pub loan_id: LoanId,
    pub organization_id: OrganizationId,
    /// position in the loan's ledger, from 1
    pub sequence: u64,
    pub kind: TransactionKind,
    pub transaction_date: NaiveDate,
    pub amount: Money,
    pub allocation: Allocation,
    pub mode: AllocationMode,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub received_by: String,
    pub approved_by: Option<String>,
    pub notes: Option<String>,
    pub target_installment: Option<InstallmentId>,
    /// set on reversal entries
    pub reverses: Option<TransactionId>,
    pub reason: Option<String>,
    pub deltas: Vec<ScheduleDelta>,
    pub recorded_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// entry for an allocated payment
    pub fn payment(
        loan: &LoanAccount,
        request: &PaymentRequest,
        outcome: &AllocationOutcome,
        sequence: u64,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: outcome.transaction_id,
            loan_id: loan.id,
            organization_id: loan.organization_id.clone(),
            sequence,
            kind: TransactionKind::Payment,
            transaction_date: request.payment_date,
            amount: request.amount,
            allocation: outcome.allocation,
            mode: outcome.mode,
            method: request.method,
            reference: request.reference.clone(),
            received_by: request.received_by.clone(),
            approved_by: request.approved_by.clone(),
            notes: request.notes.clone(),
            target_installment: request.target_installment,
            reverses: None,
            reason: None,
            deltas: outcome.deltas.clone(),
            recorded_at,
        }
    }

    pub fn is_reversal(&self) -> bool {
        self.kind == TransactionKind::Reversal
    }

    /// per-installment breakdown
    pub fn lines(&self) -> Vec<InstallmentAllocation> {
        self.deltas
            .iter()
            .map(|d| InstallmentAllocation {
                installment_id: d.installment_id,
                installment_number: d.installment_number,
                penalty: d.penalty,
                interest: d.interest,
                principal: d.principal,
            })
            .collect()
    }
}

/// who asked for a reversal and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalRequest {
    pub transaction_id: TransactionId,
    pub reason: String,
    pub requested_by: String,
}

/// a validated reversal, ready to record
#[derive(Debug, Clone, PartialEq)]
pub struct ReversalPlan {
    pub original: TransactionId,
    pub entry: PaymentTransaction,
    /// excess the original payment left on the credit balance
    pub credit_release: Money,
}

/// append-only transaction ledger of one loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLedger {
    loan_id: LoanId,
    entries: Vec<PaymentTransaction>,
}

impl TransactionLedger {
    pub fn new(loan_id: LoanId) -> Self {
        Self {
            loan_id,
            entries: Vec::new(),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.entries.len() as u64 + 1
    }

    pub fn record(&mut self, entry: PaymentTransaction) -> Result<()> {
        if entry.loan_id != self.loan_id {
            return Err(ServicingError::CalculationError {
                message: format!("transaction {} belongs to loan {}, not {}", entry.id, entry.loan_id, self.loan_id),
            });
        }
        if self.get(entry.id).is_some() {
            return Err(ServicingError::CalculationError {
                message: format!("transaction {} already recorded", entry.id),
            });
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, id: TransactionId) -> Option<&PaymentTransaction> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn find(&self, id: TransactionId) -> Result<&PaymentTransaction> {
        self.get(id).ok_or(ServicingError::TransactionNotFound { transaction_id: id })
    }

    pub fn entries(&self) -> &[PaymentTransaction] {
        &self.entries
    }

    pub fn reversal_of(&self, id: TransactionId) -> Option<&PaymentTransaction> {
        self.entries.iter().find(|e| e.reverses == Some(id))
    }

    pub fn is_reversed(&self, id: TransactionId) -> bool {
        self.reversal_of(id).is_some()
    }

    /// payments still standing, net of reversals
    pub fn total_collected(&self) -> Money {
        self.entries
            .iter()
            .filter(|e| !e.is_reversal() && !self.is_reversed(e.id))
            .map(|e| e.amount)
            .sum()
    }

    /// validate a reversal against the current schedule and build its entry
    pub fn plan_reversal(
        &self,
        loan: &LoanAccount,
        schedule: &InstallmentSchedule,
        request: &ReversalRequest,
        today: NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> Result<ReversalPlan> {
        let original = self.find(request.transaction_id)?;

        if original.is_reversal() {
            return Err(ServicingError::NotReversible {
                transaction_id: original.id,
                message: "reversal entries cannot be reversed".to_string(),
            });
        }
        if let Some(reversal) = self.reversal_of(original.id) {
            return Err(ServicingError::NotReversible {
                transaction_id: original.id,
                message: format!("already reversed by {}", reversal.id),
            });
        }

        let credit_release = original.allocation.excess_amount;
        if credit_release > loan.credit_balance {
            return Err(ServicingError::NotReversible {
                transaction_id: original.id,
                message: format!("credit balance {} no longer covers excess {}", loan.credit_balance, credit_release),
            });
        }

        let deltas: Vec<ScheduleDelta> = original.deltas.iter().map(ScheduleDelta::inverse).collect();
        schedule.check(&deltas, today)?;

        let entry = PaymentTransaction {
            id: Uuid::new_v4(),
            loan_id: original.loan_id,
            organization_id: original.organization_id.clone(),
            sequence: self.next_sequence(),
            kind: TransactionKind::Reversal,
            transaction_date: today,
            amount: original.amount,
            allocation: original.allocation,
            mode: original.mode,
            method: original.method,
            reference: original.reference.clone(),
            received_by: request.requested_by.clone(),
            approved_by: None,
            notes: None,
            target_installment: original.target_installment,
            reverses: Some(original.id),
            reason: Some(request.reason.clone()),
            deltas,
            recorded_at,
        };

        Ok(ReversalPlan {
            original: original.id,
            entry,
            credit_release,
        })
    }
}
