use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::ClassificationTrigger;
use crate::decimal::{Money, Rate};
use crate::types::{
    ClassificationStatus, InstallmentId, LoanId, RecalculationType, TransactionId,
};

/// all events that can be emitted by a loan book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // lifecycle events
    LoanDisbursed {
        loan_id: LoanId,
        amount: Money,
        installments: u32,
        first_due_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    LoanClosed {
        loan_id: LoanId,
        total_paid: Money,
        timestamp: DateTime<Utc>,
    },

    // payment events
    PaymentProcessed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        amount: Money,
        penalty_paid: Money,
        interest_paid: Money,
        principal_paid: Money,
        excess_amount: Money,
        timestamp: DateTime<Utc>,
    },
    InstallmentSettled {
        loan_id: LoanId,
        installment_id: InstallmentId,
        installment_number: u32,
        delayed_days: u32,
        timestamp: DateTime<Utc>,
    },
    PaymentReversed {
        loan_id: LoanId,
        transaction_id: TransactionId,
        reversal_id: TransactionId,
        amount: Money,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // schedule events
    ScheduleRecalculated {
        loan_id: LoanId,
        recalculation_type: RecalculationType,
        effective_date: NaiveDate,
        previous_periods: u32,
        new_periods: u32,
        new_installment_amount: Money,
        timestamp: DateTime<Utc>,
    },
    PenaltyAccrued {
        loan_id: LoanId,
        installment_id: InstallmentId,
        amount: Money,
        days_charged: u32,
        timestamp: DateTime<Utc>,
    },

    // risk events
    LoanReclassified {
        loan_id: LoanId,
        old_status: ClassificationStatus,
        new_status: ClassificationStatus,
        days_in_arrears: u32,
        provisioning_rate: Rate,
        trigger: ClassificationTrigger,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Clone, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}
