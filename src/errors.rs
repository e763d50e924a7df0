use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::decimal::Money;
use crate::types::{InstallmentId, LoanId, TransactionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServicingError {
    #[error("invalid payment amount: {amount} on loan {loan_id}")]
    InvalidAmount {
        loan_id: LoanId,
        amount: Money,
        message: String,
    },

    #[error("loan closed: {loan_id}")]
    LoanClosed {
        loan_id: LoanId,
    },

    #[error("invalid date: {date} on loan {loan_id}: {message}")]
    InvalidDate {
        loan_id: LoanId,
        date: NaiveDate,
        message: String,
    },

    #[error("installment {installment_id} already settled")]
    AlreadySettled {
        loan_id: LoanId,
        installment_id: InstallmentId,
    },

    #[error("duplicate payment attempt on installment {installment_id}: last attempt {last_attempt}, retry after {retry_after}")]
    DuplicateAttempt {
        loan_id: LoanId,
        installment_id: InstallmentId,
        last_attempt: DateTime<Utc>,
        retry_after: DateTime<Utc>,
    },

    #[error("transaction {transaction_id} not reversible: {message}")]
    NotReversible {
        transaction_id: TransactionId,
        message: String,
    },

    #[error("invalid effective date: {effective_date} on loan {loan_id}: {message}")]
    InvalidEffectiveDate {
        loan_id: LoanId,
        effective_date: NaiveDate,
        message: String,
    },

    #[error("loan not found: {loan_id}")]
    LoanNotFound {
        loan_id: LoanId,
    },

    #[error("schedule not found for loan {loan_id}: installment {installment_id:?}")]
    ScheduleNotFound {
        loan_id: LoanId,
        installment_id: Option<InstallmentId>,
    },

    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        transaction_id: TransactionId,
    },

    #[error("loan already registered: {loan_id}")]
    DuplicateLoan {
        loan_id: LoanId,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },

    #[error("calculation error: {message}")]
    CalculationError {
        message: String,
    },
}

impl ServicingError {
    /// stable machine-readable code for collaborators
    pub fn code(&self) -> &'static str {
        match self {
            ServicingError::InvalidAmount { .. } => "INVALID_AMOUNT",
            ServicingError::LoanClosed { .. } => "LOAN_CLOSED",
            ServicingError::InvalidDate { .. } => "INVALID_DATE",
            ServicingError::AlreadySettled { .. } => "ALREADY_SETTLED",
            ServicingError::DuplicateAttempt { .. } => "DUPLICATE_ATTEMPT",
            ServicingError::NotReversible { .. } => "NOT_REVERSIBLE",
            ServicingError::InvalidEffectiveDate { .. } => "INVALID_EFFECTIVE_DATE",
            ServicingError::LoanNotFound { .. } => "LOAN_NOT_FOUND",
            ServicingError::ScheduleNotFound { .. } => "SCHEDULE_NOT_FOUND",
            ServicingError::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            ServicingError::DuplicateLoan { .. } => "DUPLICATE_LOAN",
            ServicingError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            ServicingError::CalculationError { .. } => "CALCULATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServicingError>;
