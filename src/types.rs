use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;

/// unique identifier for a loan account
pub type LoanId = Uuid;

/// unique identifier for an installment row
pub type InstallmentId = Uuid;

/// unique identifier for a ledger entry
pub type TransactionId = Uuid;

/// unique identifier for a classification record
pub type ClassificationId = Uuid;

/// organization owning the loan book
pub type OrganizationId = String;

/// repayment frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepaymentFrequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    SemiAnnually,
    Annually,
}

impl RepaymentFrequency {
    pub fn periods_per_year(&self) -> u32 {
        match self {
            RepaymentFrequency::Daily => 365,
            RepaymentFrequency::Weekly => 52,
            RepaymentFrequency::Biweekly => 26,
            RepaymentFrequency::Monthly => 12,
            RepaymentFrequency::Quarterly => 4,
            RepaymentFrequency::SemiAnnually => 2,
            RepaymentFrequency::Annually => 1,
        }
    }
}

/// how installments split principal and interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmortizationMethod {
    /// equal total payment every period (annuity)
    EqualInstallments,
    /// equal principal every period, interest on the declining balance
    DecliningPrincipal,
    /// equal principal, interest charged on the original principal
    Flat,
}

/// lifecycle of a loan account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    /// disbursed with installments still open
    Active,
    /// every active installment paid
    Closed,
}

/// risk classification, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationStatus {
    Performing,
    Watch,
    Substandard,
    Doubtful,
    Loss,
}

impl ClassificationStatus {
    pub const ALL: [ClassificationStatus; 5] = [
        ClassificationStatus::Performing,
        ClassificationStatus::Watch,
        ClassificationStatus::Substandard,
        ClassificationStatus::Doubtful,
        ClassificationStatus::Loss,
    ];
}

/// per-installment payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

/// how money reached the lender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
    Cheque,
    InternalTransfer,
}

/// schedule restructuring mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecalculationType {
    /// keep the remaining term, shrink each installment
    ReduceInstallment,
    /// keep the installment amount, shorten the term
    ReduceTerm,
}

/// what happens to money left over after every balance is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExcessPolicy {
    /// hold the excess as a credit balance on the loan
    CarryAsCredit,
    /// refuse payments that would leave an excess
    Reject,
}

/// payment allocation breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Allocation {
    pub penalty_paid: Money,
    pub interest_paid: Money,
    pub principal_paid: Money,
    pub excess_amount: Money,
}

impl Allocation {
    /// amount that landed on installments
    pub fn total_applied(&self) -> Money {
        self.penalty_paid + self.interest_paid + self.principal_paid
    }

    /// applied plus excess, always equal to the amount paid
    pub fn total(&self) -> Money {
        self.total_applied() + self.excess_amount
    }
}
