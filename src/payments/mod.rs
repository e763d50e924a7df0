pub mod waterfall;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::loan::LoanAccount;
use crate::types::{InstallmentId, PaymentMethod};

pub use waterfall::{AllocationMode, AllocationOutcome, PaymentAllocator};

/// payment request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: Money,
    pub payment_date: NaiveDate,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub received_by: String,
    pub approved_by: Option<String>,
    pub notes: Option<String>,
    /// pay one installment only; `None` spreads over the schedule
    pub target_installment: Option<InstallmentId>,
    /// when the request reached the servicer, drives duplicate detection
    pub attempted_at: DateTime<Utc>,
}

impl PaymentRequest {
    pub fn new(amount: Money, payment_date: NaiveDate, received_by: impl Into<String>, attempted_at: DateTime<Utc>) -> Self {
        Self {
            amount,
            payment_date,
            method: PaymentMethod::Cash,
            reference: None,
            received_by: received_by.into(),
            approved_by: None,
            notes: None,
            target_installment: None,
            attempted_at,
        }
    }

    pub fn for_installment(mut self, installment_id: InstallmentId) -> Self {
        self.target_installment = Some(installment_id);
        self
    }

    /// amount and date checks against the loan and the current date
    pub fn validate(&self, loan: &LoanAccount, today: NaiveDate) -> Result<()> {
        if !self.amount.is_positive() {
            return Err(ServicingError::InvalidAmount {
                loan_id: loan.id,
                amount: self.amount,
                message: "payment amount must be positive".to_string(),
            });
        }

        if !loan.is_active() {
            return Err(ServicingError::LoanClosed { loan_id: loan.id });
        }

        if self.payment_date > today {
            return Err(ServicingError::InvalidDate {
                loan_id: loan.id,
                date: self.payment_date,
                message: format!("payment date is after today ({})", today),
            });
        }

        if self.payment_date < loan.disbursement_date {
            return Err(ServicingError::InvalidDate {
                loan_id: loan.id,
                date: self.payment_date,
                message: format!("payment date precedes disbursement on {}", loan.disbursement_date),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::loan::LoanBuilder;
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn loan() -> LoanAccount {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        LoanBuilder::new()
            .organization("org-rubavu")
            .amount(Money::from_major(500_000))
            .rate(Rate::from_percentage(24))
            .term_periods(5)
            .build(&time)
            .unwrap()
            .loan
    }

    fn request(amount: i64, payment_date: NaiveDate) -> PaymentRequest {
        PaymentRequest::new(
            Money::from_major(amount),
            payment_date,
            "teller-04",
            Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_validate_amount() {
        let loan = loan();
        let today = date(2024, 2, 1);
        assert!(request(10_000, today).validate(&loan, today).is_ok());
        assert!(matches!(
            request(0, today).validate(&loan, today),
            Err(ServicingError::InvalidAmount { .. })
        ));
        assert!(matches!(
            request(-5, today).validate(&loan, today),
            Err(ServicingError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_validate_dates() {
        let loan = loan();
        let today = date(2024, 2, 1);
        assert!(matches!(
            request(10_000, date(2024, 2, 2)).validate(&loan, today),
            Err(ServicingError::InvalidDate { .. })
        ));
        assert!(matches!(
            request(10_000, date(2023, 12, 31)).validate(&loan, today),
            Err(ServicingError::InvalidDate { .. })
        ));
        assert!(request(10_000, date(2024, 1, 1)).validate(&loan, today).is_ok());
    }

    #[test]
    fn test_closed_loan_takes_no_payments() {
        let mut loan = loan();
        loan.status = crate::types::LoanStatus::Closed;
        let today = date(2024, 2, 1);
        let err = request(10_000, today).validate(&loan, today).unwrap_err();
        assert_eq!(err, ServicingError::LoanClosed { loan_id: loan.id });
        assert_eq!(err.code(), "LOAN_CLOSED");
    }
}
