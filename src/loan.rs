use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar;
use crate::decimal::{Money, Rate};
use crate::errors::{Result, ServicingError};
use crate::schedule::amortization::RowNumbering;
use crate::schedule::{InstallmentSchedule, ScheduleGenerator, ScheduleTerms};
use crate::types::{
    AmortizationMethod, ClassificationId, ClassificationStatus, LoanId, LoanStatus, OrganizationId,
    RepaymentFrequency,
};

/// a disbursed loan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanAccount {
    // identification
    pub id: LoanId,
    pub organization_id: OrganizationId,
    pub account_number: String,
    pub borrower_id: String,

    // contract
    pub principal_disbursed: Money,
    pub disbursement_date: NaiveDate,
    pub annual_interest_rate: Rate,
    pub frequency: RepaymentFrequency,
    pub amortization_method: AmortizationMethod,
    pub term_periods: u32,
    /// amount a term-reducing recalculation holds constant
    pub installment_amount: Money,
    pub collateral_value: Money,

    // balances, derived from the schedule after every commit
    pub outstanding_principal: Money,
    pub accrued_interest: Money,
    pub accrued_penalties: Money,
    /// installments already past due and still unpaid
    pub overdue_amount: Money,
    pub credit_balance: Money,

    // payment tracking
    pub total_paid: Money,
    pub last_payment_date: Option<NaiveDate>,

    // status
    pub status: LoanStatus,
    pub classification_status: ClassificationStatus,
    pub days_in_arrears: u32,
    pub latest_classification: Option<ClassificationId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LoanAccount {
    /// everything the borrower owes today
    pub fn total_outstanding(&self) -> Money {
        self.outstanding_principal + self.accrued_interest + self.accrued_penalties
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// recompute balances and lifecycle from the schedule
    pub fn sync_balances(&mut self, schedule: &InstallmentSchedule, as_of: NaiveDate) {
        self.outstanding_principal = schedule.outstanding_principal();
        self.accrued_interest = schedule.accrued_interest(as_of);
        self.accrued_penalties = schedule.outstanding_penalties();
        self.overdue_amount = schedule.overdue_amount(as_of);
        self.status = if schedule.is_fully_paid() {
            LoanStatus::Closed
        } else {
            LoanStatus::Active
        };
    }

    /// generation terms for a principal amortized from a first due date
    pub fn schedule_terms(&self, principal: Money, first_due_date: NaiveDate) -> ScheduleTerms {
        ScheduleTerms {
            principal,
            annual_rate: self.annual_interest_rate,
            frequency: self.frequency,
            method: self.amortization_method,
            first_due_date,
        }
    }
}

/// a loan with its freshly generated schedule
#[derive(Debug, Clone)]
pub struct Disbursement {
    pub loan: LoanAccount,
    pub schedule: InstallmentSchedule,
}

/// builder for disbursed loans
#[derive(Debug, Clone, Default)]
pub struct LoanBuilder {
    organization_id: Option<OrganizationId>,
    account_number: Option<String>,
    borrower_id: Option<String>,
    amount: Option<Money>,
    rate: Option<Rate>,
    frequency: Option<RepaymentFrequency>,
    term_periods: Option<u32>,
    method: Option<AmortizationMethod>,
    disbursement_date: Option<NaiveDate>,
    first_due_date: Option<NaiveDate>,
    collateral_value: Option<Money>,
}

impl LoanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn organization(mut self, organization_id: impl Into<OrganizationId>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn account_number(mut self, account: impl Into<String>) -> Self {
        self.account_number = Some(account.into());
        self
    }

    pub fn borrower_id(mut self, borrower: impl Into<String>) -> Self {
        self.borrower_id = Some(borrower.into());
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn rate(mut self, rate: Rate) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn frequency(mut self, frequency: RepaymentFrequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn term_periods(mut self, periods: u32) -> Self {
        self.term_periods = Some(periods);
        self
    }

    pub fn amortization(mut self, method: AmortizationMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn disbursement_date(mut self, date: NaiveDate) -> Self {
        self.disbursement_date = Some(date);
        self
    }

    /// defaults to one period after disbursement
    pub fn first_due_date(mut self, date: NaiveDate) -> Self {
        self.first_due_date = Some(date);
        self
    }

    pub fn collateral_value(mut self, value: Money) -> Self {
        self.collateral_value = Some(value);
        self
    }

    /// validate terms and generate the disbursement schedule
    pub fn build(self, time_provider: &SafeTimeProvider) -> Result<Disbursement> {
        let now = time_provider.now();

        let amount = self.amount.ok_or(ServicingError::InvalidConfiguration {
            message: "amount required".to_string(),
        })?;
        if !amount.is_positive() {
            return Err(ServicingError::InvalidConfiguration {
                message: format!("amount must be positive, got {}", amount),
            });
        }

        let rate = self.rate.ok_or(ServicingError::InvalidConfiguration {
            message: "rate required".to_string(),
        })?;
        if rate.as_decimal().is_sign_negative() {
            return Err(ServicingError::InvalidConfiguration {
                message: format!("rate must not be negative, got {}", rate),
            });
        }

        let term_periods = self.term_periods.ok_or(ServicingError::InvalidConfiguration {
            message: "term required".to_string(),
        })?;
        if term_periods == 0 {
            return Err(ServicingError::InvalidConfiguration {
                message: "term must be at least one period".to_string(),
            });
        }

        let organization_id = self.organization_id.ok_or(ServicingError::InvalidConfiguration {
            message: "organization required".to_string(),
        })?;

        let frequency = self.frequency.unwrap_or(RepaymentFrequency::Monthly);
        let method = self.method.unwrap_or(AmortizationMethod::EqualInstallments);
        let disbursement_date = self.disbursement_date.unwrap_or_else(|| now.date_naive());
        let first_due_date = match self.first_due_date {
            Some(date) => date,
            None => calendar::advance(disbursement_date, frequency, 1)?,
        };
        if first_due_date <= disbursement_date {
            return Err(ServicingError::InvalidConfiguration {
                message: format!("first due date {} must follow disbursement {}", first_due_date, disbursement_date),
            });
        }

        let id = Uuid::new_v4();
        let terms = ScheduleTerms {
            principal: amount,
            annual_rate: rate,
            frequency,
            method,
            first_due_date,
        };
        let generator = ScheduleGenerator::new(method);
        let rows = generator.generate(id, &terms, term_periods, RowNumbering::initial())?;
        let installment_amount = generator.contract_amount(&rows);
        let schedule = InstallmentSchedule::new(id, rows);

        let account_number = self.account_number.unwrap_or_else(|| {
            format!("LN-{}", Uuid::new_v4().to_string()[..8].to_uppercase())
        });
        let borrower_id = self.borrower_id.unwrap_or_else(|| {
            format!("BRW-{}", Uuid::new_v4().to_string()[..8].to_uppercase())
        });

        let mut loan = LoanAccount {
            id,
            organization_id,
            account_number,
            borrower_id,
            principal_disbursed: amount,
            disbursement_date,
            annual_interest_rate: rate,
            frequency,
            amortization_method: method,
            term_periods,
            installment_amount,
            collateral_value: self.collateral_value.unwrap_or(Money::ZERO),
            outstanding_principal: amount,
            accrued_interest: Money::ZERO,
            accrued_penalties: Money::ZERO,
            overdue_amount: Money::ZERO,
            credit_balance: Money::ZERO,
            total_paid: Money::ZERO,
            last_payment_date: None,
            status: LoanStatus::Active,
            classification_status: ClassificationStatus::Performing,
            days_in_arrears: 0,
            latest_classification: None,
            created_at: now,
            updated_at: now,
        };
        loan.sync_balances(&schedule, disbursement_date);

        Ok(Disbursement { loan, schedule })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hourglass_rs::TimeSource;

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()))
    }

    #[test]
    fn test_build_generates_schedule() {
        let time = time();
        let Disbursement { loan, schedule } = LoanBuilder::new()
            .organization("org-kigali")
            .amount(Money::from_major(1_200_000))
            .rate(Rate::from_percentage(18))
            .term_periods(12)
            .amortization(AmortizationMethod::DecliningPrincipal)
            .build(&time)
            .unwrap();

        assert_eq!(loan.disbursement_date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(loan.outstanding_principal, Money::from_major(1_200_000));
        assert_eq!(loan.installment_amount, Money::from_major(100_000));
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.classification_status, ClassificationStatus::Performing);
        assert_eq!(schedule.active().count(), 12);
        assert_eq!(
            schedule.next_due().unwrap().due_date,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
        );
    }

    #[test]
    fn test_missing_terms_rejected() {
        let result = LoanBuilder::new()
            .organization("org-kigali")
            .rate(Rate::from_percentage(18))
            .term_periods(12)
            .build(&time());
        assert!(matches!(result, Err(ServicingError::InvalidConfiguration { .. })));

        let result = LoanBuilder::new()
            .organization("org-kigali")
            .amount(Money::ZERO)
            .rate(Rate::from_percentage(18))
            .term_periods(12)
            .build(&time());
        assert!(matches!(result, Err(ServicingError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_first_due_date_must_follow_disbursement() {
        let result = LoanBuilder::new()
            .organization("org-kigali")
            .amount(Money::from_major(100_000))
            .rate(Rate::from_percentage(18))
            .term_periods(1)
            .first_due_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .build(&time());
        assert!(matches!(result, Err(ServicingError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_weekly_loan() {
        let Disbursement { loan, schedule } = LoanBuilder::new()
            .organization("org-kigali")
            .amount(Money::from_major(52_000))
            .rate(Rate::ZERO)
            .frequency(RepaymentFrequency::Weekly)
            .term_periods(4)
            .build(&time())
            .unwrap();

        assert_eq!(loan.installment_amount, Money::from_major(13_000));
        let dates: Vec<_> = schedule.active().map(|i| i.due_date).collect();
        assert_eq!(dates[3], NaiveDate::from_ymd_opt(2024, 1, 29).unwrap());
    }

    #[test]
    fn test_oversized_annuity_is_a_calculation_error() {
        // 10% a month compounded over 50 years
        let result = LoanBuilder::new()
            .organization("org-kigali")
            .amount(Money::from_major(1_000_000))
            .rate(Rate::from_percentage(120))
            .term_periods(600)
            .amortization(AmortizationMethod::EqualInstallments)
            .build(&time());
        assert!(matches!(result, Err(ServicingError::CalculationError { .. })));
    }
}
