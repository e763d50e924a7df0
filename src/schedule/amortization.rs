use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::calendar;
use crate::decimal::{Money, Rate};
use crate::errors::{Result, ServicingError};
use crate::types::{AmortizationMethod, LoanId, RepaymentFrequency};

use super::Installment;

/// upper bound on generated periods, guards runaway term searches
pub const MAX_PERIODS: u32 = 1_200;

/// inputs shared by every generation mode
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleTerms {
    pub principal: Money,
    pub annual_rate: Rate,
    pub frequency: RepaymentFrequency,
    pub method: AmortizationMethod,
    pub first_due_date: NaiveDate,
}

/// where generated rows sit in the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowNumbering {
    pub first_number: u32,
    pub version: u32,
}

impl RowNumbering {
    /// numbering for a schedule built at disbursement
    pub fn initial() -> Self {
        Self { first_number: 1, version: 1 }
    }
}

/// schedule generator
pub struct ScheduleGenerator {
    method: AmortizationMethod,
}

impl ScheduleGenerator {
    pub fn new(method: AmortizationMethod) -> Self {
        Self { method }
    }

    /// generate a schedule over a fixed number of periods
    pub fn generate(
        &self,
        loan_id: LoanId,
        terms: &ScheduleTerms,
        periods: u32,
        numbering: RowNumbering,
    ) -> Result<Vec<Installment>> {
        if periods == 0 || periods > MAX_PERIODS {
            return Err(ServicingError::CalculationError {
                message: format!("period count {} outside 1..={}", periods, MAX_PERIODS),
            });
        }

        let rate = terms.annual_rate.periodic(terms.frequency).as_decimal();
        let level_principal = terms.principal / Decimal::from(periods);
        let emi = match self.method {
            AmortizationMethod::EqualInstallments => equal_installment_amount(terms.principal, rate, periods)?,
            AmortizationMethod::DecliningPrincipal | AmortizationMethod::Flat => Money::ZERO,
        };

        let mut rows = Vec::with_capacity(periods as usize);
        let mut balance = terms.principal;

        for k in 0..periods {
            let is_last = k + 1 == periods;
            let interest = self.period_interest(terms.principal, balance, rate);

            let principal = if is_last {
                balance
            } else {
                match self.method {
                    AmortizationMethod::EqualInstallments => (emi - interest).max(Money::ZERO).min(balance),
                    AmortizationMethod::DecliningPrincipal | AmortizationMethod::Flat => level_principal.min(balance),
                }
            };

            balance -= principal;
            rows.push(self.row(loan_id, terms, numbering, k, principal, interest, balance)?);
        }

        Ok(rows)
    }

    /// generate as many periods as it takes to amortize the principal while
    /// holding the contractual amount: the total payment for equal
    /// installments, the principal portion otherwise
    pub fn generate_holding_amount(
        &self,
        loan_id: LoanId,
        terms: &ScheduleTerms,
        held_amount: Money,
        numbering: RowNumbering,
    ) -> Result<Vec<Installment>> {
        if !held_amount.is_positive() {
            return Err(ServicingError::CalculationError {
                message: format!("held installment amount must be positive, got {}", held_amount),
            });
        }

        let rate = terms.annual_rate.periodic(terms.frequency).as_decimal();
        let mut rows = Vec::new();
        let mut balance = terms.principal;
        let mut k = 0;

        while balance.is_positive() {
            if k >= MAX_PERIODS {
                return Err(ServicingError::CalculationError {
                    message: format!("installment {} does not amortize {} within {} periods", held_amount, terms.principal, MAX_PERIODS),
                });
            }

            let interest = self.period_interest(terms.principal, balance, rate);
            let principal = match self.method {
                AmortizationMethod::EqualInstallments => {
                    if held_amount <= interest {
                        return Err(ServicingError::CalculationError {
                            message: format!("installment {} does not cover period interest {}", held_amount, interest),
                        });
                    }
                    (held_amount - interest).min(balance)
                }
                AmortizationMethod::DecliningPrincipal | AmortizationMethod::Flat => held_amount.min(balance),
            };

            balance -= principal;
            rows.push(self.row(loan_id, terms, numbering, k, principal, interest, balance)?);
            k += 1;
        }

        Ok(rows)
    }

    /// the amount a schedule holds constant, see `generate_holding_amount`
    pub fn contract_amount(&self, rows: &[Installment]) -> Money {
        rows.first()
            .map(|first| match self.method {
                AmortizationMethod::EqualInstallments => first.due_principal + first.due_interest,
                AmortizationMethod::DecliningPrincipal | AmortizationMethod::Flat => first.due_principal,
            })
            .unwrap_or(Money::ZERO)
    }

    fn period_interest(&self, original: Money, balance: Money, rate: Decimal) -> Money {
        match self.method {
            AmortizationMethod::Flat => original * rate,
            AmortizationMethod::EqualInstallments | AmortizationMethod::DecliningPrincipal => balance * rate,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn row(
        &self,
        loan_id: LoanId,
        terms: &ScheduleTerms,
        numbering: RowNumbering,
        offset: u32,
        principal: Money,
        interest: Money,
        balance_after: Money,
    ) -> Result<Installment> {
        let due_date = calendar::advance(terms.first_due_date, terms.frequency, offset)?;
        Ok(Installment::new(
            loan_id,
            numbering.first_number + offset,
            numbering.version,
            due_date,
            principal,
            interest,
            balance_after,
        ))
    }
}

/// equal installment (annuity) amount
///
/// EMI = P * r * (1 + r)^n / ((1 + r)^n - 1)
pub fn equal_installment_amount(principal: Money, period_rate: Decimal, periods: u32) -> Result<Money> {
    if periods == 0 {
        return Ok(principal);
    }

    if period_rate.is_zero() {
        return Ok(principal / Decimal::from(periods));
    }

    let overflow = || ServicingError::CalculationError {
        message: format!(
            "installment amount overflows for {} at {} over {} periods",
            principal, period_rate, periods
        ),
    };

    let base = Decimal::ONE + period_rate;
    let mut compound = Decimal::ONE;
    for _ in 0..periods {
        compound = compound.checked_mul(base).ok_or_else(overflow)?;
    }

    let numerator = principal
        .as_decimal()
        .checked_mul(period_rate)
        .and_then(|n| n.checked_mul(compound))
        .ok_or_else(overflow)?;
    let denominator = compound - Decimal::ONE;

    numerator
        .checked_div(denominator)
        .map(Money::from_decimal)
        .ok_or_else(overflow)
}
