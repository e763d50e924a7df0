use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{Result, ServicingError};
use crate::loan::LoanAccount;
use crate::types::{InstallmentId, LoanId, RecalculationType};

use super::amortization::RowNumbering;
use super::{Installment, InstallmentSchedule, ScheduleGenerator};

/// caller's choice of how to re-amortize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculationOptions {
    #[serde(rename = "type")]
    pub recalculation_type: RecalculationType,
    pub effective_date: NaiveDate,
}

/// replacement rows and the rows they supersede, not yet committed
#[derive(Debug, Clone, PartialEq)]
pub struct RecalculationPlan {
    pub loan_id: LoanId,
    pub recalculation_type: RecalculationType,
    pub effective_date: NaiveDate,
    pub superseded: Vec<InstallmentId>,
    pub new_installments: Vec<Installment>,
    pub principal_amortized: Money,
    pub previous_installment_amount: Money,
    pub new_installment_amount: Money,
    pub previous_periods: u32,
    pub new_periods: u32,
}

impl RecalculationPlan {
    /// supersede the replaced rows and add the new ones
    pub fn commit(&self, schedule: &mut InstallmentSchedule, as_of: NaiveDate) {
        schedule.supersede(&self.superseded);
        schedule.extend(self.new_installments.clone());
        schedule.refresh_statuses(as_of);
    }
}

/// re-amortizes the unpaid tail of a schedule
pub struct ScheduleRecalculator;

impl ScheduleRecalculator {
    pub fn recalculate(
        loan: &LoanAccount,
        schedule: &InstallmentSchedule,
        options: RecalculationOptions,
    ) -> Result<RecalculationPlan> {
        let effective = options.effective_date;

        if let Some(last_paid) = schedule.last_paid_due_date() {
            if effective < last_paid {
                return Err(ServicingError::InvalidEffectiveDate {
                    loan_id: loan.id,
                    effective_date: effective,
                    message: format!("precedes installment already paid on due date {}", last_paid),
                });
            }
        }

        let replaced: Vec<&Installment> = schedule
            .active()
            .filter(|i| !i.is_paid && i.due_date >= effective)
            .collect();
        let Some(first) = replaced.first() else {
            return Err(ServicingError::InvalidEffectiveDate {
                loan_id: loan.id,
                effective_date: effective,
                message: "no unpaid installments fall on or after this date".to_string(),
            });
        };

        let principal_amortized: Money = replaced.iter().map(|i| i.remaining_principal()).sum();
        let carried_penalty: Money = replaced.iter().map(|i| i.remaining_penalty()).sum();
        let penalty_watermark = replaced.iter().filter_map(|i| i.penalty_accrued_through).max();

        let terms = loan.schedule_terms(principal_amortized, first.due_date);
        let numbering = RowNumbering {
            first_number: first.installment_number,
            version: schedule.current_version() + 1,
        };
        let generator = ScheduleGenerator::new(loan.amortization_method);

        let mut rows = match options.recalculation_type {
            RecalculationType::ReduceInstallment => {
                generator.generate(loan.id, &terms, replaced.len() as u32, numbering)?
            }
            RecalculationType::ReduceTerm => {
                generator.generate_holding_amount(loan.id, &terms, loan.installment_amount, numbering)?
            }
        };

        // penalties already charged follow the debt onto the first new row
        if let Some(head) = rows.first_mut() {
            head.due_penalty = carried_penalty;
            head.penalty_accrued_through = penalty_watermark;
        }

        Ok(RecalculationPlan {
            loan_id: loan.id,
            recalculation_type: options.recalculation_type,
            effective_date: effective,
            superseded: replaced.iter().map(|i| i.id).collect(),
            principal_amortized,
            previous_installment_amount: loan.installment_amount,
            new_installment_amount: generator.contract_amount(&rows),
            previous_periods: replaced.len() as u32,
            new_periods: rows.len() as u32,
            new_installments: rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::{Disbursement, LoanBuilder};
    use crate::types::AmortizationMethod;
    use crate::decimal::Rate;
    use chrono::{TimeZone, Utc};
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// 1.2M over 12 months at 0%, first six rows paid and 50k prepaid on the seventh
    fn half_repaid() -> Disbursement {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let Disbursement { loan, mut schedule } = LoanBuilder::new()
            .organization("org-musanze")
            .amount(Money::from_major(1_200_000))
            .rate(Rate::ZERO)
            .term_periods(12)
            .amortization(AmortizationMethod::DecliningPrincipal)
            .build(&time)
            .unwrap();

        for row in schedule.active_mut() {
            if row.installment_number <= 6 {
                row.paid_principal = row.due_principal;
            } else if row.installment_number == 7 {
                row.paid_principal = Money::from_major(50_000);
            }
            row.refresh_status(date(2024, 7, 1));
        }

        Disbursement { loan, schedule }
    }

    #[test]
    fn test_reduce_installment_keeps_term() {
        let Disbursement { loan, mut schedule } = half_repaid();
        let options = RecalculationOptions {
            recalculation_type: RecalculationType::ReduceInstallment,
            effective_date: date(2024, 8, 1),
        };

        let plan = ScheduleRecalculator::recalculate(&loan, &schedule, options).unwrap();
        assert_eq!(plan.superseded.len(), 6);
        assert_eq!(plan.new_periods, 6);
        assert_eq!(plan.principal_amortized, Money::from_major(550_000));
        assert!(plan.new_installment_amount < plan.previous_installment_amount);

        let first = &plan.new_installments[0];
        assert_eq!(first.installment_number, 7);
        assert_eq!(first.schedule_version, 2);
        assert_eq!(first.due_date, date(2024, 8, 1));

        plan.commit(&mut schedule, date(2024, 7, 15));
        assert_eq!(schedule.outstanding_principal(), Money::from_major(550_000));
        assert_eq!(schedule.active().filter(|i| i.schedule_version == 2).count(), 6);
        // superseded rows stay on file
        assert_eq!(schedule.installments().len(), 18);
    }

    #[test]
    fn test_reduce_term_holds_installment() {
        let Disbursement { loan, schedule } = half_repaid();
        let options = RecalculationOptions {
            recalculation_type: RecalculationType::ReduceTerm,
            effective_date: date(2024, 8, 1),
        };

        let plan = ScheduleRecalculator::recalculate(&loan, &schedule, options).unwrap();
        assert_eq!(plan.new_installment_amount, Money::from_major(100_000));
        assert_eq!(plan.new_periods, 6);
        assert_eq!(plan.new_installments[5].due_principal, Money::from_major(50_000));
        assert_eq!(plan.new_installments[5].due_date, date(2025, 1, 1));
    }

    #[test]
    fn test_effective_date_before_paid_row_rejected() {
        let Disbursement { loan, schedule } = half_repaid();
        let options = RecalculationOptions {
            recalculation_type: RecalculationType::ReduceTerm,
            effective_date: date(2024, 5, 1),
        };
        let result = ScheduleRecalculator::recalculate(&loan, &schedule, options);
        assert!(matches!(result, Err(ServicingError::InvalidEffectiveDate { .. })));
    }

    #[test]
    fn test_effective_date_past_schedule_rejected() {
        let Disbursement { loan, schedule } = half_repaid();
        let options = RecalculationOptions {
            recalculation_type: RecalculationType::ReduceInstallment,
            effective_date: date(2026, 1, 1),
        };
        let result = ScheduleRecalculator::recalculate(&loan, &schedule, options);
        assert!(matches!(result, Err(ServicingError::InvalidEffectiveDate { .. })));
    }
}
