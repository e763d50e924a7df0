use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::decimal::{Money, Rate};
use crate::schedule::InstallmentSchedule;
use crate::types::InstallmentId;

/// late penalty configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// annual penalty rate charged on the overdue principal and interest
    pub annual_rate: Rate,
    /// days past due before penalties start
    pub grace_period_days: u32,
    /// floor for the first charge on an installment
    pub minimum_penalty: Money,
    /// total penalty on an installment never exceeds this share of its overdue base
    pub cap_ratio: Option<Rate>,
}

impl PenaltyConfig {
    pub fn new(annual_rate: Rate, grace_period_days: u32) -> Self {
        Self {
            annual_rate,
            grace_period_days,
            minimum_penalty: Money::ZERO,
            cap_ratio: None,
        }
    }
}

/// penalty calculation result
#[derive(Debug, Clone, PartialEq)]
pub struct PenaltyCalculation {
    pub penalty_amount: Money,
    pub days_charged: u32,
    pub overdue_base: Money,
}

/// penalty charged on one installment during an accrual run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyAccrual {
    pub installment_id: InstallmentId,
    pub installment_number: u32,
    pub amount: Money,
    pub days_charged: u32,
}

/// engine for calculating late penalties
pub struct PenaltyEngine {
    pub config: PenaltyConfig,
}

impl PenaltyEngine {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    /// simple daily penalty on an overdue base
    pub fn calculate_penalty(&self, overdue_base: Money, days_charged: u32) -> PenaltyCalculation {
        let daily_rate = self.config.annual_rate.daily_rate().as_decimal();
        let penalty = overdue_base.as_decimal() * daily_rate * Decimal::from(days_charged);

        PenaltyCalculation {
            penalty_amount: Money::from_decimal(penalty),
            days_charged,
            overdue_base,
        }
    }

    /// accrue penalties on every overdue installment up to `as_of`
    ///
    /// each row keeps a watermark so re-running for the same date charges nothing
    pub fn accrue(&self, schedule: &mut InstallmentSchedule, as_of: NaiveDate) -> Vec<PenaltyAccrual> {
        let mut accruals = Vec::new();

        for row in schedule.active_mut().filter(|i| i.is_past_due(as_of)) {
            let Some(chargeable_from) = row
                .due_date
                .checked_add_days(Days::new(self.config.grace_period_days as u64))
            else {
                continue;
            };
            let from = row
                .penalty_accrued_through
                .map_or(chargeable_from, |watermark| watermark.max(chargeable_from));

            let days = calendar::days_between(from, as_of);
            if days <= 0 {
                continue;
            }

            let base = row.remaining_principal() + row.remaining_interest();
            let mut amount = self.calculate_penalty(base, days as u32).penalty_amount;

            if row.due_penalty.is_zero() {
                amount = amount.max(self.config.minimum_penalty);
            }
            if let Some(cap) = self.config.cap_ratio {
                let headroom = base.apply_rate(cap).saturating_sub(row.due_penalty);
                amount = amount.min(headroom);
            }

            row.penalty_accrued_through = Some(as_of);
            if amount.is_positive() {
                row.due_penalty += amount;
                row.refresh_status(as_of);
                accruals.push(PenaltyAccrual {
                    installment_id: row.id,
                    installment_number: row.installment_number,
                    amount,
                    days_charged: days as u32,
                });
            }
        }

        accruals
    }
}
