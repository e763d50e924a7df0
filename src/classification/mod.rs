//! Risk classification of loans by days-in-arrears.
//!
//! Status is recomputed from scratch on every evaluation: there is no dwell
//! time, so a loan that clears its arrears goes straight back to
//! `Performing`. Evaluation is pure; persisting the result is a separate
//! append to [`ClassificationHistory`].

pub mod provisioning;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::delay;
use crate::errors::{Result, ServicingError};
use crate::loan::LoanAccount;
use crate::schedule::InstallmentSchedule;
use crate::types::{ClassificationId, ClassificationStatus, LoanId};

pub use provisioning::{ProvisioningBucket, ProvisioningReport};

/// provisioning rate per status
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRates {
    pub performing: Rate,
    pub watch: Rate,
    pub substandard: Rate,
    pub doubtful: Rate,
    pub loss: Rate,
}

/// day bands and provisioning rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationPolicy {
    /// last day-in-arrears still classed as watch
    pub watch_max_days: u32,
    pub substandard_max_days: u32,
    /// beyond this a loan is a loss
    pub doubtful_max_days: u32,
    pub rates: ProvisioningRates,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ClassificationPolicy {
    /// 1-30 watch, 31-90 substandard, 91-180 doubtful, beyond loss
    pub fn standard() -> Self {
        Self {
            watch_max_days: 30,
            substandard_max_days: 90,
            doubtful_max_days: 180,
            rates: ProvisioningRates {
                performing: Rate::ZERO,
                watch: Rate::from_percentage(5),
                substandard: Rate::from_percentage(20),
                doubtful: Rate::from_percentage(50),
                loss: Rate::ONE,
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0 < self.watch_max_days
            && self.watch_max_days < self.substandard_max_days
            && self.substandard_max_days < self.doubtful_max_days)
        {
            return Err(ServicingError::InvalidConfiguration {
                message: format!(
                    "classification bands must increase: watch {}, substandard {}, doubtful {}",
                    self.watch_max_days, self.substandard_max_days, self.doubtful_max_days
                ),
            });
        }

        let rates = ClassificationStatus::ALL.map(|status| self.provisioning_rate(status));
        if rates.iter().any(|r| *r < Rate::ZERO || *r > Rate::ONE) {
            return Err(ServicingError::InvalidConfiguration {
                message: "provisioning rates must lie between 0 and 1".to_string(),
            });
        }
        if rates.windows(2).any(|w| w[0] > w[1]) {
            return Err(ServicingError::InvalidConfiguration {
                message: "provisioning rates must not fall as severity rises".to_string(),
            });
        }

        Ok(())
    }

    /// status for a days-in-arrears count, monotonic in `days`
    pub fn status_for(&self, days: u32) -> ClassificationStatus {
        match days {
            0 => ClassificationStatus::Performing,
            d if d <= self.watch_max_days => ClassificationStatus::Watch,
            d if d <= self.substandard_max_days => ClassificationStatus::Substandard,
            d if d <= self.doubtful_max_days => ClassificationStatus::Doubtful,
            _ => ClassificationStatus::Loss,
        }
    }

    pub fn provisioning_rate(&self, status: ClassificationStatus) -> Rate {
        match status {
            ClassificationStatus::Performing => self.rates.performing,
            ClassificationStatus::Watch => self.rates.watch,
            ClassificationStatus::Substandard => self.rates.substandard,
            ClassificationStatus::Doubtful => self.rates.doubtful,
            ClassificationStatus::Loss => self.rates.loss,
        }
    }
}

/// what prompted an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationTrigger {
    Disbursement,
    Payment,
    Reversal,
    Recalculation,
    DailyTick,
    Backfill,
}

/// result of one evaluation, before it is recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    pub loan_id: LoanId,
    pub classification_date: NaiveDate,
    pub trigger: ClassificationTrigger,
    pub days_overdue: u32,
    pub previous_status: ClassificationStatus,
    pub new_status: ClassificationStatus,
    pub was_reclassified: bool,
    pub provisioning_rate: Rate,
    pub outstanding_principal: Money,
    pub net_exposure: Money,
    pub provision_required: Money,
}

/// one entry of a loan's classification history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: ClassificationId,
    pub loan_id: LoanId,
    pub classification_date: NaiveDate,
    pub days_in_arrears: u32,
    pub status: ClassificationStatus,
    pub previous_status: ClassificationStatus,
    pub provisioning_rate: Rate,
    pub outstanding_principal: Money,
    pub net_exposure: Money,
    pub provision_required: Money,
    pub trigger: ClassificationTrigger,
    pub recorded_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn from_outcome(outcome: &ClassificationOutcome, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            loan_id: outcome.loan_id,
            classification_date: outcome.classification_date,
            days_in_arrears: outcome.days_overdue,
            status: outcome.new_status,
            previous_status: outcome.previous_status,
            provisioning_rate: outcome.provisioning_rate,
            outstanding_principal: outcome.outstanding_principal,
            net_exposure: outcome.net_exposure,
            provision_required: outcome.provision_required,
            trigger: outcome.trigger,
            recorded_at,
        }
    }
}

/// classification state machine
pub struct ClassificationEngine<'a> {
    policy: &'a ClassificationPolicy,
}

impl<'a> ClassificationEngine<'a> {
    pub fn new(policy: &'a ClassificationPolicy) -> Self {
        Self { policy }
    }

    /// evaluate a loan against its schedule as of a date
    pub fn evaluate(
        &self,
        loan: &LoanAccount,
        schedule: &InstallmentSchedule,
        as_of: NaiveDate,
        trigger: ClassificationTrigger,
    ) -> ClassificationOutcome {
        let days_overdue = delay::days_in_arrears(schedule, as_of);
        let new_status = self.policy.status_for(days_overdue);
        let provisioning_rate = self.policy.provisioning_rate(new_status);

        let outstanding_principal = schedule.outstanding_principal();
        let net_exposure = (outstanding_principal + schedule.accrued_interest(as_of))
            .saturating_sub(loan.collateral_value);
        let provision_required = net_exposure.apply_rate(provisioning_rate);

        ClassificationOutcome {
            loan_id: loan.id,
            classification_date: as_of,
            trigger,
            days_overdue,
            previous_status: loan.classification_status,
            new_status,
            was_reclassified: new_status != loan.classification_status,
            provisioning_rate,
            outstanding_principal,
            net_exposure,
            provision_required,
        }
    }
}

/// append-only classification series of one loan
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassificationHistory {
    records: Vec<ClassificationRecord>,
}

impl ClassificationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: ClassificationRecord) -> ClassificationId {
        let id = record.id;
        self.records.push(record);
        id
    }

    pub fn latest(&self) -> Option<&ClassificationRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[ClassificationRecord] {
        &self.records
    }

    /// records whose status differs from the one before
    pub fn transitions(&self) -> impl Iterator<Item = &ClassificationRecord> {
        self.records.iter().filter(|r| r.status != r.previous_status)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// move a loan onto an evaluated status
pub fn apply_outcome(loan: &mut LoanAccount, outcome: &ClassificationOutcome, record_id: ClassificationId) {
    loan.classification_status = outcome.new_status;
    loan.days_in_arrears = outcome.days_overdue;
    loan.latest_classification = Some(record_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::{Disbursement, LoanBuilder};
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn disbursed() -> Disbursement {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        LoanBuilder::new()
            .organization("org-huye")
            .amount(Money::from_major(1_000_000))
            .rate(Rate::ZERO)
            .term_periods(10)
            .collateral_value(Money::from_major(200_000))
            .build(&time)
            .unwrap()
    }

    #[test]
    fn test_band_edges() {
        let policy = ClassificationPolicy::standard();
        assert_eq!(policy.status_for(0), ClassificationStatus::Performing);
        assert_eq!(policy.status_for(1), ClassificationStatus::Watch);
        assert_eq!(policy.status_for(30), ClassificationStatus::Watch);
        assert_eq!(policy.status_for(31), ClassificationStatus::Substandard);
        assert_eq!(policy.status_for(90), ClassificationStatus::Substandard);
        assert_eq!(policy.status_for(91), ClassificationStatus::Doubtful);
        assert_eq!(policy.status_for(180), ClassificationStatus::Doubtful);
        assert_eq!(policy.status_for(181), ClassificationStatus::Loss);
    }

    #[test]
    fn test_rates_follow_status() {
        let policy = ClassificationPolicy::standard();
        assert_eq!(policy.provisioning_rate(ClassificationStatus::Performing), Rate::ZERO);
        assert_eq!(policy.provisioning_rate(ClassificationStatus::Loss), Rate::ONE);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_invalid_policies() {
        let mut policy = ClassificationPolicy::standard();
        policy.substandard_max_days = 20;
        assert!(policy.validate().is_err());

        let mut policy = ClassificationPolicy::standard();
        policy.rates.doubtful = Rate::from_percentage(10);
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_evaluate_reports_transition() {
        let Disbursement { loan, schedule } = disbursed();
        let policy = ClassificationPolicy::standard();
        let engine = ClassificationEngine::new(&policy);

        // first installment due 2024-02-01, 45 days late on 2024-03-17
        let outcome = engine.evaluate(&loan, &schedule, date(2024, 3, 17), ClassificationTrigger::DailyTick);
        assert_eq!(outcome.days_overdue, 45);
        assert_eq!(outcome.new_status, ClassificationStatus::Substandard);
        assert_eq!(outcome.previous_status, ClassificationStatus::Performing);
        assert!(outcome.was_reclassified);

        // exposure nets out collateral, 20% provision
        assert_eq!(outcome.net_exposure, Money::from_major(800_000));
        assert_eq!(outcome.provision_required, Money::from_major(160_000));
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let Disbursement { loan, schedule } = disbursed();
        let policy = ClassificationPolicy::standard();
        let engine = ClassificationEngine::new(&policy);

        let a = engine.evaluate(&loan, &schedule, date(2024, 6, 1), ClassificationTrigger::Backfill);
        let b = engine.evaluate(&loan, &schedule, date(2024, 6, 1), ClassificationTrigger::Backfill);
        assert_eq!(a, b);
    }

    #[test]
    fn test_history_is_append_only_series() {
        let Disbursement { mut loan, schedule } = disbursed();
        let policy = ClassificationPolicy::standard();
        let engine = ClassificationEngine::new(&policy);
        let mut history = ClassificationHistory::new();
        let recorded_at = Utc.with_ymd_and_hms(2024, 3, 17, 0, 0, 0).unwrap();

        for as_of in [date(2024, 1, 15), date(2024, 2, 10), date(2024, 2, 11)] {
            let outcome = engine.evaluate(&loan, &schedule, as_of, ClassificationTrigger::DailyTick);
            let id = history.append(ClassificationRecord::from_outcome(&outcome, recorded_at));
            apply_outcome(&mut loan, &outcome, id);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.transitions().count(), 1);
        assert_eq!(loan.classification_status, ClassificationStatus::Watch);
        assert_eq!(loan.days_in_arrears, 10);
        assert_eq!(loan.latest_classification, history.latest().map(|r| r.id));
    }
}
