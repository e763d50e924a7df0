use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::delay;
use crate::errors::{Result, ServicingError};
use crate::loan::LoanAccount;
use crate::schedule::{DeltaDirection, Installment, InstallmentMarks, InstallmentSchedule, ScheduleDelta};
use crate::types::{Allocation, ExcessPolicy, TransactionId};

use super::PaymentRequest;

/// how a payment was routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationMode {
    /// one named installment
    Installment,
    /// spread over the whole schedule
    General,
}

/// component of an installment a payment can settle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentComponent {
    Penalty,
    Interest,
    Principal,
}

/// per-installment split accumulated during allocation
#[derive(Debug, Clone, Copy, Default)]
struct RowSplit {
    penalty: Money,
    interest: Money,
    principal: Money,
}

impl RowSplit {
    fn is_empty(&self) -> bool {
        self.penalty.is_zero() && self.interest.is_zero() && self.principal.is_zero()
    }

    /// what the row still owes on a component after this split
    fn headroom(&self, row: &Installment, component: PaymentComponent) -> Money {
        match component {
            PaymentComponent::Penalty => row.remaining_penalty() - self.penalty,
            PaymentComponent::Interest => row.remaining_interest() - self.interest,
            PaymentComponent::Principal => row.remaining_principal() - self.principal,
        }
    }

    fn take(&mut self, row: &Installment, component: PaymentComponent, available: Money) -> Money {
        let payment = available.min(self.headroom(row, component)).max(Money::ZERO);
        match component {
            PaymentComponent::Penalty => self.penalty += payment,
            PaymentComponent::Interest => self.interest += payment,
            PaymentComponent::Principal => self.principal += payment,
        }
        available - payment
    }
}

/// a computed allocation, not yet applied to the schedule
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    pub transaction_id: TransactionId,
    pub mode: AllocationMode,
    pub allocation: Allocation,
    pub deltas: Vec<ScheduleDelta>,
}

/// splits a payment over a schedule: penalty, then interest, then principal,
/// with any remainder treated as excess
pub struct PaymentAllocator {
    duplicate_cooldown: Duration,
    excess_policy: ExcessPolicy,
}

impl PaymentAllocator {
    pub fn new(duplicate_cooldown: Duration, excess_policy: ExcessPolicy) -> Self {
        Self {
            duplicate_cooldown,
            excess_policy,
        }
    }

    /// compute deltas for a payment; the schedule is not touched
    pub fn allocate(
        &self,
        loan: &LoanAccount,
        schedule: &InstallmentSchedule,
        request: &PaymentRequest,
        today: NaiveDate,
    ) -> Result<AllocationOutcome> {
        request.validate(loan, today)?;

        let (mode, rows) = match request.target_installment {
            Some(id) => {
                let row = schedule.find_active(id)?;
                self.check_installment(loan, row, request.attempted_at)?;
                (AllocationMode::Installment, vec![row])
            }
            None => (AllocationMode::General, schedule.open().collect::<Vec<_>>()),
        };

        let mut splits = vec![RowSplit::default(); rows.len()];
        let mut remaining = request.amount;

        match mode {
            AllocationMode::Installment => {
                for component in [PaymentComponent::Penalty, PaymentComponent::Interest, PaymentComponent::Principal] {
                    remaining = splits[0].take(rows[0], component, remaining);
                }
            }
            AllocationMode::General => {
                // penalties everywhere first
                for (split, row) in splits.iter_mut().zip(&rows) {
                    remaining = split.take(row, PaymentComponent::Penalty, remaining);
                }
                // then interest already due
                for (split, row) in splits.iter_mut().zip(&rows) {
                    if row.due_date <= request.payment_date {
                        remaining = split.take(row, PaymentComponent::Interest, remaining);
                    }
                }
                // then row by row
                for (split, row) in splits.iter_mut().zip(&rows) {
                    remaining = split.take(row, PaymentComponent::Interest, remaining);
                    remaining = split.take(row, PaymentComponent::Principal, remaining);
                }
            }
        }

        if remaining.is_positive() && self.excess_policy == ExcessPolicy::Reject {
            return Err(ServicingError::InvalidAmount {
                loan_id: loan.id,
                amount: request.amount,
                message: format!("payment exceeds amount owed by {}", remaining),
            });
        }

        let transaction_id = Uuid::new_v4();
        let mut allocation = Allocation {
            excess_amount: remaining,
            ..Allocation::default()
        };
        let mut deltas = Vec::new();

        for (split, row) in splits.iter().zip(&rows) {
            if split.is_empty() {
                continue;
            }
            allocation.penalty_paid += split.penalty;
            allocation.interest_paid += split.interest;
            allocation.principal_paid += split.principal;
            deltas.push(self.delta(transaction_id, mode, row, split, request));
        }

        Ok(AllocationOutcome {
            transaction_id,
            mode,
            allocation,
            deltas,
        })
    }

    fn check_installment(&self, loan: &LoanAccount, row: &Installment, attempted_at: DateTime<Utc>) -> Result<()> {
        if row.is_paid {
            return Err(ServicingError::AlreadySettled {
                loan_id: loan.id,
                installment_id: row.id,
            });
        }

        if let Some(last_attempt) = row.last_payment_attempt {
            let retry_after = last_attempt + self.duplicate_cooldown;
            if attempted_at < retry_after {
                return Err(ServicingError::DuplicateAttempt {
                    loan_id: loan.id,
                    installment_id: row.id,
                    last_attempt,
                    retry_after,
                });
            }
        }

        Ok(())
    }

    fn delta(
        &self,
        transaction_id: TransactionId,
        mode: AllocationMode,
        row: &Installment,
        split: &RowSplit,
        request: &PaymentRequest,
    ) -> ScheduleDelta {
        let before = row.marks();
        // only a targeted payment counts as an attempt on its row
        let last_payment_attempt = match mode {
            AllocationMode::Installment => Some(request.attempted_at),
            AllocationMode::General => before.last_payment_attempt,
        };
        ScheduleDelta {
            transaction_id,
            installment_id: row.id,
            installment_number: row.installment_number,
            direction: DeltaDirection::Apply,
            penalty: split.penalty,
            interest: split.interest,
            principal: split.principal,
            after: InstallmentMarks {
                delayed_days: delay::compute_delay(row.due_date, request.payment_date).days,
                last_payment_date: Some(request.payment_date),
                last_payment_attempt,
                last_transaction: Some(transaction_id),
            },
            before,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::loan::{Disbursement, LoanBuilder};
    use crate::types::{AmortizationMethod, PaymentStatus};
    use chrono::TimeZone;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, hour, min, 0).unwrap()
    }

    /// 1M over 10 months at 2% a month: row 1 is 100k principal + 20k interest,
    /// row 2 is 100k + 18k
    fn disbursed() -> Disbursement {
        let time = SafeTimeProvider::new(TimeSource::Test(at(2024, 1, 1, 8, 0)));
        LoanBuilder::new()
            .organization("org-nyanza")
            .amount(Money::from_major(1_000_000))
            .rate(Rate::from_percentage(24))
            .term_periods(10)
            .amortization(AmortizationMethod::DecliningPrincipal)
            .build(&time)
            .unwrap()
    }

    fn allocator() -> PaymentAllocator {
        PaymentAllocator::new(Duration::seconds(60), ExcessPolicy::CarryAsCredit)
    }

    fn request(amount: i64, payment_date: NaiveDate, attempted_at: DateTime<Utc>) -> PaymentRequest {
        PaymentRequest::new(Money::from_major(amount), payment_date, "teller-01", attempted_at)
    }

    #[test]
    fn test_installment_payment_in_full() {
        let Disbursement { loan, mut schedule } = disbursed();
        let first = schedule.installments()[0].id;
        let req = request(120_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0)).for_installment(first);

        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 2, 1)).unwrap();
        assert_eq!(outcome.mode, AllocationMode::Installment);
        assert_eq!(outcome.allocation.interest_paid, Money::from_major(20_000));
        assert_eq!(outcome.allocation.principal_paid, Money::from_major(100_000));
        assert_eq!(outcome.allocation.excess_amount, Money::ZERO);
        assert_eq!(outcome.deltas.len(), 1);

        schedule.apply_all(&outcome.deltas, date(2024, 2, 1)).unwrap();
        let row = schedule.get(first).unwrap();
        assert!(row.is_paid);
        assert_eq!(row.status, PaymentStatus::Paid);
        assert_eq!(row.delayed_days, 0);
    }

    #[test]
    fn test_late_partial_payment_covers_interest_first() {
        let Disbursement { loan, mut schedule } = disbursed();
        let first = schedule.installments()[0].id;
        let req = request(50_000, date(2024, 2, 11), at(2024, 2, 11, 9, 0)).for_installment(first);

        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 2, 11)).unwrap();
        assert_eq!(outcome.allocation.interest_paid, Money::from_major(20_000));
        assert_eq!(outcome.allocation.principal_paid, Money::from_major(30_000));

        schedule.apply_all(&outcome.deltas, date(2024, 2, 11)).unwrap();
        let row = schedule.get(first).unwrap();
        assert_eq!(row.status, PaymentStatus::Partial);
        assert_eq!(row.delayed_days, 10);
        assert_eq!(row.remaining_amount(), Money::from_major(70_000));
    }

    #[test]
    fn test_installment_excess_is_carried() {
        let Disbursement { loan, schedule } = disbursed();
        let first = schedule.installments()[0].id;
        let req = request(125_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0)).for_installment(first);

        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 2, 1)).unwrap();
        assert_eq!(outcome.allocation.total_applied(), Money::from_major(120_000));
        assert_eq!(outcome.allocation.excess_amount, Money::from_major(5_000));
        assert_eq!(outcome.allocation.total(), Money::from_major(125_000));
    }

    #[test]
    fn test_general_payment_order() {
        let Disbursement { loan, mut schedule } = disbursed();
        for row in schedule.active_mut().filter(|r| r.installment_number == 1) {
            row.due_penalty = Money::from_major(5_000);
        }

        // both the first and second rows are due by 2024-03-05
        let req = request(200_000, date(2024, 3, 5), at(2024, 3, 5, 9, 0));
        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 3, 5)).unwrap();

        assert_eq!(outcome.mode, AllocationMode::General);
        assert_eq!(outcome.allocation.penalty_paid, Money::from_major(5_000));
        assert_eq!(outcome.allocation.interest_paid, Money::from_major(38_000));
        assert_eq!(outcome.allocation.principal_paid, Money::from_major(157_000));
        assert_eq!(outcome.allocation.excess_amount, Money::ZERO);

        let second = &outcome.deltas[1];
        assert_eq!(second.installment_number, 2);
        assert_eq!(second.principal, Money::from_major(57_000));
        assert_eq!(second.after.delayed_days, 4);
    }

    #[test]
    fn test_general_payment_beyond_balance() {
        let Disbursement { loan, schedule } = disbursed();
        let owed = schedule.total_remaining();
        let req = PaymentRequest::new(
            owed + Money::from_major(1_000),
            date(2024, 1, 15),
            "teller-01",
            at(2024, 1, 15, 9, 0),
        );

        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 1, 15)).unwrap();
        assert_eq!(outcome.allocation.excess_amount, Money::from_major(1_000));
        assert_eq!(outcome.deltas.len(), 10);

        let strict = PaymentAllocator::new(Duration::seconds(60), ExcessPolicy::Reject);
        assert!(matches!(
            strict.allocate(&loan, &schedule, &req, date(2024, 1, 15)),
            Err(ServicingError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_settled_installment_rejected() {
        let Disbursement { loan, mut schedule } = disbursed();
        let first = schedule.installments()[0].id;
        let req = request(120_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0)).for_installment(first);
        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 2, 1)).unwrap();
        schedule.apply_all(&outcome.deltas, date(2024, 2, 1)).unwrap();

        let again = request(1_000, date(2024, 2, 2), at(2024, 2, 2, 9, 0)).for_installment(first);
        assert!(matches!(
            allocator().allocate(&loan, &schedule, &again, date(2024, 2, 2)),
            Err(ServicingError::AlreadySettled { .. })
        ));
    }

    #[test]
    fn test_duplicate_attempt_within_cooldown() {
        let Disbursement { loan, mut schedule } = disbursed();
        let first = schedule.installments()[0].id;
        let req = request(10_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0)).for_installment(first);
        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 2, 1)).unwrap();
        schedule.apply_all(&outcome.deltas, date(2024, 2, 1)).unwrap();

        let retry = request(10_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0) + Duration::seconds(30))
            .for_installment(first);
        match allocator().allocate(&loan, &schedule, &retry, date(2024, 2, 1)) {
            Err(ServicingError::DuplicateAttempt { retry_after, .. }) => {
                assert_eq!(retry_after, at(2024, 2, 1, 9, 1));
            }
            other => panic!("expected duplicate attempt, got {:?}", other),
        }

        let later = request(10_000, date(2024, 2, 1), at(2024, 2, 1, 9, 1)).for_installment(first);
        assert!(allocator().allocate(&loan, &schedule, &later, date(2024, 2, 1)).is_ok());
    }

    #[test]
    fn test_on_time_payment_clears_recorded_delay() {
        let Disbursement { loan, mut schedule } = disbursed();
        let first = schedule.installments()[0].id;
        delay::refresh_delays(&mut schedule, date(2024, 2, 11));
        assert_eq!(schedule.get(first).unwrap().delayed_days, 10);

        // cash received on the due date, posted ten days later
        let req = request(50_000, date(2024, 2, 1), at(2024, 2, 11, 9, 0)).for_installment(first);
        let outcome = allocator().allocate(&loan, &schedule, &req, date(2024, 2, 11)).unwrap();
        assert_eq!(outcome.deltas[0].before.delayed_days, 10);
        assert_eq!(outcome.deltas[0].after.delayed_days, 0);

        schedule.apply_all(&outcome.deltas, date(2024, 2, 11)).unwrap();
        let row = schedule.get(first).unwrap();
        assert!(!row.is_paid);
        assert_eq!(row.status, PaymentStatus::Partial);
        assert_eq!(row.delayed_days, 0);

        delay::refresh_delays(&mut schedule, date(2024, 2, 20));
        assert_eq!(schedule.get(first).unwrap().delayed_days, 0);
    }

    #[test]
    fn test_general_payment_does_not_block_targeted_payment() {
        let Disbursement { loan, mut schedule } = disbursed();
        let second = schedule.installments()[1].id;

        // settles row 1 and spills 30k onto row 2
        let general = request(150_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0));
        let outcome = allocator().allocate(&loan, &schedule, &general, date(2024, 2, 1)).unwrap();
        assert_eq!(outcome.deltas.len(), 2);
        schedule.apply_all(&outcome.deltas, date(2024, 2, 1)).unwrap();

        let row = schedule.get(second).unwrap();
        assert_eq!(row.paid_total(), Money::from_major(30_000));
        assert_eq!(row.last_payment_attempt, None);
        assert_eq!(row.last_payment_date, Some(date(2024, 2, 1)));

        let targeted = request(20_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0) + Duration::seconds(10))
            .for_installment(second);
        let outcome = allocator().allocate(&loan, &schedule, &targeted, date(2024, 2, 1)).unwrap();
        assert_eq!(outcome.allocation.principal_paid, Money::from_major(20_000));
    }

    #[test]
    fn test_unknown_installment() {
        let Disbursement { loan, schedule } = disbursed();
        let req = request(10_000, date(2024, 2, 1), at(2024, 2, 1, 9, 0)).for_installment(Uuid::new_v4());
        assert!(matches!(
            allocator().allocate(&loan, &schedule, &req, date(2024, 2, 1)),
            Err(ServicingError::ScheduleNotFound { .. })
        ));
    }
}
