//! Property-based tests for allocation, schedule deltas and classification.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use loan_servicing_rs::{
    AmortizationMethod, ClassificationPolicy, Disbursement, ExcessPolicy, InstallmentSchedule, LoanBuilder, Money,
    PaymentAllocator, PaymentRequest, Rate, SafeTimeProvider, TimeSource,
};
use loan_servicing_rs::delay::compute_delay;
use proptest::prelude::*;

fn disbursed(principal: i64, rate_pct: u32, periods: u32, method: AmortizationMethod) -> Disbursement {
    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
    LoanBuilder::new()
        .organization("org-prop")
        .amount(Money::from_major(principal))
        .rate(Rate::from_percentage(rate_pct))
        .term_periods(periods)
        .amortization(method)
        .build(&time)
        .unwrap()
}

fn method_strategy() -> impl Strategy<Value = AmortizationMethod> {
    prop_oneof![
        Just(AmortizationMethod::EqualInstallments),
        Just(AmortizationMethod::DecliningPrincipal),
        Just(AmortizationMethod::Flat),
    ]
}

fn paid_state(schedule: &InstallmentSchedule) -> Vec<(Money, Money, Money, bool, u32, Option<NaiveDate>)> {
    schedule
        .active()
        .map(|i| {
            (
                i.paid_penalty,
                i.paid_interest,
                i.paid_principal,
                i.is_paid,
                i.delayed_days,
                i.last_payment_date,
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// every unit paid lands in exactly one component or in excess
    #[test]
    fn prop_allocation_conserves_amount(
        principal in 10_000i64..5_000_000,
        rate_pct in 0u32..60,
        periods in 1u32..24,
        method in method_strategy(),
        cents in 1i64..800_000_000,
        offset_days in 0i64..400,
    ) {
        let Disbursement { loan, mut schedule } = disbursed(principal, rate_pct, periods, method);
        let payment_date = loan.disbursement_date + Duration::days(offset_days);
        let request = PaymentRequest::new(
            Money::from_minor(cents),
            payment_date,
            "teller-prop",
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        );

        let owed = schedule.total_remaining();
        let allocator = PaymentAllocator::new(Duration::seconds(60), ExcessPolicy::CarryAsCredit);
        let outcome = allocator.allocate(&loan, &schedule, &request, payment_date).unwrap();

        prop_assert_eq!(outcome.allocation.total(), request.amount);
        prop_assert!(outcome.allocation.total_applied() <= owed);
        let delta_sum: Money = outcome.deltas.iter().map(|d| d.amount()).sum();
        prop_assert_eq!(delta_sum, outcome.allocation.total_applied());

        schedule.apply_all(&outcome.deltas, payment_date).unwrap();
        prop_assert_eq!(schedule.total_remaining(), owed - outcome.allocation.total_applied());
        if outcome.allocation.excess_amount.is_positive() {
            prop_assert!(schedule.is_fully_paid());
        }
    }

    /// replaying the same deltas changes nothing
    #[test]
    fn prop_deltas_apply_once(
        principal in 10_000i64..2_000_000,
        periods in 1u32..12,
        cents in 1i64..300_000_000,
    ) {
        let Disbursement { loan, mut schedule } = disbursed(principal, 18, periods, AmortizationMethod::EqualInstallments);
        let payment_date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let request = PaymentRequest::new(
            Money::from_minor(cents),
            payment_date,
            "teller-prop",
            Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap(),
        );
        let allocator = PaymentAllocator::new(Duration::seconds(60), ExcessPolicy::CarryAsCredit);
        let outcome = allocator.allocate(&loan, &schedule, &request, payment_date).unwrap();

        schedule.apply_all(&outcome.deltas, payment_date).unwrap();
        let once = schedule.clone();
        let changed = schedule.apply_all(&outcome.deltas, payment_date).unwrap();

        prop_assert_eq!(changed, 0);
        prop_assert_eq!(schedule, once);
    }

    /// applying then inverting a payment restores every row
    #[test]
    fn prop_reversal_restores_schedule(
        principal in 10_000i64..2_000_000,
        rate_pct in 0u32..40,
        periods in 1u32..12,
        method in method_strategy(),
        cents in 1i64..300_000_000,
        offset_days in 0i64..200,
    ) {
        let Disbursement { loan, mut schedule } = disbursed(principal, rate_pct, periods, method);
        let payment_date = loan.disbursement_date + Duration::days(offset_days);
        schedule.refresh_statuses(payment_date);
        let original = paid_state(&schedule);
        let outstanding = schedule.outstanding_principal();

        let request = PaymentRequest::new(
            Money::from_minor(cents),
            payment_date,
            "teller-prop",
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        );
        let allocator = PaymentAllocator::new(Duration::seconds(60), ExcessPolicy::CarryAsCredit);
        let outcome = allocator.allocate(&loan, &schedule, &request, payment_date).unwrap();
        schedule.apply_all(&outcome.deltas, payment_date).unwrap();

        let inverse: Vec<_> = outcome.deltas.iter().map(|d| d.inverse()).collect();
        schedule.apply_all(&inverse, payment_date).unwrap();

        prop_assert_eq!(paid_state(&schedule), original);
        prop_assert_eq!(schedule.outstanding_principal(), outstanding);
    }

    /// more days in arrears never means a less severe status or a lower rate
    #[test]
    fn prop_classification_is_monotonic(a in 0u32..1_000, b in 0u32..1_000) {
        let policy = ClassificationPolicy::standard();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let low_status = policy.status_for(low);
        let high_status = policy.status_for(high);
        prop_assert!(low_status <= high_status);
        prop_assert!(policy.provisioning_rate(low_status) <= policy.provisioning_rate(high_status));
    }

    #[test]
    fn prop_delay_is_days_late(due_offset in 0i64..3_000, pay_offset in 0i64..3_000) {
        let base = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let due = base + Duration::days(due_offset);
        let paid = base + Duration::days(pay_offset);

        let assessment = compute_delay(due, paid);
        prop_assert_eq!(i64::from(assessment.days), (pay_offset - due_offset).max(0));
        prop_assert_eq!(assessment.is_early, pay_offset < due_offset);
    }
}
