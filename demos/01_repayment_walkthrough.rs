/// repayment walkthrough - payments, arrears, reversal and provisioning on a controlled clock
use chrono::{Duration, TimeZone, Utc};
use loan_servicing_rs::{
    AmortizationMethod, LoanBuilder, LoanServicer, Money, PaymentMethod, PaymentSubmission, Rate,
    RecalculateRequest, RecalculationType, ReverseRequest, SafeTimeProvider, ServicingConfig, TimeSource,
};

const ORG: &str = "org-kigali";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== repayment walkthrough ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    ));

    // 0.1% a day on overdue amounts after a 3 day grace period
    let config = ServicingConfig::with_penalties(Rate::from_bps(3650), 3);
    let servicer = LoanServicer::new(config, time)?;
    let time = servicer.time_provider();
    let controller = time.test_control().unwrap();

    let loan = servicer.disburse(
        LoanBuilder::new()
            .organization(ORG)
            .account_number("LN-2024-0001")
            .borrower_id("BRW-0042")
            .amount(Money::from_major(1_200_000))
            .rate(Rate::from_percentage(24))
            .term_periods(12)
            .amortization(AmortizationMethod::DecliningPrincipal)
            .collateral_value(Money::from_major(300_000)),
    )?;
    println!("disbursed {} on {}", loan.principal_disbursed, loan.disbursement_date);

    let schedule = servicer.schedule(ORG, loan.id)?;
    for row in schedule.iter().take(3) {
        println!(
            "  #{:<2} {}  principal {}  interest {}",
            row.installment_number, row.due_date, row.principal_due, row.interest_due
        );
    }

    // first installment paid on time
    controller.advance(Duration::days(31));
    let first = &schedule[0];
    let response = servicer.submit_payment(ORG, loan.id, PaymentSubmission {
        amount: first.total_due,
        payment_date: first.due_date,
        payment_method: PaymentMethod::MobileMoney,
        reference: Some("MM-88213".to_string()),
        received_by: "teller-07".to_string(),
        approved_by: None,
        notes: None,
        installment_id: Some(first.installment_id),
    })?;
    println!("\npaid installment 1: {:?}", response.allocation);

    // second installment missed, the daily tick picks it up
    controller.advance(Duration::days(45));
    let tick = servicer.run_daily_tick();
    let account = servicer.loan(ORG, loan.id)?;
    println!(
        "\ntick {}: {} days in arrears, status {:?}, penalties {}",
        time.now().format("%Y-%m-%d"),
        account.days_in_arrears,
        account.classification_status,
        tick.penalties_accrued
    );

    // a general payment clears the arrears
    let catch_up = servicer.submit_payment(ORG, loan.id, PaymentSubmission {
        amount: Money::from_major(250_000),
        payment_date: time.now().date_naive(),
        payment_method: PaymentMethod::Cash,
        reference: None,
        received_by: "teller-07".to_string(),
        approved_by: None,
        notes: Some("arrears catch-up".to_string()),
        installment_id: None,
    })?;
    println!(
        "\ncatch-up allocation: penalty {} interest {} principal {} excess {}",
        catch_up.allocation.penalty_paid,
        catch_up.allocation.interest_paid,
        catch_up.allocation.principal_paid,
        catch_up.allocation.excess_amount
    );
    println!(
        "classification {:?} -> {:?}",
        catch_up.classification.previous_status, catch_up.classification.new_status
    );

    // the cashier keyed the wrong loan, undo it
    controller.advance(Duration::hours(1));
    let reversal = servicer.reverse_transaction(ORG, catch_up.transaction_id, ReverseRequest {
        reason: "posted to wrong account".to_string(),
        requested_by: "supervisor-02".to_string(),
    })?;
    println!(
        "\nreversed {}: outstanding principal back to {}",
        reversal.reversed_transaction_id, reversal.balances.outstanding_principal
    );

    // shorten the loan after a lump sum
    let lump = servicer.submit_payment(ORG, loan.id, PaymentSubmission {
        amount: Money::from_major(500_000),
        payment_date: time.now().date_naive(),
        payment_method: PaymentMethod::BankTransfer,
        reference: Some("BK-5531".to_string()),
        received_by: "teller-07".to_string(),
        approved_by: Some("supervisor-02".to_string()),
        notes: None,
        installment_id: None,
    })?;
    println!("\nlump sum applied to {} installments", lump.installments.len());

    let rows = servicer.schedule(ORG, loan.id)?;
    if let Some(next) = rows.iter().find(|r| r.remaining_amount.is_positive()) {
        let recalculated = servicer.recalculate_schedule(ORG, loan.id, RecalculateRequest {
            recalculation_type: RecalculationType::ReduceTerm,
            effective_date: next.due_date,
        })?;
        println!(
            "reduce term from {}: {} -> {} installments",
            recalculated.effective_date, recalculated.previous_periods, recalculated.new_periods
        );
    }

    let report = servicer.provisioning_report(ORG);
    println!("\nprovisioning report as of {}", report.as_of);
    for bucket in &report.buckets {
        println!(
            "  {:<12} loans {}  exposure {}  provision {}",
            format!("{:?}", bucket.status),
            bucket.loan_count,
            bucket.net_exposure,
            bucket.provision_required
        );
    }
    println!("portfolio at risk: {}", report.portfolio_at_risk);

    for event in servicer.take_events(ORG, loan.id)? {
        println!("event: {}", serde_json::to_string(&event)?);
    }

    Ok(())
}
