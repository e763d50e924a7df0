//! delayed-days per installment and days-in-arrears per loan

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::schedule::{Installment, InstallmentSchedule};

/// outcome of comparing a payment date with a due date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayAssessment {
    pub days: u32,
    pub is_early: bool,
}

/// whole calendar days a payment is late, zero when early or on time
pub fn compute_delay(due_date: NaiveDate, payment_date: NaiveDate) -> DelayAssessment {
    let delta = calendar::days_between(due_date, payment_date);
    DelayAssessment {
        days: delta.max(0) as u32,
        is_early: delta < 0,
    }
}

/// days-in-arrears: the delay of the earliest unpaid installment already
/// past due on `as_of`, zero when none is
pub fn days_in_arrears(schedule: &InstallmentSchedule, as_of: NaiveDate) -> u32 {
    schedule
        .active()
        .filter(|i| i.is_past_due(as_of))
        .map(|i| i.due_date)
        .min()
        .map(|due| compute_delay(due, as_of).days)
        .unwrap_or(0)
}

/// delayed-days to report for a row on `as_of`: settled rows and rows paid
/// on time keep what their last payment recorded, the rest keep growing
pub fn current_delay(row: &Installment, as_of: NaiveDate) -> u32 {
    if row.is_paid || row.paid_on_time() {
        row.delayed_days
    } else {
        compute_delay(row.due_date, as_of).days
    }
}

/// refresh stored delayed-days on every unpaid installment, returning how
/// many rows changed
pub fn refresh_delays(schedule: &mut InstallmentSchedule, as_of: NaiveDate) -> usize {
    let mut changed = 0;
    for row in schedule.active_mut().filter(|i| !i.is_paid) {
        let days = current_delay(row, as_of);
        if row.delayed_days != days {
            row.delayed_days = days;
            changed += 1;
        }
        row.refresh_status(as_of);
    }
    changed
}
