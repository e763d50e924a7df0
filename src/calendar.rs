//! calendar-day arithmetic for due dates

use chrono::{Days, Months, NaiveDate};

use crate::errors::{Result, ServicingError};
use crate::types::RepaymentFrequency;

/// whole calendar days from `from` to `to`, negative when `to` is earlier
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// step a date forward by `periods` repayment periods
///
/// month-based frequencies keep the day of month, clamped to the last day of
/// shorter months (jan 31 + 1 month = feb 28/29)
pub fn advance(date: NaiveDate, frequency: RepaymentFrequency, periods: u32) -> Result<NaiveDate> {
    let stepped = match frequency {
        RepaymentFrequency::Daily => date.checked_add_days(Days::new(periods as u64)),
        RepaymentFrequency::Weekly => date.checked_add_days(Days::new(7 * periods as u64)),
        RepaymentFrequency::Biweekly => date.checked_add_days(Days::new(14 * periods as u64)),
        RepaymentFrequency::Monthly => date.checked_add_months(Months::new(periods)),
        RepaymentFrequency::Quarterly => date.checked_add_months(Months::new(3 * periods)),
        RepaymentFrequency::SemiAnnually => date.checked_add_months(Months::new(6 * periods)),
        RepaymentFrequency::Annually => date.checked_add_months(Months::new(12 * periods)),
    };

    stepped.ok_or_else(|| ServicingError::CalculationError {
        message: format!("date overflow stepping {} by {} {:?} periods", date, periods, frequency),
    })
}
