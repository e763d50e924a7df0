pub mod api;
pub mod calendar;
pub mod classification;
pub mod config;
pub mod decimal;
pub mod delay;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod loan;
pub mod payments;
pub mod penalty;
pub mod schedule;
pub mod servicer;
pub mod types;

// re-export key types
pub use api::{
    BalancesView, ClassificationChange, ClassificationView, PaymentResponse, PaymentSubmission,
    RecalculateRequest, RecalculationResponse, ReversalResponse, ReverseRequest, ScheduleRowView,
};
pub use classification::{
    ClassificationEngine, ClassificationHistory, ClassificationOutcome, ClassificationPolicy,
    ClassificationRecord, ClassificationTrigger, ProvisioningReport,
};
pub use config::ServicingConfig;
pub use decimal::{Money, Rate};
pub use delay::{compute_delay, current_delay, days_in_arrears, DelayAssessment};
pub use errors::{Result, ServicingError};
pub use events::{Event, EventStore};
pub use ledger::{PaymentTransaction, TransactionKind, TransactionLedger};
pub use loan::{Disbursement, LoanAccount, LoanBuilder};
pub use payments::{AllocationMode, AllocationOutcome, PaymentAllocator, PaymentRequest};
pub use penalty::{PenaltyConfig, PenaltyEngine};
pub use schedule::{
    Installment, InstallmentSchedule, RecalculationOptions, RecalculationPlan, ScheduleDelta,
    ScheduleGenerator, ScheduleRecalculator,
};
pub use servicer::{LoanBook, LoanServicer, TickSummary};
pub use types::{
    Allocation, AmortizationMethod, ClassificationStatus, ExcessPolicy, InstallmentId, LoanId,
    LoanStatus, OrganizationId, PaymentMethod, PaymentStatus, RecalculationType, RepaymentFrequency,
    TransactionId,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
