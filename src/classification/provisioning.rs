use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{ClassificationStatus, OrganizationId};

use super::{ClassificationOutcome, ClassificationPolicy};

/// days-in-arrears beyond which principal counts as at risk
pub const PAR_THRESHOLD_DAYS: u32 = 30;

/// one status row of a provisioning report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningBucket {
    pub status: ClassificationStatus,
    pub provisioning_rate: Rate,
    pub loan_count: usize,
    pub outstanding_principal: Money,
    pub net_exposure: Money,
    pub provision_required: Money,
}

/// provisioning requirement of a portfolio by classification status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub organization_id: OrganizationId,
    pub as_of: NaiveDate,
    /// every status, least severe first, empty ones included
    pub buckets: Vec<ProvisioningBucket>,
    pub loan_count: usize,
    pub outstanding_principal: Money,
    pub net_exposure: Money,
    pub provision_required: Money,
    /// share of outstanding principal more than 30 days in arrears
    pub portfolio_at_risk: Rate,
}

impl ProvisioningReport {
    pub fn build(
        organization_id: impl Into<OrganizationId>,
        as_of: NaiveDate,
        policy: &ClassificationPolicy,
        outcomes: &[ClassificationOutcome],
    ) -> Self {
        let buckets: Vec<ProvisioningBucket> = ClassificationStatus::ALL
            .iter()
            .map(|&status| {
                let members: Vec<&ClassificationOutcome> =
                    outcomes.iter().filter(|o| o.new_status == status).collect();
                ProvisioningBucket {
                    status,
                    provisioning_rate: policy.provisioning_rate(status),
                    loan_count: members.len(),
                    outstanding_principal: members.iter().map(|o| o.outstanding_principal).sum(),
                    net_exposure: members.iter().map(|o| o.net_exposure).sum(),
                    provision_required: members.iter().map(|o| o.provision_required).sum(),
                }
            })
            .collect();

        let outstanding_principal: Money = buckets.iter().map(|b| b.outstanding_principal).sum();
        let at_risk: Money = outcomes
            .iter()
            .filter(|o| o.days_overdue > PAR_THRESHOLD_DAYS)
            .map(|o| o.outstanding_principal)
            .sum();
        let portfolio_at_risk = if outstanding_principal.is_zero() {
            Rate::ZERO
        } else {
            Rate::from_decimal((at_risk.as_decimal() / outstanding_principal.as_decimal()).round_dp(4))
        };

        Self {
            organization_id: organization_id.into(),
            as_of,
            loan_count: outcomes.len(),
            outstanding_principal,
            net_exposure: buckets.iter().map(|b| b.net_exposure).sum(),
            provision_required: buckets.iter().map(|b| b.provision_required).sum(),
            portfolio_at_risk,
            buckets,
        }
    }

    pub fn bucket(&self, status: ClassificationStatus) -> Option<&ProvisioningBucket> {
        self.buckets.iter().find(|b| b.status == status)
    }

    /// provision as a share of net exposure
    pub fn coverage_ratio(&self) -> Decimal {
        if self.net_exposure.is_zero() {
            return Decimal::ZERO;
        }
        (self.provision_required.as_decimal() / self.net_exposure.as_decimal()).round_dp(4)
    }
}
