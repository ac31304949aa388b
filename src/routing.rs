//! Routing decisions for invoice amounts
//!
//! The company-wide auto-approval limit is checked before any rule, so a
//! generous limit can short-circuit an entire rule ladder. Only amounts
//! above the limit consult the rules.
use crate::company::Company;
use crate::rules::{self, ApprovalRule};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// At or below the company limit; the rules were never consulted.
    AutoApproved,
    /// An active rule matched and approves this band without a human.
    AutoApprovedByRule { level: u32 },
    /// A human must act. The approver is advisory; any user with the
    /// approval role may still decide.
    PendingApproval {
        approver_id: Option<String>,
        level: Option<u32>,
    },
}

impl RoutingOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            RoutingOutcome::AutoApproved | RoutingOutcome::AutoApprovedByRule { .. }
        )
    }
}

pub fn route(amount: u64, company: &Company, rules: &[ApprovalRule]) -> RoutingOutcome {
    if amount <= company.auto_approve_limit {
        return RoutingOutcome::AutoApproved;
    }
    match rules::resolve_rule(amount, rules) {
        Some(rule) if rule.auto_approve => RoutingOutcome::AutoApprovedByRule {
            level: rule.approval_level,
        },
        Some(rule) => RoutingOutcome::PendingApproval {
            approver_id: rule.approver_id.clone(),
            level: Some(rule.approval_level),
        },
        None => RoutingOutcome::PendingApproval {
            approver_id: None,
            level: None,
        },
    }
}
