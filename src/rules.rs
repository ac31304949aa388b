//! Approval rules and amount-band resolution
//!
//! A rule covers an amount band `[min_amount, max_amount]` in minor units;
//! a missing `max_amount` leaves the band open above. Resolution walks the
//! active rules in ascending `approval_level` order and takes the first
//! whose band contains the amount, so when bands overlap the lowest level
//! wins deterministically.
use crate::audit::Snapshot;
use crate::error::{Result, WorkflowError};
use crate::invoice::TimeStamp;
use crate::utils;
use chrono::Utc;

pub const DEFAULT_APPROVAL_DEADLINE_HOURS: u32 = 48;
pub const DEFAULT_PRIORITY: u32 = 10;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRule {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    /// Position in the escalation ladder; levels start at 1.
    #[n(2)]
    pub approval_level: u32,
    #[n(3)]
    pub min_amount: u64,
    /// Upper band bound, inclusive. None means unbounded.
    #[n(4)]
    pub max_amount: Option<u64>,
    /// When set, a match approves without any human in the loop.
    #[n(5)]
    pub auto_approve: bool,
    #[n(6)]
    pub approver_id: Option<String>,
    #[n(7)]
    pub escalation_approver_id: Option<String>,
    #[n(8)]
    pub department_codes: Vec<String>,
    #[n(9)]
    pub approval_deadline_hours: u32,
    #[n(10)]
    pub priority: u32,
    #[n(11)]
    pub is_active: bool,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub updated_at: TimeStamp<Utc>,
}

impl ApprovalRule {
    /// True when the amount falls inside this rule's band.
    pub fn covers(&self, amount: u64) -> bool {
        self.min_amount <= amount && self.max_amount.is_none_or(|max| amount <= max)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new()
            .field("approval_level", self.approval_level)
            .field("min_amount", self.min_amount)
            .field(
                "max_amount",
                self.max_amount
                    .map(|m| m.to_string())
                    .unwrap_or_default(),
            )
            .field("auto_approve", self.auto_approve)
            .field("approver_id", self.approver_id.clone().unwrap_or_default())
            .field("is_active", self.is_active)
    }
}

fn check_band(approval_level: u32, min_amount: u64, max_amount: Option<u64>) -> Result<()> {
    if approval_level == 0 {
        return Err(WorkflowError::Invalid(
            "approval_level must be a positive integer".into(),
        ));
    }
    if let Some(max) = max_amount {
        if max < min_amount {
            return Err(WorkflowError::Invalid(
                "max_amount must not be below min_amount".into(),
            ));
        }
    }
    Ok(())
}

/// Builder for new rules. Deadline and priority carry their conventional
/// defaults so callers only state what differs.
#[derive(Debug, Clone)]
pub struct RuleDraft {
    pub approval_level: Option<u32>,
    pub min_amount: Option<u64>,
    pub max_amount: Option<u64>,
    pub auto_approve: bool,
    pub approver_id: Option<String>,
    pub escalation_approver_id: Option<String>,
    pub department_codes: Vec<String>,
    pub approval_deadline_hours: u32,
    pub priority: u32,
}

impl Default for RuleDraft {
    fn default() -> Self {
        Self {
            approval_level: None,
            min_amount: None,
            max_amount: None,
            auto_approve: false,
            approver_id: None,
            escalation_approver_id: None,
            department_codes: Vec::new(),
            approval_deadline_hours: DEFAULT_APPROVAL_DEADLINE_HOURS,
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl RuleDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_approval_level(mut self, level: u32) -> Self {
        self.approval_level = Some(level);
        self
    }
    pub fn set_min_amount(mut self, amount: u64) -> Self {
        self.min_amount = Some(amount);
        self
    }
    pub fn set_max_amount(mut self, amount: u64) -> Self {
        self.max_amount = Some(amount);
        self
    }
    pub fn set_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = auto;
        self
    }
    pub fn set_approver_id(mut self, approver: impl Into<String>) -> Self {
        self.approver_id = Some(approver.into());
        self
    }
    pub fn set_escalation_approver_id(mut self, approver: impl Into<String>) -> Self {
        self.escalation_approver_id = Some(approver.into());
        self
    }
    pub fn set_department_codes(mut self, codes: Vec<String>) -> Self {
        self.department_codes = codes;
        self
    }
    pub fn set_approval_deadline_hours(mut self, hours: u32) -> Self {
        self.approval_deadline_hours = hours;
        self
    }
    pub fn set_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let level = self
            .approval_level
            .ok_or(WorkflowError::MissingField("approval_level"))?;
        let min = self
            .min_amount
            .ok_or(WorkflowError::MissingField("min_amount"))?;
        check_band(level, min, self.max_amount)
    }

    pub fn into_rule(self, company_id: &str) -> Result<ApprovalRule> {
        self.validate()?;
        let now = TimeStamp::new();
        Ok(ApprovalRule {
            id: utils::rule_id(),
            company_id: company_id.to_string(),
            approval_level: self.approval_level.unwrap_or_default(),
            min_amount: self.min_amount.unwrap_or_default(),
            max_amount: self.max_amount,
            auto_approve: self.auto_approve,
            approver_id: self.approver_id,
            escalation_approver_id: self.escalation_approver_id,
            department_codes: self.department_codes,
            approval_deadline_hours: self.approval_deadline_hours,
            priority: self.priority,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

/// Partial change to an existing rule. Nested Options clear nullable fields.
#[derive(Debug, Default, Clone)]
pub struct RuleUpdate {
    pub approval_level: Option<u32>,
    pub min_amount: Option<u64>,
    pub max_amount: Option<Option<u64>>,
    pub auto_approve: Option<bool>,
    pub approver_id: Option<Option<String>>,
    pub escalation_approver_id: Option<Option<String>>,
    pub department_codes: Option<Vec<String>>,
    pub approval_deadline_hours: Option<u32>,
    pub is_active: Option<bool>,
}

impl RuleUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_approval_level(mut self, level: u32) -> Self {
        self.approval_level = Some(level);
        self
    }
    pub fn set_min_amount(mut self, amount: u64) -> Self {
        self.min_amount = Some(amount);
        self
    }
    pub fn set_max_amount(mut self, amount: Option<u64>) -> Self {
        self.max_amount = Some(amount);
        self
    }
    pub fn set_auto_approve(mut self, auto: bool) -> Self {
        self.auto_approve = Some(auto);
        self
    }
    pub fn set_approver_id(mut self, approver: Option<String>) -> Self {
        self.approver_id = Some(approver);
        self
    }
    pub fn set_escalation_approver_id(mut self, approver: Option<String>) -> Self {
        self.escalation_approver_id = Some(approver);
        self
    }
    pub fn set_department_codes(mut self, codes: Vec<String>) -> Self {
        self.department_codes = Some(codes);
        self
    }
    pub fn set_approval_deadline_hours(mut self, hours: u32) -> Self {
        self.approval_deadline_hours = Some(hours);
        self
    }
    pub fn set_active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.approval_level.is_none()
            && self.min_amount.is_none()
            && self.max_amount.is_none()
            && self.auto_approve.is_none()
            && self.approver_id.is_none()
            && self.escalation_approver_id.is_none()
            && self.department_codes.is_none()
            && self.approval_deadline_hours.is_none()
            && self.is_active.is_none()
    }

    pub fn apply(&self, rule: &mut ApprovalRule) {
        if let Some(level) = self.approval_level {
            rule.approval_level = level;
        }
        if let Some(min) = self.min_amount {
            rule.min_amount = min;
        }
        if let Some(max) = &self.max_amount {
            rule.max_amount = *max;
        }
        if let Some(auto) = self.auto_approve {
            rule.auto_approve = auto;
        }
        if let Some(approver) = &self.approver_id {
            rule.approver_id = approver.clone();
        }
        if let Some(approver) = &self.escalation_approver_id {
            rule.escalation_approver_id = approver.clone();
        }
        if let Some(codes) = &self.department_codes {
            rule.department_codes = codes.clone();
        }
        if let Some(hours) = self.approval_deadline_hours {
            rule.approval_deadline_hours = hours;
        }
        if let Some(active) = self.is_active {
            rule.is_active = active;
        }
        rule.updated_at = TimeStamp::new();
    }
}

/// Re-check band invariants after an update has been applied.
pub fn validate_rule(rule: &ApprovalRule) -> Result<()> {
    check_band(rule.approval_level, rule.min_amount, rule.max_amount)
}

/// Pick the rule responsible for an amount: active rules only, bands
/// inclusive on both ends, ties broken by the lowest approval level.
/// Returns None when no band contains the amount.
pub fn resolve_rule(amount: u64, rules: &[ApprovalRule]) -> Option<&ApprovalRule> {
    let mut candidates: Vec<&ApprovalRule> = rules
        .iter()
        .filter(|r| r.is_active && r.min_amount <= amount)
        .collect();
    candidates.sort_by_key(|r| r.approval_level);
    candidates
        .into_iter()
        .find(|r| r.max_amount.is_none_or(|max| amount <= max))
}

/// Warn when a band overlaps another active rule's band. Overlaps are legal,
/// resolution still picks the lower level, but they usually mean a
/// misconfigured ladder.
pub fn warn_on_overlap(rule: &ApprovalRule, others: &[ApprovalRule]) {
    for other in others.iter().filter(|o| o.is_active && o.id != rule.id) {
        let upper = rule.max_amount.unwrap_or(u64::MAX);
        let other_upper = other.max_amount.unwrap_or(u64::MAX);
        if rule.min_amount <= other_upper && other.min_amount <= upper {
            tracing::warn!(
                "approval bands overlap: level {} starts at {} and level {} starts at {}; the lower level wins on resolution",
                rule.approval_level,
                rule.min_amount,
                other.approval_level,
                other.min_amount,
            );
        }
    }
}
