//! Administration operations: approval rules, users, and company settings
//!
//! Split out of the invoice lifecycle so the service file stays about the
//! workflow itself. Same receiver, same auth discipline.
use crate::audit::{AuditAction, AuditRecord, Snapshot};
use crate::auth::{self, AuthContext};
use crate::company::{Company, CompanyConfigUpdate};
use crate::error::{Result, WorkflowError};
use crate::invoice::TimeStamp;
use crate::rules::{self, ApprovalRule, RuleDraft, RuleUpdate};
use crate::service::WorkflowService;
use crate::users::{User, UserDraft, UserUpdate};

impl WorkflowService {
    // approval rules

    /// All rules of the caller's company, approval level ascending.
    pub fn rules(&self, ctx: &AuthContext) -> Result<Vec<ApprovalRule>> {
        auth::require_role(ctx, auth::VIEW_RULES, "view approval rules")?;
        self.store.rules_for_company(&ctx.company_id)
    }

    pub fn rule(&self, ctx: &AuthContext, id: &str) -> Result<ApprovalRule> {
        auth::require_role(ctx, auth::VIEW_RULES, "view approval rules")?;
        let rule = self
            .store
            .rule(id)?
            .ok_or_else(|| WorkflowError::RuleNotFound(id.to_string()))?;
        auth::require_company(ctx, &rule.company_id)?;
        Ok(rule)
    }

    /// Add an approval rule. Levels are unique among the company's active
    /// rules; overlapping amount bands are allowed but logged.
    pub fn create_rule(&self, ctx: &AuthContext, draft: RuleDraft) -> Result<ApprovalRule> {
        auth::require_role(ctx, auth::MANAGE_RULES, "manage approval rules")?;

        let rule = draft.into_rule(&ctx.company_id)?;
        let active = self.store.active_rules(&ctx.company_id)?;
        if active.iter().any(|r| r.approval_level == rule.approval_level) {
            return Err(WorkflowError::DuplicateRuleLevel(rule.approval_level));
        }
        rules::warn_on_overlap(&rule, &active);

        self.store.put_rule(&rule)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::CreateApprovalRule,
            None,
            Some(rule.snapshot()),
        ));

        Ok(rule)
    }

    pub fn update_rule(
        &self,
        ctx: &AuthContext,
        id: &str,
        update: RuleUpdate,
    ) -> Result<ApprovalRule> {
        auth::require_role(ctx, auth::MANAGE_RULES, "manage approval rules")?;
        if update.is_empty() {
            return Err(WorkflowError::Invalid("no rule fields provided".into()));
        }

        let rule = self
            .store
            .rule(id)?
            .ok_or_else(|| WorkflowError::RuleNotFound(id.to_string()))?;
        auth::require_company(ctx, &rule.company_id)?;

        let before = rule.snapshot();
        let mut updated = rule.clone();
        update.apply(&mut updated);
        rules::validate_rule(&updated)?;

        let others: Vec<ApprovalRule> = self
            .store
            .active_rules(&ctx.company_id)?
            .into_iter()
            .filter(|r| r.id != updated.id)
            .collect();
        if updated.is_active
            && others
                .iter()
                .any(|r| r.approval_level == updated.approval_level)
        {
            return Err(WorkflowError::DuplicateRuleLevel(updated.approval_level));
        }
        rules::warn_on_overlap(&updated, &others);

        self.store.put_rule(&updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::UpdateApprovalRule,
            Some(before),
            Some(updated.snapshot()),
        ));

        Ok(updated)
    }

    /// Rules are never removed outright, only deactivated, so invoices
    /// already routed by one keep a resolvable reference.
    pub fn delete_rule(&self, ctx: &AuthContext, id: &str) -> Result<()> {
        auth::require_role(ctx, auth::MANAGE_RULES, "manage approval rules")?;

        let rule = self
            .store
            .rule(id)?
            .ok_or_else(|| WorkflowError::RuleNotFound(id.to_string()))?;
        auth::require_company(ctx, &rule.company_id)?;

        let mut updated = rule.clone();
        updated.is_active = false;
        updated.updated_at = TimeStamp::new();
        self.store.put_rule(&updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::DeleteApprovalRule,
            Some(rule.snapshot()),
            None,
        ));

        Ok(())
    }

    // company settings

    pub fn company_config(&self, ctx: &AuthContext) -> Result<Company> {
        self.company_of(ctx)
    }

    pub fn update_company_config(
        &self,
        ctx: &AuthContext,
        update: CompanyConfigUpdate,
    ) -> Result<Company> {
        auth::require_role(ctx, auth::MANAGE_COMPANY, "manage company settings")?;
        if update.is_empty() {
            return Err(WorkflowError::Invalid("no settings provided".into()));
        }

        let company = self.company_of(ctx)?;
        let before = company.config_snapshot();
        let mut updated = company;
        update.apply(&mut updated);

        self.store.put_company(&updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::UpdateCompanyConfig,
            Some(before),
            Some(updated.config_snapshot()),
        ));

        Ok(updated)
    }

    // users

    /// The company's user roster, name ascending.
    pub fn users(&self, ctx: &AuthContext) -> Result<Vec<User>> {
        auth::require_role(ctx, auth::VIEW_USERS, "view users")?;
        self.store.users_for_company(&ctx.company_id)
    }

    /// Single user lookup. Needs no elevated role so approver names can be
    /// resolved by anyone in the company.
    pub fn user(&self, ctx: &AuthContext, id: &str) -> Result<User> {
        let user = self
            .store
            .user(id)?
            .ok_or_else(|| WorkflowError::UserNotFound(id.to_string()))?;
        auth::require_company(ctx, &user.company_id)?;
        Ok(user)
    }

    pub fn create_user(&self, ctx: &AuthContext, draft: UserDraft) -> Result<User> {
        auth::require_role(ctx, auth::MANAGE_USERS, "manage users")?;

        let user = draft.into_user(&ctx.company_id)?;
        if self.store.find_user_by_email(&user.email)?.is_some() {
            return Err(WorkflowError::DuplicateEmail(user.email.clone()));
        }

        self.store.put_user(&user)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::CreateUser,
            None,
            Some(
                Snapshot::new()
                    .field("user_id", &user.id)
                    .field("name", &user.name)
                    .field("email", &user.email)
                    .field("role", user.role),
            ),
        ));

        Ok(user)
    }

    pub fn update_user(&self, ctx: &AuthContext, id: &str, update: UserUpdate) -> Result<User> {
        auth::require_role(ctx, auth::MANAGE_USERS, "manage users")?;
        if update.is_empty() {
            return Err(WorkflowError::Invalid("no user fields provided".into()));
        }

        let user = self
            .store
            .user(id)?
            .ok_or_else(|| WorkflowError::UserNotFound(id.to_string()))?;
        auth::require_company(ctx, &user.company_id)?;

        let before = user.profile_snapshot();
        let mut updated = user;
        update.apply(&mut updated);

        self.store.put_user(&updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::UpdateUser,
            Some(before),
            Some(updated.profile_snapshot()),
        ));

        Ok(updated)
    }

    /// Accounts are deactivated, never removed; their id stays referenced
    /// from invoices and the audit trail.
    pub fn deactivate_user(&self, ctx: &AuthContext, id: &str) -> Result<()> {
        auth::require_role(ctx, auth::MANAGE_USERS, "manage users")?;
        if id == ctx.user_id {
            return Err(WorkflowError::Invalid(
                "you cannot deactivate your own account".into(),
            ));
        }

        let user = self
            .store
            .user(id)?
            .ok_or_else(|| WorkflowError::UserNotFound(id.to_string()))?;
        auth::require_company(ctx, &user.company_id)?;

        let mut updated = user.clone();
        updated.is_active = false;
        updated.updated_at = TimeStamp::new();
        self.store.put_user(&updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            None,
            AuditAction::DeleteUser,
            Some(
                Snapshot::new()
                    .field("user_id", &user.id)
                    .field("name", &user.name)
                    .field("is_active", user.is_active),
            ),
            None,
        ));

        Ok(())
    }
}
