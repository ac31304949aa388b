//! Append-only audit trail for every mutation the workflow performs
use crate::invoice::TimeStamp;
use crate::utils;
use chrono::Utc;

/// Action tags recorded in the trail. The strings are stable identifiers;
/// reporting downstream filters on them.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    #[n(0)]
    CreateInvoice,
    #[n(1)]
    UploadInvoice,
    #[n(2)]
    UpdateInvoice,
    #[n(3)]
    RouteInvoice,
    #[n(4)]
    AutoApproveInvoice,
    #[n(5)]
    ApproveInvoice,
    #[n(6)]
    RejectInvoice,
    #[n(7)]
    DeleteInvoice,
    #[n(8)]
    CreateApprovalRule,
    #[n(9)]
    UpdateApprovalRule,
    #[n(10)]
    DeleteApprovalRule,
    #[n(11)]
    CreateUser,
    #[n(12)]
    UpdateUser,
    #[n(13)]
    DeleteUser,
    #[n(14)]
    UpdateCompanyConfig,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateInvoice => "create_invoice",
            AuditAction::UploadInvoice => "upload_invoice",
            AuditAction::UpdateInvoice => "update_invoice",
            AuditAction::RouteInvoice => "route_invoice",
            AuditAction::AutoApproveInvoice => "auto_approve_invoice",
            AuditAction::ApproveInvoice => "approve_invoice",
            AuditAction::RejectInvoice => "reject_invoice",
            AuditAction::DeleteInvoice => "delete_invoice",
            AuditAction::CreateApprovalRule => "create_approval_rule",
            AuditAction::UpdateApprovalRule => "update_approval_rule",
            AuditAction::DeleteApprovalRule => "delete_approval_rule",
            AuditAction::CreateUser => "create_user",
            AuditAction::UpdateUser => "update_user",
            AuditAction::DeleteUser => "delete_user",
            AuditAction::UpdateCompanyConfig => "update_company_config",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured field value inside a before or after image.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SnapshotField {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub value: String,
}

/// An ordered set of field values captured at a point in time. Values are
/// rendered to strings when captured so the trail stays readable even after
/// the record types evolve.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    #[n(0)]
    fields: Vec<SnapshotField>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push(SnapshotField {
            name: name.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    #[n(2)]
    pub actor_id: String,
    #[n(3)]
    pub invoice_id: Option<String>,
    #[n(4)]
    pub action: AuditAction,
    #[n(5)]
    pub old_values: Option<Snapshot>,
    #[n(6)]
    pub new_values: Option<Snapshot>,
    #[n(7)]
    pub recorded_at: TimeStamp<Utc>,
}

impl AuditRecord {
    pub fn new(
        company_id: &str,
        actor_id: &str,
        invoice_id: Option<String>,
        action: AuditAction,
        old_values: Option<Snapshot>,
        new_values: Option<Snapshot>,
    ) -> Self {
        Self {
            id: utils::audit_id(),
            company_id: company_id.to_string(),
            actor_id: actor_id.to_string(),
            invoice_id,
            action,
            old_values,
            new_values,
            recorded_at: TimeStamp::new(),
        }
    }
}
