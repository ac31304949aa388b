//! In-app notifications raised by workflow transitions
use crate::invoice::{Invoice, TimeStamp};
use crate::utils;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    #[n(0)]
    ApprovalRequired,
    #[n(1)]
    InvoiceApproved,
    #[n(2)]
    InvoiceRejected,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ApprovalRequired => "approval_required",
            NotificationKind::InvoiceApproved => "invoice_approved",
            NotificationKind::InvoiceRejected => "invoice_rejected",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    /// The recipient.
    #[n(2)]
    pub user_id: String,
    #[n(3)]
    pub invoice_id: Option<String>,
    #[n(4)]
    pub kind: NotificationKind,
    #[n(5)]
    pub title: String,
    #[n(6)]
    pub message: String,
    #[n(7)]
    pub is_read: bool,
    #[n(8)]
    pub read_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
}

impl Notification {
    fn new(
        company_id: &str,
        user_id: &str,
        invoice_id: Option<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: String,
    ) -> Self {
        Self {
            id: utils::notification_id(),
            company_id: company_id.to_string(),
            user_id: user_id.to_string(),
            invoice_id,
            kind,
            title: title.into(),
            message,
            is_read: false,
            read_at: None,
            created_at: TimeStamp::new(),
        }
    }

    /// Raised towards the assigned approver when an invoice lands on them.
    pub fn approval_required(company_id: &str, approver_id: &str, invoice: &Invoice) -> Self {
        Self::new(
            company_id,
            approver_id,
            Some(invoice.id.clone()),
            NotificationKind::ApprovalRequired,
            "Invoice awaiting your approval",
            format!(
                "Invoice {} from {} for {}",
                invoice.invoice_number,
                invoice.supplier_name,
                utils::format_amount(invoice.total_amount),
            ),
        )
    }

    /// Raised towards the creator when someone else approves their invoice.
    pub fn invoice_approved(
        company_id: &str,
        creator_id: &str,
        invoice: &Invoice,
        approver_name: &str,
    ) -> Self {
        Self::new(
            company_id,
            creator_id,
            Some(invoice.id.clone()),
            NotificationKind::InvoiceApproved,
            "Invoice approved",
            format!(
                "Your invoice {} was approved by {}",
                invoice.invoice_number, approver_name,
            ),
        )
    }

    /// Raised towards the creator when their invoice is rejected.
    pub fn invoice_rejected(
        company_id: &str,
        creator_id: &str,
        invoice: &Invoice,
        reason: &str,
    ) -> Self {
        Self::new(
            company_id,
            creator_id,
            Some(invoice.id.clone()),
            NotificationKind::InvoiceRejected,
            "Invoice rejected",
            format!(
                "Your invoice {} was rejected. Reason: {}",
                invoice.invoice_number, reason,
            ),
        )
    }

    pub fn mark_read(&mut self) {
        self.is_read = true;
        self.read_at = Some(TimeStamp::new());
    }
}
