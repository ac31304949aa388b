//! Accounting entries posted when an invoice reaches approval
use crate::invoice::{Invoice, TimeStamp};
use crate::utils;
use chrono::Utc;

/// Synchronisation state with the downstream ERP. Entries are posted as
/// `Pending`; a separate sync job owns the other transitions.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErpStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Synced,
    #[n(2)]
    Failed,
}

impl ErpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErpStatus::Pending => "pending",
            ErpStatus::Synced => "synced",
            ErpStatus::Failed => "failed",
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AccountingEntry {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    #[n(2)]
    pub invoice_id: String,
    #[n(3)]
    pub debit_account_code: Option<String>,
    #[n(4)]
    pub debit_amount: u64,
    #[n(5)]
    pub credit_account_code: Option<String>,
    #[n(6)]
    pub credit_amount: u64,
    #[n(7)]
    pub entry_date: TimeStamp<Utc>,
    #[n(8)]
    pub erp_status: ErpStatus,
    #[n(9)]
    pub erp_id: Option<String>,
    #[n(10)]
    pub created_by: String,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
}

impl AccountingEntry {
    /// Simple double entry mirroring the invoice total on both sides. The
    /// account codes come from the invoice, which has already been defaulted
    /// from the company configuration by the time this runs.
    pub fn for_invoice(invoice: &Invoice, created_by: &str) -> Self {
        let now = TimeStamp::new();
        Self {
            id: utils::entry_id(),
            company_id: invoice.company_id.clone(),
            invoice_id: invoice.id.clone(),
            debit_account_code: invoice.debit_account_code.clone(),
            debit_amount: invoice.total_amount,
            credit_account_code: invoice.credit_account_code.clone(),
            credit_amount: invoice.total_amount,
            entry_date: now.clone(),
            erp_status: ErpStatus::Pending,
            erp_id: None,
            created_by: created_by.to_string(),
            created_at: now,
        }
    }
}
