//! Invoice records and the lifecycle vocabulary around them
use crate::audit::Snapshot;
use crate::error::{Result, WorkflowError};
use crate::utils;
use chrono::{DateTime, TimeZone, Utc};

/// Number of characters a deletion reason must carry after trimming.
pub const MIN_DELETION_REASON_CHARS: usize = 5;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Derived `PartialOrd`/`Ord` would require `T: Ord`, which `Utc` does not
// implement; `DateTime<T>` is ordered for any `TimeZone`, so delegate.
impl<T: TimeZone + PartialEq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Processing state of the invoice document itself
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    /// Uploaded, waiting for field extraction to fill in the data
    #[n(0)]
    PendingExtraction,
    /// Data is present and the approval workflow may act on it
    #[n(1)]
    Pending,
    /// Handed to a downstream processor
    #[n(2)]
    Processing,
    /// Approved and posted; terminal apart from deletion
    #[n(3)]
    Completed,
    /// Extraction failed hard; fields must be corrected by hand
    #[n(4)]
    Error,
    /// Soft-deleted tombstone, kept for audit
    #[n(5)]
    Deleted,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::PendingExtraction => "pending_extraction",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::Completed => "completed",
            InvoiceStatus::Error => "error",
            InvoiceStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the invoice sits in the approval decision
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
    #[n(3)]
    AutoApproved,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::AutoApproved => "auto_approved",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A company-scoped invoice. Monetary fields hold integer minor units.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    #[n(2)]
    pub invoice_number: String,
    #[n(3)]
    pub invoice_series: Option<String>,
    #[n(4)]
    pub supplier_name: String,
    #[n(5)]
    pub supplier_tax_id: Option<String>,
    #[n(6)]
    pub invoice_date: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub due_date: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub total_amount: u64,
    #[n(9)]
    pub tax_amount: u64,
    #[n(10)]
    pub discount_amount: u64,
    #[n(11)]
    pub description: Option<String>,
    #[n(12)]
    pub po_number: Option<String>,
    #[n(13)]
    pub status: InvoiceStatus,
    #[n(14)]
    pub approval_status: ApprovalStatus,
    /// Who actually decided, once someone has
    #[n(15)]
    pub approver_id: Option<String>,
    #[n(16)]
    pub approved_at: Option<TimeStamp<Utc>>,
    #[n(17)]
    pub approval_notes: Option<String>,
    /// Who the matched rule suggested; advisory, not exclusive
    #[n(18)]
    pub assigned_approver_id: Option<String>,
    #[n(19)]
    pub approval_level: Option<u32>,
    #[n(20)]
    pub debit_account_code: Option<String>,
    #[n(21)]
    pub credit_account_code: Option<String>,
    #[n(22)]
    pub original_file_url: Option<String>,
    #[n(23)]
    pub file_type: Option<String>,
    #[n(24)]
    pub variance_detected: bool,
    #[n(25)]
    pub variance_description: Option<String>,
    #[n(26)]
    pub deleted_at: Option<TimeStamp<Utc>>,
    #[n(27)]
    pub deleted_by: Option<String>,
    #[n(28)]
    pub deletion_reason: Option<String>,
    #[n(29)]
    pub created_by: String,
    #[n(30)]
    pub created_at: TimeStamp<Utc>,
    #[n(31)]
    pub updated_at: TimeStamp<Utc>,
}

impl Invoice {
    /// Snapshot of the fields an edit is allowed to touch, used for the
    /// before and after images in the audit trail.
    pub fn edit_snapshot(&self) -> Snapshot {
        Snapshot::new()
            .field("invoice_number", &self.invoice_number)
            .field("invoice_series", opt_str(&self.invoice_series))
            .field("supplier_name", &self.supplier_name)
            .field("supplier_tax_id", opt_str(&self.supplier_tax_id))
            .field("invoice_date", opt_date(&self.invoice_date))
            .field("due_date", opt_date(&self.due_date))
            .field("total_amount", self.total_amount)
            .field("tax_amount", self.tax_amount)
            .field("discount_amount", self.discount_amount)
            .field("description", opt_str(&self.description))
            .field("po_number", opt_str(&self.po_number))
            .field("debit_account_code", opt_str(&self.debit_account_code))
            .field("credit_account_code", opt_str(&self.credit_account_code))
    }
}

fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_date(value: &Option<TimeStamp<Utc>>) -> String {
    value
        .as_ref()
        .map(|ts| ts.to_datetime_utc().to_rfc3339())
        .unwrap_or_default()
}

/// Builder for new invoices. Required fields are checked by `validate`,
/// everything else stays optional.
#[derive(Debug, Default, Clone)]
pub struct InvoiceDraft {
    pub invoice_number: Option<String>,
    pub invoice_series: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_tax_id: Option<String>,
    pub invoice_date: Option<TimeStamp<Utc>>,
    pub due_date: Option<TimeStamp<Utc>>,
    pub total_amount: Option<u64>,
    pub tax_amount: Option<u64>,
    pub discount_amount: Option<u64>,
    pub description: Option<String>,
    pub po_number: Option<String>,
    pub debit_account_code: Option<String>,
    pub credit_account_code: Option<String>,
    pub original_file_url: Option<String>,
    pub file_type: Option<String>,
}

impl InvoiceDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_invoice_number(mut self, number: impl Into<String>) -> Self {
        self.invoice_number = Some(number.into());
        self
    }
    pub fn set_invoice_series(mut self, series: impl Into<String>) -> Self {
        self.invoice_series = Some(series.into());
        self
    }
    pub fn set_supplier_name(mut self, name: impl Into<String>) -> Self {
        self.supplier_name = Some(name.into());
        self
    }
    pub fn set_supplier_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.supplier_tax_id = Some(tax_id.into());
        self
    }
    pub fn set_invoice_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.invoice_date = Some(date);
        self
    }
    pub fn set_due_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.due_date = Some(date);
        self
    }
    pub fn set_total_amount(mut self, amount: u64) -> Self {
        self.total_amount = Some(amount);
        self
    }
    pub fn set_tax_amount(mut self, amount: u64) -> Self {
        self.tax_amount = Some(amount);
        self
    }
    pub fn set_discount_amount(mut self, amount: u64) -> Self {
        self.discount_amount = Some(amount);
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_po_number(mut self, po_number: impl Into<String>) -> Self {
        self.po_number = Some(po_number.into());
        self
    }
    pub fn set_debit_account_code(mut self, code: impl Into<String>) -> Self {
        self.debit_account_code = Some(code.into());
        self
    }
    pub fn set_credit_account_code(mut self, code: impl Into<String>) -> Self {
        self.credit_account_code = Some(code.into());
        self
    }
    pub fn set_original_file_url(mut self, url: impl Into<String>) -> Self {
        self.original_file_url = Some(url.into());
        self
    }
    pub fn set_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }

    /// Checks the fields an invoice cannot exist without.
    pub fn validate(&self) -> Result<()> {
        if self
            .invoice_number
            .as_deref()
            .is_none_or(|n| n.trim().is_empty())
        {
            return Err(WorkflowError::MissingField("invoice_number"));
        }
        if self
            .supplier_name
            .as_deref()
            .is_none_or(|n| n.trim().is_empty())
        {
            return Err(WorkflowError::MissingField("supplier_name"));
        }
        if self.total_amount.is_none() {
            return Err(WorkflowError::MissingField("total_amount"));
        }
        Ok(())
    }

    /// Validate and build the stored record. The invoice starts life in
    /// `Pending`/`Pending`; routing adjusts both before the first write.
    pub fn into_invoice(self, company_id: &str, created_by: &str) -> Result<Invoice> {
        self.validate()?;
        let now = TimeStamp::new();
        Ok(Invoice {
            id: utils::invoice_id(),
            company_id: company_id.to_string(),
            invoice_number: self.invoice_number.unwrap_or_default(),
            invoice_series: self.invoice_series,
            supplier_name: self.supplier_name.unwrap_or_default(),
            supplier_tax_id: self.supplier_tax_id,
            invoice_date: self.invoice_date,
            due_date: self.due_date,
            total_amount: self.total_amount.unwrap_or_default(),
            tax_amount: self.tax_amount.unwrap_or_default(),
            discount_amount: self.discount_amount.unwrap_or_default(),
            description: self.description,
            po_number: self.po_number,
            status: InvoiceStatus::Pending,
            approval_status: ApprovalStatus::Pending,
            approver_id: None,
            approved_at: None,
            approval_notes: None,
            assigned_approver_id: None,
            approval_level: None,
            debit_account_code: self.debit_account_code,
            credit_account_code: self.credit_account_code,
            original_file_url: self.original_file_url,
            file_type: self.file_type,
            variance_detected: false,
            variance_description: None,
            deleted_at: None,
            deleted_by: None,
            deletion_reason: None,
            created_by: created_by.to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

/// The fields an edit may change while the approval decision is still open.
/// Absent fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct InvoiceUpdate {
    pub invoice_number: Option<String>,
    pub invoice_series: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_tax_id: Option<String>,
    pub invoice_date: Option<TimeStamp<Utc>>,
    pub due_date: Option<TimeStamp<Utc>>,
    pub total_amount: Option<u64>,
    pub tax_amount: Option<u64>,
    pub discount_amount: Option<u64>,
    pub description: Option<String>,
    pub po_number: Option<String>,
    pub debit_account_code: Option<String>,
    pub credit_account_code: Option<String>,
}

impl InvoiceUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_invoice_number(mut self, number: impl Into<String>) -> Self {
        self.invoice_number = Some(number.into());
        self
    }
    pub fn set_invoice_series(mut self, series: impl Into<String>) -> Self {
        self.invoice_series = Some(series.into());
        self
    }
    pub fn set_supplier_name(mut self, name: impl Into<String>) -> Self {
        self.supplier_name = Some(name.into());
        self
    }
    pub fn set_supplier_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.supplier_tax_id = Some(tax_id.into());
        self
    }
    pub fn set_invoice_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.invoice_date = Some(date);
        self
    }
    pub fn set_due_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.due_date = Some(date);
        self
    }
    pub fn set_total_amount(mut self, amount: u64) -> Self {
        self.total_amount = Some(amount);
        self
    }
    pub fn set_tax_amount(mut self, amount: u64) -> Self {
        self.tax_amount = Some(amount);
        self
    }
    pub fn set_discount_amount(mut self, amount: u64) -> Self {
        self.discount_amount = Some(amount);
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_po_number(mut self, po_number: impl Into<String>) -> Self {
        self.po_number = Some(po_number.into());
        self
    }
    pub fn set_debit_account_code(mut self, code: impl Into<String>) -> Self {
        self.debit_account_code = Some(code.into());
        self
    }
    pub fn set_credit_account_code(mut self, code: impl Into<String>) -> Self {
        self.credit_account_code = Some(code.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.invoice_number.is_none()
            && self.invoice_series.is_none()
            && self.supplier_name.is_none()
            && self.supplier_tax_id.is_none()
            && self.invoice_date.is_none()
            && self.due_date.is_none()
            && self.total_amount.is_none()
            && self.tax_amount.is_none()
            && self.discount_amount.is_none()
            && self.description.is_none()
            && self.po_number.is_none()
            && self.debit_account_code.is_none()
            && self.credit_account_code.is_none()
    }

    pub fn apply(&self, invoice: &mut Invoice) {
        if let Some(number) = &self.invoice_number {
            invoice.invoice_number = number.clone();
        }
        if let Some(series) = &self.invoice_series {
            invoice.invoice_series = Some(series.clone());
        }
        if let Some(name) = &self.supplier_name {
            invoice.supplier_name = name.clone();
        }
        if let Some(tax_id) = &self.supplier_tax_id {
            invoice.supplier_tax_id = Some(tax_id.clone());
        }
        if let Some(date) = &self.invoice_date {
            invoice.invoice_date = Some(date.clone());
        }
        if let Some(date) = &self.due_date {
            invoice.due_date = Some(date.clone());
        }
        if let Some(amount) = self.total_amount {
            invoice.total_amount = amount;
        }
        if let Some(amount) = self.tax_amount {
            invoice.tax_amount = amount;
        }
        if let Some(amount) = self.discount_amount {
            invoice.discount_amount = amount;
        }
        if let Some(description) = &self.description {
            invoice.description = Some(description.clone());
        }
        if let Some(po_number) = &self.po_number {
            invoice.po_number = Some(po_number.clone());
        }
        if let Some(code) = &self.debit_account_code {
            invoice.debit_account_code = Some(code.clone());
        }
        if let Some(code) = &self.credit_account_code {
            invoice.credit_account_code = Some(code.clone());
        }
    }
}
