//! Service layer API for invoice workflow operations
//!
//! Every operation takes a verified [`AuthContext`] and enforces the role
//! and company checks itself, so embedding layers only translate transport
//! concerns. Invoice writes after creation go through a conditional swap
//! keyed on the bytes originally read; two racing decisions cannot both
//! land, the loser gets a conflict back.
use crate::audit::{AuditAction, AuditRecord, Snapshot};
use crate::auth::{self, AuthContext, Role, TokenSigner};
use crate::company::Company;
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, NullSink, WorkflowEvent};
use crate::extract::{
    ALLOWED_FILE_TYPES, ExtractedFields, ExtractionLog, ExtractionRequest, Extractor, FileStore,
    FileUpload, MemoryFileStore, NullExtractor, file_extension,
};
use crate::invoice::{
    ApprovalStatus, Invoice, InvoiceDraft, InvoiceStatus, InvoiceUpdate, MIN_DELETION_REASON_CHARS,
    TimeStamp,
};
use crate::ledger::AccountingEntry;
use crate::metrics::{self, DashboardMetrics};
use crate::notify::Notification;
use crate::routing::{self, RoutingOutcome};
use crate::rules;
use crate::store::Store;
use crate::users::User;
use chrono::Utc;
use std::time::Instant;

const INVOICE_HISTORY_LIMIT: usize = 20;
const DEFAULT_NOTIFICATION_LIMIT: usize = 20;

pub struct WorkflowService {
    pub(crate) store: Store,
    signer: TokenSigner,
    files: Box<dyn FileStore>,
    extractor: Box<dyn Extractor>,
    pub(crate) events: Box<dyn EventSink>,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in_secs: u64,
    pub user: User,
}

/// An invoice together with its recent audit trail.
#[derive(Debug, Clone)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub history: Vec<AuditRecord>,
}

/// What `validate_invoice` decided and the record it left behind.
#[derive(Debug, Clone)]
pub struct RoutingReport {
    pub invoice: Invoice,
    pub outcome: RoutingOutcome,
}

/// What `upload_invoice` produced.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub invoice: Invoice,
    pub extracted: Option<ExtractedFields>,
    pub file_url: String,
}

/// Optional extras an approver may attach to their decision.
#[derive(Debug, Clone, Default)]
pub struct ApproveRequest {
    pub notes: Option<String>,
    pub debit_account_code: Option<String>,
    pub credit_account_code: Option<String>,
}

/// Listing filters; all conjunctive, all optional.
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub approval_status: Option<ApprovalStatus>,
    pub created_from: Option<TimeStamp<Utc>>,
    pub created_to: Option<TimeStamp<Utc>>,
    /// Case-insensitive substring match on the supplier name.
    pub supplier_name: Option<String>,
}

impl InvoiceFilter {
    pub fn matches(&self, invoice: &Invoice) -> bool {
        if let Some(status) = self.status {
            if invoice.status != status {
                return false;
            }
        }
        if let Some(approval) = self.approval_status {
            if invoice.approval_status != approval {
                return false;
            }
        }
        if let Some(from) = &self.created_from {
            if invoice.created_at < *from {
                return false;
            }
        }
        if let Some(to) = &self.created_to {
            if invoice.created_at > *to {
                return false;
            }
        }
        if let Some(needle) = &self.supplier_name {
            if !invoice
                .supplier_name
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// One-based page selection, clamped to sane bounds on construction.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    page: u32,
    limit: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub pages: u32,
    pub limit: u32,
}

/// Which notifications to mark as read.
#[derive(Debug, Clone)]
pub enum MarkRead {
    All,
    Ids(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct NotificationFeed {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
}

fn default_accounts(invoice: &mut Invoice, company: &Company) {
    if invoice.debit_account_code.is_none() {
        invoice.debit_account_code = company.default_debit_account.clone();
    }
    if invoice.credit_account_code.is_none() {
        invoice.credit_account_code = company.default_credit_account.clone();
    }
}

fn creation_snapshot(invoice: &Invoice) -> Snapshot {
    Snapshot::new()
        .field("invoice_number", &invoice.invoice_number)
        .field("supplier_name", &invoice.supplier_name)
        .field("total_amount", invoice.total_amount)
        .field("status", invoice.status)
        .field("approval_status", invoice.approval_status)
}

fn placeholder_number() -> String {
    format!("TEMP-{}", Utc::now().timestamp_millis())
}

impl WorkflowService {
    pub fn new(store: Store, signer: TokenSigner) -> Self {
        Self {
            store,
            signer,
            files: Box::new(MemoryFileStore::new()),
            extractor: Box::new(NullExtractor),
            events: Box::new(NullSink),
        }
    }

    pub fn with_file_store(mut self, files: impl FileStore + 'static) -> Self {
        self.files = Box::new(files);
        self
    }

    pub fn with_extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub fn with_event_sink(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Box::new(events);
        self
    }

    // shared plumbing

    pub(crate) fn company_of(&self, ctx: &AuthContext) -> Result<Company> {
        self.store
            .company(&ctx.company_id)?
            .ok_or_else(|| WorkflowError::CompanyNotFound(ctx.company_id.clone()))
    }

    fn require_invoice(&self, id: &str) -> Result<(sled::IVec, Invoice)> {
        self.store
            .invoice_raw(id)?
            .ok_or_else(|| WorkflowError::InvoiceNotFound(id.to_string()))
    }

    // The trail and the side channels must never turn a finished state
    // change into an error; failures are logged and the operation stands.
    pub(crate) fn record_audit(&self, record: AuditRecord) {
        if let Err(err) = self.store.append_audit(&record) {
            tracing::error!("audit write failed for {}: {err}", record.action);
        }
    }

    fn push_notification(&self, notification: Notification) {
        if let Err(err) = self.store.put_notification(&notification) {
            tracing::warn!("notification write failed: {err}");
        }
    }

    fn post_entry(&self, entry: AccountingEntry) {
        if let Err(err) = self.store.put_entry(&entry) {
            tracing::warn!(
                "accounting entry write failed for {}: {err}",
                entry.invoice_id
            );
        }
    }

    fn finalize_auto_approval(
        &self,
        ctx: &AuthContext,
        invoice: &Invoice,
        rule_level: Option<u32>,
    ) {
        self.post_entry(AccountingEntry::for_invoice(invoice, &ctx.user_id));

        let mut new_values = Snapshot::new().field("approval_status", ApprovalStatus::AutoApproved);
        new_values = match rule_level {
            Some(level) => new_values.field("rule_level", level),
            None => new_values.field("reason", "within auto-approval limit"),
        };
        self.record_audit(AuditRecord::new(
            &invoice.company_id,
            &ctx.user_id,
            Some(invoice.id.clone()),
            AuditAction::AutoApproveInvoice,
            Some(Snapshot::new().field("approval_status", ApprovalStatus::Pending)),
            Some(new_values),
        ));

        self.events.publish(WorkflowEvent::InvoiceAutoApproved {
            invoice_id: invoice.id.clone(),
            rule_level,
        });
    }

    /// Routing preparation at creation time. Either flips the invoice to
    /// auto-approved right away, or pre-assigns the approver suggested by
    /// the matching rule and leaves the decision open.
    fn prepare_routing(&self, invoice: &mut Invoice, company: &Company) -> Result<bool> {
        if invoice.total_amount <= company.auto_approve_limit {
            invoice.approval_status = ApprovalStatus::AutoApproved;
            invoice.status = InvoiceStatus::Completed;
            invoice.approved_at = Some(TimeStamp::new());
            Ok(true)
        } else {
            let active = self.store.active_rules(&invoice.company_id)?;
            if let Some(rule) = rules::resolve_rule(invoice.total_amount, &active) {
                invoice.assigned_approver_id = rule.approver_id.clone();
                invoice.approval_level = Some(rule.approval_level);
            }
            Ok(false)
        }
    }

    // authentication

    /// Demo-grade login: the email identifies the account, the signed token
    /// carries the claims. Password verification is left to the embedding
    /// identity provider.
    pub fn login(&self, email: &str) -> Result<Session> {
        let email = email.trim().to_ascii_lowercase();
        let user = self
            .store
            .find_user_by_email(&email)?
            .filter(|u| u.is_active)
            .ok_or(WorkflowError::InvalidCredentials)?;

        let access_token = self.signer.sign(&user)?;
        Ok(Session {
            access_token,
            token_type: "Bearer",
            expires_in_secs: self.signer.ttl().num_seconds().max(0) as u64,
            user,
        })
    }

    /// Verify a token and load the caller. Role and company always come from
    /// the stored user record, so deactivating an account invalidates its
    /// outstanding tokens immediately.
    pub fn authenticate(&self, token: &str) -> Result<AuthContext> {
        let claims = self.signer.verify(token)?;
        let user = self
            .store
            .user(&claims.user_id)?
            .filter(|u| u.is_active)
            .ok_or(WorkflowError::UnknownUser)?;

        Ok(AuthContext {
            user_id: user.id,
            name: user.name,
            company_id: user.company_id,
            role: user.role,
        })
    }

    // invoice intake

    /// Register a manually entered invoice and route it immediately.
    pub fn create_invoice(&self, ctx: &AuthContext, draft: InvoiceDraft) -> Result<Invoice> {
        draft.validate()?;
        let company = self.company_of(ctx)?;

        if let Some(number) = draft.invoice_number.as_deref() {
            if self
                .store
                .find_invoice_by_number(&ctx.company_id, number)?
                .is_some()
            {
                return Err(WorkflowError::DuplicateInvoiceNumber(number.to_string()));
            }
        }

        let mut invoice = draft.into_invoice(&ctx.company_id, &ctx.user_id)?;
        default_accounts(&mut invoice, &company);
        let auto = self.prepare_routing(&mut invoice, &company)?;

        self.store.insert_invoice(&invoice)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            Some(invoice.id.clone()),
            AuditAction::CreateInvoice,
            None,
            Some(creation_snapshot(&invoice)),
        ));
        self.events.publish(WorkflowEvent::InvoiceCreated {
            invoice_id: invoice.id.clone(),
            company_id: ctx.company_id.clone(),
        });

        if auto {
            self.finalize_auto_approval(ctx, &invoice, None);
        } else if let Some(approver) = invoice.assigned_approver_id.clone() {
            self.push_notification(Notification::approval_required(
                &ctx.company_id,
                &approver,
                &invoice,
            ));
        }

        Ok(invoice)
    }

    /// Store an uploaded document, attempt extraction, and register the
    /// invoice. Without extracted data the invoice is created as a
    /// placeholder awaiting manual completion.
    pub fn upload_invoice(&self, ctx: &AuthContext, upload: FileUpload) -> Result<UploadOutcome> {
        if upload.bytes.is_empty() {
            return Err(WorkflowError::MissingField("file"));
        }
        if !ALLOWED_FILE_TYPES.contains(&upload.content_type.as_str()) {
            return Err(WorkflowError::Invalid(format!(
                "unsupported file type {}; use PDF, XML, PNG or JPEG",
                upload.content_type
            )));
        }
        let company = self.company_of(ctx)?;

        let file_url = self
            .files
            .put(&upload.bytes, &upload.content_type, &upload.file_name)
            .map_err(|e| WorkflowError::FileStorage(e.to_string()))?;
        let file_type = file_extension(&upload.file_name);

        let mut log = ExtractionLog::processing(&ctx.company_id, &file_url, &file_type);
        let started = Instant::now();
        let request = ExtractionRequest {
            file_url: &file_url,
            file_type: &file_type,
            company_id: &ctx.company_id,
            user_id: &ctx.user_id,
        };
        let mut extracted: Option<ExtractedFields> = None;
        let mut extraction_failed = false;
        match self.extractor.extract(&request) {
            Ok(Some(fields)) => {
                log.complete(fields.clone(), started.elapsed().as_millis() as u64);
                extracted = Some(fields);
            }
            // no backend answered; the log stays in processing
            Ok(None) => {}
            Err(err) => {
                tracing::warn!("extraction failed for {file_url}: {err}");
                log.fail(err.to_string());
                extraction_failed = true;
            }
        }
        self.store.put_extraction_log(&log)?;

        if let Some(number) = extracted.as_ref().and_then(|f| f.invoice_number.as_deref()) {
            if self
                .store
                .find_invoice_by_number(&ctx.company_id, number)?
                .is_some()
            {
                return Err(WorkflowError::DuplicateInvoiceNumber(number.to_string()));
            }
        }

        let draft = match &extracted {
            Some(fields) => {
                let mut draft = InvoiceDraft::new()
                    .set_invoice_number(
                        fields
                            .invoice_number
                            .clone()
                            .unwrap_or_else(placeholder_number),
                    )
                    .set_supplier_name(
                        fields
                            .supplier_name
                            .clone()
                            .unwrap_or_else(|| "Pending extraction".to_string()),
                    )
                    .set_total_amount(fields.total_amount.unwrap_or_default())
                    .set_tax_amount(fields.tax_amount.unwrap_or_default());
                if let Some(series) = &fields.invoice_series {
                    draft = draft.set_invoice_series(series.clone());
                }
                if let Some(tax_id) = &fields.supplier_tax_id {
                    draft = draft.set_supplier_tax_id(tax_id.clone());
                }
                if let Some(date) = &fields.invoice_date {
                    draft = draft.set_invoice_date(date.clone());
                }
                if let Some(date) = &fields.due_date {
                    draft = draft.set_due_date(date.clone());
                }
                if let Some(description) = &fields.description {
                    draft = draft.set_description(description.clone());
                }
                draft
            }
            None => InvoiceDraft::new()
                .set_invoice_number(placeholder_number())
                .set_supplier_name("Pending extraction")
                .set_total_amount(0),
        }
        .set_original_file_url(&file_url)
        .set_file_type(&file_type);

        let mut invoice = draft.into_invoice(&ctx.company_id, &ctx.user_id)?;
        default_accounts(&mut invoice, &company);

        // only route when extraction produced a usable amount; placeholders
        // wait for manual completion and an explicit validate
        let amount_known = extracted
            .as_ref()
            .and_then(|f| f.total_amount)
            .unwrap_or_default()
            > 0;
        let mut auto = false;
        if amount_known {
            auto = self.prepare_routing(&mut invoice, &company)?;
        } else {
            invoice.status = if extraction_failed {
                InvoiceStatus::Error
            } else if extracted.is_some() {
                InvoiceStatus::Pending
            } else {
                InvoiceStatus::PendingExtraction
            };
        }

        self.store.insert_invoice(&invoice)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            Some(invoice.id.clone()),
            AuditAction::UploadInvoice,
            None,
            Some(
                Snapshot::new()
                    .field("file_name", &upload.file_name)
                    .field("file_type", &file_type)
                    .field("status", invoice.status),
            ),
        ));
        self.events.publish(WorkflowEvent::InvoiceCreated {
            invoice_id: invoice.id.clone(),
            company_id: ctx.company_id.clone(),
        });

        if auto {
            self.finalize_auto_approval(ctx, &invoice, None);
        } else if let Some(approver) = invoice.assigned_approver_id.clone() {
            self.push_notification(Notification::approval_required(
                &ctx.company_id,
                &approver,
                &invoice,
            ));
        }

        Ok(UploadOutcome {
            invoice,
            extracted,
            file_url,
        })
    }

    // the approval engine

    /// Run the routing decision over an invoice whose approval is still
    /// open. Auto approvals complete the invoice and post the accounting
    /// entry; everything else records the assignment and notifies.
    pub fn validate_invoice(&self, ctx: &AuthContext, id: &str) -> Result<RoutingReport> {
        let (previous, invoice) = self.require_invoice(id)?;
        auth::require_company(ctx, &invoice.company_id)?;

        if invoice.status == InvoiceStatus::Deleted {
            return Err(WorkflowError::AlreadyDeleted);
        }
        if invoice.approval_status != ApprovalStatus::Pending {
            return Err(WorkflowError::AlreadyProcessed);
        }
        if invoice.total_amount == 0
            && matches!(
                invoice.status,
                InvoiceStatus::PendingExtraction | InvoiceStatus::Error
            )
        {
            return Err(WorkflowError::AmountUnknown);
        }

        let company = self.company_of(ctx)?;
        let active = self.store.active_rules(&invoice.company_id)?;
        let outcome = routing::route(invoice.total_amount, &company, &active);

        let mut updated = invoice.clone();
        match &outcome {
            RoutingOutcome::AutoApproved | RoutingOutcome::AutoApprovedByRule { .. } => {
                updated.approval_status = ApprovalStatus::AutoApproved;
                updated.status = InvoiceStatus::Completed;
                updated.approved_at = Some(TimeStamp::new());
                default_accounts(&mut updated, &company);
            }
            RoutingOutcome::PendingApproval { approver_id, level } => {
                updated.status = InvoiceStatus::Pending;
                updated.assigned_approver_id = approver_id.clone();
                updated.approval_level = *level;
            }
        }
        updated.updated_at = TimeStamp::new();
        self.store.swap_invoice(id, &previous, &updated)?;

        match &outcome {
            RoutingOutcome::AutoApproved => {
                self.finalize_auto_approval(ctx, &updated, None);
            }
            RoutingOutcome::AutoApprovedByRule { level } => {
                self.finalize_auto_approval(ctx, &updated, Some(*level));
            }
            RoutingOutcome::PendingApproval { approver_id, level } => {
                if let Some(approver) = approver_id {
                    self.push_notification(Notification::approval_required(
                        &ctx.company_id,
                        approver,
                        &updated,
                    ));
                }
                self.record_audit(AuditRecord::new(
                    &ctx.company_id,
                    &ctx.user_id,
                    Some(updated.id.clone()),
                    AuditAction::RouteInvoice,
                    Some(Snapshot::new().field("approval_status", invoice.approval_status)),
                    Some(
                        Snapshot::new()
                            .field("approval_status", updated.approval_status)
                            .field(
                                "assigned_approver_id",
                                updated.assigned_approver_id.clone().unwrap_or_default(),
                            )
                            .field(
                                "approval_level",
                                level.map(|l| l.to_string()).unwrap_or_default(),
                            ),
                    ),
                ));
                self.events.publish(WorkflowEvent::InvoiceRouted {
                    invoice_id: updated.id.clone(),
                    approver_id: approver_id.clone(),
                    level: *level,
                });
            }
        }

        Ok(RoutingReport {
            invoice: updated,
            outcome,
        })
    }

    /// Approve a pending invoice. Anyone with the approval role may decide;
    /// acting in place of the assigned approver requires a note and is
    /// flagged in the audit trail.
    pub fn approve_invoice(
        &self,
        ctx: &AuthContext,
        id: &str,
        request: ApproveRequest,
    ) -> Result<Invoice> {
        auth::require_role(ctx, auth::APPROVE_INVOICES, "approve invoices")?;
        let (previous, invoice) = self.require_invoice(id)?;
        auth::require_company(ctx, &invoice.company_id)?;

        if invoice.status == InvoiceStatus::Deleted {
            return Err(WorkflowError::AlreadyDeleted);
        }
        if invoice.approval_status != ApprovalStatus::Pending {
            return Err(WorkflowError::AlreadyProcessed);
        }

        let is_assigned = invoice
            .assigned_approver_id
            .as_deref()
            .is_none_or(|assigned| assigned == ctx.user_id);
        let notes = request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());
        if !is_assigned {
            if notes.is_none() {
                return Err(WorkflowError::NoteRequired);
            }
            tracing::warn!(
                "invoice {id} approved by {} instead of assigned approver {}",
                ctx.user_id,
                invoice.assigned_approver_id.as_deref().unwrap_or("-"),
            );
        }

        let company = self.company_of(ctx)?;
        let mut updated = invoice.clone();
        updated.approval_status = ApprovalStatus::Approved;
        updated.status = InvoiceStatus::Completed;
        updated.approver_id = Some(ctx.user_id.clone());
        updated.approved_at = Some(TimeStamp::new());
        updated.approval_notes = notes.map(|n| n.to_string());
        if let Some(code) = &request.debit_account_code {
            updated.debit_account_code = Some(code.clone());
        }
        if let Some(code) = &request.credit_account_code {
            updated.credit_account_code = Some(code.clone());
        }
        default_accounts(&mut updated, &company);
        updated.updated_at = TimeStamp::new();

        self.store.swap_invoice(id, &previous, &updated)?;

        self.post_entry(AccountingEntry::for_invoice(&updated, &ctx.user_id));

        let mut new_values = Snapshot::new()
            .field("approval_status", ApprovalStatus::Approved)
            .field("approver_id", &ctx.user_id)
            .field("approver_name", &ctx.name)
            .field("is_assigned_approver", is_assigned);
        if !is_assigned {
            new_values = new_values.field(
                "approval_note",
                format!("approved by {} (not the assigned approver)", ctx.name),
            );
        }
        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            Some(updated.id.clone()),
            AuditAction::ApproveInvoice,
            Some(
                Snapshot::new()
                    .field("approval_status", invoice.approval_status)
                    .field(
                        "assigned_approver_id",
                        invoice.assigned_approver_id.clone().unwrap_or_default(),
                    ),
            ),
            Some(new_values),
        ));

        if invoice.created_by != ctx.user_id {
            self.push_notification(Notification::invoice_approved(
                &ctx.company_id,
                &invoice.created_by,
                &updated,
                &ctx.name,
            ));
        }
        self.events.publish(WorkflowEvent::InvoiceApproved {
            invoice_id: updated.id.clone(),
            approver_id: ctx.user_id.clone(),
        });

        Ok(updated)
    }

    /// Reject a pending invoice. A reason is mandatory; the document status
    /// is left untouched so the record can be corrected and re-validated.
    pub fn reject_invoice(&self, ctx: &AuthContext, id: &str, reason: &str) -> Result<Invoice> {
        auth::require_role(ctx, auth::APPROVE_INVOICES, "reject invoices")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::EmptyReason);
        }

        let (previous, invoice) = self.require_invoice(id)?;
        auth::require_company(ctx, &invoice.company_id)?;

        if invoice.status == InvoiceStatus::Deleted {
            return Err(WorkflowError::AlreadyDeleted);
        }
        if invoice.approval_status != ApprovalStatus::Pending {
            return Err(WorkflowError::AlreadyProcessed);
        }

        let mut updated = invoice.clone();
        updated.approval_status = ApprovalStatus::Rejected;
        updated.approver_id = Some(ctx.user_id.clone());
        updated.approved_at = Some(TimeStamp::new());
        updated.approval_notes = Some(reason.to_string());
        updated.updated_at = TimeStamp::new();

        self.store.swap_invoice(id, &previous, &updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            Some(updated.id.clone()),
            AuditAction::RejectInvoice,
            Some(Snapshot::new().field("approval_status", invoice.approval_status)),
            Some(
                Snapshot::new()
                    .field("approval_status", ApprovalStatus::Rejected)
                    .field("reason", reason),
            ),
        ));

        if invoice.created_by != ctx.user_id {
            self.push_notification(Notification::invoice_rejected(
                &ctx.company_id,
                &invoice.created_by,
                &updated,
                reason,
            ));
        }
        self.events.publish(WorkflowEvent::InvoiceRejected {
            invoice_id: updated.id.clone(),
            approver_id: ctx.user_id.clone(),
        });

        Ok(updated)
    }

    /// Edit invoice data while the approval decision is still open.
    pub fn update_invoice(
        &self,
        ctx: &AuthContext,
        id: &str,
        update: InvoiceUpdate,
    ) -> Result<Invoice> {
        auth::require_role(ctx, auth::EDIT_INVOICES, "edit invoices")?;
        if update.is_empty() {
            return Err(WorkflowError::Invalid("no editable fields provided".into()));
        }

        let (previous, invoice) = self.require_invoice(id)?;
        auth::require_company(ctx, &invoice.company_id)?;

        if invoice.status == InvoiceStatus::Deleted {
            return Err(WorkflowError::AlreadyDeleted);
        }
        if invoice.approval_status != ApprovalStatus::Pending {
            return Err(WorkflowError::AlreadyProcessed);
        }

        if let Some(number) = update.invoice_number.as_deref() {
            if number != invoice.invoice_number
                && self
                    .store
                    .find_invoice_by_number(&ctx.company_id, number)?
                    .is_some()
            {
                return Err(WorkflowError::DuplicateInvoiceNumber(number.to_string()));
            }
        }

        let before = invoice.edit_snapshot();
        let mut updated = invoice.clone();
        update.apply(&mut updated);
        updated.updated_at = TimeStamp::new();

        self.store.swap_invoice(id, &previous, &updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            Some(updated.id.clone()),
            AuditAction::UpdateInvoice,
            Some(before),
            Some(updated.edit_snapshot()),
        ));
        self.events.publish(WorkflowEvent::InvoiceUpdated {
            invoice_id: updated.id.clone(),
        });

        Ok(updated)
    }

    /// Soft-delete an invoice. The record is kept as a tombstone with the
    /// reason, who deleted it, and when.
    pub fn delete_invoice(&self, ctx: &AuthContext, id: &str, reason: &str) -> Result<Invoice> {
        auth::require_role(ctx, auth::DELETE_INVOICES, "delete invoices")?;
        let reason = reason.trim();
        if reason.chars().count() < MIN_DELETION_REASON_CHARS {
            return Err(WorkflowError::ShortDeletionReason);
        }

        let (previous, invoice) = self.require_invoice(id)?;
        auth::require_company(ctx, &invoice.company_id)?;

        if invoice.status == InvoiceStatus::Deleted {
            return Err(WorkflowError::AlreadyDeleted);
        }

        let mut updated = invoice.clone();
        updated.status = InvoiceStatus::Deleted;
        updated.deleted_at = Some(TimeStamp::new());
        updated.deleted_by = Some(ctx.user_id.clone());
        updated.deletion_reason = Some(reason.to_string());
        updated.updated_at = TimeStamp::new();

        self.store.swap_invoice(id, &previous, &updated)?;

        self.record_audit(AuditRecord::new(
            &ctx.company_id,
            &ctx.user_id,
            Some(updated.id.clone()),
            AuditAction::DeleteInvoice,
            Some(
                Snapshot::new()
                    .field("invoice_number", &invoice.invoice_number)
                    .field("status", invoice.status)
                    .field("approval_status", invoice.approval_status),
            ),
            Some(
                Snapshot::new()
                    .field("status", InvoiceStatus::Deleted)
                    .field("deletion_reason", reason)
                    .field("deleted_by", &ctx.user_id)
                    .field("deleted_by_name", &ctx.name),
            ),
        ));
        self.events.publish(WorkflowEvent::InvoiceDeleted {
            invoice_id: updated.id.clone(),
            deleted_by: ctx.user_id.clone(),
        });

        Ok(updated)
    }

    // reads

    pub fn invoice(&self, ctx: &AuthContext, id: &str) -> Result<InvoiceDetail> {
        let invoice = self
            .store
            .invoice(id)?
            .ok_or_else(|| WorkflowError::InvoiceNotFound(id.to_string()))?;
        auth::require_company(ctx, &invoice.company_id)?;

        let history = self.store.audit_for_invoice(id, INVOICE_HISTORY_LIMIT)?;
        Ok(InvoiceDetail { invoice, history })
    }

    /// Company-scoped listing, newest first.
    pub fn list_invoices(
        &self,
        ctx: &AuthContext,
        filter: &InvoiceFilter,
        page: Page,
    ) -> Result<Paginated<Invoice>> {
        let mut invoices = self.store.invoices_for_company(&ctx.company_id)?;
        invoices.retain(|i| filter.matches(i));
        invoices.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = invoices.len() as u64;
        let items: Vec<Invoice> = invoices
            .into_iter()
            .skip(page.offset())
            .take(page.limit() as usize)
            .collect();

        Ok(Paginated {
            items,
            total,
            page: page.page(),
            pages: total.div_ceil(page.limit() as u64) as u32,
            limit: page.limit(),
        })
    }

    // notifications

    pub fn notifications(
        &self,
        ctx: &AuthContext,
        unread_only: bool,
        limit: Option<usize>,
    ) -> Result<NotificationFeed> {
        let mut notifications = self.store.notifications_for_user(&ctx.user_id)?;
        let unread_count = notifications.iter().filter(|n| !n.is_read).count() as u64;
        if unread_only {
            notifications.retain(|n| !n.is_read);
        }
        notifications.truncate(limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT));

        Ok(NotificationFeed {
            notifications,
            unread_count,
        })
    }

    /// Mark the caller's notifications as read. Ids belonging to someone
    /// else are silently skipped. Returns how many were flipped.
    pub fn mark_notifications_read(&self, ctx: &AuthContext, request: MarkRead) -> Result<u64> {
        let mut count = 0;
        match request {
            MarkRead::All => {
                for mut notification in self.store.notifications_for_user(&ctx.user_id)? {
                    if !notification.is_read {
                        notification.mark_read();
                        self.store.put_notification(&notification)?;
                        count += 1;
                    }
                }
            }
            MarkRead::Ids(ids) => {
                for id in ids {
                    if let Some(mut notification) = self.store.notification(&id)? {
                        if notification.user_id == ctx.user_id && !notification.is_read {
                            notification.mark_read();
                            self.store.put_notification(&notification)?;
                            count += 1;
                        }
                    }
                }
            }
        }
        Ok(count)
    }

    // dashboard

    pub fn dashboard_metrics(&self, ctx: &AuthContext) -> Result<DashboardMetrics> {
        let invoices = self.store.invoices_for_company(&ctx.company_id)?;
        let elevated = matches!(ctx.role, Role::SuperAdmin | Role::Master);
        Ok(metrics::compute(&invoices, TimeStamp::new(), elevated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps_out_of_range_values() {
        let page = Page::new(0, 0);
        assert_eq!(page.page(), 1);
        assert_eq!(page.limit(), 1);

        let page = Page::new(3, 500);
        assert_eq!(page.page(), 3);
        assert_eq!(page.limit(), Page::MAX_LIMIT);

        let page = Page::default();
        assert_eq!(page.page(), 1);
        assert_eq!(page.limit(), Page::DEFAULT_LIMIT);
    }

    #[test]
    fn filter_matches_are_conjunctive() {
        let invoice = InvoiceDraft::new()
            .set_invoice_number("NF-77")
            .set_supplier_name("Transportadora Rio Azul")
            .set_total_amount(55_000)
            .into_invoice("comp_1abc", "usr_1abc")
            .unwrap();

        let mut filter = InvoiceFilter::default();
        assert!(filter.matches(&invoice));

        filter.supplier_name = Some("rio azul".into());
        assert!(filter.matches(&invoice));

        filter.approval_status = Some(ApprovalStatus::Rejected);
        assert!(!filter.matches(&invoice));
    }
}
