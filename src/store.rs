//! sled-backed persistence for workflow records
//!
//! Each record family lives in its own named tree, keyed by the record id
//! and stored as CBOR. Queries that the trees cannot answer directly (per
//! company listings, lookups by invoice number) scan and filter; the data
//! volumes here are per-company and small.
use crate::audit::AuditRecord;
use crate::company::Company;
use crate::error::{Result, WorkflowError};
use crate::extract::ExtractionLog;
use crate::invoice::Invoice;
use crate::ledger::AccountingEntry;
use crate::notify::Notification;
use crate::rules::ApprovalRule;
use crate::users::User;
use sled::Tree;
use std::path::Path;

#[derive(Clone)]
pub struct Store {
    companies: Tree,
    users: Tree,
    invoices: Tree,
    rules: Tree,
    audit: Tree,
    notifications: Tree,
    entries: Tree,
    extractions: Tree,
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| WorkflowError::Codec(e.to_string()))
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    minicbor::decode(bytes).map_err(|e| WorkflowError::Codec(e.to_string()))
}

fn put<T: minicbor::Encode<()>>(tree: &Tree, id: &str, value: &T) -> Result<()> {
    tree.insert(id.as_bytes(), encode(value)?)?;
    Ok(())
}

fn get<T: for<'b> minicbor::Decode<'b, ()>>(tree: &Tree, id: &str) -> Result<Option<T>> {
    match tree.get(id.as_bytes())? {
        Some(ivec) => Ok(Some(decode(ivec.as_ref())?)),
        None => Ok(None),
    }
}

fn scan<T: for<'b> minicbor::Decode<'b, ()>>(tree: &Tree) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for kv in tree.iter() {
        let (_, value) = kv?;
        records.push(decode(value.as_ref())?);
    }
    Ok(records)
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_db(sled::open(path)?)
    }

    /// Backed by a throwaway directory that sled removes on drop. For tests
    /// and demos.
    pub fn temporary() -> Result<Self> {
        Self::with_db(sled::Config::new().temporary(true).open()?)
    }

    fn with_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            companies: db.open_tree("companies")?,
            users: db.open_tree("users")?,
            invoices: db.open_tree("invoices")?,
            rules: db.open_tree("approval_rules")?,
            audit: db.open_tree("audit_log")?,
            notifications: db.open_tree("notifications")?,
            entries: db.open_tree("accounting_entries")?,
            extractions: db.open_tree("extraction_logs")?,
        })
    }

    // companies

    pub fn put_company(&self, company: &Company) -> Result<()> {
        put(&self.companies, &company.id, company)
    }

    pub fn company(&self, id: &str) -> Result<Option<Company>> {
        get(&self.companies, id)
    }

    // users

    pub fn put_user(&self, user: &User) -> Result<()> {
        put(&self.users, &user.id, user)
    }

    pub fn user(&self, id: &str) -> Result<Option<User>> {
        get(&self.users, id)
    }

    /// Lookup against the stored (lowercased) form of the address.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users: Vec<User> = scan(&self.users)?;
        Ok(users.into_iter().find(|u| u.email == email))
    }

    pub fn users_for_company(&self, company_id: &str) -> Result<Vec<User>> {
        let mut users: Vec<User> = scan(&self.users)?;
        users.retain(|u| u.company_id == company_id);
        users.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(users)
    }

    // invoices

    /// First write of a fresh invoice. Updates go through `swap_invoice`.
    pub fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        put(&self.invoices, &invoice.id, invoice)
    }

    pub fn invoice(&self, id: &str) -> Result<Option<Invoice>> {
        get(&self.invoices, id)
    }

    /// Fetch an invoice along with the raw bytes it was read from, for use
    /// as the comparison value in a later `swap_invoice`.
    pub fn invoice_raw(&self, id: &str) -> Result<Option<(sled::IVec, Invoice)>> {
        match self.invoices.get(id.as_bytes())? {
            Some(ivec) => {
                let invoice = decode(ivec.as_ref())?;
                Ok(Some((ivec, invoice)))
            }
            None => Ok(None),
        }
    }

    /// Conditional update keyed on the bytes previously read. Losing the
    /// swap means another caller changed the record first; the caller's
    /// guards no longer hold and the write is refused.
    pub fn swap_invoice(&self, id: &str, previous: &sled::IVec, updated: &Invoice) -> Result<()> {
        let bytes = encode(updated)?;
        match self
            .invoices
            .compare_and_swap(id.as_bytes(), Some(previous), Some(bytes))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(WorkflowError::ConcurrentUpdate),
        }
    }

    pub fn invoices_for_company(&self, company_id: &str) -> Result<Vec<Invoice>> {
        let mut invoices: Vec<Invoice> = scan(&self.invoices)?;
        invoices.retain(|i| i.company_id == company_id);
        Ok(invoices)
    }

    pub fn find_invoice_by_number(
        &self,
        company_id: &str,
        invoice_number: &str,
    ) -> Result<Option<Invoice>> {
        let invoices: Vec<Invoice> = scan(&self.invoices)?;
        Ok(invoices
            .into_iter()
            .find(|i| i.company_id == company_id && i.invoice_number == invoice_number))
    }

    // approval rules

    pub fn put_rule(&self, rule: &ApprovalRule) -> Result<()> {
        put(&self.rules, &rule.id, rule)
    }

    pub fn rule(&self, id: &str) -> Result<Option<ApprovalRule>> {
        get(&self.rules, id)
    }

    /// Every rule for the company, active or not, level ascending.
    pub fn rules_for_company(&self, company_id: &str) -> Result<Vec<ApprovalRule>> {
        let mut rules: Vec<ApprovalRule> = scan(&self.rules)?;
        rules.retain(|r| r.company_id == company_id);
        rules.sort_by_key(|r| r.approval_level);
        Ok(rules)
    }

    /// The resolution set: active rules only, level ascending.
    pub fn active_rules(&self, company_id: &str) -> Result<Vec<ApprovalRule>> {
        let mut rules = self.rules_for_company(company_id)?;
        rules.retain(|r| r.is_active);
        Ok(rules)
    }

    // audit trail; append only, nothing here updates or deletes

    pub fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        put(&self.audit, &record.id, record)
    }

    pub fn audit_for_invoice(&self, invoice_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = scan(&self.audit)?;
        records.retain(|r| r.invoice_id.as_deref() == Some(invoice_id));
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        records.truncate(limit);
        Ok(records)
    }

    pub fn audit_for_company(&self, company_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut records: Vec<AuditRecord> = scan(&self.audit)?;
        records.retain(|r| r.company_id == company_id);
        records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        records.truncate(limit);
        Ok(records)
    }

    // notifications

    pub fn put_notification(&self, notification: &Notification) -> Result<()> {
        put(&self.notifications, &notification.id, notification)
    }

    pub fn notification(&self, id: &str) -> Result<Option<Notification>> {
        get(&self.notifications, id)
    }

    pub fn notifications_for_user(&self, user_id: &str) -> Result<Vec<Notification>> {
        let mut notifications: Vec<Notification> = scan(&self.notifications)?;
        notifications.retain(|n| n.user_id == user_id);
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    // accounting entries

    pub fn put_entry(&self, entry: &AccountingEntry) -> Result<()> {
        put(&self.entries, &entry.id, entry)
    }

    pub fn entries_for_invoice(&self, invoice_id: &str) -> Result<Vec<AccountingEntry>> {
        let mut entries: Vec<AccountingEntry> = scan(&self.entries)?;
        entries.retain(|e| e.invoice_id == invoice_id);
        Ok(entries)
    }

    // extraction logs

    pub fn put_extraction_log(&self, log: &ExtractionLog) -> Result<()> {
        put(&self.extractions, &log.id, log)
    }

    pub fn extraction_logs_for_company(&self, company_id: &str) -> Result<Vec<ExtractionLog>> {
        let mut logs: Vec<ExtractionLog> = scan(&self.extractions)?;
        logs.retain(|l| l.company_id == company_id);
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(logs)
    }
}
