//! Company records and their workflow configuration
use crate::audit::Snapshot;
use crate::invoice::TimeStamp;
use crate::utils;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Company {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub tax_id: Option<String>,
    /// Invoices at or below this amount in minor units skip the rules
    /// entirely and approve on sight.
    #[n(3)]
    pub auto_approve_limit: u64,
    #[n(4)]
    pub default_debit_account: Option<String>,
    #[n(5)]
    pub default_credit_account: Option<String>,
    #[n(6)]
    pub is_active: bool,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl Company {
    pub fn new(name: impl Into<String>, tax_id: Option<String>) -> Self {
        let now = TimeStamp::new();
        Self {
            id: utils::company_id(),
            name: name.into(),
            tax_id,
            auto_approve_limit: 0,
            default_debit_account: None,
            default_credit_account: None,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn config_snapshot(&self) -> Snapshot {
        Snapshot::new()
            .field("auto_approve_limit", self.auto_approve_limit)
            .field(
                "default_debit_account",
                self.default_debit_account.clone().unwrap_or_default(),
            )
            .field(
                "default_credit_account",
                self.default_credit_account.clone().unwrap_or_default(),
            )
    }
}

/// Allowed configuration changes. The account fields use a nested Option so
/// `Some(None)` clears a default while `None` leaves it untouched.
#[derive(Debug, Default, Clone)]
pub struct CompanyConfigUpdate {
    pub auto_approve_limit: Option<u64>,
    pub default_debit_account: Option<Option<String>>,
    pub default_credit_account: Option<Option<String>>,
}

impl CompanyConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_auto_approve_limit(mut self, limit: u64) -> Self {
        self.auto_approve_limit = Some(limit);
        self
    }
    pub fn set_default_debit_account(mut self, account: Option<String>) -> Self {
        self.default_debit_account = Some(account);
        self
    }
    pub fn set_default_credit_account(mut self, account: Option<String>) -> Self {
        self.default_credit_account = Some(account);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.auto_approve_limit.is_none()
            && self.default_debit_account.is_none()
            && self.default_credit_account.is_none()
    }

    pub fn apply(&self, company: &mut Company) {
        if let Some(limit) = self.auto_approve_limit {
            company.auto_approve_limit = limit;
        }
        if let Some(account) = &self.default_debit_account {
            company.default_debit_account = account.clone();
        }
        if let Some(account) = &self.default_credit_account {
            company.default_credit_account = account.clone();
        }
        company.updated_at = TimeStamp::new();
    }
}
