//! User accounts scoped to a company
use crate::audit::Snapshot;
use crate::auth::Role;
use crate::error::{Result, WorkflowError};
use crate::invoice::TimeStamp;
use crate::utils;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct User {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub company_id: String,
    #[n(2)]
    pub name: String,
    /// Stored lowercased; uniqueness is checked against the stored form.
    #[n(3)]
    pub email: String,
    #[n(4)]
    pub role: Role,
    #[n(5)]
    pub department: Option<String>,
    #[n(6)]
    pub is_active: bool,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl User {
    pub fn new(
        company_id: &str,
        name: impl Into<String>,
        email: impl Into<String>,
        role: Role,
        department: Option<String>,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            id: utils::user_id(),
            company_id: company_id.to_string(),
            name: name.into(),
            email: email.into().trim().to_ascii_lowercase(),
            role,
            department,
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn profile_snapshot(&self) -> Snapshot {
        Snapshot::new()
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role", self.role)
            .field("department", self.department.clone().unwrap_or_default())
            .field("is_active", self.is_active)
    }
}

/// Builder for new user accounts.
#[derive(Debug, Default, Clone)]
pub struct UserDraft {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub department: Option<String>,
}

impl UserDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn set_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
    pub fn set_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }
    pub fn set_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().is_none_or(|n| n.trim().is_empty()) {
            return Err(WorkflowError::MissingField("name"));
        }
        if self.email.as_deref().is_none_or(|e| e.trim().is_empty()) {
            return Err(WorkflowError::MissingField("email"));
        }
        Ok(())
    }

    pub fn into_user(self, company_id: &str) -> Result<User> {
        self.validate()?;
        Ok(User::new(
            company_id,
            self.name.unwrap_or_default().trim().to_string(),
            self.email.unwrap_or_default(),
            self.role,
            self.department,
        ))
    }
}

/// The fields user administration may change. `department` uses a nested
/// Option so `Some(None)` clears the value while `None` leaves it alone.
#[derive(Debug, Default, Clone)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub department: Option<Option<String>>,
    pub is_active: Option<bool>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn set_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }
    pub fn set_department(mut self, department: Option<String>) -> Self {
        self.department = Some(department);
        self
    }
    pub fn set_active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.role.is_none()
            && self.department.is_none()
            && self.is_active.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.trim().to_string();
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(department) = &self.department {
            user.department = department.clone();
        }
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
        user.updated_at = TimeStamp::new();
    }
}
