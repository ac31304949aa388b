//! Identity, role checks, and signed access tokens
use crate::error::{Result, WorkflowError};
use crate::invoice::TimeStamp;
use crate::users::User;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[n(0)]
    SuperAdmin,
    #[n(1)]
    Master,
    #[n(2)]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Master => "master",
            Role::User => "user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

// Permission sets per operation family. Approving and deleting invoices is
// open to both admin tiers; rule, user, and company administration is
// reserved for super admins; editing pending invoices is open to everyone.
pub const VIEW_RULES: &[Role] = &[Role::SuperAdmin, Role::Master];
pub const MANAGE_RULES: &[Role] = &[Role::SuperAdmin];
pub const APPROVE_INVOICES: &[Role] = &[Role::SuperAdmin, Role::Master];
pub const DELETE_INVOICES: &[Role] = &[Role::SuperAdmin, Role::Master];
pub const EDIT_INVOICES: &[Role] = &[Role::SuperAdmin, Role::Master, Role::User];
pub const VIEW_USERS: &[Role] = &[Role::SuperAdmin, Role::Master];
pub const MANAGE_USERS: &[Role] = &[Role::SuperAdmin];
pub const MANAGE_COMPANY: &[Role] = &[Role::SuperAdmin];

/// The verified caller of a service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub name: String,
    pub company_id: String,
    pub role: Role,
}

pub fn require_role(ctx: &AuthContext, allowed: &[Role], action: &'static str) -> Result<()> {
    if allowed.contains(&ctx.role) {
        Ok(())
    } else {
        Err(WorkflowError::RoleDenied {
            role: ctx.role,
            action,
        })
    }
}

pub fn require_company(ctx: &AuthContext, company_id: &str) -> Result<()> {
    if ctx.company_id == company_id {
        Ok(())
    } else {
        Err(WorkflowError::CompanyMismatch)
    }
}

/// What a token asserts about its bearer.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub company_id: String,
    #[n(2)]
    pub role: Role,
    #[n(3)]
    pub expires_at: TimeStamp<Utc>,
}

/// Issues and checks access tokens. The token is the hex of the CBOR claims
/// joined to the hex of an HMAC-SHA256 tag over those bytes, so the claims
/// cannot be altered without the signing key.
pub struct TokenSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key: secret.into(),
            ttl: Duration::hours(24),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn sign(&self, user: &User) -> Result<String> {
        let claims = Claims {
            user_id: user.id.clone(),
            company_id: user.company_id.clone(),
            role: user.role,
            expires_at: (Utc::now() + self.ttl).into(),
        };
        self.sign_claims(&claims)
    }

    fn sign_claims(&self, claims: &Claims) -> Result<String> {
        let payload =
            minicbor::to_vec(claims).map_err(|e| WorkflowError::Codec(e.to_string()))?;
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| WorkflowError::Codec(e.to_string()))?;
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(payload), hex::encode(tag)))
    }

    /// Check the tag, decode the claims, and reject expired tokens.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let (payload_hex, tag_hex) = token.split_once('.').ok_or(WorkflowError::InvalidToken)?;
        let payload = hex::decode(payload_hex).map_err(|_| WorkflowError::InvalidToken)?;
        let tag = hex::decode(tag_hex).map_err(|_| WorkflowError::InvalidToken)?;

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| WorkflowError::Codec(e.to_string()))?;
        mac.update(&payload);
        mac.verify_slice(&tag)
            .map_err(|_| WorkflowError::InvalidToken)?;

        let claims: Claims =
            minicbor::decode(&payload).map_err(|_| WorkflowError::InvalidToken)?;
        if claims.expires_at < TimeStamp::new() {
            return Err(WorkflowError::TokenExpired);
        }
        Ok(claims)
    }
}
