//! Error taxonomy for the workflow engine
use crate::auth::Role;

/// Broad classification of a failure. Callers embedding the engine map these
/// onto their own response codes; the engine itself only cares about the
/// family when deciding whether an operation is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input failed a precondition before any state was touched
    Validation,
    /// Caller identity could not be established
    Unauthorized,
    /// Identity is fine, the role or company scope is not
    Forbidden,
    /// Referenced record does not exist
    NotFound,
    /// Current state makes the operation illegal
    Conflict,
    /// Storage or an external collaborator failed
    Dependency,
    /// Unexpected internal failure
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error("a rejection reason is required")]
    EmptyReason,
    #[error("a deletion reason of at least 5 characters is required")]
    ShortDeletionReason,
    #[error("an approval note is required when acting in place of the assigned approver")]
    NoteRequired,
    #[error("invoice amount is not known yet; complete the invoice data first")]
    AmountUnknown,

    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("unknown or inactive user")]
    UnknownUser,

    #[error("role {role} may not {action}")]
    RoleDenied { role: Role, action: &'static str },
    #[error("resource belongs to a different company")]
    CompanyMismatch,

    #[error("invoice {0} not found")]
    InvoiceNotFound(String),
    #[error("approval rule {0} not found")]
    RuleNotFound(String),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("company {0} not found")]
    CompanyNotFound(String),

    #[error("invoice has already been processed")]
    AlreadyProcessed,
    #[error("invoice has already been deleted")]
    AlreadyDeleted,
    #[error("invoice number {0} is already registered for this company")]
    DuplicateInvoiceNumber(String),
    #[error("an active rule already uses approval level {0}")]
    DuplicateRuleLevel(u32),
    #[error("email {0} is already registered")]
    DuplicateEmail(String),
    #[error("record changed concurrently and the operation was not applied")]
    ConcurrentUpdate,

    #[error("store failure: {0}")]
    Store(#[from] sled::Error),
    #[error("file storage failure: {0}")]
    FileStorage(String),

    #[error("encoding failure: {0}")]
    Codec(String),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        use WorkflowError::*;
        match self {
            MissingField(_) | Invalid(_) | EmptyReason | ShortDeletionReason | NoteRequired
            | AmountUnknown => ErrorKind::Validation,
            InvalidToken | TokenExpired | InvalidCredentials | UnknownUser => {
                ErrorKind::Unauthorized
            }
            RoleDenied { .. } | CompanyMismatch => ErrorKind::Forbidden,
            InvoiceNotFound(_) | RuleNotFound(_) | UserNotFound(_) | CompanyNotFound(_) => {
                ErrorKind::NotFound
            }
            AlreadyProcessed | AlreadyDeleted | DuplicateInvoiceNumber(_)
            | DuplicateRuleLevel(_) | DuplicateEmail(_) | ConcurrentUpdate => ErrorKind::Conflict,
            Store(_) | FileStorage(_) => ErrorKind::Dependency,
            Codec(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
