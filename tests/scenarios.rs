#![allow(unused_imports)]

use anyhow::Context;
use invoice_approval::audit::AuditAction;
use invoice_approval::auth::{AuthContext, Role, TokenSigner};
use invoice_approval::company::{Company, CompanyConfigUpdate};
use invoice_approval::error::{ErrorKind, WorkflowError};
use invoice_approval::events::{ChannelSink, WorkflowEvent};
use invoice_approval::extract::{
    ExtractedFields, ExtractionStatus, FailingExtractor, FileUpload, StaticExtractor,
};
use invoice_approval::invoice::{ApprovalStatus, InvoiceDraft, InvoiceStatus, InvoiceUpdate};
use invoice_approval::notify::NotificationKind;
use invoice_approval::routing::RoutingOutcome;
use invoice_approval::rules::{RuleDraft, RuleUpdate};
use invoice_approval::service::{
    ApproveRequest, InvoiceFilter, MarkRead, Page, WorkflowService,
};
use invoice_approval::store::Store;
use invoice_approval::users::{User, UserDraft, UserUpdate};

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

/// A seeded single-company world: auto-approve limit of 100_000 minor units,
/// one level 1 rule covering 100_001..=500_000 assigned to the Master user,
/// and nothing above that band.
struct Workspace {
    service: WorkflowService,
    store: Store,
    company: Company,
    admin: AuthContext,
    approver: AuthContext,
    clerk: AuthContext,
    _tmp: TempDir,
}

fn ctx_for(user: &User) -> AuthContext {
    AuthContext {
        user_id: user.id.clone(),
        name: user.name.clone(),
        company_id: user.company_id.clone(),
        role: user.role,
    }
}

fn workspace(db_name: &str) -> anyhow::Result<Workspace> {
    // Sled uses file-based locking to prevent concurrent access, so only one
    // test can hold the lock at a time. As is good practice in testing create
    // separate databases for each test. The db is created on temp for
    // simplified cleanup.
    let tmp = tempdir()?;
    let store = Store::open(tmp.path().join(db_name))?;

    let mut company = Company::new("Comercial Aurora Ltda", Some("12.345.678/0001-90".into()));
    company.auto_approve_limit = 100_000;
    company.default_debit_account = Some("6.1.01".into());
    company.default_credit_account = Some("2.1.01".into());
    store.put_company(&company)?;

    let admin_user = User::new(
        &company.id,
        "Sofia Ramos",
        "sofia@aurora.com.br",
        Role::SuperAdmin,
        None,
    );
    let approver_user = User::new(
        &company.id,
        "Marcos Paiva",
        "marcos@aurora.com.br",
        Role::Master,
        Some("financeiro".into()),
    );
    let clerk_user = User::new(
        &company.id,
        "Júlia Nunes",
        "julia@aurora.com.br",
        Role::User,
        Some("compras".into()),
    );
    for user in [&admin_user, &approver_user, &clerk_user] {
        store.put_user(user)?;
    }

    let rule = RuleDraft::new()
        .set_approval_level(1)
        .set_min_amount(100_001)
        .set_max_amount(500_000)
        .set_approver_id(&approver_user.id)
        .into_rule(&company.id)?;
    store.put_rule(&rule)?;

    let service = WorkflowService::new(store.clone(), TokenSigner::new("scenario-secret"));

    Ok(Workspace {
        service,
        store,
        admin: ctx_for(&admin_user),
        approver: ctx_for(&approver_user),
        clerk: ctx_for(&clerk_user),
        company,
        _tmp: tmp,
    })
}

fn draft(number: &str, amount: u64) -> InvoiceDraft {
    InvoiceDraft::new()
        .set_invoice_number(number)
        .set_supplier_name("Fornecedora Alfa")
        .set_total_amount(amount)
}

#[test]
fn login_and_authenticate_round_trip() -> anyhow::Result<()> {
    let ws = workspace("login_roundtrip.db")?;

    // email lookup is trimmed and case-insensitive
    let session = ws.service.login("  Julia@Aurora.COM.BR ")?;
    assert_eq!(session.token_type, "Bearer");
    assert_eq!(session.user.id, ws.clerk.user_id);
    assert!(session.expires_in_secs > 0);

    let ctx = ws.service.authenticate(&session.access_token)?;
    assert_eq!(ctx, ws.clerk);

    let err = ws.service.login("nobody@aurora.com.br").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    // deactivation invalidates tokens that are already out there
    ws.service
        .deactivate_user(&ws.admin, &ws.clerk.user_id)
        .context("deactivation failed")?;
    let err = ws.service.authenticate(&session.access_token).unwrap_err();
    assert!(matches!(err, WorkflowError::UnknownUser));
    assert!(ws.service.login("julia@aurora.com.br").is_err());

    Ok(())
}

#[test]
fn invoice_below_limit_auto_approves_on_creation() -> anyhow::Result<()> {
    let ws = workspace("auto_on_create.db")?;

    let invoice = ws
        .service
        .create_invoice(&ws.clerk, draft("NF-100", 80_000))
        .context("creation failed")?;

    assert_eq!(invoice.approval_status, ApprovalStatus::AutoApproved);
    assert_eq!(invoice.status, InvoiceStatus::Completed);
    assert!(invoice.approved_at.is_some());
    // accounts fall back to the company defaults
    assert_eq!(invoice.debit_account_code.as_deref(), Some("6.1.01"));
    assert_eq!(invoice.credit_account_code.as_deref(), Some("2.1.01"));

    let entries = ws.store.entries_for_invoice(&invoice.id)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].debit_amount, 80_000);
    assert_eq!(entries[0].credit_amount, 80_000);

    let detail = ws.service.invoice(&ws.clerk, &invoice.id)?;
    let actions: Vec<&str> = detail.history.iter().map(|r| r.action.as_str()).collect();
    assert!(actions.contains(&"create_invoice"));
    assert!(actions.contains(&"auto_approve_invoice"));

    Ok(())
}

#[test]
fn amount_in_band_waits_for_the_assigned_approver() -> anyhow::Result<()> {
    let ws = workspace("band_assignment.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-200", 300_000))?;

    assert_eq!(invoice.approval_status, ApprovalStatus::Pending);
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(
        invoice.assigned_approver_id.as_deref(),
        Some(ws.approver.user_id.as_str())
    );
    assert_eq!(invoice.approval_level, Some(1));

    let feed = ws.service.notifications(&ws.approver, true, None)?;
    assert_eq!(feed.unread_count, 1);
    assert_eq!(feed.notifications[0].kind, NotificationKind::ApprovalRequired);
    assert_eq!(
        feed.notifications[0].invoice_id.as_deref(),
        Some(invoice.id.as_str())
    );

    Ok(())
}

#[test]
fn amount_above_all_bands_stays_unassigned() -> anyhow::Result<()> {
    let ws = workspace("above_bands.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-300", 700_000))?;
    assert_eq!(invoice.approval_status, ApprovalStatus::Pending);
    assert!(invoice.assigned_approver_id.is_none());
    assert!(invoice.approval_level.is_none());

    // an explicit routing pass reaches the same conclusion and records it
    let report = ws.service.validate_invoice(&ws.admin, &invoice.id)?;
    assert_eq!(
        report.outcome,
        RoutingOutcome::PendingApproval {
            approver_id: None,
            level: None,
        }
    );

    let detail = ws.service.invoice(&ws.admin, &invoice.id)?;
    let routed = detail
        .history
        .iter()
        .find(|r| r.action == AuditAction::RouteInvoice)
        .expect("routing leaves an audit record");
    assert_eq!(routed.actor_id, ws.admin.user_id);

    Ok(())
}

#[test]
fn approval_posts_a_balanced_entry_and_notifies_the_creator() -> anyhow::Result<()> {
    let ws = workspace("approve_flow.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-400", 300_000))?;
    let approved = ws
        .service
        .approve_invoice(&ws.approver, &invoice.id, ApproveRequest::default())
        .context("approval failed")?;

    assert_eq!(approved.approval_status, ApprovalStatus::Approved);
    assert_eq!(approved.status, InvoiceStatus::Completed);
    assert_eq!(
        approved.approver_id.as_deref(),
        Some(ws.approver.user_id.as_str())
    );

    let entries = ws.store.entries_for_invoice(&invoice.id)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].debit_amount, entries[0].credit_amount);
    assert_eq!(entries[0].debit_amount, 300_000);
    assert_eq!(entries[0].created_by, ws.approver.user_id);

    let feed = ws.service.notifications(&ws.clerk, true, None)?;
    assert!(
        feed.notifications
            .iter()
            .any(|n| n.kind == NotificationKind::InvoiceApproved)
    );

    // deciding twice is a conflict and must not double-post
    let err = ws
        .service
        .approve_invoice(&ws.admin, &invoice.id, ApproveRequest::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(ws.store.entries_for_invoice(&invoice.id)?.len(), 1);

    Ok(())
}

#[test]
fn standing_in_for_the_assigned_approver_needs_a_note() -> anyhow::Result<()> {
    let ws = workspace("stand_in_approval.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-500", 300_000))?;

    // the admin is not the assigned approver
    let err = ws
        .service
        .approve_invoice(&ws.admin, &invoice.id, ApproveRequest::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NoteRequired));

    let approved = ws.service.approve_invoice(
        &ws.admin,
        &invoice.id,
        ApproveRequest {
            notes: Some("approver on leave, supplier deadline today".into()),
            ..Default::default()
        },
    )?;
    assert_eq!(approved.approval_status, ApprovalStatus::Approved);

    let detail = ws.service.invoice(&ws.admin, &invoice.id)?;
    let record = detail
        .history
        .iter()
        .find(|r| r.action == AuditAction::ApproveInvoice)
        .expect("approval recorded");
    let new_values = record.new_values.as_ref().expect("after image present");
    assert_eq!(new_values.get("is_assigned_approver"), Some("false"));
    assert!(new_values.get("approval_note").is_some());

    Ok(())
}

#[test]
fn rejection_requires_a_reason_and_keeps_the_document_status() -> anyhow::Result<()> {
    let ws = workspace("reject_flow.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-600", 300_000))?;

    for blank in ["", "   "] {
        let err = ws
            .service
            .reject_invoice(&ws.approver, &invoice.id, blank)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyReason));
    }

    let rejected = ws
        .service
        .reject_invoice(&ws.approver, &invoice.id, "amount disagrees with the PO")?;
    assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
    // the document itself is untouched so the record can be corrected
    assert_eq!(rejected.status, InvoiceStatus::Pending);
    assert_eq!(
        rejected.approval_notes.as_deref(),
        Some("amount disagrees with the PO")
    );

    let feed = ws.service.notifications(&ws.clerk, true, None)?;
    assert!(
        feed.notifications
            .iter()
            .any(|n| n.kind == NotificationKind::InvoiceRejected)
    );

    let err = ws
        .service
        .approve_invoice(&ws.approver, &invoice.id, ApproveRequest::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyProcessed));

    Ok(())
}

#[test]
fn cross_company_reads_and_writes_are_blocked() -> anyhow::Result<()> {
    let ws = workspace("cross_company.db")?;

    let other_company = Company::new("Transportes Horizonte SA", None);
    ws.store.put_company(&other_company)?;
    let outsider_user = User::new(
        &other_company.id,
        "Rui Costa",
        "rui@horizonte.com.br",
        Role::Master,
        None,
    );
    ws.store.put_user(&outsider_user)?;
    let outsider = ctx_for(&outsider_user);

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-700", 300_000))?;

    let err = ws.service.invoice(&outsider, &invoice.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = ws
        .service
        .approve_invoice(&outsider, &invoice.id, ApproveRequest::default())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::CompanyMismatch));

    // listings never leak across the fence
    let page = ws
        .service
        .list_invoices(&outsider, &InvoiceFilter::default(), Page::default())?;
    assert_eq!(page.total, 0);

    // the audit trail is fenced the same way, and denied attempts leave
    // no record in either trail
    let ours = ws.store.audit_for_company(&ws.company.id, 50)?;
    assert!(ours.iter().any(|r| r.action == AuditAction::CreateInvoice));
    let theirs = ws.store.audit_for_company(&other_company.id, 50)?;
    assert!(theirs.is_empty());

    Ok(())
}

#[test]
fn role_matrix_holds() -> anyhow::Result<()> {
    let ws = workspace("role_matrix.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-800", 300_000))?;

    let denied = [
        ws.service
            .approve_invoice(&ws.clerk, &invoice.id, ApproveRequest::default())
            .err(),
        ws.service.reject_invoice(&ws.clerk, &invoice.id, "no").err(),
        ws.service.delete_invoice(&ws.clerk, &invoice.id, "mistake").err(),
        ws.service.rules(&ws.clerk).err(),
        ws.service.users(&ws.clerk).err(),
    ];
    for err in denied {
        let err = err.expect("clerk operation should be denied");
        assert!(matches!(err, WorkflowError::RoleDenied { .. }));
    }

    // Master administers neither rules nor users nor the company
    assert!(matches!(
        ws.service
            .create_rule(
                &ws.approver,
                RuleDraft::new().set_approval_level(3).set_min_amount(0)
            )
            .unwrap_err(),
        WorkflowError::RoleDenied { .. }
    ));
    assert!(matches!(
        ws.service
            .create_user(&ws.approver, UserDraft::new().set_name("X").set_email("x@y.z"))
            .unwrap_err(),
        WorkflowError::RoleDenied { .. }
    ));
    assert!(matches!(
        ws.service
            .update_company_config(
                &ws.approver,
                CompanyConfigUpdate::new().set_auto_approve_limit(1)
            )
            .unwrap_err(),
        WorkflowError::RoleDenied { .. }
    ));

    // but may view rules and users
    assert_eq!(ws.service.rules(&ws.approver)?.len(), 1);
    assert_eq!(ws.service.users(&ws.approver)?.len(), 3);

    Ok(())
}

#[test]
fn admin_manages_rules_config_and_users() -> anyhow::Result<()> {
    let ws = workspace("admin_crud.db")?;

    // a second band above the seeded one, auto-approving
    let second = ws.service.create_rule(
        &ws.admin,
        RuleDraft::new()
            .set_approval_level(2)
            .set_min_amount(500_001)
            .set_auto_approve(true),
    )?;
    assert_eq!(ws.service.rule(&ws.admin, &second.id)?.approval_level, 2);

    let err = ws
        .service
        .create_rule(
            &ws.admin,
            RuleDraft::new().set_approval_level(2).set_min_amount(0),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateRuleLevel(2)));

    let second = ws.service.update_rule(
        &ws.admin,
        &second.id,
        RuleUpdate::new().set_min_amount(600_001).set_auto_approve(false),
    )?;
    assert_eq!(second.min_amount, 600_001);
    assert!(!second.auto_approve);

    // retirement keeps the record but takes it out of routing
    ws.service.delete_rule(&ws.admin, &second.id)?;
    assert!(!ws.service.rule(&ws.admin, &second.id)?.is_active);
    assert_eq!(ws.service.rules(&ws.admin)?.len(), 2);
    let unmatched = ws.service.create_invoice(&ws.clerk, draft("NF-860", 700_000))?;
    assert_eq!(unmatched.approval_status, ApprovalStatus::Pending);
    assert!(unmatched.assigned_approver_id.is_none());

    // raising the limit changes routing for the next creation
    assert_eq!(
        ws.service.company_config(&ws.clerk)?.auto_approve_limit,
        100_000
    );
    let config = ws.service.update_company_config(
        &ws.admin,
        CompanyConfigUpdate::new().set_auto_approve_limit(250_000),
    )?;
    assert_eq!(config.auto_approve_limit, 250_000);
    let raised = ws.service.create_invoice(&ws.clerk, draft("NF-861", 200_000))?;
    assert_eq!(raised.approval_status, ApprovalStatus::AutoApproved);

    // user administration
    let hired = ws.service.create_user(
        &ws.admin,
        UserDraft::new()
            .set_name("Rafael Costa")
            .set_email(" Rafael@Aurora.com.br ")
            .set_role(Role::User)
            .set_department("fiscal"),
    )?;
    assert_eq!(hired.email, "rafael@aurora.com.br");

    let err = ws
        .service
        .create_user(
            &ws.admin,
            UserDraft::new()
                .set_name("Someone Else")
                .set_email("RAFAEL@aurora.com.br"),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateEmail(_)));

    let promoted = ws.service.update_user(
        &ws.admin,
        &hired.id,
        UserUpdate::new().set_role(Role::Master),
    )?;
    assert_eq!(promoted.role, Role::Master);

    // any member can resolve a colleague by id
    assert_eq!(ws.service.user(&ws.clerk, &hired.id)?.name, "Rafael Costa");

    // every administrative change left a trail entry
    let trail = ws.store.audit_for_company(&ws.company.id, 50)?;
    for action in [
        AuditAction::CreateApprovalRule,
        AuditAction::UpdateApprovalRule,
        AuditAction::DeleteApprovalRule,
        AuditAction::UpdateCompanyConfig,
        AuditAction::CreateUser,
        AuditAction::UpdateUser,
    ] {
        assert!(trail.iter().any(|r| r.action == action), "missing {action}");
    }

    Ok(())
}

#[test]
fn upload_without_extractor_parks_the_invoice() -> anyhow::Result<()> {
    let ws = workspace("upload_parked.db")?;

    let outcome = ws.service.upload_invoice(
        &ws.clerk,
        FileUpload::new(b"%PDF-1.4 fake".to_vec(), "nota.pdf", "application/pdf"),
    )?;

    assert_eq!(outcome.invoice.status, InvoiceStatus::PendingExtraction);
    assert!(outcome.invoice.invoice_number.starts_with("TEMP-"));
    assert_eq!(outcome.invoice.total_amount, 0);
    assert!(outcome.extracted.is_none());
    assert!(outcome.file_url.starts_with("mem://invoices/"));

    // routing refuses to act while the amount is unknown
    let err = ws
        .service
        .validate_invoice(&ws.clerk, &outcome.invoice.id)
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AmountUnknown));

    // manual completion unblocks it
    ws.service.update_invoice(
        &ws.clerk,
        &outcome.invoice.id,
        InvoiceUpdate::new()
            .set_invoice_number("NF-901")
            .set_supplier_name("Gráfica Pontual")
            .set_total_amount(90_000),
    )?;
    let report = ws.service.validate_invoice(&ws.clerk, &outcome.invoice.id)?;
    assert_eq!(report.outcome, RoutingOutcome::AutoApproved);
    assert_eq!(report.invoice.status, InvoiceStatus::Completed);

    let logs = ws.store.extraction_logs_for_company(&ws.company.id)?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExtractionStatus::Processing);

    Ok(())
}

#[test]
fn upload_with_extraction_routes_straight_through() -> anyhow::Result<()> {
    let ws = workspace("upload_extracted.db")?;
    let service = ws.service.with_extractor(StaticExtractor::new(ExtractedFields {
        invoice_number: Some("NF-4471".into()),
        supplier_name: Some("Moinho Boa Safra".into()),
        total_amount: Some(43_750),
        tax_amount: Some(3_980),
        ..Default::default()
    }));

    let outcome = service.upload_invoice(
        &ws.clerk,
        FileUpload::new(b"%PDF-1.7".to_vec(), "nfe-4471.pdf", "application/pdf"),
    )?;

    assert_eq!(outcome.invoice.invoice_number, "NF-4471");
    assert_eq!(outcome.invoice.total_amount, 43_750);
    // 43_750 sits below the company limit
    assert_eq!(outcome.invoice.approval_status, ApprovalStatus::AutoApproved);
    assert_eq!(outcome.invoice.status, InvoiceStatus::Completed);

    let logs = ws.store.extraction_logs_for_company(&ws.company.id)?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExtractionStatus::Completed);
    assert!(logs[0].parsed.is_some());
    assert!(logs[0].processing_time_ms.is_some());

    // same document again: the extracted number is already registered
    let err = service
        .upload_invoice(
            &ws.clerk,
            FileUpload::new(b"%PDF-1.7".to_vec(), "nfe-4471.pdf", "application/pdf"),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateInvoiceNumber(_)));

    Ok(())
}

#[test]
fn upload_validates_the_file_itself() -> anyhow::Result<()> {
    let ws = workspace("upload_validation.db")?;

    let err = ws
        .service
        .upload_invoice(&ws.clerk, FileUpload::new(vec![], "nota.pdf", "application/pdf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = ws
        .service
        .upload_invoice(
            &ws.clerk,
            FileUpload::new(b"plain".to_vec(), "nota.txt", "text/plain"),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Invalid(_)));

    Ok(())
}

#[test]
fn failed_extraction_marks_the_invoice_for_correction() -> anyhow::Result<()> {
    let ws = workspace("upload_failed_extraction.db")?;
    let service = ws
        .service
        .with_extractor(FailingExtractor::new("ocr backend offline"));

    let outcome = service.upload_invoice(
        &ws.clerk,
        FileUpload::new(b"%PDF-1.4".to_vec(), "borrada.pdf", "application/pdf"),
    )?;

    assert_eq!(outcome.invoice.status, InvoiceStatus::Error);
    assert_eq!(outcome.invoice.approval_status, ApprovalStatus::Pending);

    let logs = ws.store.extraction_logs_for_company(&ws.company.id)?;
    assert_eq!(logs[0].status, ExtractionStatus::Error);
    assert_eq!(logs[0].error_message.as_deref(), Some("ocr backend offline"));

    // the error state is recoverable through an ordinary edit
    let err = service.validate_invoice(&ws.clerk, &outcome.invoice.id).unwrap_err();
    assert!(matches!(err, WorkflowError::AmountUnknown));

    service.update_invoice(
        &ws.clerk,
        &outcome.invoice.id,
        InvoiceUpdate::new()
            .set_invoice_number("NF-902")
            .set_supplier_name("Recuperada ME")
            .set_total_amount(250_000),
    )?;
    let report = service.validate_invoice(&ws.clerk, &outcome.invoice.id)?;
    assert!(!report.outcome.is_approved());
    assert_eq!(
        report.invoice.assigned_approver_id.as_deref(),
        Some(ws.approver.user_id.as_str())
    );

    Ok(())
}

#[test]
fn rule_with_auto_approve_completes_on_validate() -> anyhow::Result<()> {
    let ws = workspace("rule_auto.db")?;

    ws.service.create_rule(
        &ws.admin,
        RuleDraft::new()
            .set_approval_level(2)
            .set_min_amount(500_001)
            .set_max_amount(1_000_000)
            .set_auto_approve(true),
    )?;

    // creation only assigns; the rule's auto shortcut fires on validate
    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-903", 700_000))?;
    assert_eq!(invoice.approval_status, ApprovalStatus::Pending);
    assert_eq!(invoice.approval_level, Some(2));

    let report = ws.service.validate_invoice(&ws.clerk, &invoice.id)?;
    assert_eq!(report.outcome, RoutingOutcome::AutoApprovedByRule { level: 2 });
    assert_eq!(report.invoice.status, InvoiceStatus::Completed);

    let entries = ws.store.entries_for_invoice(&invoice.id)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].debit_amount, 700_000);

    let detail = ws.service.invoice(&ws.clerk, &invoice.id)?;
    let auto = detail
        .history
        .iter()
        .find(|r| r.action == AuditAction::AutoApproveInvoice)
        .expect("auto approval recorded");
    assert_eq!(
        auto.new_values.as_ref().and_then(|s| s.get("rule_level")),
        Some("2")
    );

    Ok(())
}

#[test]
fn soft_delete_leaves_a_tombstone() -> anyhow::Result<()> {
    let ws = workspace("soft_delete.db")?;

    let invoice = ws.service.create_invoice(&ws.clerk, draft("NF-904", 300_000))?;

    let err = ws
        .service
        .delete_invoice(&ws.approver, &invoice.id, "dup ")
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ShortDeletionReason));

    let deleted = ws
        .service
        .delete_invoice(&ws.approver, &invoice.id, "duplicate of NF-880")?;
    assert_eq!(deleted.status, InvoiceStatus::Deleted);
    assert_eq!(
        deleted.deleted_by.as_deref(),
        Some(ws.approver.user_id.as_str())
    );
    assert_eq!(deleted.deletion_reason.as_deref(), Some("duplicate of NF-880"));

    // tombstones stay readable but refuse further workflow
    let detail = ws.service.invoice(&ws.clerk, &invoice.id)?;
    assert_eq!(detail.invoice.status, InvoiceStatus::Deleted);

    for err in [
        ws.service
            .approve_invoice(&ws.approver, &invoice.id, ApproveRequest::default())
            .unwrap_err(),
        ws.service
            .delete_invoice(&ws.approver, &invoice.id, "delete twice")
            .unwrap_err(),
        ws.service
            .update_invoice(
                &ws.clerk,
                &invoice.id,
                InvoiceUpdate::new().set_total_amount(1),
            )
            .unwrap_err(),
        ws.service.validate_invoice(&ws.clerk, &invoice.id).unwrap_err(),
    ] {
        assert!(matches!(err, WorkflowError::AlreadyDeleted));
    }

    Ok(())
}

#[test]
fn editing_is_pending_only_and_checks_duplicates() -> anyhow::Result<()> {
    let ws = workspace("edit_rules.db")?;

    let first = ws.service.create_invoice(&ws.clerk, draft("NF-905", 300_000))?;
    let second = ws.service.create_invoice(&ws.clerk, draft("NF-906", 300_000))?;

    // renaming onto a taken number is refused
    let err = ws
        .service
        .update_invoice(
            &ws.clerk,
            &second.id,
            InvoiceUpdate::new().set_invoice_number("NF-905"),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateInvoiceNumber(_)));

    // keeping your own number is not a duplicate
    let updated = ws.service.update_invoice(
        &ws.clerk,
        &second.id,
        InvoiceUpdate::new()
            .set_invoice_number("NF-906")
            .set_description("re-sent by the supplier"),
    )?;
    assert_eq!(
        updated.description.as_deref(),
        Some("re-sent by the supplier")
    );

    // an empty update is refused outright
    let err = ws
        .service
        .update_invoice(&ws.clerk, &second.id, InvoiceUpdate::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // once decided, the record is frozen
    ws.service
        .approve_invoice(&ws.approver, &first.id, ApproveRequest::default())?;
    let err = ws
        .service
        .update_invoice(
            &ws.clerk,
            &first.id,
            InvoiceUpdate::new().set_total_amount(5),
        )
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyProcessed));

    // the edit itself is in the trail with both images
    let detail = ws.service.invoice(&ws.clerk, &second.id)?;
    let edit = detail
        .history
        .iter()
        .find(|r| r.action == AuditAction::UpdateInvoice)
        .expect("edit recorded");
    assert!(edit.old_values.is_some());
    assert!(edit.new_values.is_some());

    Ok(())
}

#[test]
fn listing_is_scoped_filtered_and_paginated() -> anyhow::Result<()> {
    let ws = workspace("listing.db")?;

    for (number, amount) in [
        ("NF-910", 40_000),
        ("NF-911", 60_000),
        ("NF-912", 200_000),
        ("NF-913", 300_000),
        ("NF-914", 400_000),
    ] {
        ws.service.create_invoice(&ws.clerk, draft(number, amount))?;
    }

    let all = ws
        .service
        .list_invoices(&ws.clerk, &InvoiceFilter::default(), Page::default())?;
    assert_eq!(all.total, 5);
    assert_eq!(all.items.len(), 5);

    let pending_filter = InvoiceFilter {
        approval_status: Some(ApprovalStatus::Pending),
        ..Default::default()
    };
    let first_page = ws
        .service
        .list_invoices(&ws.clerk, &pending_filter, Page::new(1, 2))?;
    assert_eq!(first_page.total, 3);
    assert_eq!(first_page.items.len(), 2);
    assert_eq!(first_page.pages, 2);

    let second_page = ws
        .service
        .list_invoices(&ws.clerk, &pending_filter, Page::new(2, 2))?;
    assert_eq!(second_page.items.len(), 1);

    // past the end is an empty page, not an error
    let beyond = ws
        .service
        .list_invoices(&ws.clerk, &pending_filter, Page::new(9, 2))?;
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 3);

    let by_supplier = ws.service.list_invoices(
        &ws.clerk,
        &InvoiceFilter {
            supplier_name: Some("fornecedora".into()),
            ..Default::default()
        },
        Page::default(),
    )?;
    assert_eq!(by_supplier.total, 5);

    Ok(())
}

#[test]
fn notifications_flip_to_read_only_for_their_owner() -> anyhow::Result<()> {
    let ws = workspace("notifications.db")?;

    ws.service.create_invoice(&ws.clerk, draft("NF-920", 300_000))?;

    let feed = ws.service.notifications(&ws.approver, true, None)?;
    assert_eq!(feed.unread_count, 1);
    let notification_id = feed.notifications[0].id.clone();

    // someone else cannot mark it
    let flipped = ws
        .service
        .mark_notifications_read(&ws.clerk, MarkRead::Ids(vec![notification_id.clone()]))?;
    assert_eq!(flipped, 0);

    let flipped = ws
        .service
        .mark_notifications_read(&ws.approver, MarkRead::Ids(vec![notification_id]))?;
    assert_eq!(flipped, 1);
    assert_eq!(ws.service.notifications(&ws.approver, true, None)?.unread_count, 0);

    // marking everything is idempotent
    ws.service.create_invoice(&ws.clerk, draft("NF-921", 300_000))?;
    ws.service.create_invoice(&ws.clerk, draft("NF-922", 300_000))?;
    assert_eq!(
        ws.service
            .mark_notifications_read(&ws.approver, MarkRead::All)?,
        2
    );
    assert_eq!(
        ws.service
            .mark_notifications_read(&ws.approver, MarkRead::All)?,
        0
    );

    Ok(())
}

#[test]
fn dashboard_counts_the_workflow() -> anyhow::Result<()> {
    let ws = workspace("dashboard.db")?;

    ws.service.create_invoice(&ws.clerk, draft("NF-930", 80_000))?;
    ws.service.create_invoice(&ws.clerk, draft("NF-931", 300_000))?;
    let third = ws.service.create_invoice(&ws.clerk, draft("NF-932", 200_000))?;
    ws.service
        .reject_invoice(&ws.approver, &third.id, "wrong supplier")?;

    let metrics = ws.service.dashboard_metrics(&ws.admin)?;
    assert_eq!(metrics.total_invoices, 3);
    assert_eq!(metrics.auto_approved, 1);
    assert_eq!(metrics.pending_approval, 1);
    assert_eq!(metrics.rejected, 1);
    assert_eq!(metrics.total_processed, 1);
    assert_eq!(metrics.total_value, 580_000);
    assert_eq!(metrics.approved_value, 80_000);
    assert_eq!(metrics.approval_rate_percent, 33.3);
    assert_eq!(metrics.recent_7_days, 3);
    assert_eq!(metrics.my_pending_approvals, 1);

    // a plain user sees the same counters without the approver view
    let clerk_metrics = ws.service.dashboard_metrics(&ws.clerk)?;
    assert_eq!(clerk_metrics.my_pending_approvals, 0);
    assert_eq!(clerk_metrics.total_invoices, 3);

    Ok(())
}

#[test]
fn events_stream_through_an_attached_sink() -> anyhow::Result<()> {
    let ws = workspace("events.db")?;
    let (sink, events) = ChannelSink::new();
    let service = ws.service.with_event_sink(sink);

    let auto = service.create_invoice(&ws.clerk, draft("NF-940", 50_000))?;
    let pending = service.create_invoice(&ws.clerk, draft("NF-941", 300_000))?;
    service.approve_invoice(&ws.approver, &pending.id, ApproveRequest::default())?;

    let seen: Vec<WorkflowEvent> = events.try_iter().collect();
    assert_eq!(seen.len(), 4);
    assert_eq!(
        seen[0],
        WorkflowEvent::InvoiceCreated {
            invoice_id: auto.id.clone(),
            company_id: ws.company.id.clone(),
        }
    );
    assert_eq!(
        seen[1],
        WorkflowEvent::InvoiceAutoApproved {
            invoice_id: auto.id,
            rule_level: None,
        }
    );
    assert!(matches!(
        &seen[2],
        WorkflowEvent::InvoiceCreated { invoice_id, .. } if *invoice_id == pending.id
    ));
    assert_eq!(
        seen[3],
        WorkflowEvent::InvoiceApproved {
            invoice_id: pending.id,
            approver_id: ws.approver.user_id.clone(),
        }
    );

    Ok(())
}

#[test]
fn duplicate_invoice_numbers_are_rejected_per_company() -> anyhow::Result<()> {
    let ws = workspace("dup_numbers.db")?;

    ws.service.create_invoice(&ws.clerk, draft("NF-950", 40_000))?;
    let err = ws
        .service
        .create_invoice(&ws.clerk, draft("NF-950", 90_000))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DuplicateInvoiceNumber(_)));

    // the same number is fine in a different company
    let other_company = Company::new("Filial Sul Ltda", None);
    ws.store.put_company(&other_company)?;
    let other_user = User::new(
        &other_company.id,
        "Bea Martins",
        "bea@filialsul.com.br",
        Role::User,
        None,
    );
    ws.store.put_user(&other_user)?;
    assert!(
        ws.service
            .create_invoice(&ctx_for(&other_user), draft("NF-950", 40_000))
            .is_ok()
    );

    Ok(())
}
