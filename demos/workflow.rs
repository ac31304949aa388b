//! End-to-end walkthrough of the approval workflow against a throwaway
//! database: seed a company, route invoices all three ways, then print
//! the trail the engine left behind.
//!
//! Run with `cargo run --example workflow`.

use invoice_approval::auth::{Role, TokenSigner};
use invoice_approval::company::Company;
use invoice_approval::events::ChannelSink;
use invoice_approval::extract::{ExtractedFields, FileUpload, StaticExtractor};
use invoice_approval::invoice::InvoiceDraft;
use invoice_approval::rules::RuleDraft;
use invoice_approval::service::{ApproveRequest, WorkflowService};
use invoice_approval::store::Store;
use invoice_approval::users::User;
use invoice_approval::utils::format_amount;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let store = Store::temporary()?;

    // bootstrap tenant: one company, three roles
    let mut company = Company::new("Padaria Dois Irmãos", Some("12.345.678/0001-90".into()));
    company.auto_approve_limit = 50_000; // R$ 500.00
    company.default_debit_account = Some("6.1.01".into());
    company.default_credit_account = Some("2.1.01".into());
    store.put_company(&company)?;

    let sofia = User::new(
        &company.id,
        "Sofia Ramos",
        "sofia@doisirmaos.com.br",
        Role::SuperAdmin,
        None,
    );
    let marcos = User::new(
        &company.id,
        "Marcos Paiva",
        "marcos@doisirmaos.com.br",
        Role::Master,
        Some("financeiro".into()),
    );
    let julia = User::new(
        &company.id,
        "Júlia Nunes",
        "julia@doisirmaos.com.br",
        Role::User,
        Some("compras".into()),
    );
    for user in [&sofia, &marcos, &julia] {
        store.put_user(user)?;
    }

    let (sink, events) = ChannelSink::new();
    let service = WorkflowService::new(store, TokenSigner::new("demo-signing-key"))
        .with_extractor(StaticExtractor::new(ExtractedFields {
            invoice_number: Some("NF-4471".into()),
            supplier_name: Some("Moinho Boa Safra".into()),
            total_amount: Some(43_750),
            tax_amount: Some(3_980),
            ..Default::default()
        }))
        .with_event_sink(sink);

    // the admin signs in and sets up the approval ladder
    let session = service.login("sofia@doisirmaos.com.br")?;
    let admin = service.authenticate(&session.access_token)?;
    println!("signed in as {} ({})", admin.name, admin.role);

    service.create_rule(
        &admin,
        RuleDraft::new()
            .set_approval_level(1)
            .set_min_amount(50_001)
            .set_max_amount(500_000)
            .set_approver_id(&marcos.id),
    )?;
    service.create_rule(
        &admin,
        RuleDraft::new()
            .set_approval_level(2)
            .set_min_amount(500_001)
            .set_approver_id(&sofia.id),
    )?;

    let session = service.login("julia@doisirmaos.com.br")?;
    let clerk = service.authenticate(&session.access_token)?;

    // small amount: approved on sight
    let small = service.create_invoice(
        &clerk,
        InvoiceDraft::new()
            .set_invoice_number("NF-1201")
            .set_supplier_name("Distribuidora Sabor")
            .set_total_amount(31_290),
    )?;
    println!(
        "{} for R$ {} -> {}",
        small.invoice_number,
        format_amount(small.total_amount),
        small.approval_status
    );

    // mid band: waits for the level 1 approver
    let mid = service.create_invoice(
        &clerk,
        InvoiceDraft::new()
            .set_invoice_number("NF-1202")
            .set_supplier_name("Laticínios Serra Verde")
            .set_total_amount(245_000)
            .set_description("queijos e manteiga, pedido semanal"),
    )?;
    println!(
        "{} for R$ {} -> {} (assigned approver {})",
        mid.invoice_number,
        format_amount(mid.total_amount),
        mid.approval_status,
        mid.assigned_approver_id.as_deref().unwrap_or("-"),
    );

    let session = service.login("marcos@doisirmaos.com.br")?;
    let approver = service.authenticate(&session.access_token)?;

    let feed = service.notifications(&approver, true, None)?;
    println!("{} has {} unread notification(s)", approver.name, feed.unread_count);

    let approved = service.approve_invoice(
        &approver,
        &mid.id,
        ApproveRequest {
            notes: Some("prices match the contract".into()),
            ..Default::default()
        },
    )?;
    println!("{} -> {}", approved.invoice_number, approved.approval_status);

    // above every band the admin decides; this one goes back
    let large = service.create_invoice(
        &clerk,
        InvoiceDraft::new()
            .set_invoice_number("NF-1203")
            .set_supplier_name("Forno Industrial Ltda")
            .set_total_amount(1_870_000),
    )?;
    let rejected = service.reject_invoice(&admin, &large.id, "missing purchase order")?;
    println!("{} -> {}", rejected.invoice_number, rejected.approval_status);

    // uploaded document: extraction fills the fields, routing runs directly
    let upload = service.upload_invoice(
        &clerk,
        FileUpload::new(b"%PDF-1.7 demo".to_vec(), "nfe-4471.pdf", "application/pdf"),
    )?;
    println!(
        "uploaded {} ({}) -> {}",
        upload.invoice.invoice_number, upload.file_url, upload.invoice.approval_status
    );

    let detail = service.invoice(&clerk, &approved.id)?;
    println!("\naudit trail of {}:", detail.invoice.invoice_number);
    for record in detail.history.iter().rev() {
        println!("  {} by {}", record.action, record.actor_id);
    }

    let metrics = service.dashboard_metrics(&admin)?;
    println!(
        "\n{} invoices, {} processed, approval rate {}%",
        metrics.total_invoices, metrics.total_processed, metrics.approval_rate_percent
    );

    println!("\nevents:");
    for event in events.try_iter() {
        println!("  {event:?}");
    }

    Ok(())
}
