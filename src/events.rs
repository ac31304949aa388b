//! Outbound workflow events
//!
//! The engine announces transitions through an [`EventSink`]; what happens
//! next (webhooks, queues, emails) is the embedder's business. Publishing is
//! fire-and-forget and must never fail a workflow operation.
use std::sync::Mutex;
use std::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    InvoiceCreated {
        invoice_id: String,
        company_id: String,
    },
    InvoiceRouted {
        invoice_id: String,
        approver_id: Option<String>,
        level: Option<u32>,
    },
    InvoiceAutoApproved {
        invoice_id: String,
        rule_level: Option<u32>,
    },
    InvoiceApproved {
        invoice_id: String,
        approver_id: String,
    },
    InvoiceRejected {
        invoice_id: String,
        approver_id: String,
    },
    InvoiceUpdated {
        invoice_id: String,
    },
    InvoiceDeleted {
        invoice_id: String,
        deleted_by: String,
    },
}

pub trait EventSink: Send + Sync {
    /// Deliver an event. Implementations must not block the workflow and
    /// must swallow their own failures.
    fn publish(&self, event: WorkflowEvent);
}

/// Default sink: drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: WorkflowEvent) {}
}

/// Forwards events into an mpsc channel. Handy in tests and demos to observe
/// what the engine announced without wiring real delivery.
pub struct ChannelSink {
    tx: Mutex<mpsc::Sender<WorkflowEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: WorkflowEvent) {
        // a closed receiver just means nobody is listening any more
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(event);
        }
    }
}
