//! Dashboard counters derived from a company's invoices
use crate::invoice::{ApprovalStatus, Invoice, TimeStamp};
use chrono::{Duration, Utc};

/// Aggregates over one company's invoices. Monetary sums are minor units;
/// the approval rate is a percentage rounded to one decimal place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardMetrics {
    pub total_invoices: u64,
    /// Approved plus auto-approved.
    pub total_processed: u64,
    pub pending_approval: u64,
    pub rejected: u64,
    pub auto_approved: u64,
    pub total_value: u64,
    pub approved_value: u64,
    pub approval_rate_percent: f64,
    /// Created within the last seven days.
    pub recent_7_days: u64,
    /// For approver roles, how many decisions are waiting on them.
    pub my_pending_approvals: u64,
}

/// Pure fold over the invoice list. `elevated` is true for roles that can
/// approve, which is what `my_pending_approvals` reports on.
pub fn compute(invoices: &[Invoice], now: TimeStamp<Utc>, elevated: bool) -> DashboardMetrics {
    let window_start = now.to_datetime_utc() - Duration::days(7);
    let mut metrics = DashboardMetrics {
        total_invoices: invoices.len() as u64,
        ..Default::default()
    };

    for invoice in invoices {
        metrics.total_value += invoice.total_amount;
        if invoice.created_at.to_datetime_utc() >= window_start {
            metrics.recent_7_days += 1;
        }
        match invoice.approval_status {
            ApprovalStatus::Approved => {
                metrics.total_processed += 1;
                metrics.approved_value += invoice.total_amount;
            }
            ApprovalStatus::AutoApproved => {
                metrics.total_processed += 1;
                metrics.auto_approved += 1;
                metrics.approved_value += invoice.total_amount;
            }
            ApprovalStatus::Pending => metrics.pending_approval += 1,
            ApprovalStatus::Rejected => metrics.rejected += 1,
        }
    }

    if metrics.total_invoices > 0 {
        let rate = metrics.total_processed as f64 / metrics.total_invoices as f64 * 100.0;
        metrics.approval_rate_percent = (rate * 10.0).round() / 10.0;
    }
    if elevated {
        metrics.my_pending_approvals = metrics.pending_approval;
    }

    metrics
}
