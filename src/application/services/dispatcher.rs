//! Alert Dispatcher
//!
//! Turns one tick's evaluation into at most one message per user. Ticks with
//! signals and session boundaries get the detailed layout; quiet intraday
//! ticks get one line per symbol.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::domain::entities::UserId;
use crate::domain::errors::DeliveryError;
use crate::domain::repositories::NotificationSink;
use crate::domain::services::session::WindowKind;
use crate::domain::services::signal_engine::SymbolReport;
use crate::domain::services::signals::{Severity, Signal};
use crate::domain::value_objects::pnl::PnL;
use crate::persistence::repository::UserRepository;

const RULE: &str = "━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "window")]
pub enum TickTrigger {
    Scheduled(WindowKind),
    OnDemand,
}

impl TickTrigger {
    fn wants_detail(&self) -> bool {
        match self {
            TickTrigger::Scheduled(window) => window.is_boundary(),
            TickTrigger::OnDemand => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TickTrigger::Scheduled(window) => window.as_str(),
            TickTrigger::OnDemand => "on demand",
        }
    }
}

/// Everything one tick produced for one user.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub user_id: UserId,
    pub trigger: TickTrigger,
    pub generated_at: DateTime<Utc>,
    pub local_time: DateTime<FixedOffset>,
    pub symbols: Vec<SymbolReport>,
    pub watchlist: Vec<Signal>,
}

impl TickReport {
    /// Sum of unrealized P&L over symbols that resolved this tick.
    pub fn total_pnl(&self) -> Option<f64> {
        let resolved: Vec<f64> = self.symbols.iter().filter_map(|s| s.pnl).collect();
        if resolved.is_empty() {
            None
        } else {
            Some(resolved.iter().sum())
        }
    }

    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.symbols
            .iter()
            .flat_map(|s| s.signals.iter())
            .chain(self.watchlist.iter())
    }

    pub fn has_signals(&self) -> bool {
        self.signals().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent,
    NothingToSend,
    NoChannel,
    Failed(DeliveryError),
}

fn severity_marker(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::Warning => "🟠",
        Severity::Info => "🔵",
    }
}

fn format_pnl(pnl: Option<f64>) -> String {
    match pnl.and_then(|v| PnL::new(v).ok()) {
        Some(pnl) => pnl.to_string(),
        None => "N/A".to_string(),
    }
}

fn format_signal(signal: &Signal) -> String {
    format!(
        "{} {} {}: {}",
        severity_marker(signal.severity()),
        signal.action(),
        signal.symbol(),
        signal.describe()
    )
}

/// Render a tick report, or `None` when a scheduled tick has nothing to say.
pub fn render(report: &TickReport) -> Option<String> {
    if report.symbols.is_empty() {
        return render_without_positions(report);
    }

    if report.has_signals() || report.trigger.wants_detail() {
        Some(render_detailed(report))
    } else {
        Some(render_compact(report))
    }
}

fn render_without_positions(report: &TickReport) -> Option<String> {
    let mut lines = Vec::new();
    match report.trigger {
        TickTrigger::OnDemand => lines.push("Portfolio is empty.".to_string()),
        TickTrigger::Scheduled(_) if report.watchlist.is_empty() => return None,
        TickTrigger::Scheduled(_) => lines.push(header(report, "👀 Watchlist")),
    }
    for signal in &report.watchlist {
        lines.push(format_signal(signal));
    }
    Some(lines.join("\n"))
}

fn header(report: &TickReport, title: &str) -> String {
    format!(
        "{} · {} · {}",
        title,
        report.trigger.label(),
        report.local_time.format("%H:%M %d/%m")
    )
}

fn render_detailed(report: &TickReport) -> String {
    let mut lines = vec![header(report, "📊 Portfolio report"), RULE.to_string()];

    for symbol in &report.symbols {
        lines.push(format!(
            "{}  {} @ {:.2}",
            symbol.symbol, symbol.quantity, symbol.avg_cost
        ));
        match symbol.price {
            Some(price) => {
                let pct = if symbol.avg_cost > 0.0 {
                    format!(" ({:+.2}%)", (price / symbol.avg_cost - 1.0) * 100.0)
                } else {
                    String::new()
                };
                lines.push(format!(
                    "  Price: {:.2} | P&L: {}{}",
                    price,
                    format_pnl(symbol.pnl),
                    pct
                ));
            }
            None => lines.push("  Price: N/A | P&L: N/A".to_string()),
        }
        for signal in &symbol.signals {
            lines.push(format!("  {}", format_signal(signal)));
        }
    }

    if !report.watchlist.is_empty() {
        lines.push(RULE.to_string());
        lines.push("👀 Watchlist".to_string());
        for signal in &report.watchlist {
            lines.push(format!("  {}", format_signal(signal)));
        }
    }

    lines.push(RULE.to_string());
    lines.push(format!("Total P&L: {}", format_pnl(report.total_pnl())));
    lines.join("\n")
}

fn render_compact(report: &TickReport) -> String {
    let mut lines = vec![header(report, "⏱")];
    for symbol in &report.symbols {
        match symbol.price {
            Some(price) => lines.push(format!(
                "{} {:.2} ({})",
                symbol.symbol,
                price,
                format_pnl(symbol.pnl)
            )),
            None => lines.push(format!("{} N/A", symbol.symbol)),
        }
    }
    lines.push(format!("Total P&L: {}", format_pnl(report.total_pnl())));
    lines.join("\n")
}

/// Sends rendered reports to the user's registered channel.
pub struct AlertDispatcher {
    sink: Arc<dyn NotificationSink>,
    users: UserRepository,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, users: UserRepository, timeout: Duration) -> Self {
        Self {
            sink,
            users,
            timeout,
        }
    }

    /// Deliver the report; failures are logged and reported, never retried.
    pub async fn dispatch(&self, report: &TickReport) -> DispatchOutcome {
        let Some(text) = render(report) else {
            return DispatchOutcome::NothingToSend;
        };

        let chat_id = match self.users.chat_id(report.user_id).await {
            Ok(Some(chat_id)) => chat_id,
            Ok(None) => {
                warn!(
                    user_id = report.user_id,
                    "No notification channel registered, skipping alert"
                );
                return DispatchOutcome::NoChannel;
            }
            Err(e) => {
                error!(user_id = report.user_id, "Failed to look up channel: {}", e);
                return DispatchOutcome::Failed(DeliveryError::Unreachable(e.to_string()));
            }
        };

        let result = match tokio::time::timeout(self.timeout, self.sink.send(&chat_id, &text)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(()) => {
                info!(
                    user_id = report.user_id,
                    sink = self.sink.name(),
                    trigger = report.trigger.label(),
                    signals = report.signals().count(),
                    "Alert delivered"
                );
                DispatchOutcome::Sent
            }
            Err(e) => {
                error!(
                    user_id = report.user_id,
                    sink = self.sink.name(),
                    "Alert delivery failed: {}",
                    e
                );
                DispatchOutcome::Failed(e)
            }
        }
    }
}
