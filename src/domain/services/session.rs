//! Trading-day calendar and window planning.
//!
//! Planning is pure: given "now" it returns the fire instants still ahead for
//! each window of today's session. The scheduler turns those into timers.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    PreOpen,
    Morning,
    Midday,
    Afternoon,
    PostClose,
    DailySummary,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::PreOpen => "pre_open",
            WindowKind::Morning => "morning",
            WindowKind::Midday => "midday",
            WindowKind::Afternoon => "afternoon",
            WindowKind::PostClose => "post_close",
            WindowKind::DailySummary => "daily_summary",
        }
    }

    /// Session boundaries always get the detailed report.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            WindowKind::PreOpen | WindowKind::PostClose | WindowKind::DailySummary
        )
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    OneShot,
    Repeating { interval: Duration },
}

/// A window of the trading day in exchange-local time.
///
/// Repeating windows are half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    pub kind: WindowKind,
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
    pub cadence: Cadence,
}

impl SessionWindow {
    fn one_shot(kind: WindowKind, at: NaiveTime) -> Self {
        Self {
            kind,
            start: at,
            end: None,
            cadence: Cadence::OneShot,
        }
    }

    fn repeating(kind: WindowKind, start: NaiveTime, end: NaiveTime, interval: Duration) -> Self {
        Self {
            kind,
            start,
            end: Some(end),
            cadence: Cadence::Repeating { interval },
        }
    }
}

/// Today's remaining fires for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWindow {
    pub kind: WindowKind,
    pub cadence: Cadence,
    pub window_start: DateTime<Utc>,
    pub window_end: Option<DateTime<Utc>>,
    pub fires: Vec<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TradingSession {
    offset: FixedOffset,
    windows: Vec<SessionWindow>,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl TradingSession {
    /// Standard HOSE day: pre-open check, three polling windows, post-close
    /// check and the end-of-day summary.
    pub fn new(offset: FixedOffset, poll_interval: Duration) -> Self {
        let windows = vec![
            SessionWindow::one_shot(WindowKind::PreOpen, hm(9, 5)),
            SessionWindow::repeating(WindowKind::Morning, hm(9, 15), hm(10, 30), poll_interval),
            SessionWindow::repeating(WindowKind::Midday, hm(10, 30), hm(13, 30), poll_interval),
            SessionWindow::repeating(WindowKind::Afternoon, hm(13, 30), hm(14, 30), poll_interval),
            SessionWindow::one_shot(WindowKind::PostClose, hm(14, 35)),
            SessionWindow::one_shot(WindowKind::DailySummary, hm(14, 40)),
        ];
        Self { offset, windows }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn windows(&self) -> &[SessionWindow] {
        &self.windows
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn is_trading_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    fn at_local(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        date.and_time(time)
            .and_local_timezone(self.offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Fire instants still ahead of `now` for today's windows.
    ///
    /// Past windows are skipped, an open repeating window fires immediately
    /// and then on its cadence, and future windows start at their boundary.
    pub fn plan(&self, now: DateTime<Utc>) -> Vec<PlannedWindow> {
        let date = self.local_date(now);
        if !Self::is_trading_day(date) {
            return Vec::new();
        }

        let mut planned = Vec::new();
        for window in &self.windows {
            let Some(start) = self.at_local(date, window.start) else {
                continue;
            };
            let end = window.end.and_then(|t| self.at_local(date, t));

            let fires = match (window.cadence, end) {
                (Cadence::OneShot, _) => {
                    if start < now {
                        continue;
                    }
                    vec![start]
                }
                (Cadence::Repeating { interval }, Some(end)) => {
                    if end <= now || interval <= Duration::zero() {
                        continue;
                    }
                    let first = if start <= now { now } else { start };
                    let mut fires = Vec::new();
                    let mut at = first;
                    while at < end {
                        fires.push(at);
                        at += interval;
                    }
                    fires
                }
                (Cadence::Repeating { .. }, None) => continue,
            };

            planned.push(PlannedWindow {
                kind: window.kind,
                cadence: window.cadence,
                window_start: start,
                window_end: end,
                fires,
            });
        }
        planned
    }

    /// Shortly after the next local midnight, when the day's plan is rebuilt.
    pub fn next_rollover(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let tomorrow = self.local_date(now).succ_opt().unwrap_or(NaiveDate::MAX);
        self.at_local(tomorrow, hm(0, 1))
            .unwrap_or(now + Duration::hours(24))
    }
}
