//! Cron-style schedule windows and the timer that fires them.
//!
//! Expressions use the classic five fields (minute, hour, day of month,
//! month, day of week) in local time. Fields accept `*`, lists, ranges,
//! steps and three letter month or day names. The `@hourly`, `@daily`,
//! `@midnight`, `@weekly`, `@monthly`, `@yearly` and `@annually` shorthands
//! are also understood.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};
use sportsmatrix_core::Board;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::matrix::ScreenHandle;

/// How many years ahead `next_after` searches before giving up
const SEARCH_YEARS: i32 = 5;

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A parsed five field cron expression
#[derive(Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    minutes: u64,
    hours: u64,
    days: u64,
    months: u64,
    weekdays: u64,
    /// Day of month was a bare `*`
    any_day: bool,
    /// Day of week was a bare `*`
    any_weekday: bool,
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CronSchedule({:?})", self.expr)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

struct Field {
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset of the first name, months start at 1
    name_base: u32,
}

const MINUTE: Field = Field {
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: Field = Field {
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY: Field = Field {
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: Field = Field {
    min: 1,
    max: 12,
    names: &MONTHS,
    name_base: 1,
};
const WEEKDAY: Field = Field {
    min: 0,
    max: 6,
    names: &WEEKDAYS,
    name_base: 0,
};

impl Field {
    fn value(&self, s: &str) -> Result<u32, String> {
        let lower = s.to_ascii_lowercase();
        if let Some(i) = self.names.iter().position(|n| *n == lower) {
            return Ok(i as u32 + self.name_base);
        }
        let value: u32 = s.parse().map_err(|_| format!("invalid value {s:?}"))?;
        if value < self.min || value > self.max {
            return Err(format!(
                "{value} is outside {}..={}",
                self.min, self.max
            ));
        }
        Ok(value)
    }

    /// Parse one field into a bit set, also reporting whether it was a bare `*`
    fn parse(&self, field: &str) -> Result<(u64, bool), String> {
        let mut bits = 0;
        let mut star = false;
        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("invalid step {step:?}"))?;
                    if step == 0 {
                        return Err("step must be positive".into());
                    }
                    (range, Some(step))
                },
                None => (part, None),
            };

            let (start, end) = if range == "*" || range == "?" {
                star |= step.is_none();
                (self.min, self.max)
            } else if let Some((lo, hi)) = range.split_once('-') {
                (self.value(lo)?, self.value(hi)?)
            } else {
                let start = self.value(range)?;
                // `5/15` runs from 5 to the end of the range
                (start, if step.is_some() { self.max } else { start })
            };
            if start > end {
                return Err(format!("range {start}-{end} is backwards"));
            }

            for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
                bits |= 1 << value;
            }
        }
        Ok((bits, star))
    }
}

impl FromStr for CronSchedule {
    type Err = ConfigError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        Self::parse(expr)
    }
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        let trimmed = expr.trim();
        let expanded = match trimmed {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            s if s.starts_with('@') => {
                return Err(ConfigError::schedule(expr, "unknown descriptor"))
            },
            s => s,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, day, month, weekday] = fields[..] else {
            return Err(ConfigError::schedule(
                expr,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        };
        let wrap = |res: Result<(u64, bool), String>| {
            res.map_err(|reason| ConfigError::schedule(expr, reason))
        };

        let (minutes, _) = wrap(MINUTE.parse(minute))?;
        let (hours, _) = wrap(HOUR.parse(hour))?;
        let (days, any_day) = wrap(DAY.parse(day))?;
        let (months, _) = wrap(MONTH.parse(month))?;
        let (weekdays, any_weekday) = wrap(WEEKDAY.parse(weekday))?;

        Ok(Self {
            expr: trimmed.to_string(),
            minutes,
            hours,
            days,
            months,
            weekdays,
            any_day,
            any_weekday,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let day = self.days & (1 << date.day()) != 0;
        let weekday = self.weekdays & (1 << date.weekday().num_days_from_sunday()) != 0;
        // Restricting both day fields selects either one
        if self.any_day || self.any_weekday {
            day && weekday
        } else {
            day || weekday
        }
    }

    /// Whether the schedule fires during the minute containing `time`
    pub fn matches(&self, time: NaiveDateTime) -> bool {
        self.minutes & (1 << time.minute()) != 0
            && self.hours & (1 << time.hour()) != 0
            && self.months & (1 << time.month()) != 0
            && self.day_matches(time.date())
    }

    /// The first firing strictly after `time`, if any within a few years
    pub fn next_after(&self, time: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = time.with_second(0)?.with_nanosecond(0)? + ChronoDuration::minutes(1);
        let limit = time.year() + SEARCH_YEARS;

        while t.year() <= limit {
            if self.months & (1 << t.month()) == 0 {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if self.hours & (1 << t.hour()) == 0 {
                t = t.with_minute(0)? + ChronoDuration::hours(1);
                continue;
            }
            if self.minutes & (1 << t.minute()) == 0 {
                t += ChronoDuration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

/// Source of local wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// What a window does when it fires
#[derive(Clone)]
pub enum WindowAction {
    Enable(Arc<dyn Board>),
    Disable(Arc<dyn Board>),
    ClearCache(Arc<dyn Board>),
    ScreenOn,
    ScreenOff,
}

impl fmt::Debug for WindowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable(board) => write!(f, "Enable({})", board.name()),
            Self::Disable(board) => write!(f, "Disable({})", board.name()),
            Self::ClearCache(board) => write!(f, "ClearCache({})", board.name()),
            Self::ScreenOn => f.write_str("ScreenOn"),
            Self::ScreenOff => f.write_str("ScreenOff"),
        }
    }
}

/// A schedule bound to an action
#[derive(Debug, Clone)]
pub struct ScheduleWindow {
    pub schedule: CronSchedule,
    pub action: WindowAction,
}

/// Draw caches are dropped daily at this time
pub const CACHE_CLEAR_SCHEDULE: &str = "0 4 * * *";

impl ScheduleWindow {
    pub fn new(expr: &str, action: WindowAction) -> Result<Self, ConfigError> {
        Ok(Self {
            schedule: CronSchedule::parse(expr)?,
            action,
        })
    }

    /// On, off and cache clear windows for one board
    pub fn for_board(
        board: &Arc<dyn Board>,
        on_times: &[String],
        off_times: &[String],
    ) -> Result<Vec<Self>, ConfigError> {
        let on = on_times
            .iter()
            .map(|expr| Self::new(expr, WindowAction::Enable(board.clone())));
        let off = off_times
            .iter()
            .map(|expr| Self::new(expr, WindowAction::Disable(board.clone())));
        let clear = std::iter::once(Self::new(
            CACHE_CLEAR_SCHEDULE,
            WindowAction::ClearCache(board.clone()),
        ));
        on.chain(off).chain(clear).collect()
    }

    /// Apply the action. Repeating an action on a board or screen already in
    /// that state changes nothing.
    fn fire(&self, screen: &ScreenHandle) {
        info!(schedule = %self.schedule, action = ?self.action, "schedule fired");
        match &self.action {
            WindowAction::Enable(board) => {
                if !board.enable() {
                    debug!(board = board.name(), "already enabled");
                }
            },
            WindowAction::Disable(board) => {
                if !board.disable() {
                    debug!(board = board.name(), "already disabled");
                }
            },
            WindowAction::ClearCache(board) => board.clear_draw_cache(),
            WindowAction::ScreenOn => screen.on(),
            WindowAction::ScreenOff => screen.off(),
        }
    }
}

/// Evaluates windows against a clock, firing each at most once per minute
pub struct ScheduleTimer {
    clock: Arc<dyn Clock>,
    windows: Vec<ScheduleWindow>,
    last: Mutex<NaiveDateTime>,
}

impl ScheduleTimer {
    pub fn new(clock: Arc<dyn Clock>, windows: Vec<ScheduleWindow>) -> Self {
        let last = minute_of(clock.now());
        Self {
            clock,
            windows,
            last: Mutex::new(last),
        }
    }

    /// Windows due between the last check and now, in minute then
    /// registration order. Each minute is evaluated once.
    pub fn due(&self) -> Vec<&ScheduleWindow> {
        let now = minute_of(self.clock.now());
        let Ok(mut last) = self.last.lock() else {
            return Vec::new();
        };
        if now <= *last {
            return Vec::new();
        }

        let mut due = Vec::new();
        let mut minute = *last + ChronoDuration::minutes(1);
        // Catch up after a stall, but never replay more than a day
        if now - minute > ChronoDuration::days(1) {
            warn!(from = %minute, to = %now, "schedule clock jumped, skipping missed windows");
            minute = now;
        }
        while minute <= now {
            due.extend(self.windows.iter().filter(|w| w.schedule.matches(minute)));
            minute += ChronoDuration::minutes(1);
        }
        *last = now;
        due
    }

    /// Fire due windows every `poll` until `shutdown`
    pub async fn run(&self, poll: Duration, screen: &ScreenHandle, shutdown: &CancellationToken) {
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    for window in self.due() {
                        window.fire(screen);
                    }
                },
            }
        }
    }
}

fn minute_of(time: NaiveDateTime) -> NaiveDateTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}
