use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Weekday};
use thiserror::Error;
use uuid::Uuid;

/// Everything a schedule entry can ask the engine to do. Unknown command
/// strings are rejected when the schedule file is parsed, never at fire time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Play,
}

impl CommandKind {
    pub fn parse(s: &str) -> Result<Self, ScheduleError> {
        match s {
            "play" => Ok(CommandKind::Play),
            other => Err(ScheduleError::UnsupportedCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("unsupported command {0:?}")]
    UnsupportedCommand(String),
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("{0} out of range")]
    OutOfRange(&'static str),
    #[error("invalid day-of-week spec {0:?}")]
    InvalidDays(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

/// Recurring trigger: an exact wall-clock time of day on a set of weekdays.
/// Second granularity, no ranges or wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpec {
    hour: u32,
    minute: u32,
    second: u32,
    days: Vec<Weekday>,
}

impl TimeSpec {
    pub fn new(hour: u32, minute: u32, second: u32, days: Vec<Weekday>) -> Result<Self, ScheduleError> {
        if hour > 23 {
            return Err(ScheduleError::OutOfRange("hour"));
        }
        if minute > 59 {
            return Err(ScheduleError::OutOfRange("minute"));
        }
        if second > 59 {
            return Err(ScheduleError::OutOfRange("second"));
        }
        if days.is_empty() {
            return Err(ScheduleError::InvalidDays(String::new()));
        }
        Ok(Self { hour, minute, second, days })
    }

    /// Parses a day-of-week spec: a comma-separated list of day numbers
    /// (Monday = 0) or English day names, e.g. `"0,2,4"` or `"mon,friday"`.
    pub fn parse_days(spec: &str) -> Result<Vec<Weekday>, ScheduleError> {
        let mut days = Vec::new();
        for token in spec.split(',') {
            let token = token.trim();
            let day = token
                .parse::<u8>()
                .ok()
                .and_then(|n| Weekday::try_from(n).ok())
                .or_else(|| token.parse::<Weekday>().ok())
                .ok_or_else(|| ScheduleError::InvalidDays(spec.to_string()))?;
            if !days.contains(&day) {
                days.push(day);
            }
        }
        if days.is_empty() {
            return Err(ScheduleError::InvalidDays(spec.to_string()));
        }
        Ok(days)
    }

    /// The first instant strictly after `after` that matches this spec.
    /// `None` only if the local time does not exist in the coming week
    /// (a spec landing exactly in a DST gap on all of its days).
    pub fn next_occurrence(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, self.second)?;
        for offset in 0..=7 {
            let date = after.date_naive() + Duration::days(offset);
            if !self.days.contains(&date.weekday()) {
                continue;
            }
            let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() else {
                continue;
            };
            if candidate > *after {
                return Some(candidate);
            }
        }
        None
    }
}

/// One parsed line of the schedule file.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub command: CommandKind,
    pub track_id: String,
    pub trigger: Trigger,
}

#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires on every matching wall-clock instant.
    Cron(TimeSpec),
    /// Fires once at the given instant, then the job is destroyed.
    At(DateTime<Local>),
}

/// A registered trigger bound to a track. Owned by the engine's job list;
/// `next_fire` is recomputed after every recurring firing.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub track_id: String,
    pub trigger: Trigger,
    pub next_fire: DateTime<Local>,
}

impl Job {
    /// `None` when the spec has no occurrence in the coming week.
    pub fn recurring(track_id: &str, spec: TimeSpec, now: &DateTime<Local>) -> Option<Self> {
        let next_fire = spec.next_occurrence(now)?;
        Some(Self {
            id: Uuid::new_v4(),
            track_id: track_id.to_string(),
            trigger: Trigger::Cron(spec),
            next_fire,
        })
    }

    pub fn one_shot(track_id: &str, at: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id: track_id.to_string(),
            trigger: Trigger::At(at),
            next_fire: at,
        }
    }
}
