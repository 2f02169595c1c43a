//! Scheduler (C3, §4.2): DST-aware recurring/one-shot timers with
//! at-least-once firing and per-schedule dedup.
//!
//! `Scheduler::check_due` is a pure read — it never mutates or advances a
//! schedule. `Scheduler::mark_fired` is the only mutator: it records the
//! fired `fireId` in the schedule's dedup window and advances (or removes)
//! the entry in the same step, so a schedule's `next_fire_at` and its dedup
//! history never drift apart.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScheduleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

/// How a monthly anchor day is nudged onto a weekday/weekend (§4.2, open
/// question "next weekend" resolved as "next Saturday on/after the anchor").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyConstraint {
    NextSaturday,
    NextSunday,
    /// Alias for `NextSaturday` — Saturday is the canonical head of the
    /// weekend for this purpose (§9 open question, resolved in DESIGN.md).
    NextWeekend,
    NextWeekday,
}

fn default_interval() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default, with = "weekday_list")]
    pub days_of_week: Vec<Weekday>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub anchor_day: Option<u32>,
    #[serde(default)]
    pub constraint: Option<MonthlyConstraint>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_occurrences: Option<u32>,
}

/// `chrono::Weekday` carries no serde impl we want to depend on directly;
/// represent it on the wire as its three-letter English abbreviation
/// ("Mon".."Sun") via `Display`/`FromStr`, both always available.
mod weekday_list {
    use chrono::Weekday;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(days: &[Weekday], serializer: S) -> Result<S::Ok, S::Error> {
        let names: Vec<String> = days.iter().map(|d| d.to_string()).collect();
        names.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Weekday>, D::Error> {
        let names: Vec<String> = Vec::deserialize(deserializer)?;
        names.into_iter().map(|n| Weekday::from_str(&n).map_err(serde::de::Error::custom)).collect()
    }
}

/// Schedule entry as persisted and exchanged over the tool boundary (§6).
/// Field names mirror the external wire shape; `owner` carries the
/// `pluginId` name on the wire since non-plugin owners (`"core"`) are
/// equally valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    #[serde(rename = "pluginId")]
    pub owner: String,
    #[serde(rename = "nextFireAt")]
    pub next_fire_at: DateTime<Utc>,
    pub recurrence: Option<Recurrence>,
    pub timezone: Option<String>,
    #[serde(rename = "localTime")]
    pub local_time: Option<String>,
    pub data: serde_json::Value,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "fireCount")]
    pub fire_count: u32,
    #[serde(skip)]
    dedup: VecDeque<String>,
}

impl ScheduleEntry {
    fn tz(&self) -> Option<Tz> {
        self.timezone.as_deref().and_then(|s| s.parse().ok())
    }

    fn parsed_local_time(&self) -> Option<NaiveTime> {
        self.local_time.as_deref().and_then(parse_local_time)
    }
}

pub fn parse_local_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Inputs for creating a new schedule.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub next_fire_at: DateTime<Utc>,
    pub recurrence: Option<Recurrence>,
    pub timezone: Option<String>,
    pub local_time: Option<String>,
    pub data: serde_json::Value,
}

/// `fireId` idempotency key (§4.2): `"{id}:{nextFireAt.epochMs}"`.
pub fn fire_id(id: Uuid, at: DateTime<Utc>) -> String {
    format!("{id}:{}", at.timestamp_millis())
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerLimits {
    pub max_schedules_per_owner: Option<usize>,
    pub dedupe_retention: usize,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self { max_schedules_per_owner: None, dedupe_retention: 10 }
    }
}

/// In-memory schedule store plus the DST-aware next-occurrence algorithm.
/// Persistence is a collaborator's job (see [`crate::schedule_store`]) —
/// this type owns only the scheduling logic and the live entry map.
#[derive(Default)]
pub struct Scheduler {
    entries: HashMap<Uuid, ScheduleEntry>,
    limits: SchedulerLimits,
}

impl Scheduler {
    pub fn new(limits: SchedulerLimits) -> Self {
        Self { entries: HashMap::new(), limits }
    }

    /// Restore from a persisted snapshot (used at startup).
    pub fn from_entries(entries: Vec<ScheduleEntry>, limits: SchedulerLimits) -> Self {
        let entries = entries.into_iter().map(|e| (e.id, e)).collect();
        Self { entries, limits }
    }

    pub fn snapshot(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn get(&self, id: Uuid) -> Option<&ScheduleEntry> {
        self.entries.get(&id)
    }

    pub fn list(&self, owner: &str) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.values().filter(|e| e.owner == owner).map(|e| e.id).collect();
        ids.sort();
        ids
    }

    fn owner_count(&self, owner: &str) -> usize {
        self.entries.values().filter(|e| e.owner == owner).count()
    }

    /// Create a schedule. Validates the cron expression and timezone (if
    /// present) up front so a malformed schedule never enters the store
    /// (§4.2 "fails fast on creation").
    pub fn schedule(&mut self, owner: &str, opts: ScheduleOptions, created_at: DateTime<Utc>) -> Result<Uuid, ScheduleError> {
        if let Some(limit) = self.limits.max_schedules_per_owner {
            if self.owner_count(owner) >= limit {
                return Err(ScheduleError::ScheduleLimitExceeded { owner: owner.to_string(), limit });
            }
        }

        if let Some(tz) = &opts.timezone {
            if tz.parse::<Tz>().is_err() {
                return Err(ScheduleError::InvalidTimezone(tz.clone()));
            }
        }

        if let Some(recurrence) = &opts.recurrence {
            if recurrence.frequency == Frequency::Custom {
                let expr = recurrence.cron.as_deref().unwrap_or_default();
                CronSchedule::from_str(expr).map_err(|e| ScheduleError::InvalidCron(e.to_string()))?;
            }
        }

        let id = Uuid::new_v4();
        let entry = ScheduleEntry {
            id,
            owner: owner.to_string(),
            next_fire_at: opts.next_fire_at,
            recurrence: opts.recurrence,
            timezone: opts.timezone,
            local_time: opts.local_time,
            data: opts.data,
            created_at,
            fire_count: 0,
            dedup: VecDeque::new(),
        };
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Cancel a schedule. `owner` must match the schedule's owner — a
    /// mismatch is treated the same as "doesn't exist" rather than leaking
    /// another owner's schedule ids.
    pub fn cancel(&mut self, owner: &str, id: Uuid) -> bool {
        match self.entries.get(&id) {
            Some(entry) if entry.owner == owner => {
                self.entries.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn update_schedule_data(&mut self, owner: &str, id: Uuid, data: serde_json::Value) -> Result<(), ScheduleError> {
        let entry = self.entries.get_mut(&id).ok_or(ScheduleError::NotFound(id))?;
        if entry.owner != owner {
            return Err(ScheduleError::NotFound(id));
        }
        entry.data = data;
        Ok(())
    }

    /// Non-mutating selection of every schedule due as of `now`, paired with
    /// its `fireId`. A schedule whose current `fireId` is already in its
    /// dedup window is skipped rather than re-emitted (§4.2 testable
    /// property #1) — this only happens if a caller calls `check_due`
    /// without following up with `mark_fired`.
    pub fn check_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<(ScheduleEntry, String)> {
        let mut due: Vec<(ScheduleEntry, String)> = self
            .entries
            .values()
            .filter(|e| e.next_fire_at <= now)
            .filter_map(|e| {
                let fid = fire_id(e.id, e.next_fire_at);
                if e.dedup.contains(&fid) {
                    None
                } else {
                    Some((e.clone(), fid))
                }
            })
            .collect();
        due.sort_by_key(|(e, _)| e.next_fire_at);
        due.truncate(limit);
        due
    }

    /// Record a firing and advance (or remove, for one-shots / ended
    /// recurrences) the schedule. The only mutator in this type.
    pub fn mark_fired(&mut self, id: Uuid, fired_fire_id: &str, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let recurrence = match self.entries.get(&id) {
            Some(entry) => entry.recurrence.clone(),
            None => return Err(ScheduleError::NotFound(id)),
        };

        let entry = self.entries.get_mut(&id).expect("presence checked above");
        entry.dedup.push_back(fired_fire_id.to_string());
        while entry.dedup.len() > self.limits.dedupe_retention {
            entry.dedup.pop_front();
        }
        entry.fire_count += 1;

        let Some(recurrence) = recurrence else {
            self.entries.remove(&id);
            return Ok(());
        };

        let tz = entry.tz();
        let local_time = entry.parsed_local_time();
        match next_after(entry.next_fire_at, &recurrence, tz, local_time, now, entry.fire_count) {
            Some(next) => entry.next_fire_at = next,
            None => {
                self.entries.remove(&id);
            }
        }
        Ok(())
    }
}

/// Advance `current` forward under `recurrence` until the result is
/// strictly after `now`, respecting `maxOccurrences`/`endDate` termination.
/// Returns `None` when the recurrence has ended.
fn next_after(
    mut current: DateTime<Utc>,
    recurrence: &Recurrence,
    tz: Option<Tz>,
    local_time: Option<NaiveTime>,
    now: DateTime<Utc>,
    fire_count: u32,
) -> Option<DateTime<Utc>> {
    if let Some(max) = recurrence.max_occurrences {
        if fire_count >= max {
            return None;
        }
    }

    loop {
        let candidate = compute_next_raw(current, recurrence, tz, local_time)?;

        if let Some(end_date) = recurrence.end_date {
            if candidate > end_date {
                return None;
            }
        }

        if candidate > now {
            return Some(candidate);
        }
        current = candidate;
    }
}

/// One recurrence step forward from `current`. Returns `None` only for a
/// custom-cron schedule whose expression fails to parse or produce a next
/// occurrence — should not happen post-creation validation, but a defensive
/// `None` here is treated as "ended" by the caller rather than a panic.
fn compute_next_raw(current: DateTime<Utc>, recurrence: &Recurrence, tz: Option<Tz>, local_time: Option<NaiveTime>) -> Option<DateTime<Utc>> {
    match recurrence.frequency {
        Frequency::Daily => Some(step_days(current, recurrence.interval as i64, tz, local_time)),
        Frequency::Weekly => Some(step_weekly(current, recurrence, tz, local_time)),
        Frequency::Monthly => Some(step_monthly(current, recurrence, tz, local_time)),
        Frequency::Custom => custom_next(recurrence.cron.as_deref().unwrap_or_default(), current, tz),
    }
}

fn step_days(current: DateTime<Utc>, interval: i64, tz: Option<Tz>, local_time: Option<NaiveTime>) -> DateTime<Utc> {
    match tz {
        Some(tz) => {
            let local = current.with_timezone(&tz);
            let next_date = local.date_naive() + Duration::days(interval.max(1));
            let time = local_time.unwrap_or_else(|| local.time());
            set_local_time(next_date, time, tz).with_timezone(&Utc)
        }
        None => current + Duration::days(interval.max(1)),
    }
}

fn step_weekly(current: DateTime<Utc>, recurrence: &Recurrence, tz: Option<Tz>, local_time: Option<NaiveTime>) -> DateTime<Utc> {
    let interval = recurrence.interval.max(1);

    if recurrence.days_of_week.is_empty() {
        return step_days(current, interval as i64 * 7, tz, local_time);
    }

    match tz {
        Some(tz) => {
            let local = current.with_timezone(&tz);
            let next_date = next_weekly_date(local.date_naive(), &recurrence.days_of_week, interval);
            let time = local_time.unwrap_or_else(|| local.time());
            set_local_time(next_date, time, tz).with_timezone(&Utc)
        }
        None => {
            let next_date = next_weekly_date(current.date_naive(), &recurrence.days_of_week, interval);
            NaiveDateTime::new(next_date, current.time()).and_utc()
        }
    }
}

/// Next date in `days` strictly after `current_date`'s weekday within the
/// same week, or the first allowed day in the week `interval` weeks later.
fn next_weekly_date(current_date: NaiveDate, days: &[Weekday], interval: u32) -> NaiveDate {
    let cur_ord = current_date.weekday().num_days_from_monday();
    let mut ords: Vec<u32> = days.iter().map(|d| d.num_days_from_monday()).collect();
    ords.sort_unstable();

    if let Some(&next_ord) = ords.iter().find(|&&o| o > cur_ord) {
        return current_date + Duration::days((next_ord - cur_ord) as i64);
    }

    let week_start = current_date - Duration::days(cur_ord as i64);
    let next_block_start = week_start + Duration::days(7 * interval as i64);
    next_block_start + Duration::days(ords[0] as i64)
}

fn step_monthly(current: DateTime<Utc>, recurrence: &Recurrence, tz: Option<Tz>, local_time: Option<NaiveTime>) -> DateTime<Utc> {
    let interval = recurrence.interval.max(1);

    match tz {
        Some(tz) => {
            let local = current.with_timezone(&tz);
            let next_date = next_monthly_date(local.date_naive(), recurrence, interval);
            let time = local_time.unwrap_or_else(|| local.time());
            set_local_time(next_date, time, tz).with_timezone(&Utc)
        }
        None => {
            let next_date = next_monthly_date(current.date_naive(), recurrence, interval);
            NaiveDateTime::new(next_date, current.time()).and_utc()
        }
    }
}

fn next_monthly_date(current_date: NaiveDate, recurrence: &Recurrence, interval: u32) -> NaiveDate {
    let anchor = recurrence.anchor_day.or(recurrence.day_of_month).unwrap_or(current_date.day());
    let stepped = add_months_clamped(current_date, interval, anchor);
    match recurrence.constraint {
        Some(constraint) => apply_monthly_constraint(stepped, constraint),
        None => stepped,
    }
}

fn add_months_clamped(date: NaiveDate, months: u32, anchor_day: u32) -> NaiveDate {
    let total_months = date.month0() as i32 + months as i32;
    let year = date.year() + total_months / 12;
    let month0 = (total_months % 12) as u32;
    let month = month0 + 1;
    let day = anchor_day.max(1).min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is always valid for its month")
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap().pred_opt().unwrap().day()
}

/// Saturday is treated as the canonical head of the weekend (§9 open
/// question, resolved in DESIGN.md): `NextWeekend` behaves like
/// `NextSaturday`.
fn apply_monthly_constraint(date: NaiveDate, constraint: MonthlyConstraint) -> NaiveDate {
    match constraint {
        MonthlyConstraint::NextSaturday | MonthlyConstraint::NextWeekend => advance_to_weekday(date, Weekday::Sat),
        MonthlyConstraint::NextSunday => advance_to_weekday(date, Weekday::Sun),
        MonthlyConstraint::NextWeekday => {
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                advance_to_weekday(date, Weekday::Mon)
            } else {
                date
            }
        }
    }
}

fn advance_to_weekday(date: NaiveDate, target: Weekday) -> NaiveDate {
    if date.weekday() == target {
        return date;
    }
    let cur = date.weekday().num_days_from_monday() as i64;
    let tgt = target.num_days_from_monday() as i64;
    let delta = (tgt - cur).rem_euclid(7);
    date + Duration::days(delta)
}

fn custom_next(cron_expr: &str, current: DateTime<Utc>, tz: Option<Tz>) -> Option<DateTime<Utc>> {
    let schedule = match CronSchedule::from_str(cron_expr) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, cron = cron_expr, "cron parse failure after creation; treating schedule as ended");
            return None;
        }
    };
    match tz {
        Some(tz) => schedule.after(&current.with_timezone(&tz)).next().map(|dt| dt.with_timezone(&Utc)),
        None => schedule.after(&current).next(),
    }
}

/// Resolve a naive local date+time against `tz`, handling DST transitions:
/// ambiguous times (fall-back) resolve to the earlier instant, and times
/// inside a spring-forward gap are nudged forward to the first valid
/// instant.
fn set_local_time(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Tz> {
    let naive = NaiveDateTime::new(date, time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earlier, _later) => earlier,
        chrono::LocalResult::None => {
            let mut probe = naive;
            loop {
                probe += Duration::minutes(1);
                if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&probe) {
                    return dt;
                }
            }
        }
    }
}
