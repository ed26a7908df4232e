//! Wall-clock arithmetic for the scheduler, in a fixed UTC offset.

use crate::config::{ConfigResult, ConfigurationError, SchedulerConfig};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, TimeZone, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    offset: FixedOffset,
    daily_at: NaiveTime,
    opens_at: NaiveTime,
    closes_at: NaiveTime,
}

impl ScheduleWindow {
    pub fn new(offset: FixedOffset, daily_at: NaiveTime, opens_at: NaiveTime, closes_at: NaiveTime) -> Self {
        Self {
            offset,
            daily_at,
            opens_at,
            closes_at,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> ConfigResult<Self> {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigurationError::invalid_value(
                "scheduler.utc_offset_minutes",
                config.utc_offset_minutes,
                "not a valid UTC offset",
            )
        })?;
        let (opens_at, closes_at) = config.operating_hours()?;
        Ok(Self::new(offset, config.daily_time()?, opens_at, closes_at))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// First daily sweep strictly after `now`
    pub fn next_daily_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = now.with_timezone(&self.offset).date_naive();
        let local_run = local_date.and_time(self.daily_at);
        let utc_run = local_run - ChronoDuration::seconds(i64::from(self.offset.local_minus_utc()));
        let candidate = Utc.from_utc_datetime(&utc_run);

        if candidate > now {
            candidate
        } else {
            candidate + ChronoDuration::days(1)
        }
    }

    pub fn until_next_daily_run(&self, now: DateTime<Utc>) -> Duration {
        (self.next_daily_run(now) - now).to_std().unwrap_or_default()
    }

    /// Windows that wrap midnight (`22:00`-`06:00`) are supported
    pub fn within_operating_hours(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        if self.opens_at <= self.closes_at {
            local >= self.opens_at && local < self.closes_at
        } else {
            local >= self.opens_at || local < self.closes_at
        }
    }
}
