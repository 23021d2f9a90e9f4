//! Trading-session detection.
//!
//! A session is a weekday set plus open/close clock bounds in the market's
//! local time zone. Holidays and half-days are not modelled: on an exchange
//! holiday the session reports open and the scheduler polls unchanged quotes.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;

const WEEKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Regular trading hours of one market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingSession {
    timezone: Tz,
    /// Seconds after local midnight
    open: u32,
    /// Seconds after local midnight, inclusive
    close: u32,
    trading_days: Vec<Weekday>,
}

impl TradingSession {
    /// A Monday-Friday session between `open` and `close` (inclusive) local time.
    pub fn new(timezone: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            timezone,
            open: open.num_seconds_from_midnight(),
            close: close.num_seconds_from_midnight(),
            trading_days: WEEKDAYS.to_vec(),
        }
    }

    /// Taiwan Stock Exchange: 09:00-13:30 Asia/Taipei.
    pub fn twse() -> Self {
        Self::from_minutes(chrono_tz::Asia::Taipei, 9 * 60, 13 * 60 + 30)
    }

    /// NYSE/Nasdaq regular hours: 09:30-16:00 America/New_York.
    pub fn nyse() -> Self {
        Self::from_minutes(chrono_tz::America::New_York, 9 * 60 + 30, 16 * 60)
    }

    fn from_minutes(timezone: Tz, open: u32, close: u32) -> Self {
        Self {
            timezone,
            open: open * 60,
            close: close * 60,
            trading_days: WEEKDAYS.to_vec(),
        }
    }

    /// Replace the trading weekdays (default Monday-Friday).
    pub fn with_trading_days(mut self, days: &[Weekday]) -> Self {
        self.trading_days = days.to_vec();
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Whether the market is trading at `at`.
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        if !self.trading_days.contains(&local.weekday()) {
            return false;
        }
        let secs = local.time().num_seconds_from_midnight();
        secs >= self.open && secs <= self.close
    }

    /// Whether the market is trading right now.
    pub fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }
}
