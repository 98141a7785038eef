use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{KdmCoreError, KdmCoreResult};

/**
    A local time down to the millisecond, with its UTC offset (equivalent to xs:dateTime).

    Accepts strings of the form `2013-01-05T18:06:59[.123][+04:00|Z]` and renders the
    same shape back out. Comparison is done as a UTC instant.
*/
#[derive(Debug, Clone, Copy)]
pub struct LocalTime {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millisecond: u32,
    tz_hour: i32,
    tz_minute: i32,
}

impl LocalTime {
    pub fn new(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        millisecond: u32,
        tz_hour: i32,
        tz_minute: i32,
    ) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
            tz_hour,
            tz_minute,
        }
    }

    /** Build from a Unix timestamp (seconds since epoch, UTC), as returned by ASN.1 time types. */
    pub fn from_unix_timestamp(secs: i64) -> Self {
        let naive = chrono::DateTime::from_timestamp(secs, 0)
            .unwrap_or_default()
            .naive_utc();
        Self::from_naive(naive, 0, 0)
    }

    /** The current UTC time. */
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            year: now.year(),
            month: now.month(),
            day: now.day(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
            millisecond: now.timestamp_subsec_millis(),
            tz_hour: 0,
            tz_minute: 0,
        }
    }

    /** Parse a string of the form `2013-01-05T18:06:59[.123][+04:00|Z]`. */
    pub fn parse(s: &str) -> KdmCoreResult<Self> {
        let bad = |reason: &'static str| KdmCoreError::TimeFormat(s.to_owned(), reason);

        if s.len() < 19 {
            return Err(bad("too short"));
        }
        let (date_part, rest) = s.split_at(10);
        if rest.as_bytes().first() != Some(&b'T') {
            return Err(bad("missing 'T' separator"));
        }
        let rest = &rest[1..];

        let year: i32 = date_part[0..4].parse().map_err(|_| bad("bad year"))?;
        if date_part.as_bytes()[4] != b'-' || date_part.as_bytes()[7] != b'-' {
            return Err(bad("bad date separators"));
        }
        let month: u32 = date_part[5..7].parse().map_err(|_| bad("bad month"))?;
        let day: u32 = date_part[8..10].parse().map_err(|_| bad("bad day"))?;

        if rest.len() < 8 || rest.as_bytes()[2] != b':' || rest.as_bytes()[5] != b':' {
            return Err(bad("bad time separators"));
        }
        let hour: u32 = rest[0..2].parse().map_err(|_| bad("bad hour"))?;
        let minute: u32 = rest[3..5].parse().map_err(|_| bad("bad minute"))?;
        let second: u32 = rest[6..8].parse().map_err(|_| bad("bad second"))?;

        let mut tail = &rest[8..];

        let mut millisecond = 0u32;
        if let Some(stripped) = tail.strip_prefix('.') {
            let digits_len = stripped
                .as_bytes()
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits_len == 0 {
                return Err(bad("empty fractional seconds"));
            }
            let digits = &stripped[..digits_len.min(3)];
            let mut padded = digits.to_owned();
            while padded.len() < 3 {
                padded.push('0');
            }
            millisecond = padded.parse().map_err(|_| bad("bad milliseconds"))?;
            tail = &stripped[digits_len..];
        }

        let (tz_hour, tz_minute) = if tail == "Z" {
            (0, 0)
        } else if tail.len() == 6 && (tail.as_bytes()[0] == b'+' || tail.as_bytes()[0] == b'-') {
            let sign = if tail.as_bytes()[0] == b'-' { -1 } else { 1 };
            if tail.as_bytes()[3] != b':' {
                return Err(bad("bad timezone separator"));
            }
            let h: i32 = tail[1..3].parse().map_err(|_| bad("bad tz hour"))?;
            let m: i32 = tail[4..6].parse().map_err(|_| bad("bad tz minute"))?;
            (sign * h, sign * m)
        } else {
            return Err(bad("bad timezone"));
        };

        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| bad("date out of range"))?;

        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
            tz_hour,
            tz_minute,
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn set_year(&mut self, year: i32) {
        self.year = year;
    }

    /** `YYYY-MM-DD`. */
    pub fn date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    /** `HH:MM:SS` or `HH:MM:SS.mmm`. */
    pub fn time_of_day(&self, with_millisecond: bool) -> String {
        if with_millisecond {
            format!(
                "{:02}:{:02}:{:02}.{:03}",
                self.hour, self.minute, self.second, self.millisecond
            )
        } else {
            format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
        }
    }

    /** `2013-01-05T18:06:59+04:00` or with milliseconds, or `Z` for a zero offset. */
    pub fn as_string(&self, with_millisecond: bool) -> String {
        let offset = if self.tz_hour == 0 && self.tz_minute == 0 {
            "Z".to_owned()
        } else {
            let sign = if self.tz_hour < 0 || self.tz_minute < 0 {
                '-'
            } else {
                '+'
            };
            format!(
                "{sign}{:02}:{:02}",
                self.tz_hour.abs(),
                self.tz_minute.abs()
            )
        };
        format!(
            "{}T{}{}",
            self.date(),
            self.time_of_day(with_millisecond),
            offset
        )
    }

    fn to_naive(self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_milli_opt(self.hour, self.minute, self.second, self.millisecond))
            .expect("LocalTime always holds a valid date/time")
    }

    fn utc_offset_minutes(&self) -> i64 {
        i64::from(self.tz_hour) * 60 + i64::from(self.tz_minute)
    }

    /** This time expressed as a naive UTC instant, for ordering and equality. */
    fn to_utc_naive(self) -> NaiveDateTime {
        self.to_naive() - Duration::minutes(self.utc_offset_minutes())
    }

    fn from_naive(naive: NaiveDateTime, tz_hour: i32, tz_minute: i32) -> Self {
        Self {
            year: naive.year(),
            month: naive.month(),
            day: naive.day(),
            hour: naive.hour(),
            minute: naive.minute(),
            second: naive.second(),
            millisecond: naive.timestamp_subsec_millis(),
            tz_hour,
            tz_minute,
        }
    }

    pub fn add_days(&mut self, days: i64) {
        let naive = self.to_naive() + Duration::days(days);
        *self = Self::from_naive(naive, self.tz_hour, self.tz_minute);
    }

    pub fn add_minutes(&mut self, minutes: i64) {
        let naive = self.to_naive() + Duration::minutes(minutes);
        *self = Self::from_naive(naive, self.tz_hour, self.tz_minute);
    }

    /** Adds whole months, clamping the day of month to the length of the target month. */
    pub fn add_months(&mut self, months: i32) {
        let total = self.year * 12 + (self.month as i32 - 1) + months;
        let year = total.div_euclid(12);
        let month = (total.rem_euclid(12) + 1) as u32;
        let last_day = last_day_of_month(year, month);
        self.year = year;
        self.month = month;
        self.day = self.day.min(last_day);
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string(false))
    }
}

impl PartialEq for LocalTime {
    fn eq(&self, other: &Self) -> bool {
        self.to_utc_naive() == other.to_utc_naive()
    }
}

impl Eq for LocalTime {}

impl PartialOrd for LocalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_utc_naive().cmp(&other.to_utc_naive())
    }
}
