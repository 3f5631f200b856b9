//! Date/time subcodecs.
//!
//! PostgreSQL sends binary timestamps either as microseconds (i64) or as
//! seconds (f64) since 2000-01-01, depending on the server's
//! `integer_datetimes` setting. The driver picks the mode during startup and
//! threads it through every datetime encode/decode.

use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{Error, Result};

/// Julian day of the PostgreSQL epoch, 2000-01-01.
const PG_EPOCH_JULIAN: i32 = 2_451_545;

const USEC_PER_SEC: i64 = 1_000_000;
const USEC_PER_DAY: i64 = 86_400 * USEC_PER_SEC;

/// Binary representation of server timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatetimeMode {
    /// i64 microseconds since 2000-01-01 (`integer_datetimes = on`)
    #[default]
    Integer,
    /// f64 seconds since 2000-01-01 (`integer_datetimes = off`)
    Float,
}

impl DatetimeMode {
    /// Select the mode from the `integer_datetimes` server parameter.
    pub fn from_parameter(value: &str) -> Self {
        match value {
            "on" => DatetimeMode::Integer,
            _ => DatetimeMode::Float,
        }
    }
}

fn range_err<T>(what: &str) -> impl FnOnce(T) -> Error {
    let what = what.to_string();
    move |_| Error::Decode(format!("{what}: out of range"))
}

/// Microseconds since the PostgreSQL epoch from an 8-byte binary payload.
fn read_epoch_usec(mode: DatetimeMode, raw: &[u8]) -> Result<i64> {
    let Some(bytes) = raw.first_chunk::<8>() else {
        return Err(Error::Decode("timestamp: expected 8 bytes".into()));
    };
    match mode {
        DatetimeMode::Integer => Ok(i64::from_be_bytes(*bytes)),
        DatetimeMode::Float => {
            let seconds = f64::from_be_bytes(*bytes);
            Ok((seconds * USEC_PER_SEC as f64).round() as i64)
        }
    }
}

fn write_epoch_usec(mode: DatetimeMode, usec: i64, out: &mut Vec<u8>) {
    match mode {
        DatetimeMode::Integer => out.extend_from_slice(&usec.to_be_bytes()),
        DatetimeMode::Float => {
            let seconds = usec as f64 / USEC_PER_SEC as f64;
            out.extend_from_slice(&seconds.to_be_bytes());
        }
    }
}

fn time_from_day_usec(usec_of_day: i64) -> Result<Time> {
    let hour = (usec_of_day / (3_600 * USEC_PER_SEC)) as u8;
    let minute = ((usec_of_day / (60 * USEC_PER_SEC)) % 60) as u8;
    let second = ((usec_of_day / USEC_PER_SEC) % 60) as u8;
    let micro = (usec_of_day % USEC_PER_SEC) as u32;
    Time::from_hms_micro(hour, minute, second, micro).map_err(range_err("time"))
}

fn day_usec_from_time(t: Time) -> i64 {
    t.hour() as i64 * 3_600 * USEC_PER_SEC
        + t.minute() as i64 * 60 * USEC_PER_SEC
        + t.second() as i64 * USEC_PER_SEC
        + t.microsecond() as i64
}

/// Decode a binary `date` value (days since 2000-01-01).
pub fn decode_date(raw: &[u8]) -> Result<Date> {
    let Some(bytes) = raw.first_chunk::<4>() else {
        return Err(Error::Decode("date: expected 4 bytes".into()));
    };
    let days = i32::from_be_bytes(*bytes);
    Date::from_julian_day(PG_EPOCH_JULIAN + days).map_err(range_err("date"))
}

/// Encode a binary `date` value.
pub fn encode_date(date: Date, out: &mut Vec<u8>) {
    let days = date.to_julian_day() - PG_EPOCH_JULIAN;
    out.extend_from_slice(&days.to_be_bytes());
}

/// Decode a binary `time` value (microseconds or seconds since midnight).
pub fn decode_time(mode: DatetimeMode, raw: &[u8]) -> Result<Time> {
    let usec = read_epoch_usec(mode, raw)?;
    time_from_day_usec(usec)
}

/// Encode a binary `time` value.
pub fn encode_time(mode: DatetimeMode, t: Time, out: &mut Vec<u8>) {
    write_epoch_usec(mode, day_usec_from_time(t), out);
}

/// Decode a binary `timestamp` value.
pub fn decode_timestamp(mode: DatetimeMode, raw: &[u8]) -> Result<PrimitiveDateTime> {
    let usec = read_epoch_usec(mode, raw)?;
    let days = usec.div_euclid(USEC_PER_DAY);
    let usec_of_day = usec.rem_euclid(USEC_PER_DAY);
    let date =
        Date::from_julian_day(PG_EPOCH_JULIAN + days as i32).map_err(range_err("timestamp"))?;
    Ok(PrimitiveDateTime::new(date, time_from_day_usec(usec_of_day)?))
}

/// Encode a binary `timestamp` value.
pub fn encode_timestamp(mode: DatetimeMode, dt: PrimitiveDateTime, out: &mut Vec<u8>) {
    let days = (dt.date().to_julian_day() - PG_EPOCH_JULIAN) as i64;
    let usec = days * USEC_PER_DAY + day_usec_from_time(dt.time());
    write_epoch_usec(mode, usec, out);
}

/// Decode a binary `timestamptz` value. The wire value is always UTC.
pub fn decode_timestamptz(mode: DatetimeMode, raw: &[u8]) -> Result<OffsetDateTime> {
    Ok(decode_timestamp(mode, raw)?.assume_utc())
}

/// Encode a binary `timestamptz` value.
pub fn encode_timestamptz(mode: DatetimeMode, dt: OffsetDateTime, out: &mut Vec<u8>) {
    let utc = dt.to_offset(UtcOffset::UTC);
    encode_timestamp(mode, PrimitiveDateTime::new(utc.date(), utc.time()), out);
}

/// Parse a text-format `date` ("2024-01-31").
pub fn parse_date(text: &str) -> Result<Date> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(text, &format).map_err(|e| Error::Decode(format!("date '{text}': {e}")))
}

/// Parse a text-format `time` ("12:34:56" or "12:34:56.789").
pub fn parse_time(text: &str) -> Result<Time> {
    let (hms, frac) = match text.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (text, None),
    };
    let format = format_description!("[hour]:[minute]:[second]");
    let base = Time::parse(hms, &format).map_err(|e| Error::Decode(format!("time '{text}': {e}")))?;
    let micro = match frac {
        Some(frac) => parse_micros(frac)?,
        None => 0,
    };
    Time::from_hms_micro(base.hour(), base.minute(), base.second(), micro)
        .map_err(range_err("time"))
}

/// Parse a text-format `timestamp` ("2024-01-31 12:34:56.789").
pub fn parse_timestamp(text: &str) -> Result<PrimitiveDateTime> {
    let Some((date_part, time_part)) = text.split_once(' ') else {
        return Err(Error::Decode(format!("timestamp '{text}': missing time")));
    };
    Ok(PrimitiveDateTime::new(
        parse_date(date_part)?,
        parse_time(time_part)?,
    ))
}

/// Parse a text-format `timestamptz` ("2024-01-31 12:34:56+02",
/// "... -05:30"). Without an offset suffix the value is taken as UTC.
pub fn parse_timestamptz(text: &str) -> Result<OffsetDateTime> {
    let Some((date_part, time_part)) = text.split_once(' ') else {
        return Err(Error::Decode(format!("timestamptz '{text}': missing time")));
    };

    let (time_text, offset) = match time_part.find(['+', '-']) {
        Some(pos) => {
            let (time_text, offset_text) = time_part.split_at(pos);
            (time_text, parse_offset(offset_text)?)
        }
        None => (time_part, UtcOffset::UTC),
    };

    let dt = PrimitiveDateTime::new(parse_date(date_part)?, parse_time(time_text)?);
    Ok(dt.assume_offset(offset))
}

fn parse_micros(frac: &str) -> Result<u32> {
    if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Decode(format!("fractional seconds '{frac}'")));
    }
    let digits: u32 = frac
        .parse()
        .map_err(|_| Error::Decode(format!("fractional seconds '{frac}'")))?;
    Ok(digits * 10u32.pow(6 - frac.len() as u32))
}

fn parse_offset(text: &str) -> Result<UtcOffset> {
    let bad = || Error::Decode(format!("utc offset '{text}'"));
    let sign: i8 = match text.as_bytes().first() {
        Some(b'+') => 1,
        Some(b'-') => -1,
        _ => return Err(bad()),
    };
    let rest = &text[1..];
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    let hours: i8 = hours.parse().map_err(|_| bad())?;
    let minutes: i8 = minutes.parse().map_err(|_| bad())?;
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).map_err(|_| bad())
}
