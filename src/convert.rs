use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::SpanId;
use opentelemetry_sdk::trace::{IdGenerator as _, RandomIdGenerator};
use std::time::{Duration, SystemTime};

pub(crate) fn span_id_to_string(span_id: SpanId) -> String {
    format!("{:016x}", u64::from_be_bytes(span_id.to_bytes()))
}

/// Random identifier for requests and dependencies tracked without an explicit id.
pub(crate) fn new_id() -> String {
    span_id_to_string(RandomIdGenerator::default().new_span_id())
}

/// Random identifier for a live metrics stream.
#[cfg(feature = "live-metrics")]
pub(crate) fn new_stream_id() -> String {
    RandomIdGenerator::default().new_trace_id().to_string()
}

pub(crate) fn duration_to_string(duration: Duration) -> String {
    let micros = duration.as_micros();
    let s = micros / 1_000_000 % 60;
    let m = micros / 1_000_000 / 60 % 60;
    let h = micros / 1_000_000 / 60 / 60 % 24;
    let d = micros / 1_000_000 / 60 / 60 / 24;
    let micros_remaining = micros % 1_000_000;
    format!(
        "{}.{:0>2}:{:0>2}:{:0>2}.{:0>6}",
        d, h, m, s, micros_remaining
    )
}

/// Inverse of [`duration_to_string`]. Used by live metrics to aggregate durations of envelopes.
#[cfg(feature = "live-metrics")]
pub(crate) fn duration_from_string(s: &str) -> Option<Duration> {
    let (days, rest) = s.split_once('.')?;
    let mut parts = rest.splitn(3, ':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds = parts.next()?;
    let (seconds, fraction) = seconds.split_once('.').unwrap_or((seconds, "0"));
    let seconds: u64 = seconds.parse().ok()?;
    let micros: u64 = format!("{:0<6}", fraction).get(..6)?.parse().ok()?;
    let days: u64 = days.parse().ok()?;
    let secs = days
        .checked_mul(24)?
        .checked_add(hours)?
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_mul(60)?
        .checked_add(seconds)?;
    Some(Duration::from_secs(secs) + Duration::from_micros(micros))
}

/// `None` when the time is outside the range of [`DateTime`].
pub(crate) fn to_date_time(time: SystemTime) -> Option<DateTime<Utc>> {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(after) => {
            DateTime::from_timestamp(i64::try_from(after.as_secs()).ok()?, after.subsec_nanos())
        }
        Err(err) => {
            let before = err.duration();
            let secs = i64::try_from(before.as_secs()).ok()?;
            match before.subsec_nanos() {
                0 => DateTime::from_timestamp(-secs, 0),
                nanos => DateTime::from_timestamp(-secs - 1, 1_000_000_000 - nanos),
            }
        }
    }
}

/// Falls back to the current time for times [`to_date_time`] cannot represent.
pub(crate) fn time_to_string(time: SystemTime) -> String {
    to_date_time(time)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Host (and non-default port) of an absolute URL, e.g. `bing.com` for
/// `http://bing.com/search?q=test`. `None` for anything that does not look like a URL.
pub(crate) fn url_target(data: &str) -> Option<String> {
    let uri: http::Uri = data.trim().parse().ok()?;
    uri.scheme()?;
    let authority = uri.authority()?;
    Some(match authority.port_u16() {
        Some(80) | Some(443) | None => authority.host().to_string(),
        Some(port) => format!("{}:{}", authority.host(), port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(SpanId::INVALID,                        "0000000000000000" ; "zero")]
    #[test_case(SpanId::from_bytes(314u64.to_be_bytes()),  "000000000000013a" ; "some number")]
    #[test_case(SpanId::from_bytes(u64::MAX.to_be_bytes()), "ffffffffffffffff" ; "max")]
    fn span_id(id: SpanId, expected: &'static str) {
        assert_eq!(expected.to_string(), span_id_to_string(id));
    }

    #[test]
    fn new_ids_are_unique_hex() {
        let a = new_id();
        let b = new_id();
        assert_eq!(16, a.len());
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test_case(Duration::from_micros(123456789123), "1.10:17:36.789123" ; "all")]
    #[test_case(Duration::from_millis(3),            "0.00:00:00.003000" ; "millis")]
    fn duration(duration: Duration, expected: &'static str) {
        assert_eq!(expected.to_string(), duration_to_string(duration));
    }

    #[cfg(feature = "live-metrics")]
    #[test_case("1.10:17:36.789123", Some(Duration::from_micros(123456789123)) ; "all")]
    #[test_case("0.00:00:00.003",    Some(Duration::from_millis(3))            ; "short fraction")]
    #[test_case("garbage",           None                                      ; "invalid")]
    #[test_case("999999999999999999.00:00:00", None                            ; "overflow")]
    fn parse_duration(s: &'static str, expected: Option<Duration>) {
        assert_eq!(expected, duration_from_string(s));
    }

    #[test]
    fn time() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(1_503_913_457_123);
        assert_eq!("2017-08-28T09:44:17.123Z", time_to_string(time));
    }

    #[test]
    fn time_before_epoch() {
        let time = SystemTime::UNIX_EPOCH - Duration::from_millis(1_500);
        assert_eq!("1969-12-31T23:59:58.500Z", time_to_string(time));
    }

    #[test]
    fn time_out_of_range() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1 << 50);
        assert_eq!(None, to_date_time(time));
        assert_eq!(24, time_to_string(time).len());
    }

    #[test_case("http://bing.com/search?q=test", Some("bing.com")       ; "http url")]
    #[test_case("https://example.com:8080/a",    Some("example.com:8080") ; "custom port")]
    #[test_case("NOT A URL",                     None                    ; "not a url")]
    #[test_case("SELECT * FROM users",           None                    ; "sql statement")]
    fn target(data: &'static str, expected: Option<&'static str>) {
        assert_eq!(expected.map(String::from), url_target(data));
    }
}
