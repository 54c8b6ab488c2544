//! NY session arithmetic.
//!
//! The authoritative regular-hours rule: a minute bar is regular-hours iff
//! its America/New_York local time falls on a weekday with
//! `09:30 <= t <= 16:00`. Holidays are never computed here; the clock only
//! advances to timestamps that exist in storage, which makes holiday and
//! half-day handling fall out of the data itself.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;

/// ET calendar date of a UTC instant.
pub fn et_day_of(ts: DateTime<Utc>) -> NaiveDate {
    ts.with_timezone(&New_York).date_naive()
}

fn is_weekday(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Session bounds [09:30, 16:00] ET for an ET calendar date, as UTC instants.
/// DST-correct because the conversion goes through the tz database; the
/// session times themselves are never ambiguous (transitions happen at 2am).
pub fn ny_session_bounds(et_day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let open_local = et_day.and_time(NaiveTime::from_hms_opt(9, 30, 0).expect("valid time"));
    let close_local = et_day.and_time(NaiveTime::from_hms_opt(16, 0, 0).expect("valid time"));

    let open = New_York
        .from_local_datetime(&open_local)
        .earliest()
        .expect("09:30 ET always resolves")
        .with_timezone(&Utc);
    let close = New_York
        .from_local_datetime(&close_local)
        .earliest()
        .expect("16:00 ET always resolves")
        .with_timezone(&Utc);
    (open, close)
}

/// True iff `ts` lies inside a regular-hours NYSE minute
/// (Mon-Fri, 09:30 <= t <= 16:00 ET, both ends inclusive).
pub fn is_regular_market_minute(ts: DateTime<Utc>) -> bool {
    let et = ts.with_timezone(&New_York);
    if !is_weekday(et.date_naive()) {
        return false;
    }
    let t = et.time();
    let open = NaiveTime::from_hms_opt(9, 30, 0).expect("valid time");
    let close = NaiveTime::from_hms_opt(16, 0, 0).expect("valid time");
    t >= open && t <= close
}

/// Latest bar is stale when it comes from a prior ET day, or when it is older
/// than one timeframe window (plus a one-second grace).
pub fn is_stale_candle(last_ts: Option<DateTime<Utc>>, tf_min: u32, as_of: DateTime<Utc>) -> bool {
    let Some(last_ts) = last_ts else {
        return true;
    };
    if et_day_of(last_ts) < et_day_of(as_of) {
        return true;
    }
    as_of - last_ts > Duration::seconds(i64::from(tf_min) * 60 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn winter_session_bounds_are_utc_minus_five() {
        // 2021-01-04 (EST): 09:30 ET = 14:30 UTC, 16:00 ET = 21:00 UTC.
        let day = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        let (open, close) = ny_session_bounds(day);
        assert_eq!(open, Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap());
        assert_eq!(close, Utc.with_ymd_and_hms(2021, 1, 4, 21, 0, 0).unwrap());
    }

    #[test]
    fn summer_session_bounds_are_utc_minus_four() {
        // 2021-07-06 (EDT): 09:30 ET = 13:30 UTC, 16:00 ET = 20:00 UTC.
        let day = NaiveDate::from_ymd_opt(2021, 7, 6).unwrap();
        let (open, close) = ny_session_bounds(day);
        assert_eq!(open, Utc.with_ymd_and_hms(2021, 7, 6, 13, 30, 0).unwrap());
        assert_eq!(close, Utc.with_ymd_and_hms(2021, 7, 6, 20, 0, 0).unwrap());
    }

    #[test]
    fn rth_boundaries_are_inclusive() {
        let open = Utc.with_ymd_and_hms(2021, 1, 4, 14, 30, 0).unwrap();
        let close = Utc.with_ymd_and_hms(2021, 1, 4, 21, 0, 0).unwrap();
        assert!(is_regular_market_minute(open));
        assert!(is_regular_market_minute(close));
        assert!(!is_regular_market_minute(open - Duration::minutes(1)));
        assert!(!is_regular_market_minute(close + Duration::minutes(1)));
    }

    #[test]
    fn weekends_are_never_regular_hours() {
        // 2021-01-09 is a Saturday; noon ET would otherwise qualify.
        let sat_noon = Utc.with_ymd_and_hms(2021, 1, 9, 17, 0, 0).unwrap();
        assert!(!is_regular_market_minute(sat_noon));
    }

    #[test]
    fn et_day_flips_at_new_york_midnight() {
        // 2021-01-05 03:00 UTC is still 2021-01-04 22:00 ET.
        let ts = Utc.with_ymd_and_hms(2021, 1, 5, 3, 0, 0).unwrap();
        assert_eq!(et_day_of(ts), NaiveDate::from_ymd_opt(2021, 1, 4).unwrap());
    }

    #[test]
    fn stale_when_no_candle_or_prior_day() {
        let as_of = Utc.with_ymd_and_hms(2021, 1, 5, 15, 0, 0).unwrap();
        assert!(is_stale_candle(None, 5, as_of));

        let prior_day = Utc.with_ymd_and_hms(2021, 1, 4, 20, 55, 0).unwrap();
        assert!(is_stale_candle(Some(prior_day), 5, as_of));
    }

    #[test]
    fn stale_when_older_than_one_window_plus_grace() {
        let as_of = Utc.with_ymd_and_hms(2021, 1, 5, 15, 0, 0).unwrap();

        let fresh = as_of - Duration::seconds(5 * 60);
        assert!(!is_stale_candle(Some(fresh), 5, as_of));

        let edge = as_of - Duration::seconds(5 * 60 + 1);
        assert!(!is_stale_candle(Some(edge), 5, as_of));

        let too_old = as_of - Duration::seconds(5 * 60 + 2);
        assert!(is_stale_candle(Some(too_old), 5, as_of));
    }
}
