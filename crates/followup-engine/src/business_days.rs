//! Business-day calculator.
//!
//! Pure, side-effect-free calendar math: French public holidays (fixed
//! dates plus Easter-derived moveable feasts) and business-day arithmetic
//! used by the scheduler to place followup firing times. No I/O, no
//! external state beyond a small per-year holiday cache.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

/// Computes the date of Easter Sunday for `year` using the Meeus/Jones/Butcher
/// (anonymous Gregorian) algorithm. Only valid for the Gregorian era
/// (1583 onward); inputs outside 1900-2100 are not required to be correct.
fn easter_sunday(year: i32) -> NaiveDate {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = ((h + l - 7 * m + 114) % 31) + 1;

    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .expect("Meeus/Jones/Butcher algorithm always yields a valid calendar date")
}

/// Computes the 11 French public holidays for `year`: 8 fixed dates plus
/// the 3 Easter-derived moveable feasts (Easter Monday, Ascension,
/// Pentecost Monday).
fn compute_french_holidays(year: i32) -> HashSet<NaiveDate> {
    let mut holidays = HashSet::with_capacity(11);

    let fixed = [
        (1, 1),   // Jour de l'an
        (5, 1),   // Fete du travail
        (5, 8),   // Victoire 1945
        (7, 14),  // Fete nationale
        (8, 15),  // Assomption
        (11, 1),  // Toussaint
        (11, 11), // Armistice
        (12, 25), // Noel
    ];
    for (month, day) in fixed {
        holidays.insert(NaiveDate::from_ymd_opt(year, month, day).unwrap());
    }

    let easter = easter_sunday(year);
    holidays.insert(easter + Duration::days(1)); // Lundi de Paques
    holidays.insert(easter + Duration::days(39)); // Ascension
    holidays.insert(easter + Duration::days(50)); // Lundi de Pentecote

    holidays
}

static HOLIDAY_CACHE: Mutex<Option<HashMap<i32, HashSet<NaiveDate>>>> = Mutex::new(None);

/// Returns the set of French public holidays for `year`, computed once per
/// process and cached thereafter.
pub fn holidays(year: i32) -> HashSet<NaiveDate> {
    let mut cache = HOLIDAY_CACHE.lock().expect("holiday cache lock poisoned");
    let map = cache.get_or_insert_with(HashMap::new);
    map.entry(year)
        .or_insert_with(|| compute_french_holidays(year))
        .clone()
}

/// True iff `date` is a weekday that is not a French public holiday.
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !holidays(date.year()).contains(&date)
}

/// Walks forward from `date` to the next business day, inclusive.
fn next_business_day(mut date: NaiveDate) -> NaiveDate {
    while !is_business_day(date) {
        date += Duration::days(1);
    }
    date
}

/// Advances `t` by `n` business days and normalizes the result to
/// 01:00:00 UTC on the landed business day.
///
/// Positive `n` walks forward, negative `n` walks backward. `n = 0` is
/// defined as "the next business day on or after `t`" (the upstream
/// Python implementation leaves this case undefined — its loop body never
/// executes for a zero count).
pub fn add_business_days(t: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    let landed = if n == 0 {
        next_business_day(t.date_naive())
    } else {
        let direction = if n >= 0 { 1 } else { -1 };
        let mut current = t.date_naive();
        let mut remaining = n.unsigned_abs();
        while remaining > 0 {
            current += Duration::days(direction);
            if is_business_day(current) {
                remaining -= 1;
            }
        }
        current
    };

    landed
        .and_hms_opt(1, 0, 0)
        .expect("01:00:00 is always a valid time")
        .and_utc()
}
