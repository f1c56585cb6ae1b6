//! Run-window gating.
//!
//! Grounded on the original `window_ok`: a job's week schedule is seven
//! optional window lists; the daemon caches the next transition edge so
//! most ticks return the cached `active` flag without recomputation.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};

use crate::jobcard::JobCard;

/// Minimum interval between successive window-close warnings for the
/// same job, so a job flapping across a window edge isn't signaled every
/// tick.
pub const WARN_TIME_SECS: i64 = 600;

pub struct WindowOutcome {
    pub active: bool,
    pub should_signal: bool,
}

fn fractional_hour(now: DateTime<Utc>) -> f64 {
    now.hour() as f64 + now.minute() as f64 / 60.0 + now.second() as f64 / 3600.0
}

fn at_hour(now: DateTime<Utc>, hour: f64) -> DateTime<Utc> {
    let whole = hour.floor() as u32;
    let frac_min = ((hour - hour.floor()) * 60.0).round() as u32;
    let time = NaiveTime::from_hms_opt(whole.min(23), frac_min.min(59), 0).unwrap();
    Utc.from_utc_datetime(&now.date_naive().and_time(time))
}

fn start_of_next_day(now: DateTime<Utc>) -> DateTime<Utc> {
    at_hour(now, 0.0) + Duration::days(1)
}

/// Evaluate gating for `card` at `now`. If the cached edge has not been
/// crossed, returns the cached state with no signal. Otherwise recomputes
/// from the job's window schedule and reports whether a window-close
/// warning should be delivered (caller resumes + signals the job and
/// must not call this again for the same transition).
pub fn window_ok(card: &mut JobCard, now: DateTime<Utc>, window_sig_enabled: bool) -> WindowOutcome {
    if now < card.wind_edge {
        return WindowOutcome { active: card.active, should_signal: false };
    }

    let prior_active = card.active;
    let weekday = now.weekday().num_days_from_sunday() as usize;
    let hour = fractional_hour(now);
    let day_windows = &card.spec.windows[weekday];

    if day_windows.is_empty() {
        card.active = true;
        card.wind_edge = start_of_next_day(now);
    } else {
        card.active = false;
        card.wind_edge = start_of_next_day(now);
        for w in day_windows {
            if w.contains(hour) {
                card.active = true;
                card.wind_edge = at_hour(now, w.end_hour);
                break;
            }
            if hour < w.start_hour {
                let candidate = at_hour(now, w.start_hour);
                if candidate < card.wind_edge {
                    card.wind_edge = candidate;
                }
            }
        }
    }

    let mut should_signal = false;
    if prior_active && !card.active && window_sig_enabled {
        let warn_elapsed = card
            .last_window_warning
            .map(|t| (now - t).num_seconds() >= WARN_TIME_SECS)
            .unwrap_or(true);
        if warn_elapsed {
            should_signal = true;
            card.last_window_warning = Some(now);
        }
    }

    WindowOutcome { active: card.active, should_signal }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batch_core::{JobId, JobSpec, Window};
    use chrono::TimeZone;

    fn base_card() -> JobCard {
        JobCard::new(JobId::new(1, None), JobSpec::new(vec!["/bin/true".into()], 1))
    }

    #[test]
    fn empty_week_is_always_active() {
        let mut card = base_card();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 3, 0, 0).unwrap();
        let outcome = window_ok(&mut card, now, true);
        assert!(outcome.active);
    }

    #[test]
    fn window_boundary_flips_active_state() {
        let mut card = base_card();
        let weekday = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap().weekday().num_days_from_sunday() as usize;
        card.spec.windows[weekday] = vec![Window { start_hour: 8.0, end_hour: 17.0 }];

        let before = Utc.with_ymd_and_hms(2026, 7, 28, 7, 59, 59).unwrap();
        let outcome = window_ok(&mut card, before, true);
        assert!(!outcome.active);

        let after = Utc.with_ymd_and_hms(2026, 7, 28, 8, 0, 1).unwrap();
        let outcome = window_ok(&mut card, after, true);
        assert!(outcome.active);
    }

    #[test]
    fn closing_window_signals_once_within_warn_time() {
        let mut card = base_card();
        let weekday = Utc.with_ymd_and_hms(2026, 7, 28, 0, 0, 0).unwrap().weekday().num_days_from_sunday() as usize;
        card.spec.windows[weekday] = vec![Window { start_hour: 8.0, end_hour: 9.0 }];

        let inside = Utc.with_ymd_and_hms(2026, 7, 28, 8, 30, 0).unwrap();
        window_ok(&mut card, inside, true);
        assert!(card.active);

        let closed = Utc.with_ymd_and_hms(2026, 7, 28, 9, 0, 1).unwrap();
        let outcome = window_ok(&mut card, closed, true);
        assert!(!outcome.active);
        assert!(outcome.should_signal);

        card.wind_edge = DateTime::<Utc>::MIN_UTC;
        let still_closed = closed + Duration::seconds(5);
        let outcome2 = window_ok(&mut card, still_closed, true);
        assert!(!outcome2.should_signal);
    }
}
