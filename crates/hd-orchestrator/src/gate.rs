//! Preference gate
//!
//! Per-channel decisioning: global enables, category settings, DND, quiet
//! hours. Critical priority bypasses everything here; the email suppression
//! list is checked later in the email router and is never bypassed.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use hd_common::{
    Channel, DigestFrequency, DigestSettings, Frequency, Notification, NotificationPreferences,
    Priority, QuietHours,
};
use tracing::debug;

/// Outcome of gating one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    DeliverNow,
    /// Defer into the digest accumulator at the given cadence.
    Digest(DigestFrequency),
    /// Defer until the given instant (quiet hours / DND exit).
    Schedule(DateTime<Utc>),
    Blocked { reason: String },
}

fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    let (h, m) = value.split_once(':')?;
    NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
}

/// Whether `now` falls inside the quiet window, in the user's timezone.
/// Windows may wrap past midnight (start 22:00, end 08:00). Unparseable
/// settings fail open (no quiet hours).
pub fn in_quiet_hours(quiet: &QuietHours, now: DateTime<Utc>) -> bool {
    if !quiet.enabled {
        return false;
    }
    let (Some(start), Some(end)) = (parse_hhmm(&quiet.start), parse_hhmm(&quiet.end)) else {
        return false;
    };
    let Ok(tz) = quiet.timezone.parse::<Tz>() else {
        return false;
    };

    let local = now.with_timezone(&tz).time();
    if start <= end {
        local >= start && local < end
    } else {
        local >= start || local < end
    }
}

/// The next instant the quiet window ends, in UTC.
pub fn quiet_hours_exit(quiet: &QuietHours, now: DateTime<Utc>) -> DateTime<Utc> {
    let fallback = now + Duration::hours(8);
    let Some(end) = parse_hhmm(&quiet.end) else {
        return fallback;
    };
    let Ok(tz) = quiet.timezone.parse::<Tz>() else {
        return fallback;
    };

    let local_now = now.with_timezone(&tz);
    let today_end = local_now.date_naive().and_time(end);
    let candidate = if local_now.time() < end {
        today_end
    } else {
        today_end + Duration::days(1)
    };
    match tz.from_local_datetime(&candidate).earliest() {
        Some(exit) => exit.with_timezone(&Utc),
        None => fallback,
    }
}

/// Next flush instant for a digest cadence, respecting the user's digest
/// settings and timezone.
pub fn next_digest_flush(
    frequency: DigestFrequency,
    digest: &DigestSettings,
    timezone: &str,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match frequency {
        DigestFrequency::Hourly => {
            // Top of the next hour.
            let truncated = now
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(now);
            truncated + Duration::hours(1)
        }
        DigestFrequency::Daily | DigestFrequency::Weekly => {
            let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
            let time = parse_hhmm(&digest.daily_time)
                .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap());
            let local_now = now.with_timezone(&tz);
            let mut candidate = local_now.date_naive().and_time(time);
            if candidate <= local_now.naive_local() {
                candidate += Duration::days(1);
            }
            if frequency == DigestFrequency::Weekly {
                let target = digest.weekly_day.min(6) as u32;
                while candidate.weekday().num_days_from_sunday() != target {
                    candidate += Duration::days(1);
                }
            }
            tz.from_local_datetime(&candidate)
                .earliest()
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(now + Duration::days(1))
        }
    }
}

/// Gate one channel of one notification against the user's preferences.
pub fn gate_channel(
    notification: &Notification,
    prefs: &NotificationPreferences,
    channel: Channel,
    now: DateTime<Utc>,
) -> GateDecision {
    // Critical overrides preferences, DND and quiet hours for every channel.
    if notification.priority == Priority::Critical {
        return GateDecision::DeliverNow;
    }

    if !prefs.channel_enabled(channel) {
        return GateDecision::Blocked {
            reason: format!("{} disabled globally", channel),
        };
    }

    let setting = prefs.category_setting(notification.category(), channel);
    if !setting.enabled {
        return GateDecision::Blocked {
            reason: format!("{} disabled for {}", channel, notification.category()),
        };
    }
    match setting.frequency {
        Frequency::Never => {
            return GateDecision::Blocked {
                reason: format!("frequency never for {}", notification.category()),
            }
        }
        freq if freq.is_digest() => {
            // In-app rows are cheap and always written immediately.
            if channel != Channel::InApp {
                let digest_frequency =
                    DigestFrequency::from_frequency(freq).expect("digest frequency");
                return GateDecision::Digest(digest_frequency);
            }
        }
        _ => {}
    }

    let dnd_active = prefs.dnd.is_active(now);
    let quiet_active = in_quiet_hours(&prefs.quiet_hours, now);
    if dnd_active || quiet_active {
        // High and critical cut through silence windows.
        if notification.priority >= Priority::High {
            debug!(
                notification_id = %notification.id,
                channel = %channel,
                "Priority bypasses silence window"
            );
            return GateDecision::DeliverNow;
        }
        let until = if dnd_active {
            prefs.dnd.until.unwrap_or(now + Duration::hours(1))
        } else {
            quiet_hours_exit(&prefs.quiet_hours, now)
        };
        return GateDecision::Schedule(until);
    }

    GateDecision::DeliverNow
}
