//! Periodic triggers
//!
//! Each trigger is an explicit schedule descriptor bound to an async action.
//! A trigger owns one sequential task: the next fire is not armed until the
//! previous action finishes, so a slow scan can never overlap itself.

use crate::error::Result;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// When a trigger fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSchedule {
    /// Fixed delay between completions
    Interval(Duration),
    /// Once per day at a local wall-clock time in the given zone
    DailyAt { time: NaiveTime, timezone: Tz },
}

/// The async work a trigger runs on each fire
pub type TriggerAction = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct Trigger {
    name: &'static str,
    schedule: TriggerSchedule,
    action: TriggerAction,
}

/// The set of periodic triggers owned by one engine instance
#[derive(Default)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &'static str, schedule: TriggerSchedule, action: TriggerAction) {
        self.triggers.push(Trigger {
            name,
            schedule,
            action,
        });
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Spawn one task per trigger. Tasks stop at the next scheduling point
    /// after cancellation; an in-flight action always runs to completion.
    pub fn spawn_all(self, shutdown: CancellationToken) -> Vec<tokio::task::JoinHandle<()>> {
        self.triggers
            .into_iter()
            .map(|trigger| {
                let token = shutdown.clone();
                tokio::spawn(async move {
                    info!(trigger = trigger.name, schedule = ?trigger.schedule, "trigger armed");
                    loop {
                        let wait = trigger.schedule.until_next_fire(Utc::now());
                        tokio::select! {
                            _ = sleep(wait) => {
                                debug!(trigger = trigger.name, "trigger firing");
                                if let Err(e) = (trigger.action)().await {
                                    error!(trigger = trigger.name, error = %e, "trigger action failed");
                                }
                            }
                            _ = token.cancelled() => {
                                info!(trigger = trigger.name, "trigger stopped");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

impl TriggerSchedule {
    /// Delay from `now` until the schedule next fires
    pub fn until_next_fire(&self, now: DateTime<Utc>) -> Duration {
        match self {
            TriggerSchedule::Interval(duration) => *duration,
            TriggerSchedule::DailyAt { time, timezone } => {
                let next = next_daily_fire(now, *time, *timezone);
                (next - now).to_std().unwrap_or(Duration::ZERO)
            }
        }
    }
}

/// The next UTC instant at which the local wall clock in `tz` reads `time`.
/// DST ambiguity resolves to the earlier instant; a time skipped by a DST
/// gap slides forward one hour.
fn next_daily_fire(now: DateTime<Utc>, time: NaiveTime, tz: Tz) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    if local_now.time() >= time {
        date = date + Days::new(1);
    }

    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now + chrono::Duration::days(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_daily_fire_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 7, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
        let next = next_daily_fire(now, time, chrono_tz::UTC);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 10, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_daily_fire_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
        let next = next_daily_fire(now, time, chrono_tz::UTC);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 11, 8, 30, 0).unwrap());
    }

    #[test]
    fn test_daily_fire_respects_timezone() {
        // 12:00 UTC is 08:00 in New York (EDT), so an 08:30 local trigger
        // still fires today at 12:30 UTC
        let now = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        let time = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
        let next = next_daily_fire(now, time, chrono_tz::America::New_York);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 10, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_interval_schedule_delay() {
        let schedule = TriggerSchedule::Interval(Duration::from_secs(300));
        assert_eq!(
            schedule.until_next_fire(Utc::now()),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn test_interval_trigger_fires_and_stops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();

        let mut triggers = TriggerSet::new();
        triggers.add(
            "test",
            TriggerSchedule::Interval(Duration::from_millis(10)),
            Arc::new(move || {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let token = CancellationToken::new();
        let handles = triggers.spawn_all(token.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(fired.load(Ordering::SeqCst) >= 2);
    }
}
