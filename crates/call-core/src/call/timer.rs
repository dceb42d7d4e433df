//! Call duration ticker

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::events::CallEvent;

use super::Call;

/// Interval between `timeupdate` notifications
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Format an elapsed duration rounded up to whole seconds, e.g. `1h 2m 5s`.
///
/// Zero units are omitted; a zero duration renders as `0ms`.
pub fn format_duration(elapsed: Duration) -> String {
    let seconds = elapsed.as_millis().div_ceil(1000) as u64;
    if seconds == 0 {
        return "0ms".to_string();
    }

    let units = [
        (seconds / 86_400, "d"),
        (seconds / 3_600 % 24, "h"),
        (seconds / 60 % 60, "m"),
        (seconds % 60, "s"),
    ];

    units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect::<Vec<_>>()
        .join(" ")
}

impl Call {
    /// Spawn the duration ticker; owned by the call and aborted on teardown
    pub(super) fn start_ticker(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(call_id = %self.id, "No async runtime, duration updates disabled");
            return;
        };

        let call = self.this.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(call) = call.upgrade() else {
                    break;
                };
                if !call.tick() {
                    break;
                }
            }
        });

        let previous = self.state.lock().ticker.replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Publish one `timeupdate`; returns whether the ticker should keep running
    fn tick(&self) -> bool {
        let (alive, answer_time, answered_at) = {
            let inner = self.state.lock();
            (
                inner.session.is_some() && !inner.terminated,
                inner.answer_time,
                inner.answered_at,
            )
        };
        if !alive {
            return false;
        }

        if let (Some(answer_time), Some(answered_at)) = (answer_time, answered_at) {
            let elapsed = answered_at.elapsed();
            let formatted = format_duration(elapsed);
            tracing::trace!(call_id = %self.id, %formatted, "Duration tick");
            self.emit(CallEvent::TimeUpdate {
                answer_time,
                elapsed,
                formatted,
            });
        }
        true
    }
}
