//! Retry function (§4.8): rolls `data` back to the last persisted
//! `state_data`, bumps `attempts`, and either sleeps in-process or arms a
//! timer depending on the effective delay against the 5s threshold (§9
//! "preserve the threshold exactly").

use tracing::Instrument;

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::store::{now_millis, InstanceRecord};
use crate::timer::{retry_timer_id, StepWakePayload, WakeFunction};

/// `Retry(ctx, delayISO8601, multiplier)` (§4.8). `record.state_data` is
/// already the last persisted document — the failed pass's in-memory
/// mutations were never saved, so no explicit rollback is needed beyond not
/// saving them.
pub async fn retry(
    engine: &Engine,
    record: &mut InstanceRecord,
    current_state: &str,
    logic_deadline: i64,
    delay_iso8601: String,
    multiplier: f64,
) -> EngineResult<()> {
    let attempt = record.attempts;
    record.attempts += 1;

    let base_delay_ms = iso8601_duration_millis(&parse_duration(&delay_iso8601));
    let effective_delay_ms = (base_delay_ms as f64 * multiplier.powi(attempt as i32)).round() as i64;

    let now = now_millis();
    let schedule = now + effective_delay_ms.max(0);

    // §4.8: soft deadline = schedule + 5s + logic.deadline − now.
    record.deadline = schedule + 5_000 + (logic_deadline - now);

    engine.store().save(record).await?;

    let timer_id = crate::run_loop::timer_id_for(record);
    let soft_payload = serde_json::to_vec(&crate::timer::TimeoutPayload {
        instance_id: record.instance_id.clone(),
        step: record.step(),
        soft: true,
    })
    .expect("timeout payload always serializable");
    engine
        .timers()
        .add_one_shot(&timer_id, WakeFunction::TimeoutFunction, record.deadline, soft_payload)
        .await?;

    if effective_delay_ms < engine.config().retry_inline_threshold.as_millis() as i64 {
        crate::metrics::RETRIES_TOTAL.with_label_values(&["inline"]).inc();
        if effective_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(effective_delay_ms as u64)).await;
        }

        let engine = engine.clone();
        let instance_id = record.instance_id.clone();
        tokio::spawn(
            async move {
                if let Err(err) = crate::run_loop::run_state(&engine, &instance_id, None, None).await {
                    tracing::debug!(?err, "retry run pass ended without completing");
                }
            }
            .in_current_span(),
        );
        return Ok(());
    }

    crate::metrics::RETRIES_TOTAL.with_label_values(&["timer"]).inc();
    let retry_timer_id = retry_timer_id(&record.instance_id, record.step());
    let payload = serde_json::to_vec(&StepWakePayload {
        instance_id: record.instance_id.clone(),
        state: current_state.to_string(),
        step: record.step(),
    })
    .expect("wake payload always serializable");
    engine
        .timers()
        .add_one_shot(&retry_timer_id, WakeFunction::RetryWakeup, schedule, payload)
        .await?;

    Ok(())
}

fn parse_duration(iso: &str) -> iso8601::Duration {
    iso8601::duration(iso).unwrap_or(iso8601::Duration::YMDHMS {
        year: 0,
        month: 0,
        day: 0,
        hour: 0,
        minute: 0,
        second: 0,
        millisecond: 0,
    })
}

/// Converts a parsed ISO-8601 duration to milliseconds. Calendar fields
/// (year/month) are approximated at 365/30 days, which is adequate for the
/// retry-delay use case (§4.8 durations are always small, sub-day values in
/// practice).
pub(crate) fn iso8601_duration_millis(duration: &iso8601::Duration) -> i64 {
    match duration {
        iso8601::Duration::YMDHMS { year, month, day, hour, minute, second, millisecond } => {
            let days = *year as i64 * 365 + *month as i64 * 30 + *day as i64;
            ((days * 24 + *hour as i64) * 60 + *minute as i64) * 60 * 1000
                + *second as i64 * 1000
                + *millisecond as i64
        }
        iso8601::Duration::Weeks(weeks) => *weeks as i64 * 7 * 24 * 60 * 60 * 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_parses_to_zero_millis() {
        let d = parse_duration("PT0S");
        assert_eq!(iso8601_duration_millis(&d), 0);
    }

    #[test]
    fn seconds_duration_converts() {
        let d = parse_duration("PT5S");
        assert_eq!(iso8601_duration_millis(&d), 5_000);
    }

    #[test]
    fn minutes_duration_converts() {
        let d = parse_duration("PT15M");
        assert_eq!(iso8601_duration_millis(&d), 15 * 60 * 1000);
    }
}
