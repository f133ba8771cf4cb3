use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};

use crate::execution::DailyLoop;
use crate::Result;

/// Wait before retrying a cycle that failed or was halted
const RETRY_AFTER_MINUTES: i64 = 30;

/// When the next cycle should start.
///
/// A cycle is due immediately once `run_hour` has passed on a day that has
/// not completed a cycle yet; otherwise at `run_hour` today or tomorrow.
pub fn next_run(now: DateTime<Utc>, run_hour: u32, last_run: Option<NaiveDate>) -> DateTime<Utc> {
    let today = now.date_naive();
    let at = |day: NaiveDate| {
        day.and_time(NaiveTime::from_hms_opt(run_hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN))
            .and_utc()
    };

    if last_run == Some(today) {
        return at(today + Duration::days(1));
    }
    if now.hour() >= run_hour {
        return now;
    }
    at(today)
}

/// Run the daily loop on schedule until Ctrl+C.
pub async fn run_scheduled(daily: &DailyLoop<'_>, run_hour: u32) -> Result<()> {
    let mut not_before: Option<DateTime<Utc>> = None;

    loop {
        let now = Utc::now();
        let last_run = daily.store().load()?.last_run;
        let mut at = next_run(now, run_hour, last_run);
        if let Some(earliest) = not_before {
            at = at.max(earliest);
        }
        let wait = (at - now).to_std().unwrap_or_default();

        tracing::info!("⏰ Next cycle at {} (in {}s)", at.format("%Y-%m-%d %H:%M UTC"), wait.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let now = Utc::now();
                not_before = match daily.run_cycle(now.date_naive(), now).await {
                    Ok(report) if report.halted => Some(now + Duration::minutes(RETRY_AFTER_MINUTES)),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::error!("❌ Daily cycle failed: {}", e);
                        Some(now + Duration::minutes(RETRY_AFTER_MINUTES))
                    }
                };
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("🛑 Shutdown requested, stopping scheduler");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, minute, 0).unwrap()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    #[test]
    fn test_due_now_when_today_not_run() {
        let now = at(10, 6, 30);
        assert_eq!(next_run(now, 0, Some(date(9))), now);
        assert_eq!(next_run(now, 0, None), now);
    }

    #[test]
    fn test_waits_for_run_hour() {
        assert_eq!(next_run(at(10, 6, 30), 8, Some(date(9))), at(10, 8, 0));
    }

    #[test]
    fn test_tomorrow_after_todays_run() {
        assert_eq!(next_run(at(10, 6, 30), 0, Some(date(10))), at(11, 0, 0));
        assert_eq!(next_run(at(10, 6, 30), 8, Some(date(10))), at(11, 8, 0));
    }
}
