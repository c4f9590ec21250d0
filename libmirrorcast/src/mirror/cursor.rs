//! Incremental fetch cursor: what is new since the last mirror

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use crate::error::{ConfigError, MirrorError, Result};
use crate::types::{DestinationPost, FetchCursor};

/// Oldest date the source timeline API can return
pub const EARLIEST_SOURCE_DATE: &str = "2010-11-06T00:00:00Z";

/// Page ceiling of the source timeline, used when nothing overrides it
pub const DEFAULT_MAX_POSTS: u8 = 100;

pub const MIN_MAX_POSTS: i64 = 10;
pub const MAX_MAX_POSTS: i64 = 100;

/// Lookback for the "continue" start mode
const CONTINUE_LOOKBACK_DAYS: i64 = 2;

/// Where a first run with an empty destination starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// The source's minimum retrievable date
    Earliest,
    /// Two days before now
    Continue,
    /// Midnight UTC of a civil date
    Explicit(NaiveDate),
}

impl StartMode {
    /// Parse a configured value: "earliest", "continue" or YYYY-MM-DD
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "earliest" => Some(Self::Earliest),
            "continue" => Some(Self::Continue),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .ok()
                .map(Self::Explicit),
        }
    }

    /// Interpret a raw answer from the interactive prompt.
    ///
    /// An empty answer means "everything", mirroring the prompt's wording.
    pub fn from_prompt_answer(answer: &str) -> Result<Self> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(Self::Earliest);
        }
        if answer == "earliest" {
            return Err(MirrorError::InvalidInput(
                "leave the answer empty to fetch everything".to_string(),
            ));
        }
        Self::parse(answer).ok_or_else(|| {
            MirrorError::InvalidInput(format!(
                "'{}' is not a date (YYYY-MM-DD), 'continue' or empty",
                answer
            ))
        })
    }
}

/// Asks the operator where a first run should start; returns the raw answer
#[async_trait]
pub trait StartDatePrompt: Send + Sync {
    async fn ask(&self, account: &str) -> Result<String>;
}

/// Whether the cursor needs a start mode at all
pub fn needs_start_mode(history: &[DestinationPost], first_run: bool) -> bool {
    history.is_empty() && first_run
}

/// Decide the start mode: configuration first, then the prompt, else "continue"
pub async fn resolve_start_mode(
    account: &str,
    configured: Option<StartMode>,
    prompt: Option<&dyn StartDatePrompt>,
) -> Result<StartMode> {
    if let Some(mode) = configured {
        return Ok(mode);
    }

    match prompt {
        Some(prompt) => {
            let answer = prompt.ask(account).await?;
            StartMode::from_prompt_answer(&answer)
        }
        None => {
            tracing::info!(account, "No first-run start configured, continuing from two days ago");
            Ok(StartMode::Continue)
        }
    }
}

/// Reject a max-posts value outside the source's page bounds
pub fn validate_max_posts(value: i64) -> Result<u8> {
    if !(MIN_MAX_POSTS..=MAX_MAX_POSTS).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field: "max_posts".to_string(),
            min: MIN_MAX_POSTS,
            max: MAX_MAX_POSTS,
            value,
        }
        .into());
    }
    // In range, so it fits
    Ok(value as u8)
}

pub fn earliest_source_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2010, 11, 6, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Compute the fetch window for one pass.
///
/// `start_mode` is only consulted for a first run against an empty
/// destination; `None` there behaves like [`StartMode::Continue`].
pub fn compute_cursor(
    history: &[DestinationPost],
    first_run: bool,
    start_mode: Option<StartMode>,
    max_posts_override: Option<i64>,
    fallback_lookback: std::time::Duration,
    now: DateTime<Utc>,
) -> Result<FetchCursor> {
    let since = match history.iter().map(|p| p.created_at).max() {
        Some(newest) => newest,
        None if first_run => match start_mode.unwrap_or(StartMode::Continue) {
            StartMode::Earliest => earliest_source_date(),
            StartMode::Continue => now - Duration::days(CONTINUE_LOOKBACK_DAYS),
            StartMode::Explicit(date) => Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)),
        },
        None => {
            let lookback = Duration::from_std(fallback_lookback).map_err(|e| ConfigError::InvalidValue {
                field: "fallback_lookback".to_string(),
                reason: e.to_string(),
            })?;
            now - lookback
        }
    };

    let max_count = match max_posts_override {
        Some(value) => validate_max_posts(value)?,
        None => DEFAULT_MAX_POSTS,
    };

    Ok(FetchCursor { since, max_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPrompt(&'static str);

    #[async_trait]
    impl StartDatePrompt for FixedPrompt {
        async fn ask(&self, _account: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 0).unwrap()
    }

    fn two_days() -> std::time::Duration {
        std::time::Duration::from_secs(2 * 24 * 3600)
    }

    fn post_at(id: &str, at: DateTime<Utc>) -> DestinationPost {
        DestinationPost {
            id: id.to_string(),
            created_at: at,
            content: String::new(),
            visibility: None,
            sensitive: false,
            media_ids: vec![],
            has_poll: false,
        }
    }

    #[test]
    fn test_history_sets_lower_bound_to_newest_post() {
        let newest = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap();
        let history = vec![
            post_at("b", newest),
            post_at("a", newest - Duration::hours(5)),
        ];

        let cursor = compute_cursor(&history, true, Some(StartMode::Earliest), None, two_days(), now()).unwrap();
        assert_eq!(cursor.since, newest);
        assert_eq!(cursor.max_count, 100);
    }

    #[test]
    fn test_first_run_earliest() {
        let cursor = compute_cursor(&[], true, Some(StartMode::Earliest), None, two_days(), now()).unwrap();
        assert_eq!(cursor.since.to_rfc3339(), "2010-11-06T00:00:00+00:00");
        assert_eq!(cursor.max_count, 100);
    }

    #[test]
    fn test_first_run_continue() {
        let cursor = compute_cursor(&[], true, Some(StartMode::Continue), None, two_days(), now()).unwrap();
        assert_eq!(cursor.since, now() - Duration::days(2));
    }

    #[test]
    fn test_first_run_explicit_date_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
        let cursor = compute_cursor(&[], true, Some(StartMode::Explicit(date)), None, two_days(), now()).unwrap();
        assert_eq!(cursor.since, Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(cursor.max_count, 100);
    }

    #[test]
    fn test_later_run_with_empty_history_uses_fallback_lookback() {
        let lookback = std::time::Duration::from_secs(6 * 3600);
        let cursor = compute_cursor(&[], false, Some(StartMode::Earliest), None, lookback, now()).unwrap();
        assert_eq!(cursor.since, now() - Duration::hours(6));
    }

    #[test]
    fn test_override_wins_and_bounds_are_inclusive() {
        let cursor = compute_cursor(&[], false, None, Some(10), two_days(), now()).unwrap();
        assert_eq!(cursor.max_count, 10);

        let cursor = compute_cursor(&[], false, None, Some(100), two_days(), now()).unwrap();
        assert_eq!(cursor.max_count, 100);
    }

    #[test]
    fn test_override_out_of_range_names_bound_and_value() {
        let error = compute_cursor(&[], false, None, Some(5), two_days(), now()).unwrap_err();
        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            error.to_string(),
            "Configuration error: max_posts must be between 10 and 100. max_posts: 5"
        );

        assert!(validate_max_posts(101).is_err());
        assert!(validate_max_posts(-1).is_err());
    }

    #[test]
    fn test_start_mode_parse() {
        assert_eq!(StartMode::parse("earliest"), Some(StartMode::Earliest));
        assert_eq!(StartMode::parse(" continue "), Some(StartMode::Continue));
        assert_eq!(
            StartMode::parse("2022-02-28"),
            Some(StartMode::Explicit(NaiveDate::from_ymd_opt(2022, 2, 28).unwrap()))
        );
        assert_eq!(StartMode::parse("2022-02-30"), None);
        assert_eq!(StartMode::parse("soon"), None);
    }

    #[test]
    fn test_prompt_answers() {
        assert_eq!(StartMode::from_prompt_answer("").unwrap(), StartMode::Earliest);
        assert_eq!(StartMode::from_prompt_answer("\n").unwrap(), StartMode::Earliest);
        assert_eq!(StartMode::from_prompt_answer("continue").unwrap(), StartMode::Continue);
        assert!(matches!(
            StartMode::from_prompt_answer("2020-01-01").unwrap(),
            StartMode::Explicit(_)
        ));

        let error = StartMode::from_prompt_answer("last week").unwrap_err();
        assert_eq!(error.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_resolve_start_mode_precedence() {
        let prompt = FixedPrompt("");

        let mode = resolve_start_mode("alice", Some(StartMode::Continue), Some(&prompt)).await.unwrap();
        assert_eq!(mode, StartMode::Continue);

        let mode = resolve_start_mode("alice", None, Some(&prompt)).await.unwrap();
        assert_eq!(mode, StartMode::Earliest);

        let mode = resolve_start_mode("alice", None, None).await.unwrap();
        assert_eq!(mode, StartMode::Continue);
    }

    #[test]
    fn test_needs_start_mode() {
        assert!(needs_start_mode(&[], true));
        assert!(!needs_start_mode(&[], false));
        assert!(!needs_start_mode(&[post_at("a", now())], true));
    }
}
