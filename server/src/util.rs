//! Shared utility functions

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest user text written to logs, in characters.
pub const MAX_LOGGED_CHARS: usize = 1000;

static NATIONAL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}-)\d{3,6}-(\d{3,4})\b").expect("valid regex"));

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2})\d{2}(\d{2})\d{2}\b").expect("valid regex"));

/// Mask national ids and 8-digit phone numbers, then truncate to
/// [`MAX_LOGGED_CHARS`].
///
/// # Examples
///
/// ```
/// use parley_server::util::redact_pii;
///
/// assert_eq!(redact_pii("cédula 1-1234-5678"), "cédula 1-****-5678");
/// assert_eq!(redact_pii("tel 88881234"), "tel 88**12**");
/// ```
pub fn redact_pii(input: &str) -> String {
    let masked = NATIONAL_ID.replace_all(input, "${1}****-${2}");
    let masked = PHONE.replace_all(&masked, "${1}**${2}**");
    truncate(&masked, MAX_LOGGED_CHARS)
}

/// Cut `input` to at most `max` characters, appending `…` when shortened.
pub fn truncate(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &input[..cut]),
        None => input.to_string(),
    }
}

/// Run `sweep` every `period` until `shutdown` is cancelled.
///
/// The first tick is consumed, so the first sweep happens one `period` after
/// the call.
pub fn spawn_sweep_task<F>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    sweep: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => sweep(),
            }
        }
        debug!(name, "Sweep task stopped");
    })
}
