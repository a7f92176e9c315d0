//! Case status lookup.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{ActionContext, ActionError, ActionHandler, Outcome};

pub struct Lookup;

#[async_trait]
impl ActionHandler for Lookup {
    fn tag(&self) -> &'static str {
        "Lookup"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn resets(&self) -> &'static [&'static str] {
        &["id"]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let id = ctx.params().required_str("id")?;

        let case = ctx.call(ctx.services().cases.find_case(&id)).await?;

        let outcome = match case {
            Some(case) => Outcome::new(
                format!("El expediente {} está en estado: {}.", case.number, case.status),
                json!({ "id": id, "found": true, "status": case.status, "source": "db" }),
            ),
            None => Outcome::new(
                format!("No encontré el expediente {id}."),
                json!({ "id": id, "found": false, "source": "db" }),
            ),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::actions::testing::{error_of, final_of, names, run_turn};
    use crate::collaborators::MemoryBackend;

    #[tokio::test]
    async fn test_not_found_is_a_final_answer() {
        let events = run_turn(Arc::new(MemoryBackend::new()), "Lookup", json!({ "id": "X-1" })).await;

        assert_eq!(names(&events), ["message", "done"]);
        let (text, meta) = final_of(&events);
        assert_eq!(text, "No encontré el expediente X-1.");
        assert_eq!(meta["found"], false);
        assert_eq!(meta["source"], "db");
    }

    #[tokio::test]
    async fn test_found_reports_status() {
        let backend = MemoryBackend::new().with_case("X-2", "En trámite", None);
        let events = run_turn(Arc::new(backend), "Lookup", json!({ "ID": "X-2" })).await;

        let (text, meta) = final_of(&events);
        assert_eq!(text, "El expediente X-2 está en estado: En trámite.");
        assert_eq!(meta["found"], true);
    }

    #[tokio::test]
    async fn test_missing_id_is_retryable_error() {
        let events = run_turn(Arc::new(MemoryBackend::new()), "Lookup", json!({})).await;

        assert_eq!(names(&events), ["error", "done"]);
        assert_eq!(error_of(&events), ("MISSING_PARAM".to_string(), true));
    }

    #[tokio::test]
    async fn test_directory_outage_is_not_retryable() {
        let backend = MemoryBackend::new().with_outage("cases");
        let events = run_turn(Arc::new(backend), "Lookup", json!({ "id": "X-1" })).await;

        assert_eq!(names(&events), ["error", "done"]);
        assert_eq!(error_of(&events), ("UPSTREAM_ERROR".to_string(), false));
    }
}
