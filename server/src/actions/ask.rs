//! Free-text questions answered by the retrieval service.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{ActionContext, ActionError, ActionHandler, Outcome};

const NO_ANSWER: &str =
    "No encuentro información suficiente para darle una respuesta exacta en este momento.";

pub struct Ask;

#[async_trait]
impl ActionHandler for Ask {
    fn tag(&self) -> &'static str {
        "Ask"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(45)
    }

    fn resets(&self) -> &'static [&'static str] {
        &["q"]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let question = ctx
            .params()
            .optional_str("q")
            .ok_or_else(|| ActionError::Invalid {
                code: "MISSING_PARAM",
                message: "¿Podría indicarme su consulta con un poco más de detalle?".to_string(),
            })?;

        let answer = ctx
            .tool("discovery_search", async {
                ctx.progress("Estoy redactando su respuesta…").await;
                ctx.services()
                    .answers
                    .answer(ctx.session_id(), &question)
                    .await
            })
            .await?;

        let text = answer.unwrap_or_else(|| NO_ANSWER.to_string());
        Ok(Outcome::new(text, json!({ "source": "rag" })))
    }
}
