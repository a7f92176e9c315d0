//! Complaint intake.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::collaborators::NewComplaint;
use crate::dispatch::{ActionContext, ActionError, ActionHandler, Outcome};
use crate::util::redact_pii;

pub struct CreateComplaint;

#[async_trait]
impl ActionHandler for CreateComplaint {
    fn tag(&self) -> &'static str {
        "CreateComplaint"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn resets(&self) -> &'static [&'static str] {
        &["nombre", "cedula", "ubicacion", "descripcion"]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let params = ctx.params();
        let channel_user_id =
            params
                .optional_str("channelUserId")
                .ok_or_else(|| ActionError::Invalid {
                    code: "MISSING_USER_ID",
                    message: "Falta el ID de usuario.".to_string(),
                })?;

        let complaint = NewComplaint {
            session_id: ctx.session_id(),
            channel_user_id,
            name: params.required_str("nombre")?,
            national_id: params.required_str("cedula")?,
            location: params.required_str("ubicacion")?,
            description: params.required_str("descripcion")?,
        };
        debug!(
            national_id = %redact_pii(&complaint.national_id),
            "Registering complaint"
        );

        ctx.ack("Estamos registrando su denuncia…").await;
        let receipt = ctx
            .tool("db", ctx.services().complaints.create_complaint(complaint))
            .await?;

        Ok(Outcome::new(
            format!("Denuncia #{} creada correctamente.", receipt.id),
            json!({ "id": receipt.id, "source": "db" }),
        ))
    }
}
