//! Sends a verification code to the e-mail on file for a case.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{ActionContext, ActionError, ActionHandler, Outcome};

pub struct SendVerificationCode;

#[async_trait]
impl ActionHandler for SendVerificationCode {
    fn tag(&self) -> &'static str {
        "SendVerificationCode"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(20)
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let number = ctx.params().required_str("numeroExpediente")?;
        let services = ctx.services();

        let Some(case) = ctx.call(services.cases.find_case(&number)).await? else {
            return Ok(Outcome::new(
                format!("No se encontró el expediente {number}. Inicie nuevamente la consulta."),
                json!({ "codigoValido": false }),
            ));
        };
        let Some(email) = case.email.filter(|e| !e.trim().is_empty()) else {
            return Ok(Outcome::new(
                format!("El expediente {number} no tiene correo electrónico registrado."),
                json!({ "codigoValido": false }),
            ));
        };

        let code = ctx
            .tool("verification", services.verification.issue_code(&number))
            .await?;

        ctx.progress("Enviando código…").await;
        ctx.tool(
            "email",
            services
                .notifier
                .send_verification_code(&email, &number, &code),
        )
        .await?;

        Ok(Outcome::new(
            format!(
                "Código enviado al correo registrado para el expediente {number}. Ingréselo para continuar."
            ),
            json!({ "numeroExpediente": number }),
        ))
    }
}
