//! Checks a verification code and, when valid, reveals the case status.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::dispatch::{ActionContext, ActionError, ActionHandler, Outcome};

pub struct ValidateVerificationCode;

#[async_trait]
impl ActionHandler for ValidateVerificationCode {
    fn tag(&self) -> &'static str {
        "ValidateVerificationCode"
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn resets(&self) -> &'static [&'static str] {
        &["numeroExpediente", "codigoVerificacion"]
    }

    async fn run(&self, ctx: &ActionContext) -> Result<Outcome, ActionError> {
        let params = ctx.params();
        let number = params.required_str("numeroExpediente")?;
        let code = params.required_str("codigoVerificacion")?;
        let services = ctx.services();

        let valid = ctx
            .call(services.verification.validate_code(&number, &code))
            .await?;
        if !valid {
            return Ok(Outcome::new(
                "El código ingresado es inválido o ha expirado. Por favor, inicie de nuevo la consulta.",
                json!({ "codigoValido": false }),
            ));
        }

        let status = ctx
            .call(services.cases.find_case(&number))
            .await?
            .map_or_else(|| "Desconocido".to_string(), |case| case.status);

        Ok(Outcome::new(
            format!("Código correcto. El expediente {number} está en estado: {status}."),
            json!({ "numero": number, "estado": status, "codigoValido": true }),
        ))
    }
}
