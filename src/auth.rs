use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::identity::{IdentityError, Principal};
use crate::observability;

/// Shared-password auth. The login user must also name a principal
/// (`<role>:<ulid>`), so malformed users are refused at startup.
#[derive(Debug)]
pub struct StaydAuthSource {
    password: String,
}

impl StaydAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StaydAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let principal = login
            .user()
            .ok_or(IdentityError::Missing)
            .and_then(Principal::from_login);
        if let Err(e) = principal {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("login refused: {e}");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                e.to_string(),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
