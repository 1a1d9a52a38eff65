use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared-password auth for the pgwire startup handshake. The password guards
/// the service as a whole; per-user authorization is the member table.
#[derive(Debug)]
pub struct AmenitydAuthSource {
    password: String,
}

impl AmenitydAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for AmenitydAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
