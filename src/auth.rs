use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Single shared cleartext password for every user and tenant.
#[derive(Debug)]
pub struct SeatlineAuthSource {
    password: String,
}

impl SeatlineAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SeatlineAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(
            "password check for user {:?} on {:?}",
            login.user(),
            login.database()
        );
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
