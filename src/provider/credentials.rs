use std::fmt;

use validator::Validate;

/// Caller-supplied credentials plus the region every provider call targets.
/// Values are trimmed on construction; the secret never appears in `Debug`.
#[derive(Clone, PartialEq, Eq, Validate)]
pub struct ProviderCredentials {
    #[validate(length(min = 1, message = "access key id is required"))]
    pub access_key_id: String,
    #[validate(length(min = 1, message = "secret access key is required"))]
    pub secret_access_key: String,
    pub session_token: Option<String>,
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,
}

impl ProviderCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into().trim().to_string(),
            secret_access_key: secret_access_key.into().trim().to_string(),
            session_token: None,
            region: region.into().trim().to_string(),
        }
    }

    pub fn with_session_token(mut self, token: Option<String>) -> Self {
        self.session_token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .finish()
    }
}
