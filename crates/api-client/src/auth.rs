use configuration::ApiConfig;

/// Headers attached to every outgoing call.
///
/// The broker authenticates with a bearer token and identifies the calling
/// application through `x-app-name`.
#[derive(Clone)]
pub struct RequestMetadata {
    authorization: String,
    app_name: String,
}

impl RequestMetadata {
    pub fn new(token: &str, app_name: &str) -> Self {
        Self {
            authorization: format!("Bearer {token}"),
            app_name: app_name.to_string(),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(&config.token, &config.app_name)
    }

    /// The header pairs in the order a transport should send them.
    pub fn headers(&self) -> [(&'static str, &str); 2] {
        [
            ("authorization", self.authorization.as_str()),
            ("x-app-name", self.app_name.as_str()),
        ]
    }
}

// The token must never end up in logs.
impl std::fmt::Debug for RequestMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMetadata")
            .field("authorization", &"Bearer ***")
            .field("app_name", &self.app_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_carry_bearer_and_app_name() {
        let metadata = RequestMetadata::new("t.abc", "investbot");
        let headers = metadata.headers();
        assert_eq!(headers[0], ("authorization", "Bearer t.abc"));
        assert_eq!(headers[1], ("x-app-name", "investbot"));
        assert!(!format!("{metadata:?}").contains("t.abc"));
    }
}
