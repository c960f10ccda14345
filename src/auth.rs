use crate::codec::AuthRequest;

/// UserPass holds username/password credentials as dictated
/// server-side
#[derive(Clone, PartialEq, Eq)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl UserPass {
    /// new builds a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// from_parts only yields credentials when both halves are present and
    /// non-empty. Otherwise the server runs without authentication
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self { username, password })
            }
            _ => None,
        }
    }

    /// matches compares a client request against the configured pair byte
    /// for byte
    pub fn matches(&self, request: &AuthRequest) -> bool {
        self.username.as_bytes() == request.username.as_slice()
            && self.password.as_bytes() == request.password.as_slice()
    }
}

// Keep the password out of logs
impl std::fmt::Debug for UserPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}
