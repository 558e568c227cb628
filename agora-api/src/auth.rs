use uuid::Uuid;

use crate::STUB_UUID;

/// Session token, as handed out by the identity provider
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }

    /// Parses the value of an `Authorization: bearer <token>` header
    pub fn from_header(header: &str) -> Option<AuthToken> {
        let mut parts = header.split(' ');
        if !parts.next()?.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        Uuid::try_parse(token).ok().map(AuthToken)
    }

    pub fn to_header(&self) -> String {
        format!("bearer {}", self.0)
    }
}
