use serde::{Deserialize, Serialize};

/// Maximum byte length of a session identifier.
pub const MAX_SESSION_ID_LEN: usize = 31;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("session id is empty")]
    Empty,
    #[error("session id longer than {MAX_SESSION_ID_LEN} bytes")]
    TooLong,
    #[error("session id contains forbidden character {0:?}")]
    BadChar(char),
}

/// A bounded, path-safe session identifier.
///
/// At most [MAX_SESSION_ID_LEN] bytes of ASCII alphanumerics, `-` and `_`.
/// The session id becomes part of artifact file names, so the character set
/// is restricted at construction rather than at persist time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, fmt)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(val: String) -> Result<SessionId, SessionIdError> {
        if val.is_empty() {
            return Err(SessionIdError::Empty);
        }
        if val.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong);
        }
        if let Some(bad) = val
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionIdError::BadChar(bad));
        }
        Ok(SessionId(val))
    }
}

impl std::str::FromStr for SessionId {
    type Err = SessionIdError;

    fn from_str(val: &str) -> Result<SessionId, SessionIdError> {
        SessionId::try_from(val.to_string())
    }
}

impl From<SessionId> for String {
    fn from(val: SessionId) -> String {
        val.0
    }
}

#[test]
fn accepts_plain_ids() {
    for ok in ["s", "bench-3", "a_b-c", "0123456789"] {
        let id: SessionId = ok.parse().unwrap();
        assert_eq!(id.as_str(), ok);
    }
}

#[test]
fn rejects_bad_ids() {
    assert_eq!("".parse::<SessionId>(), Err(SessionIdError::Empty));
    assert_eq!(
        "x".repeat(32).parse::<SessionId>(),
        Err(SessionIdError::TooLong)
    );
    assert_eq!(
        "a/b".parse::<SessionId>(),
        Err(SessionIdError::BadChar('/'))
    );
    assert_eq!(
        "a b".parse::<SessionId>(),
        Err(SessionIdError::BadChar(' '))
    );
}

#[test]
fn boundary_length_accepted() {
    let id = "x".repeat(MAX_SESSION_ID_LEN);
    assert!(id.parse::<SessionId>().is_ok());
}
