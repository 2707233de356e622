use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt::Display, ops::Deref};

/// Prefix of every issued id. Bump it whenever the derivation below changes,
/// so ids from the new scheme can never collide with already ingested ones.
pub const ID_SCHEME_VERSION: &str = "v1";

/// Number of digest bytes kept in an id (128 bits).
const ID_DIGEST_BYTES: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for IssueId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for IssueId {
    fn from(fr: &str) -> Self {
        IssueId(fr.to_string())
    }
}

impl From<String> for IssueId {
    fn from(fr: String) -> Self {
        IssueId(fr)
    }
}

impl From<IssueId> for String {
    fn from(fr: IssueId) -> Self {
        fr.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("url is empty")]
    EmptyUrl,

    #[error("url {url:?} is malformed: {reason}")]
    MalformedUrl { url: String, reason: String },
}

/// Derives the id of an issue from its canonical url.
///
/// The url is trimmed and otherwise hashed byte for byte, so the same url
/// always maps to the same id, across restarts and machines.
pub fn assign(url: &str) -> Result<IssueId, IdentityError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(IdentityError::EmptyUrl);
    }

    let malformed = |reason: String| IdentityError::MalformedUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = url::Url::parse(url).map_err(|err| malformed(err.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(malformed(format!("unsupported scheme {:?}", parsed.scheme())));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(malformed("missing host".to_string()));
    }

    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest[..ID_DIGEST_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();

    Ok(IssueId(format!("{ID_SCHEME_VERSION}-{hex}")))
}
