//! Request and response bodies shared by `userpage-server` and
//! [`crate::RemoteBackend`].

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct DownloadUrl {
    pub url: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct ErrorBody {
    pub error: String,
}

/// Query string of a public media download.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct MediaQuery {
    pub token: String,
}

/// Percent-encodes each `/`-separated segment of an object key so the key's
/// own separators survive while `#`, `?` and the like do not end the path.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn documents_path(collection: &str, id: &str) -> String {
    format!(
        "/v1/documents/{}/{}",
        urlencoding::encode(collection),
        urlencoding::encode(id)
    )
}

pub fn objects_path(key: &str) -> String {
    format!("/v1/objects/{}", encode_key(key))
}

pub fn urls_path(key: &str) -> String {
    format!("/v1/urls/{}", encode_key(key))
}

pub fn media_path(key: &str) -> String {
    format!("/v1/media/{}", encode_key(key))
}

pub const ACCOUNTS_PATH: &str = "/v1/accounts";
pub const CURRENT_ACCOUNT_PATH: &str = "/v1/accounts/me";
pub const SESSIONS_PATH: &str = "/v1/sessions";
