//! The three services a profile page talks to: a document store, an object
//! store for pictures and an authentication service.
//!
//! [`crate::MemoryBackend`] implements all of them in process and
//! [`crate::RemoteBackend`] implements them over HTTP against `userpage-server`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::profile::{Fields, ImageFile};

/// Collection holding user profile records.
pub const USERS_COLLECTION: &str = "users";

/// Object key prefix for uploaded profile pictures.
pub const PROFILE_IMAGE_PREFIX: &str = "updateProfileImages";

/// Object key of the picture belonging to `id`. One key per identifier, so a
/// new upload replaces the old picture.
pub fn profile_image_key(id: &str) -> String {
    format!("{}/{}", PROFILE_IMAGE_PREFIX, id)
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when no record exists under `id`.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, BackendError>;
    /// Creates or replaces the whole record.
    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<(), BackendError>;
    /// Overwrites the given fields and leaves the others untouched. Fails with
    /// [`BackendError::NotFound`] when the record does not exist.
    async fn update(&self, collection: &str, id: &str, fields: &Fields)
        -> Result<(), BackendError>;
    /// Removes the record. Deleting a missing record succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `image` under `key`, replacing whatever was there.
    async fn put(&self, key: &str, image: &ImageFile) -> Result<ObjectMeta, BackendError>;
    /// Stable public URL for the current content under `key`.
    async fn download_url(&self, key: &str) -> Result<String, BackendError>;
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    /// Ends the session. Signing out an unknown session succeeds.
    async fn sign_out(&self, session: &Session) -> Result<(), BackendError>;
    /// Deletes the account the session is authenticated as.
    async fn delete_account(&self, session: &Session) -> Result<(), BackendError>;
}

/// An authenticated session, passed explicitly to operations that act on
/// the signed-in account.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Debug, Clone)]
pub struct Session {
    pub uid: String,
    pub token: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct ObjectMeta {
    pub key: String,
    pub content_type: String,
    pub size: u64,
}
