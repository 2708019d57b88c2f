pub mod api;
pub mod backend;
mod error;
mod memory;
mod page;
mod profile;
mod remote;
mod session_cache;

pub use backend::{
    profile_image_key, AuthService, DocumentStore, ObjectMeta, ObjectStore, Session,
    PROFILE_IMAGE_PREFIX, USERS_COLLECTION,
};
pub use error::{BackendError, PageError};
pub use memory::{MemoryBackend, Operation};
pub use page::{DeletionReport, PageMode, PicturePreview, ProfilePage, SaveOutcome};
pub use profile::{Fields, ImageFile, ProfileField, UserProfile, PROFILE_PICTURE};
pub use remote::RemoteBackend;
pub use session_cache::SessionCache;
