//! The profile page: loads one record, lets the user edit a draft of it,
//! optionally uploads a new picture, and writes the draft back.

use tracing::{event, instrument, Level};

use crate::backend::{
    profile_image_key, AuthService, DocumentStore, ObjectStore, Session, USERS_COLLECTION,
};
use crate::error::{BackendError, PageError};
use crate::profile::{Fields, ImageFile, ProfileField, UserProfile, PROFILE_PICTURE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    Viewing,
    Editing,
}

/// What the picture slot shows while editing.
#[derive(Debug, PartialEq, Eq)]
pub enum PicturePreview<'a> {
    /// A newly selected file that has not been uploaded yet.
    Pending(&'a ImageFile),
    /// The URL currently stored on the draft.
    Stored(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Only the scalar fields were written.
    Fields,
    /// A new picture was uploaded and its URL written with the fields.
    WithPicture { url: String },
}

/// Result of the account steps that follow a successful record deletion.
/// Each step is attempted regardless of the other's outcome.
#[derive(Debug, Default)]
pub struct DeletionReport {
    pub account_deletion: Option<PageError>,
    pub sign_out: Option<PageError>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.account_deletion.is_none() && self.sign_out.is_none()
    }
}

#[derive(Debug)]
pub struct ProfilePage<B> {
    id: String,
    backend: B,
    view: Option<UserProfile>,
    draft: UserProfile,
    pending_image: Option<ImageFile>,
    mode: PageMode,
}

impl<B> ProfilePage<B> {
    /// Creates a page for `id` without touching the backend.
    pub fn new(id: impl Into<String>, backend: B) -> Self {
        Self {
            id: id.into(),
            backend,
            view: None,
            draft: UserProfile::default(),
            pending_image: None,
            mode: PageMode::Viewing,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> PageMode {
        self.mode
    }

    /// The record as last loaded or saved.
    pub fn view(&self) -> Option<&UserProfile> {
        self.view.as_ref()
    }

    /// The editable copy. Only meaningful while editing.
    pub fn draft(&self) -> Option<&UserProfile> {
        match self.mode {
            PageMode::Editing => Some(&self.draft),
            PageMode::Viewing => None,
        }
    }

    pub fn pending_image(&self) -> Option<&ImageFile> {
        self.pending_image.as_ref()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn picture_preview(&self) -> Option<PicturePreview<'_>> {
        if self.mode != PageMode::Editing {
            return None;
        }
        match (&self.pending_image, &self.draft.profile_picture) {
            (Some(image), _) => Some(PicturePreview::Pending(image)),
            (None, Some(url)) => Some(PicturePreview::Stored(url)),
            (None, None) => None,
        }
    }

    /// Enters edit mode with an independent copy of the loaded record.
    pub fn begin_edit(&mut self) -> Result<&UserProfile, PageError> {
        self.expect_mode("edit", PageMode::Viewing)?;
        let view = self
            .view
            .as_ref()
            .ok_or_else(|| PageError::NothingLoaded(self.id.clone()))?;

        self.draft = view.clone();
        self.pending_image = None;
        self.mode = PageMode::Editing;
        event!(Level::DEBUG, id = %self.id, "Entered edit mode");

        Ok(&self.draft)
    }

    /// Changes one field of the draft. Values are not validated.
    pub fn set_field(&mut self, field: ProfileField, value: impl Into<String>) -> Result<(), PageError> {
        self.expect_mode("set_field", PageMode::Editing)?;
        self.draft.set(field, value);
        Ok(())
    }

    /// Same as [`ProfilePage::set_field`] with the field given by its stored
    /// name, e.g. `"district"`.
    pub fn set_field_by_name(&mut self, name: &str, value: impl Into<String>) -> Result<(), PageError> {
        let field = name.parse::<ProfileField>()?;
        self.set_field(field, value)
    }

    /// Picks the picture to upload on the next save, replacing any earlier
    /// selection.
    pub fn select_image(&mut self, image: ImageFile) -> Result<(), PageError> {
        self.expect_mode("select_image", PageMode::Editing)?;
        self.pending_image = Some(image);
        Ok(())
    }

    fn expect_mode(&self, operation: &'static str, mode: PageMode) -> Result<(), PageError> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(PageError::InvalidState {
                operation,
                mode: self.mode,
            })
        }
    }
}

impl<B: DocumentStore + ObjectStore> ProfilePage<B> {
    /// Creates the page and performs the initial load. A failed load leaves
    /// the page empty; the failure has already been logged.
    pub async fn mount(id: impl Into<String>, backend: B) -> Self {
        let mut page = Self::new(id, backend);
        let _ = page.load().await;
        page
    }

    /// Reads the record once. A missing record is not an error: the view is
    /// left empty and `Ok(None)` returned. On a transport failure the view is
    /// left as it was.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn load(&mut self) -> Result<Option<&UserProfile>, PageError> {
        match self.backend.get(USERS_COLLECTION, &self.id).await {
            Ok(Some(fields)) => {
                event!(Level::DEBUG, ?fields, "Document data");
                self.view = Some(UserProfile::from_fields(&fields));
            }
            Ok(None) => {
                event!(Level::INFO, "No such document");
                self.view = None;
            }
            Err(source) => {
                event!(Level::ERROR, error = %source, "Error fetching user data");
                return Err(PageError::Load {
                    id: self.id.clone(),
                    source,
                });
            }
        }
        Ok(self.view.as_ref())
    }

    /// Points the page at another identifier. Reloads only when the
    /// identifier actually changes, discarding any edit in progress.
    pub async fn navigate(&mut self, id: impl Into<String>) -> Result<Option<&UserProfile>, PageError> {
        let id = id.into();
        if id == self.id {
            return Ok(self.view.as_ref());
        }

        self.id = id;
        self.view = None;
        self.draft = UserProfile::default();
        self.pending_image = None;
        self.mode = PageMode::Viewing;
        self.load().await
    }

    /// Writes the draft back and returns to view mode.
    ///
    /// With a pending picture, the picture is uploaded first and its URL is
    /// merged into the draft, then every field is written. Without one, only
    /// the scalar fields are written so the stored picture is never touched,
    /// unless an earlier attempt uploaded a picture and then failed to write
    /// it; that URL is written along with the scalar fields.
    /// On failure the page stays in edit mode with the draft as it was at the
    /// point of failure.
    #[instrument(name = "saving", skip(self), fields(id = %self.id))]
    pub async fn save(&mut self) -> Result<SaveOutcome, PageError> {
        self.expect_mode("save", PageMode::Editing)?;

        match self.pending_image.take() {
            Some(image) => self.save_with_picture(image).await,
            None => {
                let mut fields = self.draft.scalar_fields();
                if let Some(url) = self.unsaved_picture() {
                    fields.insert(PROFILE_PICTURE.to_string(), url.to_string());
                }
                self.write(&fields).await?;
                self.adopt_draft();
                Ok(SaveOutcome::Fields)
            }
        }
    }

    async fn save_with_picture(&mut self, image: ImageFile) -> Result<SaveOutcome, PageError> {
        let url = match self.upload(&image).await {
            Ok(url) => url,
            Err(err) => {
                self.pending_image = Some(image);
                return Err(err);
            }
        };

        self.draft.profile_picture = Some(url.clone());
        let fields = self.draft.to_fields();
        self.write(&fields).await?;
        self.adopt_draft();

        Ok(SaveOutcome::WithPicture { url })
    }

    async fn upload(&self, image: &ImageFile) -> Result<String, PageError> {
        let key = profile_image_key(&self.id);

        let meta = self
            .backend
            .put(&key, image)
            .await
            .map_err(|source| self.upload_failed(source))?;
        event!(Level::DEBUG, key = %meta.key, size = meta.size, "Uploaded picture");

        self.backend
            .download_url(&key)
            .await
            .map_err(|source| self.upload_failed(source))
    }

    fn upload_failed(&self, source: BackendError) -> PageError {
        event!(Level::ERROR, error = %source, "Error uploading picture");
        PageError::Upload {
            id: self.id.clone(),
            source,
        }
    }

    async fn write(&self, fields: &Fields) -> Result<(), PageError> {
        match self.backend.update(USERS_COLLECTION, &self.id, fields).await {
            Ok(()) => {
                event!(Level::INFO, "Document successfully updated");
                Ok(())
            }
            Err(source) => {
                event!(Level::ERROR, error = %source, "Error updating document");
                Err(PageError::Write {
                    id: self.id.clone(),
                    source,
                })
            }
        }
    }

    /// Picture URL merged into the draft by an upload whose write failed.
    fn unsaved_picture(&self) -> Option<&str> {
        let viewed = self.view.as_ref().and_then(|v| v.profile_picture.as_deref());
        match self.draft.profile_picture.as_deref() {
            Some(url) if Some(url) != viewed => Some(url),
            _ => None,
        }
    }

    fn adopt_draft(&mut self) {
        self.view = Some(self.draft.clone());
        self.mode = PageMode::Viewing;
    }
}

impl<B: DocumentStore + ObjectStore + AuthService> ProfilePage<B> {
    /// Deletes the record, then the account `session` is signed in as, then
    /// ends the session. Only a failed record deletion aborts; the account
    /// steps are each attempted and reported. Nothing is rolled back.
    #[instrument(skip(self, session), fields(id = %self.id, uid = %session.uid))]
    pub async fn delete(&mut self, session: &Session) -> Result<DeletionReport, PageError> {
        self.expect_mode("delete", PageMode::Viewing)?;

        if let Err(source) = self.backend.delete(USERS_COLLECTION, &self.id).await {
            event!(Level::ERROR, error = %source, "Error removing document");
            return Err(PageError::Delete {
                id: self.id.clone(),
                source,
            });
        }
        event!(Level::INFO, "Document successfully deleted");
        self.view = None;

        let mut report = DeletionReport::default();

        match self.backend.delete_account(session).await {
            Ok(()) => event!(Level::INFO, "User successfully deleted"),
            Err(source) => {
                event!(Level::ERROR, error = %source, "Error deleting user");
                report.account_deletion = Some(PageError::Auth {
                    operation: "delete_account",
                    source,
                });
            }
        }

        if let Err(source) = self.backend.sign_out(session).await {
            event!(Level::ERROR, error = %source, "Error signing out");
            report.sign_out = Some(PageError::Auth {
                operation: "sign_out",
                source,
            });
        }

        Ok(report)
    }
}
