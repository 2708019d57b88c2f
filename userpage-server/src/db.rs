use crate::crypto;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use sled::Transactional;
use tracing::{event, Level};
use userpage_lib::api;
use userpage_lib::{
    AuthService, BackendError, DocumentStore, Fields, ImageFile, ObjectMeta, ObjectStore, Session,
};

/// Everything the HTTP API needs from storage: the three backend services
/// plus the lookups only the server performs.
#[async_trait]
pub trait DB: DocumentStore + ObjectStore + AuthService {
    async fn new(db_file: String, public_url: String) -> anyhow::Result<Self>
    where
        Self: Sized;
    /// Resolves a bearer token to the session it belongs to.
    async fn get_session(&self, token: &str) -> Result<Session, BackendError>;
    /// Object content for a public download. A wrong token is reported as
    /// not found.
    async fn get_media(&self, key: &str, token: &str) -> Result<StoredObject, BackendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        event!(Level::ERROR, error = %err, "Storage failure");
        BackendError::Storage(err.to_string())
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct StoredObject {
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub token: String,
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
struct Account {
    email: String,
    password_hash: String,
    salt: String,
}

#[derive(Clone, Debug)]
pub struct UserpageDb {
    pub db: sled::Db,
    documents: sled::Tree,
    objects: sled::Tree,
    accounts: sled::Tree,
    emails: sled::Tree,
    sessions: sled::Tree,
    public_url: String,
}

fn document_key(collection: &str, id: &str) -> String {
    format!("{}/{}", collection, id)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

fn utf8(bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl UserpageDb {
    fn read_documents(&self, key: &str) -> Result<Option<Fields>, StoreError> {
        self.documents
            .get(key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn open_session(&self, uid: &str) -> Result<Session, StoreError> {
        let token = crypto::random_id();
        self.sessions.insert(token.as_bytes(), uid.as_bytes())?;
        Ok(Session {
            uid: uid.to_string(),
            token,
        })
    }

    fn session_uid(&self, token: &str) -> Result<Option<String>, StoreError> {
        self.sessions
            .get(token.as_bytes())?
            .map(|uid| utf8(&uid))
            .transpose()
    }
}

#[async_trait]
impl DB for UserpageDb {
    async fn new(db_file: String, public_url: String) -> anyhow::Result<Self> {
        let db: sled::Db = sled::open(db_file)?;
        Ok(UserpageDb {
            documents: db.open_tree("documents")?,
            objects: db.open_tree("objects")?,
            accounts: db.open_tree("accounts")?,
            emails: db.open_tree("emails")?,
            sessions: db.open_tree("sessions")?,
            db,
            public_url,
        })
    }

    async fn get_session(&self, token: &str) -> Result<Session, BackendError> {
        match self.session_uid(token)? {
            Some(uid) => Ok(Session {
                uid,
                token: token.to_string(),
            }),
            None => Err(BackendError::Unauthorized("unknown session".to_string())),
        }
    }

    async fn get_media(&self, key: &str, token: &str) -> Result<StoredObject, BackendError> {
        let object = self
            .objects
            .get(key)
            .map_err(StoreError::from)?
            .map(|bytes| decode::<StoredObject>(&bytes))
            .transpose()?;

        match object {
            Some(object) if object.token == token => Ok(object),
            _ => Err(BackendError::NotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl DocumentStore for UserpageDb {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, BackendError> {
        Ok(self.read_documents(&document_key(collection, id))?)
    }

    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<(), BackendError> {
        let bytes = encode(fields)?;
        self.documents
            .insert(document_key(collection, id), bytes)
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<(), BackendError> {
        let key = document_key(collection, id);
        let mut record = self
            .read_documents(&key)?
            .ok_or_else(|| BackendError::NotFound(key.clone()))?;

        record.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));

        let bytes = encode(&record)?;
        self.documents
            .insert(key, bytes)
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), BackendError> {
        self.documents
            .remove(document_key(collection, id))
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for UserpageDb {
    async fn put(&self, key: &str, image: &ImageFile) -> Result<ObjectMeta, BackendError> {
        let object = StoredObject {
            content_type: image.content_type.clone(),
            bytes: image.bytes.clone(),
            token: crypto::content_token(&image.bytes),
        };
        self.objects
            .insert(key, encode(&object)?)
            .map_err(StoreError::from)?;

        Ok(ObjectMeta {
            key: key.to_string(),
            content_type: object.content_type,
            size: object.bytes.len() as u64,
        })
    }

    async fn download_url(&self, key: &str) -> Result<String, BackendError> {
        let object = self
            .objects
            .get(key)
            .map_err(StoreError::from)?
            .map(|bytes| decode::<StoredObject>(&bytes))
            .transpose()?
            .ok_or_else(|| BackendError::NotFound(key.to_string()))?;

        Ok(format!(
            "{}{}?token={}",
            self.public_url,
            api::media_path(key),
            object.token
        ))
    }
}

#[async_trait]
impl AuthService for UserpageDb {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(BackendError::InvalidInput(
                "email and password are required".to_string(),
            ));
        }

        let uid = crypto::random_id();
        let salt = crypto::random_id();
        let account = encode(&Account {
            email: email.to_string(),
            password_hash: crypto::hash_password(password, &salt),
            salt,
        })?;

        // The email claim and the account row land together or not at all.
        let created = (&self.emails, &self.accounts).transaction(
            |(emails, accounts)| -> ConflictableTransactionResult<(), ()> {
                if emails.get(email.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                emails.insert(email.as_bytes(), uid.as_bytes())?;
                accounts.insert(uid.as_bytes(), account.as_slice())?;
                Ok(())
            },
        );
        match created {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(BackendError::Conflict(format!(
                    "{} is already registered",
                    email
                )))
            }
            Err(TransactionError::Storage(err)) => return Err(StoreError::from(err).into()),
        }
        event!(Level::INFO, %uid, "Account created");

        Ok(self.open_session(&uid)?)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let rejected = || BackendError::Unauthorized("wrong email or password".to_string());

        let uid = match self.emails.get(email.as_bytes()).map_err(StoreError::from)? {
            Some(uid) => utf8(&uid)?,
            None => return Err(rejected()),
        };
        let account: Account = match self.accounts.get(uid.as_bytes()).map_err(StoreError::from)? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(rejected()),
        };
        if !crypto::verify_password(password, &account.salt, &account.password_hash) {
            return Err(rejected());
        }

        Ok(self.open_session(&uid)?)
    }

    async fn sign_out(&self, session: &Session) -> Result<(), BackendError> {
        self.sessions
            .remove(session.token.as_bytes())
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete_account(&self, session: &Session) -> Result<(), BackendError> {
        if self.session_uid(&session.token)?.as_deref() != Some(session.uid.as_str()) {
            return Err(BackendError::Unauthorized("session is not active".to_string()));
        }

        if let Some(bytes) = self
            .accounts
            .remove(session.uid.as_bytes())
            .map_err(StoreError::from)?
        {
            let account: Account = decode(&bytes)?;
            self.emails
                .remove(account.email.as_bytes())
                .map_err(StoreError::from)?;
        }

        for entry in self.sessions.iter() {
            let (token, uid) = entry.map_err(StoreError::from)?;
            if uid.as_ref() == session.uid.as_bytes() {
                self.sessions.remove(token).map_err(StoreError::from)?;
            }
        }
        event!(Level::INFO, uid = %session.uid, "Account deleted");

        Ok(())
    }
}
