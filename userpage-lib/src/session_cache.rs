use sled::{open, Db};
use std::path::Path;

use crate::backend::Session;

const SESSION_KEY: &[u8] = b"session";

/// Remembers the signed-in session between CLI runs.
pub struct SessionCache {
    db: Db,
}

impl SessionCache {
    pub fn open<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let db = open(p)?;
        Ok(Self { db })
    }

    pub fn store(&self, session: &Session) -> anyhow::Result<()> {
        let bytes = bincode::serialize(session)?;
        self.db.insert(SESSION_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load(&self) -> anyhow::Result<Option<Session>> {
        match self.db.get(SESSION_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.db.remove(SESSION_KEY)?;
        self.db.flush()?;
        Ok(())
    }
}
