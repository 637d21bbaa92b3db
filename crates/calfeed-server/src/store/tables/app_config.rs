//! Application secret.

use rusqlite::OptionalExtension;

use super::super::{APP_SECRET_LEN, Database};
use crate::error::{ServerError, ServerResult};

impl Database {
    /// Returns the application secret, or `None` if the row is missing.
    ///
    /// # Errors
    ///
    /// A stored key that is not 32 bytes of hex is an integrity error.
    pub fn app_secret(&self) -> ServerResult<Option<[u8; APP_SECRET_LEN]>> {
        let conn = self.conn();
        let hex_key: Option<String> = conn
            .query_row(
                "SELECT encryption_key FROM app_config WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(hex_key) = hex_key else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_key.trim())
            .map_err(|_| ServerError::integrity("stored encryption key is not hex"))?;
        let key: [u8; APP_SECRET_LEN] = bytes
            .try_into()
            .map_err(|_| ServerError::integrity("stored encryption key has the wrong length"))?;
        Ok(Some(key))
    }
}
