//! Encrypted broker credential storage using SQLite.

use super::{BrokerCredentials, Cipher, Sealed};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Profile the session manager reads from.
pub const DEFAULT_PROFILE: &str = "global_settings";

/// Broker credentials sealed at rest.
///
/// # Schema
/// ```sql
/// CREATE TABLE broker_credentials (
///     profile    TEXT PRIMARY KEY,
///     payload    TEXT NOT NULL,   -- AES-256-GCM sealed JSON
///     nonce      TEXT NOT NULL,
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL
/// );
/// ```
///
/// The master key lives in memory only. Credentials are never logged.
pub struct CredentialStore {
    conn: Mutex<Connection>,
    cipher: Cipher,
}

impl CredentialStore {
    /// Creates or opens a credential store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file (or `:memory:`)
    /// * `encryption_key` - Base64-encoded 32-byte master key
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let cipher = Cipher::from_base64(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open credentials database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS broker_credentials (
                profile    TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                nonce      TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )
        .context("Failed to create broker_credentials table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Credential store connection lock poisoned"))
    }

    /// Stores (or replaces) credentials for a profile.
    pub fn store(&self, profile: &str, credentials: &BrokerCredentials) -> Result<()> {
        let json = serde_json::to_vec(credentials).context("Failed to serialize credentials")?;
        let sealed = self
            .cipher
            .seal(&json)
            .context("Failed to encrypt credentials")?;
        let now = Utc::now().to_rfc3339();

        self.lock()?
            .execute(
                "INSERT INTO broker_credentials (profile, payload, nonce, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(profile) DO UPDATE SET
                    payload    = excluded.payload,
                    nonce      = excluded.nonce,
                    updated_at = excluded.updated_at",
                params![profile, sealed.ciphertext, sealed.nonce, now],
            )
            .context("Failed to store credentials")?;

        Ok(())
    }

    /// Retrieves and decrypts credentials for a profile.
    ///
    /// # Returns
    /// * `Ok(None)` - Nothing stored for this profile
    /// * `Err` - Database failure, wrong key, or tampered payload
    pub fn get(&self, profile: &str) -> Result<Option<BrokerCredentials>> {
        let sealed = self
            .lock()?
            .query_row(
                "SELECT payload, nonce FROM broker_credentials WHERE profile = ?1",
                params![profile],
                |row| {
                    Ok(Sealed {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read credentials")?;

        let Some(sealed) = sealed else {
            return Ok(None);
        };

        let json = self
            .cipher
            .open(&sealed)
            .context("Failed to decrypt credentials")?;
        let credentials =
            serde_json::from_slice(&json).context("Stored credentials are not valid JSON")?;
        Ok(Some(credentials))
    }

    /// Deletes a profile. Returns `false` if nothing was stored.
    pub fn delete(&self, profile: &str) -> Result<bool> {
        let rows = self
            .lock()?
            .execute(
                "DELETE FROM broker_credentials WHERE profile = ?1",
                params![profile],
            )
            .context("Failed to delete credentials")?;

        Ok(rows > 0)
    }
}
