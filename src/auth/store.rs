//! Durable token records, so a restart inside a token's lifetime reuses it
//! instead of spending one of the vendor's issuance slots.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{TimeZone, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::time::{format_kst_compact, parse_kst_compact};
use crate::utils::write_atomic;
use crate::vendors::Vendor;

use super::token::Token;

pub trait TokenStore: Send + Sync {
    fn load(&self, vendor: Vendor) -> Result<Option<Token>>;
    fn save(&self, token: &Token) -> Result<()>;
    fn remove(&self, vendor: Vendor) -> Result<()>;
}

/// On-disk layout, one file per vendor.
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    #[serde(alias = "token")]
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    issued_at: Option<i64>,
    /// `YYYYMMDDHHMMSS`, Korea time.
    expires_dt: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredToken {
    fn from_token(token: &Token) -> Self {
        Self {
            access_token: token.value.clone(),
            token_type: token.token_type.clone(),
            issued_at: Some(token.issued_at.timestamp()),
            expires_dt: format_kst_compact(token.expires_at),
        }
    }

    fn into_token(self, vendor: Vendor) -> Option<Token> {
        let expires_at = parse_kst_compact(&self.expires_dt)?;
        let issued_at = self
            .issued_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or(expires_at);
        Some(Token {
            vendor,
            value: self.access_token,
            token_type: self.token_type,
            issued_at,
            expires_at,
        })
    }
}

/// JSON files under a token directory: `<dir>/<slug>_token.json`.
pub struct FileTokenStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, vendor: Vendor) -> PathBuf {
        self.dir.join(format!("{}_token.json", vendor.slug()))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn store_error(action: &str, path: &Path, err: impl std::fmt::Display) -> AppError {
    AppError::TokenStore(format!("failed to {} {}: {}", action, path.display(), err))
}

impl TokenStore for FileTokenStore {
    fn load(&self, vendor: Vendor) -> Result<Option<Token>> {
        let path = self.path_for(vendor);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("No stored {} token at {}", vendor, path.display());
                return Ok(None);
            }
            Err(err) => return Err(store_error("read", &path, err)),
        };

        // A corrupt record only costs a fresh issuance.
        let record: StoredToken = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(err) => {
                warn!("Ignoring malformed token file {}: {}", path.display(), err);
                return Ok(None);
            }
        };
        let token = record.into_token(vendor);
        if token.is_none() {
            warn!("Ignoring token file {} with unreadable expiry", path.display());
        }
        Ok(token)
    }

    fn save(&self, token: &Token) -> Result<()> {
        let path = self.path_for(token.vendor);
        let record = StoredToken::from_token(token);
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|err| store_error("encode", &path, err))?;

        let _guard = self.lock();
        write_atomic(&path, &json).map_err(|err| store_error("write", &path, err))?;
        debug!("Stored {} token at {}", token.vendor, path.display());
        Ok(())
    }

    fn remove(&self, vendor: Vendor) -> Result<()> {
        let path = self.path_for(vendor);
        let _guard = self.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(store_error("remove", &path, err)),
        }
    }
}

/// Process-local store for tests and for runs that must not touch disk.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<HashMap<Vendor, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: Token) -> Self {
        let store = Self::new();
        store.lock().insert(token.vendor, token);
        store
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Vendor, Token>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self, vendor: Vendor) -> Result<Option<Token>> {
        Ok(self.lock().get(&vendor).cloned())
    }

    fn save(&self, token: &Token) -> Result<()> {
        self.lock().insert(token.vendor, token.clone());
        Ok(())
    }

    fn remove(&self, vendor: Vendor) -> Result<()> {
        self.lock().remove(&vendor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn token(vendor: Vendor) -> Token {
        let issued_at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        Token {
            vendor,
            value: "stored-token".into(),
            token_type: "Bearer".into(),
            issued_at,
            expires_at: issued_at + ChronoDuration::hours(24),
        }
    }

    #[test]
    fn file_store_round_trips_in_documented_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        let original = token(Vendor::KoreaInvestment);

        store.save(&original).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("kis_token.json")).unwrap())
                .unwrap();
        assert_eq!(raw["access_token"], "stored-token");
        assert_eq!(raw["expires_dt"], "20240502090000");
        assert_eq!(raw["issued_at"], original.issued_at.timestamp());

        assert_eq!(store.load(Vendor::KoreaInvestment).unwrap(), Some(original));
        assert_eq!(store.load(Vendor::Kiwoom).unwrap(), None);
    }

    #[test]
    fn reads_records_written_with_kiwoom_field_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("kiwoom_token.json"),
            r#"{"expires_dt":"20991231235959","token_type":"bearer","token":"kw","return_code":0,"return_msg":"ok","issued_at":1714521600}"#,
        )
        .unwrap();

        let store = FileTokenStore::new(dir.path());
        let loaded = store.load(Vendor::Kiwoom).unwrap().unwrap();
        assert_eq!(loaded.value, "kw");
        assert_eq!(loaded.token_type, "bearer");
    }

    #[test]
    fn malformed_files_are_ignored_and_removal_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path());
        fs::write(store.path_for(Vendor::Kiwoom), "not json").unwrap();

        assert_eq!(store.load(Vendor::Kiwoom).unwrap(), None);
        store.remove(Vendor::Kiwoom).unwrap();
        store.remove(Vendor::Kiwoom).unwrap();
        assert!(!store.path_for(Vendor::Kiwoom).exists());
    }

    #[test]
    fn unreadable_location_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("tokens");
        fs::write(&blocker, "a file, not a directory").unwrap();

        let store = FileTokenStore::new(&blocker);
        let err = store.save(&token(Vendor::Kiwoom)).unwrap_err();
        assert!(matches!(err, AppError::TokenStore(_)));
        assert!(err.is_process_fatal());
    }
}
