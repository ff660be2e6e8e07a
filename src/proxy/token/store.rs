use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::proxy::token::types::Credential;

/// Sole owner of accounts.json. All writes are whole-file and serialized
/// through one lock; last writer wins per refresh_token row.
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Loads every row, assigning each a fresh ephemeral session id.
    pub fn load(&self) -> Result<Vec<Credential>, String> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("failed to read {}: {}", self.path.display(), e))?;
        let mut credentials: Vec<Credential> = serde_json::from_str(&raw)
            .map_err(|e| format!("failed to parse {}: {}", self.path.display(), e))?;
        for cred in &mut credentials {
            cred.session_id = uuid::Uuid::new_v4().to_string();
        }
        Ok(credentials)
    }

    pub async fn persist_all(&self, credentials: &[Credential]) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        self.write_file(credentials)
    }

    /// Read-modify-write for one row, keyed by refresh_token. Inserts the row
    /// if it is not on disk yet.
    pub async fn persist_one(&self, credential: &Credential) -> Result<(), String> {
        let _guard = self.write_lock.lock().await;
        let mut rows = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path)
                .map_err(|e| format!("failed to read {}: {}", self.path.display(), e))?;
            serde_json::from_str::<Vec<Credential>>(&raw)
                .map_err(|e| format!("failed to parse {}: {}", self.path.display(), e))?
        } else {
            Vec::new()
        };

        match rows
            .iter_mut()
            .find(|row| row.refresh_token == credential.refresh_token)
        {
            Some(row) => *row = credential.clone(),
            None => rows.push(credential.clone()),
        }
        self.write_file(&rows)
    }

    pub async fn delete(&self, refresh_token: &str) -> Result<bool, String> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.load()?;
        let before = rows.len();
        rows.retain(|row| row.refresh_token != refresh_token);
        let removed = rows.len() < before;
        if removed {
            self.write_file(&rows)?;
        }
        Ok(removed)
    }

    fn write_file(&self, credentials: &[Credential]) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }
        let body = serde_json::to_string_pretty(credentials)
            .map_err(|e| format!("failed to serialize credentials: {}", e))?;
        std::fs::write(&self.path, body)
            .map_err(|e| format!("failed to write {}: {}", self.path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::token::types::now_ms;

    fn temp_store() -> CredentialStore {
        let path = std::env::temp_dir()
            .join(format!("apogee-store-{}", uuid::Uuid::new_v4()))
            .join("accounts.json");
        CredentialStore::new(path)
    }

    #[tokio::test]
    async fn round_trips_credentials_without_session_id() {
        let store = temp_store();
        let mut cred = Credential::new("rt-1");
        cred.email = "a@test".to_string();
        cred.apply_refresh("at-1".to_string(), 3600, now_ms());
        store.persist_all(&[cred]).await.expect("persist");

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("session_id"));

        let loaded = store.load().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].refresh_token, "rt-1");
        assert_eq!(loaded[0].access_token, "at-1");
        assert!(!loaded[0].session_id.is_empty());
    }

    #[tokio::test]
    async fn persist_one_updates_matching_row_only() {
        let store = temp_store();
        let a = Credential::new("rt-a");
        let b = Credential::new("rt-b");
        store.persist_all(&[a.clone(), b]).await.unwrap();

        let mut disabled = a;
        disabled.enable = false;
        store.persist_one(&disabled).await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(!loaded.iter().find(|c| c.refresh_token == "rt-a").unwrap().enable);
        assert!(loaded.iter().find(|c| c.refresh_token == "rt-b").unwrap().enable);
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = temp_store();
        store
            .persist_all(&[Credential::new("rt-a"), Credential::new("rt-b")])
            .await
            .unwrap();
        assert!(store.delete("rt-a").await.unwrap());
        assert!(!store.delete("rt-missing").await.unwrap());
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].refresh_token, "rt-b");
    }

    #[test]
    fn missing_file_loads_empty() {
        let store = temp_store();
        assert!(store.load().unwrap().is_empty());
    }
}
