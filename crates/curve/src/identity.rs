//! Installation Identity
//!
//! The anonymous id under which this installation reports. It is generated
//! once and kept in `identity.json` in the state directory so that history
//! lines up across restarts.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::installation::{CollectorError, Result};

const IDENTITY_FILE: &str = "identity.json";

/// Whether `id` is safe to use as part of a file name: `[A-Za-z0-9_-]+`
pub fn is_valid_anonymous_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub fn validate_anonymous_id(id: &str) -> Result<()> {
    if is_valid_anonymous_id(id) {
        Ok(())
    } else {
        Err(CollectorError::InvalidEvent(format!(
            "anonymous id {id:?} may only contain letters, digits, '_' and '-'"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub anonymous_id: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            anonymous_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Read the identity file, creating it on first run
    pub async fn load_or_create(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(IDENTITY_FILE);

        if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            let identity: Identity = serde_json::from_str(&content)?;
            if !is_valid_anonymous_id(&identity.anonymous_id) {
                return Err(CollectorError::Identity(format!(
                    "{} has an invalid anonymous_id {:?}",
                    path.display(),
                    identity.anonymous_id
                )));
            }
            tracing::debug!(anonymous_id = %identity.anonymous_id, "Loaded identity");
            return Ok(identity);
        }

        let identity = Self::generate();
        fs::create_dir_all(state_dir).await?;
        fs::write(&path, serde_json::to_vec_pretty(&identity)?).await?;
        tracing::info!(
            anonymous_id = %identity.anonymous_id,
            path = %path.display(),
            "Generated new installation identity"
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_identity_is_stable_across_loads() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");

        let first = Identity::load_or_create(&state_dir).await.unwrap();
        let second = Identity::load_or_create(&state_dir).await.unwrap();

        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first.anonymous_id).is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_identity_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IDENTITY_FILE), "not json")
            .await
            .unwrap();

        let result = Identity::load_or_create(dir.path()).await;
        assert!(matches!(result, Err(CollectorError::Json(_))));
    }

    #[tokio::test]
    async fn test_unsafe_stored_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(IDENTITY_FILE),
            r#"{"anonymous_id":"../etc","created_at":"2024-03-01T00:00:00Z"}"#,
        )
        .await
        .unwrap();

        let result = Identity::load_or_create(dir.path()).await;
        assert!(matches!(result, Err(CollectorError::Identity(_))));
    }

    #[test]
    fn test_anonymous_id_charset() {
        assert!(is_valid_anonymous_id(&Identity::generate().anonymous_id));
        assert!(is_valid_anonymous_id("home_2-b"));
        assert!(!is_valid_anonymous_id(""));
        assert!(!is_valid_anonymous_id("a/b"));
        assert!(!is_valid_anonymous_id("a b"));
        assert!(!is_valid_anonymous_id(".."));
    }
}
