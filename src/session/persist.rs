use super::{AuthError, AuthResult, AuthSession};
use crate::gateway::non_empty_env;
use std::path::PathBuf;

/// JSON file holding the last authenticated session.
///
/// Guests are never written here.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read PLAYFEED_SESSION_FILE, if set
    pub fn from_env() -> Option<Self> {
        non_empty_env("PLAYFEED_SESSION_FILE").map(Self::new)
    }

    pub async fn load(&self) -> AuthResult<Option<AuthSession>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| AuthError::SessionFile(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthError::SessionFile(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    pub async fn save(&self, session: &AuthSession) -> AuthResult<()> {
        let content = serde_json::to_string_pretty(session)
            .map_err(|e| AuthError::SessionFile(e.to_string()))?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| AuthError::SessionFile(format!("{}: {}", self.path.display(), e)))
    }

    pub async fn clear(&self) -> AuthResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::SessionFile(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AuthUser;

    fn session() -> AuthSession {
        AuthSession {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Some(1_900_000_000),
            user: AuthUser {
                id: "u-1".to_string(),
                email: Some("alice@example.com".to_string()),
                created_at: None,
                user_metadata: serde_json::json!({ "username": "alice" }),
            },
        }
    }

    #[tokio::test]
    async fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));

        assert!(file.load().await.unwrap().is_none());

        file.save(&session()).await.unwrap();
        let loaded = file.load().await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token, "refresh");
        assert_eq!(loaded.user.id, "u-1");

        file.clear().await.unwrap();
        assert!(file.load().await.unwrap().is_none());
        // Clearing twice is fine
        file.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = SessionFile::new(path).load().await.unwrap_err();
        assert!(matches!(err, AuthError::SessionFile(_)));
    }
}
