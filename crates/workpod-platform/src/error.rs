use thiserror::Error;

/// Control-plane client errors
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Credentials were rejected, or the access key no longer exists
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Control plane returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Watch failed: {0}")]
    Watch(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),
}

impl ControlPlaneError {
    /// Map an error status plus response body onto an error variant
    ///
    /// A body reporting a missing access key is treated as unauthorized
    /// regardless of status, since some endpoints surface it as a 500.
    pub fn from_status(status: u16, message: String) -> Self {
        if status == 401 || is_access_key_missing(&message) {
            return Self::Unauthorized(message);
        }
        match status {
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::Api { status, message },
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

fn is_access_key_missing(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("access key not found") || message.contains("access key has been revoked")
}

/// Project/namespace mapping errors
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("Project namespace prefix is not configured")]
    Unconfigured,

    #[error("Project name must not be empty")]
    EmptyProject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(ControlPlaneError::from_status(401, "nope".into()).is_unauthorized());
        assert!(
            ControlPlaneError::from_status(500, "Access key not found, please log in".into())
                .is_unauthorized()
        );
        assert!(matches!(
            ControlPlaneError::from_status(403, "denied".into()),
            ControlPlaneError::Forbidden(_)
        ));
        assert!(matches!(
            ControlPlaneError::from_status(404, "gone".into()),
            ControlPlaneError::NotFound(_)
        ));
        assert!(matches!(
            ControlPlaneError::from_status(503, "busy".into()),
            ControlPlaneError::Api { status: 503, .. }
        ));
    }
}
