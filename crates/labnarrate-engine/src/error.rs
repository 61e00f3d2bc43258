use labnarrate_contracts::narration::BackendKind;

/// Failures surfaced by the narration pipeline.
///
/// In automatic mode every backend variant only steers the fallback cascade. In an explicit
/// single-backend mode they reach the caller unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NarrationError {
    #[error("failed to load media {url}: {message}")]
    MediaLoad { url: String, message: String },

    #[error("{backend} backend unavailable: {message}")]
    BackendUnavailable {
        backend: BackendKind,
        message: String,
    },

    #[error("{backend} backend timed out after {seconds:.1}s")]
    BackendTimeout { backend: BackendKind, seconds: f64 },

    #[error("{backend} backend returned an unusable response: {message}")]
    BackendResponse {
        backend: BackendKind,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl NarrationError {
    pub fn media_load(url: &str, message: impl Into<String>) -> Self {
        Self::MediaLoad {
            url: display_url(url),
            message: message.into(),
        }
    }

    pub fn unavailable(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            message: message.into(),
        }
    }

    pub fn response(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::BackendResponse {
            backend,
            message: message.into(),
        }
    }

    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            Self::BackendUnavailable { backend, .. }
            | Self::BackendTimeout { backend, .. }
            | Self::BackendResponse { backend, .. } => Some(*backend),
            Self::MediaLoad { .. } | Self::InvalidInput(_) => None,
        }
    }

    /// Maps a transport error onto the taxonomy: deadline expiry is a timeout, a refused or
    /// unresolvable endpoint is unavailable, anything else is a bad response.
    pub(crate) fn from_transport(
        backend: BackendKind,
        timeout_secs: f64,
        err: &reqwest::Error,
    ) -> Self {
        if err.is_timeout() {
            Self::BackendTimeout {
                backend,
                seconds: timeout_secs,
            }
        } else if err.is_connect() {
            Self::unavailable(backend, err.to_string())
        } else {
            Self::response(backend, err.to_string())
        }
    }
}

fn display_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("data:") {
        let header = trimmed.split(',').next().unwrap_or("data:");
        return format!("{header},…");
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use labnarrate_contracts::narration::BackendKind;

    use super::NarrationError;

    #[test]
    fn messages_name_the_backend() {
        let err = NarrationError::BackendTimeout {
            backend: BackendKind::OnDevice,
            seconds: 60.0,
        };
        assert_eq!(err.to_string(), "on-device backend timed out after 60.0s");
        assert_eq!(err.backend(), Some(BackendKind::OnDevice));
    }

    #[test]
    fn media_load_hides_inline_payloads() {
        let err = NarrationError::media_load("data:image/png;base64,AAAA", "bad header");
        assert_eq!(
            err.to_string(),
            "failed to load media data:image/png;base64,…: bad header"
        );
        assert_eq!(err.backend(), None);
    }
}
