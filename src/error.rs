//! Classified media failures.
//!
//! Everything else in the crate propagates `anyhow::Error`. Media failures carry a
//! stable code so the API can tell bad input apart from a failing encoder.

pub const INVALID_MEDIA: &str = "invalid_media";
pub const MEDIA_IO: &str = "media_io";

#[derive(Clone, Debug)]
pub struct MediaError {
    pub code: &'static str,
    pub message: String,
}

impl MediaError {
    /// Input that could not be decoded (or was empty). Reported, never retried.
    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_MEDIA,
            message: message.into(),
        }
    }

    /// Decode/encode I/O failure. Partial output is discarded by the caller.
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            code: MEDIA_IO,
            message: message.into(),
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        self.code == INVALID_MEDIA
    }
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for MediaError {}

/// Find a `MediaError` anywhere in an `anyhow` chain.
pub fn media_error(err: &anyhow::Error) -> Option<&MediaError> {
    err.chain().find_map(|cause| cause.downcast_ref::<MediaError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn media_error_survives_context() {
        let err: anyhow::Result<()> =
            Err(anyhow::Error::new(MediaError::invalid_media("not an image")))
                .context("decode upload");
        let err = err.unwrap_err();
        let found = media_error(&err).expect("media error in chain");
        assert!(found.is_invalid_input());
        assert_eq!(found.to_string(), "invalid_media: not an image");
    }

    #[test]
    fn plain_errors_are_not_classified() {
        let err = anyhow::anyhow!("disk full");
        assert!(media_error(&err).is_none());
        assert!(!MediaError::io("write failed").is_invalid_input());
    }
}
