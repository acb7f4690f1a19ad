//! Local upload checks, run before anything touches the network.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::transport::Artifact;

/// Default maximum upload size: 10 MiB.
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Document types the analysis worker understands.
const DEFAULT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "rtf", "odt"];

/// What a client accepts for upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPolicy {
    #[serde(default = "default_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_max_bytes() -> u64 {
    DEFAULT_MAX_BYTES
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_extensions: default_extensions(),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

/// Applies an [`UploadPolicy`] to artifacts.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: UploadPolicy,
}

impl Validator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn validate(&self, artifact: &Artifact) -> Result<(), ValidationError> {
        let extension = artifact
            .label
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        if !self
            .policy
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(ValidationError::UnsupportedType {
                label: artifact.label.clone(),
                extension,
            });
        }

        let size = artifact.content.len() as u64;
        if size == 0 {
            return Err(ValidationError::Empty {
                label: artifact.label.clone(),
            });
        }
        if size > self.policy.max_bytes {
            return Err(ValidationError::TooLarge {
                label: artifact.label.clone(),
                size,
                limit: self.policy.max_bytes,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(label: &str, size: usize) -> Artifact {
        Artifact::new(label, vec![b'x'; size])
    }

    #[test]
    fn test_accepts_supported_document() {
        let validator = Validator::default();
        assert!(validator.validate(&artifact("Resume.PDF", 1024)).is_ok());
        assert!(validator.validate(&artifact("letter.docx", 1)).is_ok());
    }

    #[test]
    fn test_rejects_unsupported_type() {
        let validator = Validator::default();
        let err = validator.validate(&artifact("photo.png", 10)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedType { label: "photo.png".into(), extension: "png".into() }
        );

        assert!(matches!(
            validator.validate(&artifact("Makefile", 10)),
            Err(ValidationError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let validator = Validator::new(UploadPolicy {
            max_bytes: 100,
            ..UploadPolicy::default()
        });

        assert!(matches!(
            validator.validate(&artifact("cv.pdf", 0)),
            Err(ValidationError::Empty { .. })
        ));
        assert!(matches!(
            validator.validate(&artifact("cv.pdf", 101)),
            Err(ValidationError::TooLarge { size: 101, limit: 100, .. })
        ));
        assert!(validator.validate(&artifact("cv.pdf", 100)).is_ok());
    }
}
