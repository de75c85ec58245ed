use std::io;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected gpg status output: {0}")]
    ProtocolMismatch(String),

    #[error("gpg reported a problem importing key {key_id} ({detail}): {output}")]
    ImportProblem {
        key_id: String,
        detail: String,
        output: String,
    },

    #[error("gpg failed to import key {key_id}: {output}")]
    ImportFailed { key_id: String, output: String },

    #[error("import of key {key_id} was cancelled")]
    ImportCancelled { key_id: String },

    #[error("signature verification failed: {output}")]
    VerificationFailed { output: String },

    #[error("gpg exited with status {code}: {output}")]
    Gpg { code: i32, output: String },

    #[error("invalid key ID '{key_id}': {reason}")]
    InvalidKeyId { key_id: String, reason: String },

    #[error("invalid keyserver '{keyserver}': {reason}")]
    InvalidKeyserver { keyserver: String, reason: String },

    #[error("invalid keyring path '{path}': {reason}")]
    InvalidKeyring { path: String, reason: String },

    #[error("terminal unavailable: {0}")]
    Tty(#[source] io::Error),

    #[error("key {key_id} is still missing after it was imported")]
    KeyStillMissing { key_id: String },

    #[error("verification needed more than {0} key imports")]
    TooManyKeyImports(usize),

    #[error("failed to capture {0} from subprocess")]
    StdioCaptureFailed(&'static str),
}

impl Error {
    /// True when a human (or the confirmation hook) declined a key.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::ImportCancelled { .. })
    }

    /// True when the keyserver fetch itself went wrong, as opposed to the
    /// key being declined.
    pub fn is_import_failure(&self) -> bool {
        matches!(
            self,
            Self::ImportFailed { .. } | Self::ImportProblem { .. } | Self::ProtocolMismatch(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_import_failure() {
        let err = Error::ImportCancelled {
            key_id: "DEADBEEF".to_string(),
        };
        assert!(err.is_cancelled());
        assert!(!err.is_import_failure());
    }

    #[test]
    fn test_import_failures() {
        let failed = Error::ImportFailed {
            key_id: "DEADBEEF".to_string(),
            output: "gpg: keyserver receive failed: No data".to_string(),
        };
        let problem = Error::ImportProblem {
            key_id: "DEADBEEF".to_string(),
            detail: "1".to_string(),
            output: String::new(),
        };
        assert!(failed.is_import_failure());
        assert!(problem.is_import_failure());
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_display_carries_output() {
        let err = Error::VerificationFailed {
            output: "gpg: BAD signature".to_string(),
        };
        assert!(err.to_string().contains("BAD signature"));
    }
}
