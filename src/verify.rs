use std::io::Write as _;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::keyring::ScopedGpg;
use crate::process::ProcessResult;
use crate::status::{StatusEvent, find_missing_key};
use crate::types::{StatusFd, Verified, VerifyOptions};
use crate::validation::KeyId;

impl ScopedGpg {
    /// Verifies a detached `signature` over `payload` against the scoped
    /// keyring.
    ///
    /// When gpg reports that the signer's key is missing, the key goes
    /// through [`import_with_confirmation`](Self::import_with_confirmation)
    /// and verification starts over. Every missing key is imported at most
    /// once per call, and at most `max_key_imports` keys are imported in
    /// total.
    ///
    /// # Errors
    ///
    /// [`Error::VerificationFailed`] if gpg rejects the signature,
    /// [`Error::ProtocolMismatch`] if gpg names a missing key that is not a
    /// key ID, or any error from the import workflow, which aborts
    /// verification.
    pub async fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        options: &VerifyOptions,
    ) -> Result<Verified> {
        let mut imported: Vec<KeyId> = Vec::new();

        loop {
            let result = self.verify_once(payload, signature).await?;

            if let Some(key_id) = missing_key(&result)? {
                if imported.contains(&key_id) {
                    return Err(Error::KeyStillMissing {
                        key_id: key_id.into(),
                    });
                }
                if imported.len() >= self.max_key_imports {
                    return Err(Error::TooManyKeyImports(self.max_key_imports));
                }

                debug!(key_id = %key_id, "signer key missing from keyring");
                self.import_key(&key_id).await?;
                imported.push(key_id);
                continue;
            }

            if options.verbose {
                echo(
                    &result,
                    options.status_fd,
                    &mut tokio::io::stdout(),
                    &mut tokio::io::stderr(),
                )
                .await?;
            }

            if !result.success() {
                return Err(Error::VerificationFailed {
                    output: result.combined_output(),
                });
            }

            info!(keyring = %self.keyring, imported = imported.len(), "signature verified");
            return Ok(Verified {
                imported: imported.into_iter().map(String::from).collect(),
                output: result,
            });
        }
    }

    async fn verify_once(&self, payload: &[u8], signature: &[u8]) -> Result<ProcessResult> {
        // gpg needs the detached signature as a file; the payload goes on stdin.
        let mut sig_file = tempfile::Builder::new()
            .prefix("scoped-gpg-")
            .suffix(".sig")
            .tempfile()?;
        sig_file.write_all(signature)?;
        sig_file.flush()?;

        let args = [
            "--verify".into(),
            sig_file.path().as_os_str().to_owned(),
            "-".into(),
        ];
        self.invoker
            .invoke::<_, std::ffi::OsString>(args, self.keyring.path(), Some(payload))
            .await
    }
}

/// The signer key gpg could not find, if any.
///
/// An id gpg would not accept back on `--recv-keys` means the status channel
/// is not speaking the protocol this crate expects.
fn missing_key(result: &ProcessResult) -> Result<Option<KeyId>> {
    let Some(StatusEvent::NoPublicKey { key_id }) = find_missing_key(&result.status) else {
        return Ok(None);
    };
    KeyId::parse(&key_id)
        .map(Some)
        .map_err(|_| Error::ProtocolMismatch(result.status.clone()))
}

/// Replays gpg's output, routing the status text to the chosen stream.
async fn echo<O, E>(
    result: &ProcessResult,
    status_fd: Option<StatusFd>,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<()>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    stdout.write_all(result.stdout.as_bytes()).await?;
    stderr.write_all(result.stderr.as_bytes()).await?;

    match status_fd {
        Some(StatusFd::Stdout) => stdout.write_all(result.status.as_bytes()).await?,
        Some(StatusFd::Stderr) => stderr.write_all(result.status.as_bytes()).await?,
        None => {}
    }

    stdout.flush().await?;
    stderr.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "[GNUPG:] GOODSIG 20D04E5A713660A7 Fedor\n";

    fn result(status: &str) -> ProcessResult {
        ProcessResult {
            code: 0,
            stdout: "out\n".to_string(),
            stderr: "gpg: Good signature\n".to_string(),
            status: status.to_string(),
        }
    }

    async fn echoed(status_fd: Option<StatusFd>) -> (String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        echo(&result(STATUS), status_fd, &mut stdout, &mut stderr)
            .await
            .unwrap();
        (
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_echo_without_status() {
        let (stdout, stderr) = echoed(None).await;
        assert_eq!(stdout, "out\n");
        assert_eq!(stderr, "gpg: Good signature\n");
    }

    #[tokio::test]
    async fn test_echo_status_to_stdout() {
        let (stdout, stderr) = echoed(Some(StatusFd::Stdout)).await;
        assert_eq!(stdout, format!("out\n{STATUS}"));
        assert_eq!(stderr, "gpg: Good signature\n");
    }

    #[tokio::test]
    async fn test_echo_status_to_stderr() {
        let (stdout, stderr) = echoed(Some(StatusFd::Stderr)).await;
        assert_eq!(stdout, "out\n");
        assert_eq!(stderr, format!("gpg: Good signature\n{STATUS}"));
    }

    #[test]
    fn test_missing_key_parsed() {
        let key_id = missing_key(&result("[GNUPG:] NO_PUBKEY 20d04e5a713660a7\n"))
            .unwrap()
            .unwrap();
        assert_eq!(key_id.as_str(), "20D04E5A713660A7");
        assert!(missing_key(&result(STATUS)).unwrap().is_none());
    }

    #[test]
    fn test_malformed_missing_key_is_protocol_mismatch() {
        let status = "[GNUPG:] NO_PUBKEY --keyserver=evil\n";
        let err = missing_key(&result(status)).unwrap_err();
        assert!(
            matches!(err, Error::ProtocolMismatch(ref raw) if raw == status),
            "{err:?}"
        );
    }
}
