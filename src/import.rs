use std::io;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::keyring::ScopedGpg;
use crate::process::ProcessResult;
use crate::status::{StatusEvent, find_import_event};
use crate::tty::TtyPair;
use crate::validation::KeyId;

const CHALLENGE_LEN: usize = 6;

const ETX: u8 = 0x03;
const EOT: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// The short token a human must type to accept a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    /// The first six characters of `key_id`.
    pub fn from_key_id(key_id: &str) -> Self {
        Self(key_id.chars().take(CHALLENGE_LEN).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive match against one line of user input.
    pub fn matches(&self, answer: &str) -> bool {
        answer.trim().eq_ignore_ascii_case(&self.0)
    }
}

impl ScopedGpg {
    /// Fetches `key_id` and adds it to the real keyring once confirmed.
    ///
    /// The key is first received into a throwaway keyring. Only after the
    /// confirmation hook, or a human answering the challenge on a terminal,
    /// accepts its fingerprint is it fetched again into the real keyring.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidKeyId`] before anything runs if `key_id` is not a gpg
    /// key ID, [`Error::ImportCancelled`] if the key was declined,
    /// [`Error::ImportProblem`] or [`Error::ImportFailed`] if gpg could not
    /// fetch it.
    pub async fn import_with_confirmation(&self, key_id: &str) -> Result<()> {
        let key_id = KeyId::parse(key_id)?;
        self.import_key(&key_id).await
    }

    pub(crate) async fn import_key(&self, key_id: &KeyId) -> Result<()> {
        let args = self.recv_keys_args(key_id);

        let confirmed = {
            let staging = tempfile::Builder::new().prefix("scoped-gpg-").tempdir()?;
            let throwaway = staging.path().join("keyring");

            debug!(key_id = %key_id, keyring = %throwaway.display(), "staging key");
            let staged = self.invoker.invoke(&args, &throwaway, None).await?;
            let fingerprint = imported_fingerprint(key_id, &staged)?;

            self.confirm(key_id, &fingerprint, &staged).await?
        };

        if !confirmed {
            warn!(key_id = %key_id, "key import declined");
            return Err(Error::ImportCancelled {
                key_id: key_id.to_string(),
            });
        }

        let committed = self
            .invoker
            .invoke(&args, self.keyring.path(), None)
            .await?;
        let fingerprint = imported_fingerprint(key_id, &committed)?;

        info!(
            key_id = %key_id,
            fingerprint = %fingerprint,
            keyring = %self.keyring,
            "imported key"
        );
        Ok(())
    }

    async fn confirm(&self, key_id: &KeyId, fingerprint: &str, staged: &ProcessResult) -> Result<bool> {
        if let Some(confirm) = &self.confirm {
            return Ok(confirm(fingerprint));
        }

        let mut tty = self.tty.acquire().map_err(Error::Tty)?;
        let answer = prompt(&mut tty, &diagnostics(staged), key_id, self.keyring.path()).await;
        tty.release();
        answer
    }
}

fn imported_fingerprint(key_id: &KeyId, result: &ProcessResult) -> Result<String> {
    match find_import_event(&result.status)? {
        Some(StatusEvent::ImportOk { fingerprint }) => Ok(fingerprint),
        Some(StatusEvent::ImportProblem { detail }) => Err(Error::ImportProblem {
            key_id: key_id.to_string(),
            detail,
            output: result.combined_output(),
        }),
        _ => Err(Error::ImportFailed {
            key_id: key_id.to_string(),
            output: result.combined_output(),
        }),
    }
}

/// gpg's messages from the staging fetch, for the human to review.
fn diagnostics(result: &ProcessResult) -> String {
    let mut lines: Vec<String> = result
        .stdout
        .lines()
        .chain(result.stderr.lines())
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty() && !is_keyring_created_notice(line))
        .map(str::to_string)
        .collect();
    lines.push(format!("gpg exit code {}", result.code));
    lines.join("\n") + "\n"
}

// The throwaway keyring is always new, so this line is noise.
fn is_keyring_created_notice(line: &str) -> bool {
    line.starts_with("gpg: keyring") && line.ends_with("created")
}

/// Shows `diagnostics` and asks for the challenge derived from `key_id`.
///
/// End of input or Ctrl-D counts as a refusal. Ctrl-C, read as a byte
/// because the terminal does not turn it into a signal, cancels the import.
pub(crate) async fn prompt(
    tty: &mut TtyPair,
    diagnostics: &str,
    key_id: &KeyId,
    keyring: &Path,
) -> Result<bool> {
    let challenge = Challenge::from_key_id(key_id.as_str());
    let question = format!(
        "Enter key id ({}) to add this key to \"{}\": ",
        challenge.as_str(),
        keyring.display()
    );
    tty.output
        .write_all(diagnostics.as_bytes())
        .await
        .map_err(Error::Tty)?;
    tty.output
        .write_all(question.as_bytes())
        .await
        .map_err(Error::Tty)?;
    tty.output.flush().await.map_err(Error::Tty)?;

    match read_answer(tty).await.map_err(Error::Tty)? {
        Answer::Line(line) => Ok(challenge.matches(&line)),
        Answer::EndOfInput => Ok(false),
        Answer::Interrupted => {
            // Move past the unanswered prompt.
            let _ = tty.output.write_all(b"\n").await;
            let _ = tty.output.flush().await;
            Err(Error::ImportCancelled {
                key_id: key_id.to_string(),
            })
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Line(String),
    EndOfInput,
    Interrupted,
}

/// Reads one line with minimal editing, echoing it when the pair asks for it.
async fn read_answer(tty: &mut TtyPair) -> io::Result<Answer> {
    let echo = tty.local_echo();
    let mut line = Vec::new();
    let mut chunk = [0u8; 64];

    loop {
        let n = tty.input.read(&mut chunk).await?;
        if n == 0 {
            return Ok(if line.is_empty() {
                Answer::EndOfInput
            } else {
                Answer::Line(String::from_utf8_lossy(&line).into_owned())
            });
        }

        for &byte in &chunk[..n] {
            match byte {
                ETX => return Ok(Answer::Interrupted),
                EOT if line.is_empty() => return Ok(Answer::EndOfInput),
                b'\r' | b'\n' => {
                    if echo {
                        tty.output.write_all(b"\n").await?;
                        tty.output.flush().await?;
                    }
                    return Ok(Answer::Line(String::from_utf8_lossy(&line).into_owned()));
                }
                BACKSPACE | DELETE => {
                    if line.pop().is_some() && echo {
                        tty.output.write_all(b"\x08 \x08").await?;
                    }
                }
                byte if byte.is_ascii_control() => {}
                byte => {
                    line.push(byte);
                    if echo {
                        tty.output.write_all(&[byte]).await?;
                    }
                }
            }
        }

        if echo {
            tty.output.flush().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_ID: &str = "96E07AF25771955980DAD10020D04E5A713660A7";

    fn key_id() -> KeyId {
        KeyId::parse(KEY_ID).unwrap()
    }

    fn result(code: i32, stdout: &str, stderr: &str, status: &str) -> ProcessResult {
        ProcessResult {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_challenge_is_first_six_chars() {
        let challenge = Challenge::from_key_id(KEY_ID);
        assert_eq!(challenge.as_str(), "96E07A");
        assert_eq!(Challenge::from_key_id("ABC").as_str(), "ABC");
    }

    #[test]
    fn test_challenge_matching() {
        let challenge = Challenge::from_key_id(KEY_ID);
        assert!(challenge.matches("96E07A"));
        assert!(challenge.matches("96e07a\n"));
        assert!(challenge.matches("  96e07A\r\n"));
        assert!(!challenge.matches(KEY_ID));
        assert!(!challenge.matches("96E07"));
        assert!(!challenge.matches(""));
    }

    #[test]
    fn test_diagnostics_filters_keyring_notice() {
        let staged = result(
            0,
            "",
            "gpg: keyring `/tmp/scoped-gpg-x/keyring' created\n\ngpg: key 20D04E5A713660A7: public key \"Fedor Indutny\" imported\r\ngpg: Total number processed: 1\n",
            "",
        );
        let text = diagnostics(&staged);
        assert!(!text.contains("created"));
        assert!(text.contains("public key \"Fedor Indutny\" imported\n"));
        assert!(text.ends_with("gpg exit code 0\n"));
        assert!(!text.contains("\n\n"));
    }

    #[test]
    fn test_imported_fingerprint() {
        let short = KeyId::parse("20D04E5A713660A7").unwrap();
        let ok = result(0, "", "", &format!("[GNUPG:] IMPORT_OK 1 {KEY_ID}\n"));
        assert_eq!(imported_fingerprint(&short, &ok).unwrap(), KEY_ID);

        let problem = result(2, "", "bad key", "[GNUPG:] IMPORT_PROBLEM 1\n");
        let err = imported_fingerprint(&short, &problem).unwrap_err();
        assert!(matches!(err, Error::ImportProblem { ref output, .. } if output.contains("bad key")));

        let nothing = result(2, "", "gpg: keyserver receive failed: No data", "");
        let err = imported_fingerprint(&short, &nothing).unwrap_err();
        assert!(matches!(err, Error::ImportFailed { ref output, .. } if output.contains("No data")));
    }

    async fn run_prompt_with(answer: &'static [u8], local_echo: bool) -> (Result<bool>, String) {
        let (output, mut shown) = tokio::io::duplex(4096);
        let mut tty = TtyPair::owned(Box::new(answer), Box::new(output));
        if local_echo {
            tty = tty.with_local_echo();
        }
        let answered = prompt(
            &mut tty,
            "gpg exit code 0\n",
            &key_id(),
            Path::new("/tmp/real.gpg"),
        )
        .await;
        tty.release();

        let mut text = String::new();
        shown.read_to_string(&mut text).await.unwrap();
        (answered, text)
    }

    async fn run_prompt(answer: &'static [u8]) -> (Result<bool>, String) {
        run_prompt_with(answer, false).await
    }

    #[tokio::test]
    async fn test_prompt_accepts_challenge() {
        let (answered, shown) = run_prompt(b"96e07a\n").await;
        assert!(answered.unwrap());
        assert!(shown.starts_with("gpg exit code 0\n"));
        assert!(shown.contains("Enter key id (96E07A) to add this key to \"/tmp/real.gpg\": "));
    }

    #[tokio::test]
    async fn test_prompt_accepts_answer_without_newline() {
        let (answered, _) = run_prompt(b"96E07A").await;
        assert!(answered.unwrap());
    }

    #[tokio::test]
    async fn test_prompt_rejects_full_fingerprint() {
        let (answered, _) = run_prompt(b"96E07AF25771955980DAD10020D04E5A713660A7\n").await;
        assert!(!answered.unwrap());
    }

    #[tokio::test]
    async fn test_prompt_end_of_input_declines() {
        let (answered, _) = run_prompt(b"").await;
        assert!(!answered.unwrap());

        let (answered, _) = run_prompt(b"\x04").await;
        assert!(!answered.unwrap());
    }

    #[tokio::test]
    async fn test_prompt_ctrl_c_cancels_import() {
        let (answered, shown) = run_prompt(b"96e\x03").await;
        let err = answered.unwrap_err();
        assert!(err.is_cancelled());
        assert!(matches!(err, Error::ImportCancelled { ref key_id } if key_id == KEY_ID));
        assert!(shown.ends_with("\"/tmp/real.gpg\": \n"), "{shown:?}");
    }

    #[tokio::test]
    async fn test_prompt_backspace_edits_answer() {
        let (answered, _) = run_prompt(b"96e07x\x7fa\n").await;
        assert!(answered.unwrap());

        let (answered, _) = run_prompt(b"\x7f\x7f96e07a\r").await;
        assert!(answered.unwrap());
    }

    #[tokio::test]
    async fn test_prompt_local_echo() {
        let (answered, shown) = run_prompt_with(b"96e07x\x08a\r", true).await;
        assert!(answered.unwrap());
        assert!(shown.ends_with("\": 96e07x\x08 \x08a\n"), "{shown:?}");
    }

    #[tokio::test]
    async fn test_prompt_without_local_echo_shows_nothing_typed() {
        let (_, shown) = run_prompt(b"96e07a\n").await;
        assert!(shown.ends_with("\"/tmp/real.gpg\": "), "{shown:?}");
    }
}
