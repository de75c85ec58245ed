use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::GpgConfig;
use crate::error::{Error, Result};
use crate::parse::parse_keys;
use crate::process::GpgInvoker;
use crate::tty::{SystemTty, TtyBroker};
use crate::types::Key;
use crate::validation::{KeyId, validate_keyserver};

const DEFAULT_MAX_KEY_IMPORTS: usize = 8;

/// Programmatic replacement for the interactive prompt.
///
/// Receives the fingerprint of the staged key and returns whether it should
/// be added to the real keyring.
pub type ConfirmFn = dyn Fn(&str) -> bool + Send + Sync;

/// A keyring file designated per call, never gpg's default trust store.
///
/// The path is always absolute: gpg resolves a bare file name inside its
/// home directory, which would silently escape the intended scope. This
/// type never creates or modifies the file; only gpg does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedKeyring {
    path: PathBuf,
}

impl ScopedKeyring {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidKeyring {
                path: String::new(),
                reason: "keyring path cannot be empty".to_string(),
            });
        }

        let path = std::path::absolute(path).map_err(|e| Error::InvalidKeyring {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ScopedKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Verifies detached signatures against one scoped keyring, importing
/// unknown signer keys only after confirmation.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> scoped_gpg::Result<()> {
/// use scoped_gpg::{ScopedGpg, VerifyOptions};
///
/// let gpg = ScopedGpg::new("/var/lib/installer/trusted.gpg")?
///     .with_keyserver("hkps://keys.openpgp.org")?;
/// let payload = std::fs::read("package.tar.gz")?;
/// let signature = std::fs::read("package.tar.gz.sig")?;
/// gpg.verify(&payload, &signature, &VerifyOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ScopedGpg {
    pub(crate) keyring: ScopedKeyring,
    pub(crate) invoker: GpgInvoker,
    pub(crate) keyserver: Option<String>,
    pub(crate) confirm: Option<Arc<ConfirmFn>>,
    pub(crate) tty: Arc<dyn TtyBroker>,
    pub(crate) max_key_imports: usize,
}

impl ScopedGpg {
    /// Creates a verifier for `keyring` using the process-wide gpg
    /// configuration (see [`GpgConfig::global`]).
    pub fn new(keyring: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            keyring: ScopedKeyring::new(keyring)?,
            invoker: GpgInvoker::new(GpgConfig::global().clone()),
            keyserver: None,
            confirm: None,
            tty: Arc::new(SystemTty),
            max_key_imports: DEFAULT_MAX_KEY_IMPORTS,
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: GpgConfig) -> Self {
        self.invoker = GpgInvoker::new(config);
        self
    }

    /// Fetch missing keys from `keyserver` instead of gpg's configured one.
    pub fn with_keyserver(mut self, keyserver: impl Into<String>) -> Result<Self> {
        let keyserver = keyserver.into();
        validate_keyserver(&keyserver)?;
        self.keyserver = Some(keyserver);
        Ok(self)
    }

    /// Decide key imports with `confirm` instead of prompting on a terminal.
    #[must_use]
    pub fn with_confirm<F>(mut self, confirm: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.confirm = Some(Arc::new(confirm));
        self
    }

    #[must_use]
    pub fn with_tty_broker(mut self, broker: impl TtyBroker + 'static) -> Self {
        self.tty = Arc::new(broker);
        self
    }

    /// Caps how many keys a single `verify` call may import.
    #[must_use]
    pub fn with_max_key_imports(mut self, max: usize) -> Self {
        self.max_key_imports = max;
        self
    }

    pub fn keyring(&self) -> &ScopedKeyring {
        &self.keyring
    }

    pub fn config(&self) -> &GpgConfig {
        self.invoker.config()
    }

    /// Returns gpg's human-readable `--list-keys` output for the keyring.
    pub async fn list_keys(&self) -> Result<String> {
        let result = self
            .invoker
            .invoke(["--list-keys"], self.keyring.path(), None)
            .await?;

        if !result.success() {
            return Err(Error::Gpg {
                code: result.code,
                output: result.combined_output(),
            });
        }
        Ok(result.stdout)
    }

    /// Lists the primary keys in the keyring.
    pub async fn keys(&self) -> Result<Vec<Key>> {
        let result = self
            .invoker
            .invoke(
                ["--list-keys", "--with-colons", "--fixed-list-mode"],
                self.keyring.path(),
                None,
            )
            .await?;

        if !result.success() {
            return Err(Error::Gpg {
                code: result.code,
                output: result.combined_output(),
            });
        }
        Ok(parse_keys(&result.stdout))
    }

    /// `[--keyserver <url>] --recv-keys <key_id>`
    pub(crate) fn recv_keys_args(&self, key_id: &KeyId) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(keyserver) = &self.keyserver {
            args.push("--keyserver".to_string());
            args.push(keyserver.clone());
        }
        args.push("--recv-keys".to_string());
        args.push(key_id.to_string());
        args
    }
}

impl fmt::Debug for ScopedGpg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedGpg")
            .field("keyring", &self.keyring)
            .field("invoker", &self.invoker)
            .field("keyserver", &self.keyserver)
            .field("confirm", &self.confirm.is_some())
            .field("max_key_imports", &self.max_key_imports)
            .finish_non_exhaustive()
    }
}
