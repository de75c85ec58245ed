//! Scoped, trust-on-first-use verification of detached GPG signatures.
//!
//! Every gpg invocation is confined to a keyring chosen by the caller; gpg's
//! default keyring is never consulted. When a signature is made by a key the
//! keyring does not contain, the key is fetched into a throwaway keyring
//! first and only added to the real one after a human confirms it by typing
//! the first six characters of its key ID (or a confirmation hook accepts it).
//!
//! # Example
//!
//! ```no_run
//! use scoped_gpg::{ScopedGpg, VerifyOptions};
//!
//! #[tokio::main]
//! async fn main() -> scoped_gpg::Result<()> {
//!     let gpg = ScopedGpg::new("/var/lib/installer/trusted.gpg")?;
//!
//!     let payload = std::fs::read("release.tar.gz")?;
//!     let signature = std::fs::read("release.tar.gz.sig")?;
//!     let verified = gpg.verify(&payload, &signature, &VerifyOptions::default()).await?;
//!
//!     for key in &verified.imported {
//!         println!("trusted new key {key}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Requirements
//!
//! - A `gpg` executable on `PATH`, or named by the `GPG` environment variable
//! - A terminal for confirming new keys, unless a hook is set with
//!   [`ScopedGpg::with_confirm`]

mod config;
mod error;
mod import;
mod keyring;
mod parse;
mod process;
mod status;
mod tty;
mod types;
mod validation;
mod verify;

pub use config::{GPG_ENV, GpgConfig, StatusChannel};
pub use error::{Error, Result};
pub use import::Challenge;
pub use keyring::{ConfirmFn, ScopedGpg, ScopedKeyring};
pub use process::{GpgInvoker, ProcessResult};
pub use status::{StatusEvent, find_import_event, find_missing_key};
pub use tty::{SystemTty, TtyBroker, TtyInput, TtyOutput, TtyOwnership, TtyPair};
pub use types::{Key, KeyValidity, StatusFd, Verified, VerifyOptions};
pub use validation::{KeyId, validate_keyserver};
