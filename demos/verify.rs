//! Example: verify a detached signature against a scoped keyring
//!
//! Run with: cargo run --example verify -- <keyring> <file> <file.sig> [keyserver]
//!
//! Unknown signer keys are fetched and must be confirmed on the terminal.
//! Set `RUST_LOG=scoped_gpg=debug` to see every gpg invocation.

use scoped_gpg::{ScopedGpg, StatusFd, VerifyOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> scoped_gpg::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [keyring, file, sig, rest @ ..] = args.as_slice() else {
        eprintln!("usage: verify <keyring> <file> <file.sig> [keyserver]");
        std::process::exit(2);
    };

    let mut gpg = ScopedGpg::new(keyring)?;
    if let Some(keyserver) = rest.first() {
        gpg = gpg.with_keyserver(keyserver.as_str())?;
    }

    let payload = std::fs::read(file)?;
    let signature = std::fs::read(sig)?;
    let options = VerifyOptions {
        verbose: true,
        status_fd: StatusFd::from_fd(2),
    };

    let verified = gpg.verify(&payload, &signature, &options).await?;

    println!("{file}: good signature ({})", gpg.keyring());
    for key_id in &verified.imported {
        println!("    added key {key_id}");
    }

    for key in gpg.keys().await? {
        let uid = key.uids.first().map(String::as_str).unwrap_or("<no user id>");
        println!("{} {}{} {}", key.fingerprint, key.algorithm.to_lowercase(), key.bits, uid);
    }

    Ok(())
}
