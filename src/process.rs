use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

use crate::config::{GpgConfig, StatusChannel};
use crate::error::{Error, Result};

const TEMP_PREFIX: &str = "scoped-gpg-";

/// Captured outcome of one gpg invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code, or `-1` if gpg was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Machine-readable `[GNUPG:]` status lines.
    pub status: String,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout and stderr joined for error reports.
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Spawns gpg scoped to a single keyring.
#[derive(Debug, Clone)]
pub struct GpgInvoker {
    config: GpgConfig,
}

impl GpgInvoker {
    pub fn new(config: GpgConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GpgConfig {
        &self.config
    }

    /// Runs gpg with `args` against `keyring`, optionally feeding `stdin`.
    ///
    /// gpg is always told to ignore its default keyring and to emit status
    /// lines on a dedicated channel. The result is returned only after the
    /// process has exited and every output channel has been drained.
    pub async fn invoke<I, S>(
        &self,
        args: I,
        keyring: &Path,
        stdin: Option<&[u8]>,
    ) -> Result<ProcessResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut capture = StatusCapture::prepare(self.config.status_channel)?;

        let mut argv: Vec<OsString> = vec![
            "--no-default-keyring".into(),
            "--keyring".into(),
            keyring.as_os_str().to_owned(),
            capture.argument(),
        ];
        argv.extend(args.into_iter().map(Into::into));

        debug!(program = %self.config.program.display(), args = ?argv, "spawning gpg");

        let mut cmd = Command::new(&self.config.program);
        cmd.env("LC_ALL", "C")
            .args(&argv)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        capture.attach(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: self.config.program.display().to_string(),
            source,
        })?;
        capture.spawned();

        let stdout = child
            .stdout
            .take()
            .ok_or(Error::StdioCaptureFailed("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(Error::StdioCaptureFailed("stderr"))?;
        let input = match stdin {
            Some(payload) => Some((
                child
                    .stdin
                    .take()
                    .ok_or(Error::StdioCaptureFailed("stdin"))?,
                payload,
            )),
            None => None,
        };

        let (exit, stdout, stderr, piped_status) = tokio::try_join!(
            async {
                if let Some((writer, payload)) = input {
                    feed_stdin(writer, payload).await?;
                }
                child.wait().await
            },
            read_to_string(stdout),
            read_to_string(stderr),
            capture.drain(),
        )?;

        let status = capture.finish(piped_status).await?;
        let code = exit.code().unwrap_or(-1);
        debug!(code, "gpg exited");

        Ok(ProcessResult {
            code,
            stdout,
            stderr,
            status,
        })
    }
}

async fn feed_stdin(mut writer: ChildStdin, payload: &[u8]) -> io::Result<()> {
    let written = async {
        writer.write_all(payload).await?;
        writer.shutdown().await
    }
    .await;
    drop(writer);

    match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            warn!("gpg closed its input before reading the whole payload");
            Ok(())
        }
        other => other,
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Per-invocation state of the status channel.
enum StatusCapture {
    #[cfg(unix)]
    Pipe(pipe::StatusPipe),
    File {
        _dir: tempfile::TempDir,
        path: PathBuf,
    },
}

impl StatusCapture {
    fn prepare(channel: StatusChannel) -> io::Result<Self> {
        match channel {
            #[cfg(unix)]
            StatusChannel::Descriptor => Ok(Self::Pipe(pipe::StatusPipe::new()?)),
            StatusChannel::File => {
                let dir = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?;
                let path = dir.path().join("gpg-status");
                Ok(Self::File { _dir: dir, path })
            }
        }
    }

    fn argument(&self) -> OsString {
        match self {
            #[cfg(unix)]
            Self::Pipe(_) => format!("--status-fd={}", pipe::STATUS_FD).into(),
            Self::File { path, .. } => {
                let mut arg = OsString::from("--status-file=");
                arg.push(path.as_os_str());
                arg
            }
        }
    }

    fn attach(&mut self, cmd: &mut Command) {
        match self {
            #[cfg(unix)]
            Self::Pipe(pipe) => pipe.attach(cmd),
            Self::File { .. } => {}
        }
    }

    /// Called once the child holds its own copy of the write end.
    fn spawned(&mut self) {
        match self {
            #[cfg(unix)]
            Self::Pipe(pipe) => pipe.close_writer(),
            Self::File { .. } => {}
        }
    }

    /// Reads the channel while gpg is running. Files are read in `finish`.
    async fn drain(&mut self) -> io::Result<String> {
        match self {
            #[cfg(unix)]
            Self::Pipe(pipe) => pipe.read_all().await,
            Self::File { .. } => Ok(String::new()),
        }
    }

    async fn finish(self, drained: String) -> io::Result<String> {
        match self {
            #[cfg(unix)]
            Self::Pipe(_) => Ok(drained),
            Self::File { path, .. } => match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(e),
            },
        }
    }
}

#[cfg(unix)]
mod pipe {
    use std::io;
    use std::os::fd::{AsRawFd, OwnedFd};

    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    use tokio::io::AsyncReadExt;
    use tokio::process::Command;

    /// Descriptor number the status pipe occupies in the child.
    pub(super) const STATUS_FD: i32 = 3;

    pub(super) struct StatusPipe {
        reader: Option<OwnedFd>,
        writer: Option<OwnedFd>,
    }

    impl StatusPipe {
        pub(super) fn new() -> io::Result<Self> {
            let (reader, writer) = nix::unistd::pipe()?;
            // Neither end may leak into unrelated children; the write end is
            // re-exposed as STATUS_FD inside our child only.
            for fd in [&reader, &writer] {
                fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
            }
            Ok(Self {
                reader: Some(reader),
                writer: Some(writer),
            })
        }

        pub(super) fn attach(&self, cmd: &mut Command) {
            let Some(writer) = self.writer.as_ref() else {
                return;
            };
            let raw = writer.as_raw_fd();
            // SAFETY: the closure only calls dup2/fcntl, which are
            // async-signal-safe, and allocates nothing.
            unsafe {
                cmd.pre_exec(move || {
                    if raw == STATUS_FD {
                        fcntl(raw, FcntlArg::F_SETFD(FdFlag::empty()))?;
                    } else {
                        nix::unistd::dup2(raw, STATUS_FD)?;
                    }
                    Ok(())
                });
            }
        }

        pub(super) fn close_writer(&mut self) {
            self.writer = None;
        }

        pub(super) async fn read_all(&mut self) -> io::Result<String> {
            let Some(reader) = self.reader.take() else {
                return Ok(String::new());
            };
            let mut file = tokio::fs::File::from_std(std::fs::File::from(reader));
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).await?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        }
    }
}
