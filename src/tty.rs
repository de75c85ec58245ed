use std::fmt;
use std::io::{self, IsTerminal};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub type TtyInput = Box<dyn AsyncRead + Send + Unpin>;
pub type TtyOutput = Box<dyn AsyncWrite + Send + Unpin>;

/// Whether a [`TtyPair`] owns its handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyOwnership {
    /// The process's own terminal on stdin/stderr. Never closed by this crate.
    Borrowed,
    /// Handles opened for this pair alone, closed on release.
    Owned,
}

/// An interactive input/output pair used for the confirmation prompt.
///
/// Releasing consumes the pair, and dropping an unreleased pair releases it,
/// so owned handles are closed exactly once.
pub struct TtyPair {
    pub input: TtyInput,
    pub output: TtyOutput,
    ownership: TtyOwnership,
    local_echo: bool,
}

impl TtyPair {
    /// Wraps the process's own terminal.
    pub fn borrowed(input: TtyInput, output: TtyOutput) -> Self {
        Self {
            input,
            output,
            ownership: TtyOwnership::Borrowed,
            local_echo: false,
        }
    }

    /// Wraps handles opened exclusively for one prompt.
    pub fn owned(input: TtyInput, output: TtyOutput) -> Self {
        Self {
            input,
            output,
            ownership: TtyOwnership::Owned,
            local_echo: false,
        }
    }

    /// The prompt echoes typed characters itself, for inputs whose terminal
    /// echo is switched off.
    #[must_use]
    pub fn with_local_echo(mut self) -> Self {
        self.local_echo = true;
        self
    }

    pub fn ownership(&self) -> TtyOwnership {
        self.ownership
    }

    pub fn local_echo(&self) -> bool {
        self.local_echo
    }

    pub fn release(self) {
        debug!(ownership = ?self.ownership, "releasing terminal");
        // Dropping the input restores the terminal mode and closes our
        // descriptor. For a borrowed pair that is a duplicate of stdin, and
        // tokio's stderr wrapper leaves fd 2 open.
    }
}

impl fmt::Debug for TtyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtyPair")
            .field("ownership", &self.ownership)
            .field("local_echo", &self.local_echo)
            .finish_non_exhaustive()
    }
}

/// Source of terminals for interactive key confirmation.
pub trait TtyBroker: Send + Sync {
    fn acquire(&self) -> io::Result<TtyPair>;
}

/// Uses the process's terminal when stdin is one, otherwise opens the
/// controlling terminal device directly.
///
/// On Unix the input is switched to non-canonical mode with signal
/// generation off while the pair is alive: Ctrl-C reaches the prompt as a
/// byte instead of interrupting the process, and no signal handler is
/// installed. Must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTty;

#[cfg(unix)]
impl TtyBroker for SystemTty {
    fn acquire(&self) -> io::Result<TtyPair> {
        use std::fs::{File, OpenOptions};
        use std::os::fd::AsFd;

        const DEVICE: &str = "/dev/tty";

        let (input, output, ownership) = if io::stdin().is_terminal() {
            let input = io::stdin().as_fd().try_clone_to_owned()?;
            (
                File::from(input),
                Box::new(tokio::io::stderr()) as TtyOutput,
                TtyOwnership::Borrowed,
            )
        } else {
            debug!(device = DEVICE, "stdin is not a terminal, opening device");
            let input = OpenOptions::new().read(true).open(DEVICE)?;
            let output = OpenOptions::new().write(true).open(DEVICE)?;
            (
                input,
                Box::new(tokio::fs::File::from_std(output)) as TtyOutput,
                TtyOwnership::Owned,
            )
        };

        Ok(TtyPair {
            input: Box::new(terminal::TerminalInput::new(input)?),
            output,
            ownership,
            local_echo: true,
        })
    }
}

#[cfg(windows)]
impl TtyBroker for SystemTty {
    fn acquire(&self) -> io::Result<TtyPair> {
        if io::stdin().is_terminal() {
            return Ok(TtyPair::borrowed(
                Box::new(tokio::io::stdin()),
                Box::new(tokio::io::stderr()),
            ));
        }

        let input = std::fs::OpenOptions::new().read(true).open("CONIN$")?;
        let output = std::fs::OpenOptions::new().write(true).open("CONOUT$")?;
        Ok(TtyPair::owned(
            Box::new(tokio::fs::File::from_std(input)),
            Box::new(tokio::fs::File::from_std(output)),
        ))
    }
}

#[cfg(unix)]
pub(crate) mod terminal {
    use std::fs::File;
    use std::io::{self, Read};
    use std::os::fd::AsRawFd;
    use std::pin::Pin;
    use std::task::{Context, Poll, ready};

    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use nix::sys::termios::{
        LocalFlags, SetArg, SpecialCharacterIndices, Termios, tcgetattr, tcsetattr,
    };
    use tokio::io::unix::AsyncFd;
    use tokio::io::{AsyncRead, ReadBuf};

    /// Terminal input read byte by byte through the reactor.
    ///
    /// Canonical mode, echo and signal generation are off, so Ctrl-C arrives
    /// as 0x03. A dropped read leaves no blocking task behind. The previous
    /// terminal settings and file status flags come back on drop.
    pub(crate) struct TerminalInput {
        fd: AsyncFd<File>,
        saved_termios: Termios,
        saved_flags: OFlag,
    }

    impl TerminalInput {
        pub(crate) fn new(file: File) -> io::Result<Self> {
            let saved_termios = tcgetattr(&file)?;
            let saved_flags =
                OFlag::from_bits_truncate(fcntl(file.as_raw_fd(), FcntlArg::F_GETFL)?);

            // From here on, drop restores whatever was changed.
            let input = Self {
                fd: AsyncFd::new(file)?,
                saved_termios,
                saved_flags,
            };

            let mut raw = input.saved_termios.clone();
            raw.local_flags
                .remove(LocalFlags::ISIG | LocalFlags::ICANON | LocalFlags::ECHO);
            raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
            raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
            tcsetattr(input.fd.get_ref(), SetArg::TCSANOW, &raw)?;
            fcntl(
                input.fd.as_raw_fd(),
                FcntlArg::F_SETFL(input.saved_flags | OFlag::O_NONBLOCK),
            )?;

            Ok(input)
        }
    }

    impl AsyncRead for TerminalInput {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            loop {
                let mut guard = ready!(self.fd.poll_read_ready(cx))?;
                let unfilled = buf.initialize_unfilled();
                match guard.try_io(|inner| {
                    let mut file = inner.get_ref();
                    file.read(unfilled)
                }) {
                    Ok(Ok(n)) => {
                        buf.advance(n);
                        return Poll::Ready(Ok(()));
                    }
                    Ok(Err(e)) => return Poll::Ready(Err(e)),
                    Err(_would_block) => continue,
                }
            }
        }
    }

    impl Drop for TerminalInput {
        fn drop(&mut self) {
            let file = self.fd.get_ref();
            let _ = tcsetattr(file, SetArg::TCSANOW, &self.saved_termios);
            let _ = fcntl(file.as_raw_fd(), FcntlArg::F_SETFL(self.saved_flags));
        }
    }
}
