use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable naming the gpg executable.
pub const GPG_ENV: &str = "GPG";

const DEFAULT_GPG: &str = "gpg";

/// How gpg's machine-readable status output is captured.
///
/// Chosen once when the configuration is built; the process invoker never
/// branches on the platform itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusChannel {
    /// An inherited pipe, passed to gpg as `--status-fd=3`.
    #[cfg(unix)]
    Descriptor,
    /// A file in a private temp directory, passed as `--status-file=<path>`
    /// and read after gpg exits.
    File,
}

impl StatusChannel {
    /// The channel that works reliably on the current platform.
    pub fn platform_default() -> Self {
        #[cfg(unix)]
        {
            Self::Descriptor
        }
        #[cfg(not(unix))]
        {
            Self::File
        }
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Process-wide settings for invoking gpg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpgConfig {
    pub program: PathBuf,
    pub status_channel: StatusChannel,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_GPG),
            status_channel: StatusChannel::platform_default(),
        }
    }
}

impl GpgConfig {
    /// Builds a configuration from the `GPG` environment variable.
    ///
    /// An unset or empty variable falls back to `gpg` on `PATH`.
    pub fn from_env() -> Self {
        Self::from_program_var(std::env::var_os(GPG_ENV))
    }

    /// The configuration read from the environment the first time it is
    /// requested. Later changes to `GPG` are not observed.
    pub fn global() -> &'static GpgConfig {
        static CONFIG: OnceLock<GpgConfig> = OnceLock::new();
        CONFIG.get_or_init(Self::from_env)
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn with_status_channel(mut self, channel: StatusChannel) -> Self {
        self.status_channel = channel;
        self
    }

    fn from_program_var(var: Option<OsString>) -> Self {
        match var {
            Some(program) if !program.is_empty() => Self::default().with_program(program),
            _ => Self::default(),
        }
    }
}
