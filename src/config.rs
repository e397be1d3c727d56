use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::calls::SessionParams;
use crate::transport::{DEFAULT_URL, TlsOptions};

/// Which side of the call this client plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Role {
    /// Registers, then calls the peer and streams a file to it.
    Caller,
    /// Registers, then waits for a call and records what it receives.
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Caller => "caller",
            Self::Callee => "callee",
        })
    }
}

/// The single video codec the engine is allowed to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264,
    Vp8,
}

impl VideoCodec {
    /// Picks the codec from the media file extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "h264" | "mkv" => Ok(Self::H264),
            "vp8" | "ivf" => Ok(Self::Vp8),
            _ => Err(ConfigError::UnknownCodec(ext)),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::H264 => "video/H264",
            Self::Vp8 => "video/VP8",
        }
    }

    /// Encoding name as it appears in `a=rtpmap`.
    pub fn encoding_name(&self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::Vp8 => "VP8",
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown codec {0:?}: file extension must be either mkv/h264 or vp8/ivf")]
    UnknownCodec(String),

    #[error("could not open file `{}`: {source}", path.display())]
    MediaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub role: Role,
    pub url: String,
    pub user: String,
    pub peer: String,
    /// Caller: file to send. Callee: file to write. The extension selects
    /// the codec on both sides.
    pub file: PathBuf,
    /// Only gather local candidates on this address.
    pub ice_addr: Option<IpAddr>,
    pub tls: TlsOptions,
}

impl ClientConfig {
    pub fn new(role: Role, file: impl Into<PathBuf>) -> Self {
        Self {
            role,
            url: DEFAULT_URL.to_string(),
            user: "test1".to_string(),
            peer: "test2".to_string(),
            file: file.into(),
            ice_addr: None,
            tls: TlsOptions::default(),
        }
    }

    /// Checks the media file and returns the codec it selects.
    pub fn validate(&self) -> Result<VideoCodec, ConfigError> {
        if self.role == Role::Caller {
            std::fs::metadata(&self.file).map_err(|source| ConfigError::MediaFile {
                path: self.file.clone(),
                source,
            })?;
        }
        VideoCodec::from_path(&self.file)
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            role: self.role,
            user: self.user.clone(),
            peer: self.peer.clone(),
        }
    }
}
