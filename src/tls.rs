//! TLS material resolution.
//!
//! Certificate, key and CA options arrive either as raw PEM bytes or as
//! filenames. Filenames may carry a `{hostname}` placeholder which is
//! replaced with the local host name, and are read synchronously at client
//! construction so that misconfiguration fails before the first request.

use crate::constants;
use crate::error::Error;

/// One piece of TLS material: in-memory bytes or a file to read.
#[derive(Debug, Clone)]
pub enum TlsItem {
    Bytes(Vec<u8>),
    File(String),
}

impl From<Vec<u8>> for TlsItem {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for TlsItem {
    fn from(filename: &str) -> Self {
        Self::File(filename.to_string())
    }
}

impl From<String> for TlsItem {
    fn from(filename: String) -> Self {
        Self::File(filename)
    }
}

fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

impl TlsItem {
    /// Resolve to PEM bytes, reading and `{hostname}`-substituting files.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when the file cannot be read.
    pub fn resolve(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Bytes(bytes) => Ok(bytes.clone()),
            Self::File(name) => {
                let path = name.replace(constants::HOSTNAME_PLACEHOLDER, &local_hostname());
                std::fs::read(&path).map_err(|e| {
                    Error::invalid_config(format!("cannot read TLS material '{path}': {e}"))
                })
            }
        }
    }
}

/// Fully resolved TLS material, held by the client for its lifetime.
#[derive(Debug, Default, Clone)]
pub struct TlsMaterial {
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub ca: Vec<Vec<u8>>,
}

impl TlsMaterial {
    /// Resolve the configured items into PEM bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when any referenced file cannot be read.
    pub fn resolve(
        cert: Option<&TlsItem>,
        key: Option<&TlsItem>,
        ca: &[TlsItem],
    ) -> Result<Self, Error> {
        Ok(Self {
            cert: cert.map(TlsItem::resolve).transpose()?,
            key: key.map(TlsItem::resolve).transpose()?,
            ca: ca.iter().map(TlsItem::resolve).collect::<Result<_, _>>()?,
        })
    }

    /// Combined cert+key PEM for client authentication, when both are set
    #[must_use]
    pub fn identity_pem(&self) -> Option<Vec<u8>> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => {
                let mut pem = cert.clone();
                if !pem.ends_with(b"\n") {
                    pem.push(b'\n');
                }
                pem.extend_from_slice(key);
                Some(pem)
            }
            _ => None,
        }
    }

    /// True when no material was configured at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.ca.is_empty()
    }
}
