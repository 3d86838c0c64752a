//! Peer identities.
//!
//! The engine is strictly two-party. Either both identities are given
//! explicitly, or the local identity is looked up in a configured pair and
//! the other member becomes the remote.

use serde::Serialize;

use crate::error::{CommsError, Result};

/// Local and remote identity of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identities {
    local: String,
    remote: String,
}

impl Identities {
    /// Use explicit identities.
    ///
    /// # Errors
    ///
    /// `Config` if either is empty or both are equal.
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Result<Self> {
        let local = local.into();
        let remote = remote.into();

        if local.is_empty() || remote.is_empty() {
            return Err(config_error("identities must not be empty"));
        }
        if local == remote {
            return Err(config_error("local and remote identity must differ"));
        }
        Ok(Self { local, remote })
    }

    /// Pick the remote out of a configured pair.
    ///
    /// # Errors
    ///
    /// `Config` if `me` is not one of the pair.
    pub fn resolve(pair: (&str, &str), me: &str) -> Result<Self> {
        let (first, second) = pair;
        if me == first {
            Self::new(first, second)
        } else if me == second {
            Self::new(second, first)
        } else {
            tracing::error!(
                "Local identity {:?} is not one of the peer identities ({:?}, {:?})",
                me,
                first,
                second
            );
            Err(CommsError::Config(
                "local identity is not one of the peer identities".into(),
            ))
        }
    }

    /// This process.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The peer.
    pub fn remote(&self) -> &str {
        &self.remote
    }
}

fn config_error(message: &str) -> CommsError {
    tracing::error!("Invalid identities: {}", message);
    CommsError::Config(message.to_string())
}
