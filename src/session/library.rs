//! Process-wide TLS library state
//!
//! The crypto provider is process-global. Each session holds a
//! [`LibraryHandle`]; the first handle installs the provider, the last one to
//! drop marks the library released. No connection assumes it owns the process.

use crate::{Error, Result};
use std::sync::{Mutex, PoisonError};

static ACTIVE: Mutex<usize> = Mutex::new(0);

/// One reference to the initialized TLS library
#[derive(Debug)]
pub struct LibraryHandle {
    _private: (),
}

impl LibraryHandle {
    /// Initialize the library if no handle is live, then take a reference.
    pub fn acquire() -> Result<Self> {
        let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        if *active == 0 {
            initialize()?;
            tracing::debug!("TLS library initialized");
        }
        *active += 1;
        Ok(Self { _private: () })
    }
}

impl Drop for LibraryHandle {
    fn drop(&mut self) {
        let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        if *active == 0 {
            tracing::debug!("TLS library released");
        }
    }
}

/// Number of live library handles
pub fn active_handles() -> usize {
    *ACTIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn initialize() -> Result<()> {
    if rustls::crypto::CryptoProvider::get_default().is_some() {
        return Ok(());
    }
    // Losing a race with another installer is fine: a provider is in place.
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err(Error::Config(
            "failed to install the default crypto provider".into(),
        ));
    }
    Ok(())
}
