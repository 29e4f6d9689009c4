//! Switching to the authority's user for local sessions.
//!
//! Must run before any threads are started, since set*id calls only affect
//! the calling thread's credentials on some platforms.

use crate::config::ServerConfig;
use crate::utils::errors::{AgentError, Result};
use nix::unistd::{self, Uid, User};
use std::ffi::CString;
use tracing::info;

/// Switch to the configured user when the authority runs locally. Remote
/// sessions already run as the SSH login.
pub fn switch_for(server: &ServerConfig) -> Result<()> {
    match (&server.host, &server.user) {
        (None, Some(user)) => switch_user(user),
        _ => Ok(()),
    }
}

/// Take on `name`'s uid, gid and supplementary groups.
pub fn switch_user(name: &str) -> Result<()> {
    let failed = |reason: String| AgentError::Privilege {
        user: name.to_string(),
        reason,
    };

    let user = User::from_name(name)
        .map_err(|e| failed(e.to_string()))?
        .ok_or_else(|| failed("no such user".to_string()))?;

    if Uid::effective() == user.uid {
        return Ok(());
    }

    let c_name = CString::new(name).map_err(|e| failed(e.to_string()))?;
    unistd::initgroups(&c_name, user.gid).map_err(|e| failed(format!("initgroups: {}", e)))?;
    unistd::setgid(user.gid).map_err(|e| failed(format!("setgid: {}", e)))?;
    unistd::setuid(user.uid).map_err(|e| failed(format!("setuid: {}", e)))?;

    info!(user = name, uid = user.uid.as_raw(), "Switched user");
    Ok(())
}
