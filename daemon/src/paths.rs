//! Canonical file paths for flux on Linux.
//!
//! Raw input devices usually require root, so the daemon runs elevated while
//! the settings belong to the person sitting at the keyboard.  The home
//! directory is therefore resolved for the interactive user, trying in order:
//!   1. the first user listed by `who` (the active login session)
//!   2. `$SUDO_USER`, then `$USER`
//!   3. the effective uid's passwd entry
//!   4. the process's own home directory
//!
//! Files:
//!   - `<home>/.config/flux/settings.json`  Written by the settings UI, read by the daemon.
//!   - `<tmp>/flux/status.json`             Written by the daemon.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const APP_DIR_NAME: &str = "flux";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const STATUS_FILE_NAME: &str = "status.json";

/// Returns the home directory of the interactive user.
pub fn resolve_home() -> Result<PathBuf> {
    let users = [session_user(), env_user("SUDO_USER"), env_user("USER")];
    for user in users.into_iter().flatten() {
        match home_for_user(&user) {
            Some(home) => {
                debug!(%user, home = %home.display(), "resolved home directory");
                return Ok(home);
            }
            None => debug!(%user, "no passwd entry"),
        }
    }

    if let Some(home) = effective_user_home() {
        return Ok(home);
    }

    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .context("Failed to determine a home directory")
}

/// Returns the settings file path: `<home>/.config/flux/settings.json`
pub fn settings_file_path(home: &Path) -> PathBuf {
    home.join(".config").join(APP_DIR_NAME).join(SETTINGS_FILE_NAME)
}

/// Returns the default status file path: `<tmp>/flux/status.json`
pub fn default_status_path() -> PathBuf {
    std::env::temp_dir().join(APP_DIR_NAME).join(STATUS_FILE_NAME)
}

/// Expands a leading `~` or `~/` against `home`; other paths pass through.
pub fn expand_home(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        home.to_path_buf()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else {
        PathBuf::from(raw)
    }
}

// ── User discovery ────────────────────────────────────────────────────────────

fn session_user() -> Option<String> {
    let output = Command::new("who").output().ok()?;
    if !output.status.success() {
        return None;
    }
    first_session_user(&String::from_utf8_lossy(&output.stdout))
}

/// Login name on the first line of `who` output.
fn first_session_user(who_output: &str) -> Option<String> {
    who_output
        .lines()
        .next()?
        .split_whitespace()
        .next()
        .map(str::to_string)
}

fn env_user(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|u| !u.is_empty())
}

#[cfg(unix)]
fn home_for_user(name: &str) -> Option<PathBuf> {
    let name = std::ffi::CString::new(name).ok()?;
    passwd_home(|pwd, buf, result| unsafe {
        libc::getpwnam_r(name.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), result)
    })
}

#[cfg(unix)]
fn effective_user_home() -> Option<PathBuf> {
    let uid = unsafe { libc::geteuid() };
    passwd_home(|pwd, buf, result| unsafe {
        libc::getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len(), result)
    })
}

/// Runs a reentrant passwd lookup and extracts `pw_dir`.
#[cfg(unix)]
fn passwd_home<F>(lookup: F) -> Option<PathBuf>
where
    F: FnOnce(&mut libc::passwd, &mut [libc::c_char], &mut *mut libc::passwd) -> libc::c_int,
{
    use std::ffi::{CStr, OsStr};
    use std::os::unix::ffi::OsStrExt;

    let mut buf = vec![0 as libc::c_char; 16 * 1024];
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let rc = lookup(&mut pwd, buf.as_mut_slice(), &mut result);
    if rc != 0 || result.is_null() || pwd.pw_dir.is_null() {
        return None;
    }
    let dir = unsafe { CStr::from_ptr(pwd.pw_dir) };
    if dir.to_bytes().is_empty() {
        return None;
    }
    Some(PathBuf::from(OsStr::from_bytes(dir.to_bytes())))
}

#[cfg(not(unix))]
fn home_for_user(_name: &str) -> Option<PathBuf> {
    None
}

#[cfg(not(unix))]
fn effective_user_home() -> Option<PathBuf> {
    None
}
