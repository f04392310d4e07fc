//! Input validation for trainbox-entrypoint.
//!
//! Everything arrives through container environment variables that an
//! operator (or a compromised manifest) controls, and most values end up in
//! command lines or config files. All validation is pure (no side effects)
//! and returns Ok(()) or Err(String) with a human-readable message.

/// Minimum allowed UID. Below this live the image's system accounts.
pub const UID_MIN: u32 = 1000;

/// Maximum allowed UID. Everything above runs into nobody/reserved ranges.
pub const UID_MAX: u32 = 60000;

/// Maximum username length (Linux limit is 32).
pub const USERNAME_MAX_LEN: usize = 32;

/// Maximum password length accepted by chpasswd in one line.
pub const PASSWORD_MAX_LEN: usize = 512;

/// Accounts that already exist in the workspace image.
pub const RESERVED_USERNAMES: &[&str] = &["root", "admin", "daemon", "bin", "sys", "nobody"];

/// Bounds for a sane X display, either axis.
pub const GEOMETRY_MIN: u32 = 320;
pub const GEOMETRY_MAX: u32 = 8192;

/// Validate a workspace username.
///
/// Rules:
/// - Starts with a lowercase ascii letter
/// - Only lowercase ascii, digits, hyphen
/// - Max 32 characters
/// - Not a reserved account name
pub fn validate_username(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("username is empty".into());
    }
    if name.len() > USERNAME_MAX_LEN {
        return Err(format!("username too long ({} > {USERNAME_MAX_LEN})", name.len()));
    }
    if !name.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        return Err("username must start with a lowercase letter".into());
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return Err("username contains invalid characters (allowed: a-z, 0-9, -)".into());
    }
    if RESERVED_USERNAMES.contains(&name) {
        return Err(format!("username '{name}' is reserved"));
    }
    Ok(())
}

/// Validate a UID is in the allowed range.
pub fn validate_uid(uid: u32) -> Result<(), String> {
    if uid < UID_MIN || uid > UID_MAX {
        return Err(format!("UID {uid} out of allowed range ({UID_MIN}-{UID_MAX})"));
    }
    Ok(())
}

/// Validate a VNC geometry string (WIDTHxHEIGHT). The value is interpolated
/// into the vncserver command line, so anything but digits and one 'x' is
/// rejected outright.
pub fn validate_geometry(geometry: &str) -> Result<(), String> {
    let Some((width, height)) = geometry.split_once('x') else {
        return Err(format!("geometry '{geometry}' must be WIDTHxHEIGHT"));
    };
    for (axis, value) in [("width", width), ("height", height)] {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("geometry {axis} '{value}' is not a number"));
        }
        let parsed: u32 = value
            .parse()
            .map_err(|_| format!("geometry {axis} '{value}' is out of range"))?;
        if !(GEOMETRY_MIN..=GEOMETRY_MAX).contains(&parsed) {
            return Err(format!(
                "geometry {axis} {parsed} out of range ({GEOMETRY_MIN}-{GEOMETRY_MAX})"
            ));
        }
    }
    Ok(())
}

/// Validate an initial password before it is fed to chpasswd (and vncpasswd).
/// chpasswd reads `user:password` lines, so a newline would smuggle in a
/// second entry.
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("password is empty (unset the variable to disable password login)".into());
    }
    if password.len() > PASSWORD_MAX_LEN {
        return Err(format!("password too long ({} > {PASSWORD_MAX_LEN})", password.len()));
    }
    if password.chars().any(|c| matches!(c, '\n' | '\r' | '\0')) {
        return Err("password contains line breaks or null bytes".into());
    }
    Ok(())
}
