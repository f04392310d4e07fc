//! Allocation records.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One registered workspace user with every value that was allocated for
/// them. Allocations are written once at registration and never recomputed:
/// changing port bases in the config later must not reshuffle existing users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub username: String,
    /// Allocation slot. Monotonic, never reused after removal.
    pub slot: i64,
    pub uid: i64,
    pub ssh_port: i64,
    pub vnc_port: i64,
    pub rdp_port: i64,
    pub novnc_port: i64,
    /// Name of the env variable carrying the user's initial password.
    pub password_env: String,
    pub created_at: String,
    pub is_active: bool,
}

impl UserRecord {
    /// Every allocated port with its class name, in stable display order.
    pub fn ports(&self) -> [(&'static str, i64); 4] {
        [
            ("ssh", self.ssh_port),
            ("vnc", self.vnc_port),
            ("rdp", self.rdp_port),
            ("novnc", self.novnc_port),
        ]
    }

    /// Container name for this user's workspace.
    pub fn container_name(&self) -> String {
        format!("trainbox-{}", self.username)
    }
}

/// Env variable name carrying a user's initial password.
pub fn password_env_name(username: &str) -> String {
    format!(
        "{}_PASSWORD",
        username.to_uppercase().replace('-', "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_env_name_is_shell_safe() {
        assert_eq!(password_env_name("alice"), "ALICE_PASSWORD");
        assert_eq!(password_env_name("ml-intern"), "ML_INTERN_PASSWORD");
    }

    #[test]
    fn container_names_carry_the_prefix() {
        let record = UserRecord {
            username: "alice".to_string(),
            slot: 0,
            uid: 2000,
            ssh_port: 2222,
            vnc_port: 5901,
            rdp_port: 3390,
            novnc_port: 6080,
            password_env: "ALICE_PASSWORD".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            is_active: true,
        };
        assert_eq!(record.container_name(), "trainbox-alice");
        assert_eq!(record.ports()[0], ("ssh", 2222));
    }
}
