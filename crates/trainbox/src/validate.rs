//! Host configuration and readiness validation.
//!
//! Checks accumulate findings into a [`ValidationReport`] instead of failing
//! fast, so a single run surfaces every problem at once. Errors block
//! deployment; warnings are advisory. Field validators are pure and return
//! `Ok(())` or `Err(String)` with a human-readable message.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::HostConfig;
use crate::probe::{HostInventory, estimate_usable_bytes};
use crate::registry::UserRecord;

/// Maximum allowed UID. Everything above runs into nobody/reserved ranges.
pub const UID_MAX: u32 = 60000;

/// Maximum TCP port.
pub const PORT_MAX: u32 = 65535;

/// Maximum username length (Linux limit is 32).
pub const USERNAME_MAX_LEN: usize = 32;

/// Usernames that collide with accounts already present in the workspace
/// image or on the host.
pub const RESERVED_USERNAMES: &[&str] = &["root", "admin", "daemon", "bin", "sys", "nobody"];

/// Quota multiplier reserving room for BTRFS snapshots of each home.
pub const SNAPSHOT_OVERHEAD: f64 = 1.5;

/// Fraction of usable pool capacity the plan may consume before a warning.
pub const CAPACITY_THRESHOLD: f64 = 0.80;

/// Discount for BTRFS metadata overhead when estimating usable capacity.
pub const METADATA_FACTOR: f64 = 0.95;

/// Secret values that were never meant to reach production.
pub const PLACEHOLDER_SECRETS: &[&str] = &[
    "",
    "admin",
    "password",
    "passwort",
    "changeme",
    "change_me",
    "change-me",
    "secret",
    "letmein",
];

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("username regex"));

static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?(\.[a-z0-9]([a-z0-9-]*[a-z0-9])?)+$")
        .expect("domain regex")
});

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Outcome of a validation run. Deployment may proceed iff `errors` is empty.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable report. The last line always carries the counts so
    /// scripts can grep for `Errors: 0`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for msg in &self.errors {
            out.push_str(&format!("  ERROR  {msg}\n"));
        }
        for msg in &self.warnings {
            out.push_str(&format!("  WARN   {msg}\n"));
        }
        out.push_str(&format!(
            "Errors: {}, Warnings: {}",
            self.errors.len(),
            self.warnings.len()
        ));
        out
    }
}

// ===== Pure field validators =====

/// Validate a workspace username.
///
/// Names become Linux users, container names, subvolume directories and DNS
/// labels (`<user>.<domain>`), so the rules are the intersection of all four:
/// lowercase ascii letter first, then letters, digits and hyphens, max 32.
pub fn validate_username(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("username is empty".into());
    }
    if name.len() > USERNAME_MAX_LEN {
        return Err(format!(
            "username too long ({} > {USERNAME_MAX_LEN})",
            name.len()
        ));
    }
    if !USERNAME_RE.is_match(name) {
        return Err(format!(
            "username '{name}' is invalid (must match [a-z][a-z0-9-]*)"
        ));
    }
    if name.ends_with('-') {
        return Err(format!("username '{name}' must not end with a hyphen"));
    }
    if RESERVED_USERNAMES.contains(&name) {
        return Err(format!("username '{name}' is reserved"));
    }
    Ok(())
}

/// Validate a UID against the usable range.
pub fn validate_uid(uid: u32, first_uid: u32) -> Result<(), String> {
    if uid < first_uid || uid > UID_MAX {
        return Err(format!(
            "UID {uid} out of allowed range ({first_uid}-{UID_MAX})"
        ));
    }
    Ok(())
}

/// Validate a DNS domain name.
pub fn validate_domain(domain: &str) -> Result<(), String> {
    if domain.is_empty() {
        return Err("domain is empty".into());
    }
    if domain.len() > 253 {
        return Err(format!("domain too long ({} > 253)", domain.len()));
    }
    if !DOMAIN_RE.is_match(domain) {
        return Err(format!("domain '{domain}' is not a valid DNS name"));
    }
    Ok(())
}

/// True when a secret is a known placeholder (compared case-insensitively).
pub fn is_placeholder_secret(value: &str) -> bool {
    let lowered = value.trim().to_lowercase();
    PLACEHOLDER_SECRETS.contains(&lowered.as_str())
}

// ===== Report checks =====

/// Host identity: domain and mount point.
pub fn check_host(config: &HostConfig, report: &mut ValidationReport) {
    if let Err(msg) = validate_domain(&config.host.domain) {
        report.error(format!("host.domain: {msg}"));
    }
    let mount = &config.host.mount_point;
    if !mount.starts_with('/') {
        report.error(format!("host.mount_point '{mount}' must be absolute"));
    } else if mount.chars().any(|c| c.is_whitespace()) {
        report.error(format!("host.mount_point '{mount}' contains whitespace"));
    }
}

/// Registered usernames and UIDs.
pub fn check_users(config: &HostConfig, users: &[UserRecord], report: &mut ValidationReport) {
    for record in users {
        if let Err(msg) = validate_username(&record.username) {
            report.error(format!("user '{}': {msg}", record.username));
        }
        match u32::try_from(record.uid) {
            Ok(uid) => {
                if let Err(msg) = validate_uid(uid, config.users.first_uid) {
                    report.error(format!("user '{}': {msg}", record.username));
                }
            }
            Err(_) => report.error(format!(
                "user '{}': UID {} is not a valid u32",
                record.username, record.uid
            )),
        }
    }
    if users.len() as u32 > config.users.max_users {
        report.warn(format!(
            "{} users registered, exceeding users.max_users = {}",
            users.len(),
            config.users.max_users
        ));
    }
}

/// UID headroom: the full configured user budget must fit below [`UID_MAX`].
pub fn check_uid_budget(config: &HostConfig, report: &mut ValidationReport) {
    let first = config.users.first_uid;
    if first > UID_MAX {
        report.error(format!("users.first_uid {first} exceeds {UID_MAX}"));
        return;
    }
    let last = u64::from(first) + u64::from(config.users.max_users.saturating_sub(1));
    if last > u64::from(UID_MAX) {
        report.error(format!(
            "UID range {first}..={last} for {} users exceeds the maximum UID {UID_MAX}",
            config.users.max_users
        ));
    }
}

/// Port budgets and collisions.
///
/// Every class needs `max_users` consecutive ports below 65536, the class
/// ranges must not overlap each other, and ports already handed out must be
/// unique. `busy_ports` (from a live bind probe) only produce warnings since
/// a running stack legitimately holds its own ports.
pub fn check_ports(
    config: &HostConfig,
    users: &[UserRecord],
    busy_ports: &[u16],
    report: &mut ValidationReport,
) {
    let span = config.users.max_users.max(1);
    let classes = config.ports.classes();

    for (name, base) in classes {
        let last = u32::from(base) + span - 1;
        if last > PORT_MAX {
            report.error(format!(
                "ports.{name}_base {base} leaves no room for {span} users (would reach {last} > {PORT_MAX})"
            ));
        }
    }

    for (i, (name_a, base_a)) in classes.iter().enumerate() {
        for (name_b, base_b) in classes.iter().skip(i + 1) {
            let a = u32::from(*base_a)..u32::from(*base_a) + span;
            let b = u32::from(*base_b)..u32::from(*base_b) + span;
            if a.start < b.end && b.start < a.end {
                report.error(format!(
                    "port ranges for {name_a} ({}..{}) and {name_b} ({}..{}) overlap",
                    a.start,
                    a.end - 1,
                    b.start,
                    b.end - 1
                ));
            }
        }
    }

    let mut seen: Vec<(i64, String)> = Vec::new();
    for record in users {
        for (class, port) in record.ports() {
            if port > i64::from(PORT_MAX) || port <= 0 {
                report.error(format!(
                    "user '{}': {class} port {port} is out of range",
                    record.username
                ));
                continue;
            }
            if let Some((_, owner)) = seen.iter().find(|(p, _)| *p == port) {
                report.error(format!(
                    "user '{}': {class} port {port} already allocated to {owner}",
                    record.username
                ));
            } else {
                seen.push((port, format!("{}/{class}", record.username)));
            }
            if busy_ports.contains(&(port as u16)) {
                report.warn(format!(
                    "port {port} ({}/{class}) is currently in use on the host (expected while the stack is running)",
                    record.username
                ));
            }
        }
    }
}

/// RAID feasibility against the spinning disks actually present.
pub fn check_raid(config: &HostConfig, inventory: &HostInventory, report: &mut ValidationReport) {
    let level = config.storage.raid_level;
    let Some(hdds) = inventory.hdds() else {
        report.warn("could not enumerate block devices; skipping RAID feasibility check".to_string());
        return;
    };
    let need = level.min_disks();
    let have = hdds.len();
    if have >= need {
        return;
    }
    let msg = format!("storage.raid_level = {level} needs {need} HDDs, found {have}");
    if level.is_redundant() {
        report.error(msg);
    } else {
        report.warn(msg);
    }
}

/// Memory plan vs. physical RAM.
pub fn check_memory(
    config: &HostConfig,
    user_count: usize,
    inventory: &HostInventory,
    report: &mut ValidationReport,
) {
    let ws = &config.workspace;
    if ws.memory_guarantee_mb > ws.memory_limit_mb {
        report.error(format!(
            "workspace.memory_guarantee_mb ({}) exceeds workspace.memory_limit_mb ({})",
            ws.memory_guarantee_mb, ws.memory_limit_mb
        ));
    }

    let Some(total) = inventory.mem_total_bytes else {
        report.warn("could not read host memory size; skipping memory plan check".to_string());
        return;
    };
    let guaranteed = ws.memory_guarantee_mb.saturating_mul(user_count as u64) * MIB;
    if guaranteed > total {
        report.warn(format!(
            "guaranteed memory for {user_count} users ({} GiB) exceeds host RAM ({} GiB)",
            guaranteed / GIB,
            total / GIB
        ));
    }
    if ws.memory_limit_mb * MIB > total {
        report.warn(format!(
            "workspace.memory_limit_mb ({} MiB) exceeds host RAM ({} GiB)",
            ws.memory_limit_mb,
            total / GIB
        ));
    }
}

/// Quota plan vs. estimated pool capacity.
///
/// Every user may fill their quota, and snapshots need headroom on top, so
/// the plan is `quota * users * SNAPSHOT_OVERHEAD`. That must stay under
/// `CAPACITY_THRESHOLD` of the usable pool after metadata overhead.
pub fn check_capacity(
    config: &HostConfig,
    user_count: usize,
    inventory: &HostInventory,
    report: &mut ValidationReport,
) {
    if config.storage.user_quota_gb == 0 || user_count == 0 {
        return;
    }
    let Some(hdds) = inventory.hdds() else {
        return; // already warned by check_raid
    };
    if hdds.is_empty() {
        return;
    }
    let usable = estimate_usable_bytes(config.storage.raid_level, &hdds) as f64 * METADATA_FACTOR;
    let planned = (config.storage.user_quota_gb * user_count as u64 * GIB) as f64
        * SNAPSHOT_OVERHEAD;
    if planned > usable * CAPACITY_THRESHOLD {
        report.warn(format!(
            "planned usage {:.0} GiB (quota x {user_count} users x {SNAPSHOT_OVERHEAD} snapshot overhead) exceeds {:.0}% of usable capacity {:.0} GiB",
            planned / GIB as f64,
            CAPACITY_THRESHOLD * 100.0,
            usable / GIB as f64
        ));
    }
}

/// Secrets must not be placeholders.
pub fn check_secrets(config: &HostConfig, report: &mut ValidationReport) {
    let secrets = [
        ("secrets.grafana_admin_password", &config.secrets.grafana_admin_password),
        ("secrets.guacamole_password", &config.secrets.guacamole_password),
    ];
    for (key, value) in secrets {
        if is_placeholder_secret(value) {
            report.error(format!("{key} is a placeholder; set a real secret"));
        }
    }
    // The per-user default may stay a placeholder: the generator then issues
    // a random password per user instead.
}

/// GPU reservations vs. GPUs actually visible.
pub fn check_gpus(
    config: &HostConfig,
    user_count: usize,
    inventory: &HostInventory,
    report: &mut ValidationReport,
) {
    let per_user = config.workspace.gpu_count;
    if per_user == 0 {
        return;
    }
    let Some(available) = inventory.gpus else {
        report.warn("could not probe GPUs; skipping GPU reservation check".to_string());
        return;
    };
    if available == 0 {
        report.warn(format!(
            "workspace.gpu_count = {per_user} but no GPU is visible to nvidia-smi"
        ));
        return;
    }
    let requested = u64::from(per_user) * user_count as u64;
    if requested > u64::from(available) {
        report.warn(format!(
            "{user_count} users reserving {per_user} GPU(s) each need {requested}, host has {available}"
        ));
    }
}

/// Backup configuration sanity.
pub fn check_backup(config: &HostConfig, report: &mut ValidationReport) {
    if !config.backups_enabled() {
        report.warn("backup.repository is empty; backups are disabled".to_string());
        return;
    }
    let pw = &config.backup.password_file;
    if !pw.starts_with('/') {
        report.error(format!("backup.password_file '{pw}' must be absolute"));
    } else if !std::path::Path::new(pw).exists() {
        report.warn(format!("backup.password_file '{pw}' does not exist yet"));
    }
}

/// Run the full battery of checks.
pub fn run(
    config: &HostConfig,
    users: &[UserRecord],
    inventory: &HostInventory,
    busy_ports: &[u16],
) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_host(config, &mut report);
    check_users(config, users, &mut report);
    check_uid_budget(config, &mut report);
    check_ports(config, users, busy_ports, &mut report);
    check_raid(config, inventory, &mut report);
    check_memory(config, users.len(), inventory, &mut report);
    check_capacity(config, users.len(), inventory, &mut report);
    check_secrets(config, &mut report);
    check_gpus(config, users.len(), inventory, &mut report);
    check_backup(config, &mut report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::BlockDevice;
    use crate::registry::UserRecord;
    use crate::storage::RaidLevel;

    fn record(username: &str, slot: i64) -> UserRecord {
        UserRecord {
            username: username.to_string(),
            slot,
            uid: 2000 + slot,
            ssh_port: 2222 + slot,
            vnc_port: 5901 + slot,
            rdp_port: 3390 + slot,
            novnc_port: 6080 + slot,
            password_env: format!("{}_PASSWORD", username.to_uppercase()),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            is_active: true,
        }
    }

    fn disk(name: &str, gib: u64) -> BlockDevice {
        BlockDevice {
            name: name.to_string(),
            size_bytes: gib * 1024 * 1024 * 1024,
            rotational: true,
        }
    }

    fn valid_config() -> HostConfig {
        let mut cfg = HostConfig::default();
        cfg.host.domain = "ml.example.org".to_string();
        cfg.storage.raid_level = RaidLevel::Raid10;
        cfg.secrets.grafana_admin_password = "s3cr3t-grafana-pw".to_string();
        cfg.secrets.guacamole_password = "s3cr3t-guac-pw".to_string();
        cfg.backup.repository = "rclone:gdrive:trainbox".to_string();
        cfg
    }

    fn full_inventory() -> HostInventory {
        HostInventory {
            disks: Some(vec![
                disk("sda", 8000),
                disk("sdb", 8000),
                disk("sdc", 8000),
                disk("sdd", 8000),
            ]),
            mem_total_bytes: Some(128 * 1024 * 1024 * 1024),
            gpus: Some(2),
        }
    }

    // ===== Username validation =====

    #[test]
    fn username_valid_simple() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob2").is_ok());
        assert!(validate_username("ml-intern").is_ok());
    }

    #[test]
    fn username_reject_empty() {
        assert!(validate_username("").is_err());
    }

    #[test]
    fn username_reject_bad_start() {
        assert!(validate_username("2fast").is_err());
        assert!(validate_username("-alice").is_err());
        assert!(validate_username("_alice").is_err());
    }

    #[test]
    fn username_reject_trailing_hyphen() {
        assert!(validate_username("alice-").is_err());
    }

    #[test]
    fn username_reject_special_chars() {
        assert!(validate_username("alice;whoami").is_err());
        assert!(validate_username("alice$HOME").is_err());
        assert!(validate_username("alice`id`").is_err());
        assert!(validate_username("alice bob").is_err());
        assert!(validate_username("alice_bob").is_err());
        assert!(validate_username("Alice").is_err());
    }

    #[test]
    fn username_reject_reserved() {
        assert!(validate_username("root").is_err());
        assert!(validate_username("nobody").is_err());
    }

    #[test]
    fn username_length_boundary() {
        assert!(validate_username(&"a".repeat(32)).is_ok());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    // ===== UID validation =====

    #[test]
    fn uid_boundaries() {
        assert!(validate_uid(2000, 2000).is_ok());
        assert!(validate_uid(60000, 2000).is_ok());
        assert!(validate_uid(1999, 2000).is_err());
        assert!(validate_uid(60001, 2000).is_err());
    }

    // ===== Domain validation =====

    #[test]
    fn domain_accepts_subdomains() {
        assert!(validate_domain("ml.example.org").is_ok());
        assert!(validate_domain("gpu-box.lab.example.org").is_ok());
    }

    #[test]
    fn domain_rejects_garbage() {
        assert!(validate_domain("").is_err());
        assert!(validate_domain("localhost").is_err()); // needs a dot
        assert!(validate_domain("ml.example.org ").is_err());
        assert!(validate_domain("-bad.example.org").is_err());
        assert!(validate_domain("http://ml.example.org").is_err());
    }

    // ===== Placeholder secrets =====

    #[test]
    fn placeholder_detection() {
        assert!(is_placeholder_secret("CHANGE_ME"));
        assert!(is_placeholder_secret("changeme"));
        assert!(is_placeholder_secret("  admin  "));
        assert!(is_placeholder_secret(""));
        assert!(!is_placeholder_secret("u7#pQ2x!longrandom"));
    }

    // ===== Full run =====

    #[test]
    fn full_pass_reports_zero_errors() {
        let cfg = valid_config();
        let users = vec![record("alice", 0), record("bob", 1)];
        let report = run(&cfg, &users, &full_inventory(), &[]);
        assert!(report.passed(), "unexpected errors: {:?}", report.errors);
        assert!(report.render().contains("Errors: 0"));
    }

    #[test]
    fn raid10_with_three_disks_is_an_error() {
        let cfg = valid_config();
        let mut inv = full_inventory();
        inv.disks = Some(vec![disk("sda", 8000), disk("sdb", 8000), disk("sdc", 8000)]);
        let report = run(&cfg, &[], &inv, &[]);
        assert!(!report.passed());
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.contains("raid10") && e.contains("4"))
        );
    }

    #[test]
    fn raid0_shortfall_is_only_a_warning() {
        let mut cfg = valid_config();
        cfg.storage.raid_level = RaidLevel::Raid0;
        let mut inv = full_inventory();
        inv.disks = Some(vec![disk("sda", 8000)]);
        let report = run(&cfg, &[], &inv, &[]);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("raid0")));
    }

    #[test]
    fn missing_disk_probe_degrades_to_warning() {
        let cfg = valid_config();
        let mut inv = full_inventory();
        inv.disks = None;
        let report = run(&cfg, &[], &inv, &[]);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("block devices")));
    }

    #[test]
    fn placeholder_secret_is_an_error() {
        let mut cfg = valid_config();
        cfg.secrets.grafana_admin_password = "changeme".to_string();
        let report = run(&cfg, &[], &full_inventory(), &[]);
        assert!(!report.passed());
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.contains("grafana_admin_password"))
        );
    }

    #[test]
    fn uid_budget_overflow_is_an_error() {
        let mut cfg = valid_config();
        cfg.users.first_uid = 59990;
        cfg.users.max_users = 32;
        let mut report = ValidationReport::default();
        check_uid_budget(&cfg, &mut report);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("60021"));
    }

    #[test]
    fn port_budget_overflow_is_an_error() {
        let mut cfg = valid_config();
        cfg.ports.novnc_base = 65530;
        cfg.users.max_users = 16;
        let report = run(&cfg, &[], &full_inventory(), &[]);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.contains("ports.novnc_base"))
        );
    }

    #[test]
    fn overlapping_port_ranges_are_an_error() {
        let mut cfg = valid_config();
        cfg.ports.ssh_base = 6000;
        cfg.ports.novnc_base = 6010;
        cfg.users.max_users = 32;
        let report = run(&cfg, &[], &full_inventory(), &[]);
        assert!(report.errors.iter().any(|e| e.contains("overlap")));
    }

    #[test]
    fn duplicate_allocated_port_is_an_error() {
        let cfg = valid_config();
        let mut bob = record("bob", 1);
        bob.ssh_port = 2222; // collides with alice slot 0
        let users = vec![record("alice", 0), bob];
        let report = run(&cfg, &users, &full_inventory(), &[]);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.contains("already allocated"))
        );
    }

    #[test]
    fn busy_port_is_a_warning() {
        let cfg = valid_config();
        let users = vec![record("alice", 0)];
        let report = run(&cfg, &users, &full_inventory(), &[2222]);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("2222")));
    }

    #[test]
    fn memory_guarantee_above_limit_is_an_error() {
        let mut cfg = valid_config();
        cfg.workspace.memory_guarantee_mb = 64000;
        cfg.workspace.memory_limit_mb = 32000;
        let report = run(&cfg, &[], &full_inventory(), &[]);
        assert!(
            report
                .errors
                .iter()
                .any(|e| e.contains("memory_guarantee_mb"))
        );
    }

    #[test]
    fn memory_oversubscription_is_a_warning() {
        let cfg = valid_config();
        // 16 GiB guaranteed x 10 users = 160 GiB > 128 GiB host RAM
        let users: Vec<UserRecord> = (0..10)
            .map(|i| record(&format!("user{i}"), i))
            .collect();
        let report = run(&cfg, &users, &full_inventory(), &[]);
        assert!(report.passed());
        assert!(
            report
                .warnings
                .iter()
                .any(|w| w.contains("guaranteed memory"))
        );
    }

    #[test]
    fn capacity_plan_overflow_is_a_warning() {
        let mut cfg = valid_config();
        cfg.storage.user_quota_gb = 8000;
        // 4x 8000 GiB raid10 -> ~16000 GiB usable; 3 users x 8000 x 1.5 = 36000
        let users = vec![record("alice", 0), record("bob", 1), record("carol", 2)];
        let report = run(&cfg, &users, &full_inventory(), &[]);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("snapshot overhead")));
    }

    #[test]
    fn gpu_oversubscription_is_a_warning() {
        let mut cfg = valid_config();
        cfg.workspace.gpu_count = 1;
        // 3 users x 1 GPU > 2 GPUs present
        let users = vec![record("alice", 0), record("bob", 1), record("carol", 2)];
        let report = run(&cfg, &users, &full_inventory(), &[]);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("GPU")));
    }

    #[test]
    fn disabled_backups_are_a_warning() {
        let mut cfg = valid_config();
        cfg.backup.repository = String::new();
        let report = run(&cfg, &[], &full_inventory(), &[]);
        assert!(report.passed());
        assert!(report.warnings.iter().any(|w| w.contains("backups are disabled")));
    }

    #[test]
    fn report_render_lists_findings() {
        let mut report = ValidationReport::default();
        report.error("first problem");
        report.warn("minor issue");
        let rendered = report.render();
        assert!(rendered.contains("ERROR  first problem"));
        assert!(rendered.contains("WARN   minor issue"));
        assert!(rendered.ends_with("Errors: 1, Warnings: 1"));
    }
}
