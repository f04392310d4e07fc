//! trainbox-entrypoint: PID-1 bootstrap for workspace containers.
//!
//! Runs once at container start: creates the Linux user from the manifest's
//! environment, writes daemon configuration, fixes ownership, prints the
//! connection banner and execs supervisord. A failed step aborts the boot;
//! the runtime restarts the container and the operator reads the log.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use trainbox_entrypoint::render;
use trainbox_entrypoint::validate;

const SUPERVISORD_BIN: &str = "/usr/bin/supervisord";
const SUPERVISORD_CONF: &str = "/etc/supervisor/supervisord.conf";
const SUPERVISOR_LOG_DIR: &str = "/var/log/supervisor";

/// Home subdirectories created on first boot. The home itself is a mounted
/// BTRFS subvolume, so everything must cope with already existing.
const HOME_SUBDIRS: &[&str] = &[
    "workspace",
    "datasets",
    "notebooks",
    ".config",
    ".vnc",
    ".local/share/code-server",
];

#[derive(Debug, Parser)]
#[command(
    name = "trainbox-entrypoint",
    version,
    about = "Bootstrap a trainbox workspace container, then exec supervisord."
)]
struct Args {
    /// Workspace username
    #[arg(long, env = "TRAINBOX_USER")]
    user: String,
    /// Numeric UID; the primary group gets the same id
    #[arg(long, env = "TRAINBOX_UID")]
    uid: u32,
    /// Initial password; omit to leave password login disabled
    #[arg(long, env = "TRAINBOX_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// VNC desktop geometry
    #[arg(long, env = "TRAINBOX_VNC_GEOMETRY", default_value = "1920x1080")]
    geometry: String,
    /// Public hostname for the connection banner
    #[arg(long, env = "TRAINBOX_DOMAIN", default_value = "localhost")]
    domain: String,
    /// Host-mapped ports, banner only; defaults fall back to container ports
    #[arg(long, env = "TRAINBOX_SSH_PORT", default_value_t = render::SSH_PORT)]
    ssh_port: u16,
    #[arg(long, env = "TRAINBOX_VNC_PORT", default_value_t = render::VNC_PORT)]
    vnc_port: u16,
    #[arg(long, env = "TRAINBOX_RDP_PORT", default_value_t = render::RDP_PORT)]
    rdp_port: u16,
    #[arg(long, env = "TRAINBOX_NOVNC_PORT", default_value_t = render::NOVNC_PORT)]
    novnc_port: u16,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("trainbox-entrypoint: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    ensure_root()?;
    validate::validate_username(&args.user).map_err(|msg| anyhow!(msg))?;
    validate::validate_uid(args.uid).map_err(|msg| anyhow!(msg))?;
    validate::validate_geometry(&args.geometry).map_err(|msg| anyhow!(msg))?;
    if let Some(password) = &args.password {
        validate::validate_password(password).map_err(|msg| anyhow!(msg))?;
    }

    ensure_group(&args.user, args.uid)?;
    ensure_user(&args.user, args.uid)?;
    if let Some(password) = &args.password {
        set_password(&args.user, password)?;
    }

    let home = PathBuf::from(format!("/home/{}", args.user));
    create_home_layout(&home)?;
    write_configs(&args, &home)?;
    fix_ownership(&args.user, args.uid, &home)?;

    print!(
        "{}",
        render::connection_banner(
            &args.user,
            &args.domain,
            args.ssh_port,
            args.vnc_port,
            args.rdp_port,
            args.novnc_port,
        )
    );

    exec_supervisord()
}

fn ensure_root() -> Result<()> {
    // useradd, chpasswd and supervisord all need root; the container drops
    // privileges per program instead.
    if unsafe { libc::geteuid() } != 0 {
        bail!("must run as root inside the container");
    }
    Ok(())
}

fn entity_exists(database: &str, key: &str) -> bool {
    Command::new("getent")
        .args([database, key])
        .stdout(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn ensure_group(user: &str, uid: u32) -> Result<()> {
    if entity_exists("group", user) {
        return Ok(());
    }
    run_cmd("groupadd", &["-g", &uid.to_string(), user])?;
    Ok(())
}

fn ensure_user(user: &str, uid: u32) -> Result<()> {
    if entity_exists("passwd", user) {
        return Ok(());
    }
    let uid_str = uid.to_string();
    run_cmd(
        "useradd",
        &[
            "-u",
            &uid_str,
            "-g",
            &uid_str,
            "-d",
            &format!("/home/{user}"),
            "-s",
            "/bin/bash",
            "-M",
            user,
        ],
    )?;
    Ok(())
}

/// Feed `user:password` to chpasswd over stdin so the password never shows
/// up in an argv.
fn set_password(user: &str, password: &str) -> Result<()> {
    let mut child = Command::new("chpasswd")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawning chpasswd")?;

    {
        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("chpasswd stdin unavailable"))?;
        stdin
            .write_all(format!("{user}:{password}\n").as_bytes())
            .context("writing to chpasswd")?;
    }

    let output = child.wait_with_output().context("waiting for chpasswd")?;
    if !output.status.success() {
        bail!("chpasswd failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(())
}

/// Obfuscate the password with `vncpasswd -f` and store it for -rfbauth.
fn write_vnc_password(home: &Path, password: &str) -> Result<()> {
    let mut child = Command::new("vncpasswd")
        .arg("-f")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("spawning vncpasswd")?;

    {
        let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("vncpasswd stdin unavailable"))?;
        stdin.write_all(format!("{password}\n").as_bytes()).context("writing to vncpasswd")?;
    }

    let output = child.wait_with_output().context("waiting for vncpasswd")?;
    if !output.status.success() {
        bail!("vncpasswd failed: {}", String::from_utf8_lossy(&output.stderr).trim());
    }

    let passwd_file = home.join(".vnc/passwd");
    fs::write(&passwd_file, &output.stdout)
        .with_context(|| format!("writing {}", passwd_file.display()))?;
    fs::set_permissions(&passwd_file, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

fn create_home_layout(home: &Path) -> Result<()> {
    for subdir in HOME_SUBDIRS {
        let path = home.join(subdir);
        fs::create_dir_all(&path).with_context(|| format!("creating {}", path.display()))?;
    }
    Ok(())
}

fn write_configs(args: &Args, home: &Path) -> Result<()> {
    let xstartup = home.join(".vnc/xstartup");
    fs::write(&xstartup, render::vnc_xstartup())
        .with_context(|| format!("writing {}", xstartup.display()))?;
    fs::set_permissions(&xstartup, fs::Permissions::from_mode(0o755))?;

    if let Some(password) = &args.password {
        write_vnc_password(home, password)?;
    }

    let code_dir = home.join(".config/code-server");
    fs::create_dir_all(&code_dir)?;
    let code_config = code_dir.join("config.yaml");
    fs::write(&code_config, render::code_server_config(args.password.as_deref()))
        .with_context(|| format!("writing {}", code_config.display()))?;
    fs::set_permissions(&code_config, fs::Permissions::from_mode(0o600))?;

    let jupyter_dir = home.join(".jupyter");
    fs::create_dir_all(&jupyter_dir)?;
    let jupyter_config = jupyter_dir.join("jupyter_server_config.py");
    fs::write(&jupyter_config, render::jupyter_config(&args.user))
        .with_context(|| format!("writing {}", jupyter_config.display()))?;

    fs::create_dir_all(SUPERVISOR_LOG_DIR)?;
    if let Some(parent) = Path::new(SUPERVISORD_CONF).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        SUPERVISORD_CONF,
        render::supervisord_conf(&args.user, &args.geometry, args.password.is_some()),
    )
    .with_context(|| format!("writing {SUPERVISORD_CONF}"))?;

    Ok(())
}

fn fix_ownership(user: &str, uid: u32, home: &Path) -> Result<()> {
    let home_str = home.to_str().ok_or_else(|| anyhow!("home path is not valid UTF-8"))?;
    run_cmd("chown", &["-R", &format!("{uid}:{uid}"), home_str])?;
    fs::set_permissions(home, fs::Permissions::from_mode(0o750))
        .with_context(|| format!("setting mode on /home/{user}"))?;
    Ok(())
}

fn exec_supervisord() -> Result<()> {
    // exec only returns on failure.
    let err = Command::new(SUPERVISORD_BIN)
        .args(["-c", SUPERVISORD_CONF])
        .exec();
    Err(anyhow!(err).context(format!("execing {SUPERVISORD_BIN}")))
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("executing {cmd}"))?;

    if !output.status.success() {
        bail!(
            "{cmd} failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
