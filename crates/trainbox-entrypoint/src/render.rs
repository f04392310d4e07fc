//! Config file and banner rendering.
//!
//! Every function here is string in, string out. The binary decides where
//! the results land on disk.

/// In-container service ports. SSH/VNC/RDP/noVNC are published to the host;
/// code-server and Jupyter stay on loopback and are reached over SSH.
pub const SSH_PORT: u16 = 22;
pub const VNC_PORT: u16 = 5901;
pub const RDP_PORT: u16 = 3389;
pub const NOVNC_PORT: u16 = 6080;
pub const CODE_SERVER_PORT: u16 = 8080;
pub const JUPYTER_PORT: u16 = 8888;

/// One supervisord program section. Programs with a `user` also get HOME and
/// USER set, since supervisord does not run a login shell.
fn program(name: &str, command: &str, user: Option<&str>, priority: u32) -> String {
    let mut section = format!(
        "[program:{name}]\n\
         command={command}\n\
         priority={priority}\n\
         autorestart=true\n\
         redirect_stderr=true\n\
         stdout_logfile=/var/log/supervisor/{name}.log\n"
    );
    if let Some(user) = user {
        section.push_str(&format!(
            "user={user}\nenvironment=HOME=\"/home/{user}\",USER=\"{user}\"\n"
        ));
    }
    section
}

/// The full supervisord configuration for one workspace.
///
/// `vnc_password` selects between VNC password auth (file written by the
/// bootstrap) and an open server; open is only acceptable because the VNC
/// port sits behind the compose port mapping and Guacamole.
pub fn supervisord_conf(user: &str, geometry: &str, vnc_password: bool) -> String {
    let vnc_auth = if vnc_password {
        format!("-rfbauth /home/{user}/.vnc/passwd")
    } else {
        "-SecurityTypes None".to_string()
    };

    let mut conf = String::from(
        "[supervisord]\n\
         nodaemon=true\n\
         user=root\n\
         logfile=/var/log/supervisor/supervisord.log\n\
         pidfile=/var/run/supervisord.pid\n",
    );

    let sections = [
        program("sshd", "/usr/sbin/sshd -D -e", None, 10),
        // Display :1 listens on 5901.
        program(
            "vncserver",
            &format!("/usr/bin/vncserver :1 -fg -geometry {geometry} -localhost no {vnc_auth}"),
            Some(user),
            20,
        ),
        program("xrdp", "/usr/sbin/xrdp --nodaemon", None, 30),
        program(
            "novnc",
            &format!(
                "/usr/bin/websockify --web /usr/share/novnc {NOVNC_PORT} localhost:{VNC_PORT}"
            ),
            None,
            40,
        ),
        program(
            "code-server",
            &format!("/usr/bin/code-server --config /home/{user}/.config/code-server/config.yaml"),
            Some(user),
            50,
        ),
        program(
            "jupyter",
            &format!(
                "/usr/bin/jupyter lab --config=/home/{user}/.jupyter/jupyter_server_config.py"
            ),
            Some(user),
            60,
        ),
        program(
            "pulseaudio",
            "/usr/bin/pulseaudio --daemonize=no --exit-idle-time=-1",
            Some(user),
            70,
        ),
    ];

    for section in &sections {
        conf.push('\n');
        conf.push_str(section);
    }
    conf
}

/// The xstartup script TigerVNC runs to bring up the desktop session.
pub fn vnc_xstartup() -> String {
    "#!/bin/sh\n\
     unset SESSION_MANAGER\n\
     unset DBUS_SESSION_BUS_ADDRESS\n\
     exec startxfce4\n"
        .to_string()
}

/// code-server config.yaml. Binds loopback only; without a password the
/// editor falls back to no auth, which is fine behind the SSH tunnel.
pub fn code_server_config(password: Option<&str>) -> String {
    match password {
        Some(password) => format!(
            "bind-addr: 127.0.0.1:{CODE_SERVER_PORT}\n\
             auth: password\n\
             password: {password}\n\
             cert: false\n"
        ),
        None => format!(
            "bind-addr: 127.0.0.1:{CODE_SERVER_PORT}\n\
             auth: none\n\
             cert: false\n"
        ),
    }
}

/// Jupyter server config. Loopback only, no token: reachable solely through
/// the user's own SSH session.
pub fn jupyter_config(user: &str) -> String {
    format!(
        "c = get_config()  # noqa\n\
         c.ServerApp.ip = \"127.0.0.1\"\n\
         c.ServerApp.port = {JUPYTER_PORT}\n\
         c.ServerApp.open_browser = False\n\
         c.ServerApp.root_dir = \"/home/{user}/notebooks\"\n\
         c.ServerApp.allow_remote_access = False\n\
         c.IdentityProvider.token = \"\"\n"
    )
}

/// Connection instructions printed to the container log once the bootstrap
/// finishes. Ports are the host-mapped ones handed in by the manifest.
pub fn connection_banner(
    user: &str,
    domain: &str,
    ssh_port: u16,
    vnc_port: u16,
    rdp_port: u16,
    novnc_port: u16,
) -> String {
    let rule = "=".repeat(50);
    let mut banner = String::new();
    banner.push_str(&rule);
    banner.push('\n');
    banner.push_str(&format!(" trainbox workspace ready: {user}\n"));
    banner.push_str(&rule);
    banner.push('\n');
    banner.push_str(&format!(" ssh       ssh -p {ssh_port} {user}@{domain}\n"));
    banner.push_str(&format!(" vnc       {domain}:{vnc_port}\n"));
    banner.push_str(&format!(" rdp       {domain}:{rdp_port}\n"));
    banner.push_str(&format!(" novnc     https://{user}.{domain} (port {novnc_port})\n"));
    banner.push_str(&format!(" code      127.0.0.1:{CODE_SERVER_PORT} via SSH tunnel\n"));
    banner.push_str(&format!(" jupyter   127.0.0.1:{JUPYTER_PORT} via SSH tunnel\n"));
    banner.push_str(&rule);
    banner.push('\n');
    banner
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== supervisord =====

    #[test]
    fn supervisord_lists_every_program() {
        let conf = supervisord_conf("alice", "1920x1080", true);
        let programs =
            ["sshd", "vncserver", "xrdp", "novnc", "code-server", "jupyter", "pulseaudio"];
        for name in programs {
            assert!(conf.contains(&format!("[program:{name}]")), "missing program {name}");
        }
    }

    #[test]
    fn supervisord_runs_foreground() {
        let conf = supervisord_conf("alice", "1920x1080", true);
        assert!(conf.contains("nodaemon=true"));
    }

    #[test]
    fn supervisord_user_daemons_run_as_user() {
        let conf = supervisord_conf("alice", "1920x1080", true);
        assert!(conf.contains("user=alice"));
        assert!(conf.contains("environment=HOME=\"/home/alice\",USER=\"alice\""));
    }

    #[test]
    fn supervisord_geometry_reaches_vncserver() {
        let conf = supervisord_conf("alice", "2560x1440", true);
        assert!(conf.contains("-geometry 2560x1440"));
    }

    #[test]
    fn supervisord_vnc_auth_follows_password() {
        let with = supervisord_conf("alice", "1920x1080", true);
        assert!(with.contains("-rfbauth /home/alice/.vnc/passwd"));
        assert!(!with.contains("SecurityTypes None"));

        let without = supervisord_conf("alice", "1920x1080", false);
        assert!(without.contains("-SecurityTypes None"));
        assert!(!without.contains("-rfbauth"));
    }

    #[test]
    fn supervisord_novnc_bridges_to_vnc() {
        let conf = supervisord_conf("alice", "1920x1080", false);
        assert!(conf.contains("websockify --web /usr/share/novnc 6080 localhost:5901"));
    }

    // ===== xstartup =====

    #[test]
    fn xstartup_execs_a_session() {
        let script = vnc_xstartup();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("exec startxfce4"));
    }

    // ===== code-server =====

    #[test]
    fn code_server_binds_loopback() {
        assert!(code_server_config(Some("pw")).contains("bind-addr: 127.0.0.1:8080"));
    }

    #[test]
    fn code_server_auth_follows_password() {
        let with = code_server_config(Some("hunter2"));
        assert!(with.contains("auth: password"));
        assert!(with.contains("password: hunter2"));

        let without = code_server_config(None);
        assert!(without.contains("auth: none"));
        assert!(!without.contains("password:"));
    }

    // ===== jupyter =====

    #[test]
    fn jupyter_binds_loopback_under_notebooks() {
        let conf = jupyter_config("alice");
        assert!(conf.contains("c.ServerApp.ip = \"127.0.0.1\""));
        assert!(conf.contains("c.ServerApp.root_dir = \"/home/alice/notebooks\""));
    }

    // ===== banner =====

    #[test]
    fn banner_shows_host_endpoints() {
        let banner = connection_banner("alice", "ml.example.org", 2222, 5901, 3390, 6080);
        assert!(banner.contains("ssh -p 2222 alice@ml.example.org"));
        assert!(banner.contains("ml.example.org:3390"));
        assert!(banner.contains("https://alice.ml.example.org"));
        assert!(banner.contains("jupyter"));
    }
}
