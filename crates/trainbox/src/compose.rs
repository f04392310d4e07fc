//! Typed docker-compose manifest generation.
//!
//! The manifest is built as data and serialized with serde_yaml, never
//! assembled from strings, so a syntactically broken compose file cannot be
//! produced. Output is deterministic: infrastructure services come first in
//! fixed order, then one workspace per user ordered by slot. Secrets live in
//! a companion env file that is generated once and never overwritten.

use anyhow::{Context, Result};
use rand::distr::{Alphanumeric, SampleString};
use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::HostConfig;
use crate::registry::UserRecord;
use crate::validate::is_placeholder_secret;

/// Fixed service ports inside every workspace container.
pub const CONTAINER_SSH_PORT: u16 = 22;
pub const CONTAINER_VNC_PORT: u16 = 5901;
pub const CONTAINER_RDP_PORT: u16 = 3389;
pub const CONTAINER_NOVNC_PORT: u16 = 6080;

const NETWORK_NAME: &str = "trainbox";
const SECRET_LEN: usize = 24;

/// Top-level compose document.
#[derive(Debug, Clone, Serialize)]
pub struct ComposeFile {
    pub services: ServiceMap,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

/// Services in insertion order. serde_yaml offers no ordered map of its own,
/// and a stable order keeps diffs reviewable when regenerating.
#[derive(Debug, Clone, Default)]
pub struct ServiceMap(Vec<(String, Service)>);

impl ServiceMap {
    pub fn insert(&mut self, name: impl Into<String>, service: Service) {
        self.0.push((name.into(), service));
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ServiceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, service) in &self.0 {
            map.serialize_entry(name, service)?;
        }
        map.end()
    }
}

/// One compose service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Service {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shm_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memswap_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,
}

impl Service {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            restart: Some("unless-stopped".to_string()),
            networks: vec![NETWORK_NAME.to_string()],
            ..Default::default()
        }
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = Some(name.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn command(mut self, args: &[&str]) -> Self {
        self.command = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Publish a host port onto a container port.
    pub fn port(mut self, host: i64, container: u16) -> Self {
        self.ports.push(format!("{host}:{container}"));
        self
    }

    pub fn volume(mut self, spec: impl Into<String>) -> Self {
        self.volumes.push(spec.into());
        self
    }

    pub fn depends_on(mut self, service: impl Into<String>) -> Self {
        self.depends_on.push(service.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Route `<host>.<domain>` through traefik to a container port.
    pub fn web_route(self, name: &str, fqdn: &str, port: u16) -> Self {
        self.label("traefik.enable", "true")
            .label(
                format!("traefik.http.routers.{name}.rule"),
                format!("Host(`{fqdn}`)"),
            )
            .label(format!("traefik.http.routers.{name}.entrypoints"), "websecure")
            .label(
                format!("traefik.http.routers.{name}.tls.certresolver"),
                "letsencrypt",
            )
            .label(
                format!("traefik.http.services.{name}.loadbalancer.server.port"),
                port.to_string(),
            )
    }
}

/// `deploy:` block carrying resource limits and GPU reservations.
#[derive(Debug, Clone, Serialize)]
pub struct Deploy {
    pub resources: Resources,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Resources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpec>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRequest {
    pub driver: String,
    pub count: u32,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSpec {
    pub driver: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VolumeSpec {}

/// Build the full manifest: infrastructure first, then one workspace per
/// active user ordered by slot.
pub fn build_manifest(config: &HostConfig, users: &[UserRecord]) -> ComposeFile {
    let mut services = ServiceMap::default();
    for (name, service) in infra_services(config) {
        services.insert(name, service);
    }
    for record in users {
        services.insert(record.username.clone(), workspace_service(config, record));
    }

    let mut networks = BTreeMap::new();
    networks.insert(
        NETWORK_NAME.to_string(),
        NetworkSpec {
            driver: "bridge".to_string(),
        },
    );

    let mut volumes = BTreeMap::new();
    volumes.insert("grafana-data".to_string(), VolumeSpec::default());
    volumes.insert("prometheus-data".to_string(), VolumeSpec::default());

    ComposeFile {
        services,
        networks,
        volumes,
    }
}

/// The shared infrastructure stack.
fn infra_services(config: &HostConfig) -> Vec<(String, Service)> {
    let domain = &config.host.domain;
    let infra = config.infra_dir();

    let traefik = Service::new("traefik:v3.1")
        .container_name("trainbox-traefik")
        .command(&[
            "--providers.docker=true",
            "--providers.docker.exposedbydefault=false",
            "--entrypoints.web.address=:80",
            "--entrypoints.websecure.address=:443",
            "--entrypoints.web.http.redirections.entrypoint.to=websecure",
            "--certificatesresolvers.letsencrypt.acme.tlschallenge=true",
            &format!("--certificatesresolvers.letsencrypt.acme.email=admin@{domain}"),
            "--certificatesresolvers.letsencrypt.acme.storage=/letsencrypt/acme.json",
        ])
        .port(80, 80)
        .port(443, 443)
        .volume("/var/run/docker.sock:/var/run/docker.sock:ro")
        .volume(format!("{}/traefik:/letsencrypt", infra.display()));

    let prometheus = Service::new("prom/prometheus:v2.53.0")
        .container_name("trainbox-prometheus")
        .volume(format!("{}/prometheus:/etc/prometheus", infra.display()))
        .volume("prometheus-data:/prometheus");

    let grafana = Service::new("grafana/grafana:11.1.0")
        .container_name("trainbox-grafana")
        .env("GF_SECURITY_ADMIN_PASSWORD", "${GRAFANA_ADMIN_PASSWORD}")
        .env("GF_SERVER_ROOT_URL", format!("https://grafana.{domain}"))
        .volume("grafana-data:/var/lib/grafana")
        .depends_on("prometheus")
        .web_route("grafana", &format!("grafana.{domain}"), 3000);

    let dozzle = Service::new("amir20/dozzle:v8")
        .container_name("trainbox-dozzle")
        .volume("/var/run/docker.sock:/var/run/docker.sock:ro")
        .web_route("logs", &format!("logs.{domain}"), 8080);

    let filebrowser = Service::new("filebrowser/filebrowser:v2")
        .container_name("trainbox-filebrowser")
        .volume(format!("{}:/srv", config.homes_dir().display()))
        .web_route("files", &format!("files.{domain}"), 80);

    let guacd = Service::new("guacamole/guacd:1.5.5").container_name("trainbox-guacd");

    let guacamole = Service::new("guacamole/guacamole:1.5.5")
        .container_name("trainbox-guacamole")
        .env("GUACD_HOSTNAME", "guacd")
        .env("GUACAMOLE_PASSWORD", "${GUACAMOLE_PASSWORD}")
        .depends_on("guacd")
        .web_route("desk", &format!("desk.{domain}"), 8080);

    vec![
        ("traefik".to_string(), traefik),
        ("prometheus".to_string(), prometheus),
        ("grafana".to_string(), grafana),
        ("dozzle".to_string(), dozzle),
        ("filebrowser".to_string(), filebrowser),
        ("guacd".to_string(), guacd),
        ("guacamole".to_string(), guacamole),
    ]
}

/// One user's workspace container.
pub fn workspace_service(config: &HostConfig, record: &UserRecord) -> Service {
    let ws = &config.workspace;
    let user = &record.username;
    let homes = config.homes_dir();
    let datasets = config.datasets_dir();

    let mut service = Service::new(ws.image.clone())
        .container_name(record.container_name())
        .hostname(user.clone())
        .port(record.ssh_port, CONTAINER_SSH_PORT)
        .port(record.vnc_port, CONTAINER_VNC_PORT)
        .port(record.rdp_port, CONTAINER_RDP_PORT)
        .port(record.novnc_port, CONTAINER_NOVNC_PORT)
        .volume(format!("{}/{user}:/home/{user}", homes.display()))
        .volume(format!("{}:/data/datasets:ro", datasets.display()))
        .env("TRAINBOX_USER", user.clone())
        .env("TRAINBOX_UID", record.uid.to_string())
        .env("TRAINBOX_PASSWORD", format!("${{{}}}", record.password_env))
        .env("TRAINBOX_VNC_GEOMETRY", ws.vnc_geometry.clone())
        .env("TRAINBOX_DOMAIN", config.host.domain.clone())
        // Host-mapped ports, so the entrypoint banner prints real endpoints.
        .env("TRAINBOX_SSH_PORT", record.ssh_port.to_string())
        .env("TRAINBOX_VNC_PORT", record.vnc_port.to_string())
        .env("TRAINBOX_RDP_PORT", record.rdp_port.to_string())
        .env("TRAINBOX_NOVNC_PORT", record.novnc_port.to_string())
        .env("TZ", config.host.timezone.clone())
        .web_route(
            &format!("{user}-novnc"),
            &format!("{user}.{}", config.host.domain),
            CONTAINER_NOVNC_PORT,
        );

    service.shm_size = Some(format!("{}m", ws.shm_size_mb));
    service.memswap_limit = Some(format!("{}m", ws.memory_limit_mb + ws.swap_limit_mb));

    let limits = ResourceSpec {
        memory: Some(format!("{}m", ws.memory_limit_mb)),
        cpus: Some(format!("{}", ws.cpu_limit)),
        ..Default::default()
    };
    let mut reservations = ResourceSpec {
        memory: Some(format!("{}m", ws.memory_guarantee_mb)),
        ..Default::default()
    };
    if ws.gpu_count > 0 {
        reservations.devices.push(DeviceRequest {
            driver: "nvidia".to_string(),
            count: ws.gpu_count,
            capabilities: vec!["gpu".to_string()],
        });
    }
    service.deploy = Some(Deploy {
        resources: Resources {
            limits: Some(limits),
            reservations: Some(reservations),
        },
    });

    service
}

/// Serialize the manifest with a provenance header.
pub fn render(file: &ComposeFile) -> Result<String> {
    let body = serde_yaml::to_string(file).context("serializing compose manifest")?;
    Ok(format!(
        "# Generated by trainbox. Do not edit by hand; rerun `trainbox generate`.\n{body}"
    ))
}

/// Write the manifest to disk, replacing any previous version.
pub fn write_manifest(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Render the companion env file holding every secret the manifest
/// references. Placeholder values from the config are replaced with freshly
/// generated random secrets.
pub fn render_env_file(config: &HostConfig, users: &[UserRecord]) -> String {
    let mut out = String::from(
        "# Secrets for the trainbox compose stack. Generated once; edit by hand\n\
         # or delete to regenerate. Never commit this file.\n",
    );

    out.push_str(&format!(
        "GRAFANA_ADMIN_PASSWORD={}\n",
        secret_or_random(&config.secrets.grafana_admin_password)
    ));
    out.push_str(&format!(
        "GUACAMOLE_PASSWORD={}\n",
        secret_or_random(&config.secrets.guacamole_password)
    ));
    for record in users {
        out.push_str(&format!(
            "{}={}\n",
            record.password_env,
            secret_or_random(&config.secrets.default_user_password)
        ));
    }
    out
}

/// Create the env file if it does not exist yet. Returns true when a new
/// file was written. An existing file is left untouched: regenerating the
/// manifest must never rotate passwords people already use.
pub fn ensure_env_file(path: &Path, config: &HostConfig, users: &[UserRecord]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, render_env_file(config, users))
        .with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }

    Ok(true)
}

fn secret_or_random(configured: &str) -> String {
    if is_placeholder_secret(configured) {
        generate_secret()
    } else {
        configured.to_string()
    }
}

/// Random alphanumeric secret.
pub fn generate_secret() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), SECRET_LEN)
}
