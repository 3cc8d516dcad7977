//! Container, port and volume descriptors shared by pod-shaped builders

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    CephFSVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, ExecAction,
    HostPathVolumeSource, LocalObjectReference, Probe, RBDVolumeSource, ResourceRequirements,
    ServicePort as KubeServicePort, Volume as KubeVolume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::non_empty;

const PROBE_INITIAL_DELAY_SECONDS: i32 = 5;
const PROBE_PERIOD_SECONDS: i32 = 3;

/// A port exposed by a service and the container port it forwards to.
///
/// Created once and handed to both the service and the pod containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub container_port: i32,
    pub port: i32,
    pub protocol: String,
}

impl ServicePort {
    pub fn new(name: &str, container_port: i32, port: i32) -> Self {
        Self {
            name: name.to_string(),
            container_port,
            port,
            protocol: "TCP".to_string(),
        }
    }

    pub fn protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    /// Service-facing half
    pub fn service_port(&self) -> KubeServicePort {
        KubeServicePort {
            name: Some(self.name.clone()),
            port: self.port,
            protocol: Some(self.protocol.clone()),
            target_port: Some(IntOrString::Int(self.container_port)),
            ..Default::default()
        }
    }

    /// Container-facing half
    pub fn pod_port(&self) -> ContainerPort {
        ContainerPort {
            name: Some(self.name.clone()),
            container_port: self.container_port,
            ..Default::default()
        }
    }
}

/// Ceph RBD image backing a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RbdSource {
    pub fs_type: String,
    pub image: String,
    pub monitors: Vec<String>,
    pub pool: String,
    pub secret_name: String,
    pub user: String,
}

impl RbdSource {
    /// `monitors` is a comma-separated list of monitor addresses
    pub fn new(fs_type: &str, image: &str, monitors: &str, pool: &str, secret_name: &str) -> Self {
        Self {
            fs_type: fs_type.to_string(),
            image: image.to_string(),
            monitors: split_monitors(monitors),
            pool: pool.to_string(),
            secret_name: secret_name.to_string(),
            user: "admin".to_string(),
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }
}

/// CephFS path backing a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CephFsSource {
    pub monitors: Vec<String>,
    pub path: String,
    pub secret_name: String,
    pub user: String,
}

impl CephFsSource {
    pub fn new(monitors: &str, path: &str, secret_name: &str) -> Self {
        Self {
            monitors: split_monitors(monitors),
            path: path.to_string(),
            secret_name: secret_name.to_string(),
            user: "admin".to_string(),
        }
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }
}

fn split_monitors(monitors: &str) -> Vec<String> {
    monitors
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    HostPath(String),
    EmptyDir,
    Rbd(RbdSource),
    CephFs(CephFsSource),
}

/// A volume source paired with the mount one container makes of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
    pub sub_path: Option<String>,
    pub source: VolumeSource,
}

impl Volume {
    /// Host directory, mounted read-only unless told otherwise
    pub fn host_path(name: &str, mount_path: &str, path: &str) -> Self {
        Self::with_source(name, mount_path, true, VolumeSource::HostPath(path.to_string()))
    }

    pub fn empty_dir(name: &str, mount_path: &str) -> Self {
        Self::with_source(name, mount_path, false, VolumeSource::EmptyDir)
    }

    pub fn rbd(name: &str, mount_path: &str, source: RbdSource) -> Self {
        Self::with_source(name, mount_path, false, VolumeSource::Rbd(source))
    }

    pub fn cephfs(name: &str, mount_path: &str, source: CephFsSource) -> Self {
        Self::with_source(name, mount_path, false, VolumeSource::CephFs(source))
    }

    fn with_source(name: &str, mount_path: &str, read_only: bool, source: VolumeSource) -> Self {
        Self {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            read_only,
            sub_path: None,
            source,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn sub_path(mut self, sub_path: &str) -> Self {
        self.sub_path = Some(sub_path.to_string());
        self
    }

    pub fn mount(&self) -> VolumeMount {
        VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: Some(self.read_only),
            sub_path: self.sub_path.clone(),
            ..Default::default()
        }
    }

    /// Pod-level declaration of the volume
    pub fn volume(&self) -> KubeVolume {
        let mut volume = KubeVolume {
            name: self.name.clone(),
            ..Default::default()
        };
        match &self.source {
            VolumeSource::HostPath(path) => {
                volume.host_path = Some(HostPathVolumeSource {
                    path: path.clone(),
                    ..Default::default()
                });
            }
            VolumeSource::EmptyDir => {
                volume.empty_dir = Some(EmptyDirVolumeSource::default());
            }
            VolumeSource::Rbd(rbd) => {
                volume.rbd = Some(RBDVolumeSource {
                    fs_type: Some(rbd.fs_type.clone()),
                    image: rbd.image.clone(),
                    monitors: rbd.monitors.clone(),
                    pool: Some(rbd.pool.clone()),
                    secret_ref: Some(LocalObjectReference {
                        name: Some(rbd.secret_name.clone()),
                    }),
                    read_only: Some(self.read_only),
                    user: Some(rbd.user.clone()),
                    ..Default::default()
                });
            }
            VolumeSource::CephFs(cephfs) => {
                volume.cephfs = Some(CephFSVolumeSource {
                    monitors: cephfs.monitors.clone(),
                    path: Some(cephfs.path.clone()),
                    secret_ref: Some(LocalObjectReference {
                        name: Some(cephfs.secret_name.clone()),
                    }),
                    read_only: Some(self.read_only),
                    user: Some(cephfs.user.clone()),
                    ..Default::default()
                });
            }
        }
        volume
    }
}

/// Everything needed to add one container to a pod-shaped builder
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub args: Option<Vec<String>>,
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
    pub probe: Option<Vec<String>>,
    pub volumes: Vec<Volume>,
    pub ports: Vec<ServicePort>,
    pub env: Vec<(String, String)>,
}

impl ContainerSpec {
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            ..Default::default()
        }
    }

    /// Container arguments from a whitespace-delimited command line
    pub fn args(mut self, command: &str) -> Self {
        self.args = Some(split_command(command));
        self
    }

    pub fn request(mut self, resource: &str, quantity: &str) -> Self {
        self.requests
            .insert(resource.to_string(), quantity.to_string());
        self
    }

    pub fn limit(mut self, resource: &str, quantity: &str) -> Self {
        self.limits.insert(resource.to_string(), quantity.to_string());
        self
    }

    /// Liveness probe running a whitespace-delimited command
    pub fn probe(mut self, command: &str) -> Self {
        let command = split_command(command);
        self.probe = if command.is_empty() { None } else { Some(command) };
        self
    }

    pub fn volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn port(mut self, port: &ServicePort) -> Self {
        self.ports.push(port.clone());
        self
    }

    /// Environment variables keep the order they were added in
    pub fn env(mut self, name: &str, value: impl ToString) -> Self {
        self.env.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn to_container(&self) -> Container {
        Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            args: self.args.clone(),
            ports: non_empty(&self.ports.iter().map(ServicePort::pod_port).collect::<Vec<_>>()),
            resources: Some(ResourceRequirements {
                requests: quantities(&self.requests),
                limits: quantities(&self.limits),
                ..Default::default()
            }),
            liveness_probe: self.probe.as_ref().map(|command| Probe {
                exec: Some(ExecAction {
                    command: Some(command.clone()),
                }),
                initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECONDS),
                period_seconds: Some(PROBE_PERIOD_SECONDS),
                ..Default::default()
            }),
            volume_mounts: non_empty(&self.volumes.iter().map(Volume::mount).collect::<Vec<_>>()),
            env: non_empty(
                &self
                    .env
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: name.clone(),
                        value: Some(value.clone()),
                        ..Default::default()
                    })
                    .collect::<Vec<_>>(),
            ),
            ..Default::default()
        }
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_port_halves() {
        let port = ServicePort::new("serverport", 5001, 15001);

        let svc = port.service_port();
        assert_eq!(svc.port, 15001);
        assert_eq!(svc.target_port, Some(IntOrString::Int(5001)));
        assert_eq!(svc.protocol.as_deref(), Some("TCP"));

        let pod = port.pod_port();
        assert_eq!(pod.container_port, 5001);
        assert_eq!(pod.name.as_deref(), Some("serverport"));
    }

    #[test]
    fn test_args_split_on_runs_of_spaces() {
        let spec = ContainerSpec::new("c", "alpine").args("iperf  -f M   -s");
        assert_eq!(
            spec.args,
            Some(vec![
                "iperf".to_string(),
                "-f".to_string(),
                "M".to_string(),
                "-s".to_string()
            ])
        );
    }

    #[test]
    fn test_container_probe_and_env_order() {
        let container = ContainerSpec::new("c", "alpine")
            .probe("cat /tmp/healthy")
            .env("ZETA", 1)
            .env("ALPHA", "two")
            .to_container();

        let probe = container.liveness_probe.unwrap();
        assert_eq!(probe.initial_delay_seconds, Some(5));
        assert_eq!(probe.period_seconds, Some(3));
        assert_eq!(
            probe.exec.unwrap().command,
            Some(vec!["cat".to_string(), "/tmp/healthy".to_string()])
        );

        let env = container.env.unwrap();
        assert_eq!(env[0].name, "ZETA");
        assert_eq!(env[0].value.as_deref(), Some("1"));
        assert_eq!(env[1].name, "ALPHA");
    }

    #[test]
    fn test_resources_are_opaque_quantities() {
        let container = ContainerSpec::new("c", "alpine")
            .request("cpu", "0")
            .limit("memory", "32Mi")
            .to_container();
        let resources = container.resources.unwrap();
        assert_eq!(resources.requests.unwrap()["cpu"], Quantity("0".to_string()));
        assert_eq!(resources.limits.unwrap()["memory"], Quantity("32Mi".to_string()));
    }

    #[test]
    fn test_rbd_volume_source() {
        let volume = Volume::rbd(
            "data",
            "/data",
            RbdSource::new("ext4", "img", "10.0.0.1:6789, 10.0.0.2:6789", "rbd", "ceph-secret"),
        )
        .sub_path("sub");

        let mount = volume.mount();
        assert_eq!(mount.sub_path.as_deref(), Some("sub"));
        assert_eq!(mount.read_only, Some(false));

        let rbd = volume.volume().rbd.unwrap();
        assert_eq!(rbd.monitors, vec!["10.0.0.1:6789", "10.0.0.2:6789"]);
        assert_eq!(rbd.user.as_deref(), Some("admin"));
        assert_eq!(rbd.secret_ref.unwrap().name.as_deref(), Some("ceph-secret"));
    }

    #[test]
    fn test_host_path_defaults_read_only() {
        let volume = Volume::host_path("logs", "/var/log/app", "/var/log");
        assert_eq!(volume.mount().read_only, Some(true));
        assert_eq!(volume.volume().host_path.unwrap().path, "/var/log");
        assert!(Volume::empty_dir("tmp", "/tmp").volume().empty_dir.is_some());
    }
}
