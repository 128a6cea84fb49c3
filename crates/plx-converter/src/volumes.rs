//! Pod volumes: context volumes, connection volumes and their de-duplication

use std::collections::BTreeMap;

use uuid::Uuid;

use plx_common::constants::CONNECTION_VOLUME_PREFIX;
use plx_schema::connections::ConnectionResource;
use plx_schema::k8s::{Volume, VolumeMount};
use plx_schema::{Connection, ConnectionSchema};

use crate::error::ConverterError;
use crate::Result;

/// Volume name of a connection source path: `plx-connection-<uuidv5(DNS, path)>`
pub fn volume_name(path: &str) -> String {
    format!(
        "{}{}",
        CONNECTION_VOLUME_PREFIX,
        Uuid::new_v5(&Uuid::NAMESPACE_DNS, path.as_bytes()).simple()
    )
}

#[derive(Clone, Debug)]
struct MountClaim {
    mount_path: String,
    read_only: bool,
    connection: String,
}

/// Volumes of one pod, keyed by name in insertion order
#[derive(Debug, Default)]
pub struct VolumeSet {
    volumes: Vec<Volume>,
    claims: BTreeMap<String, MountClaim>,
}

impl VolumeSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a volume unless one with the same name exists
    pub fn add(&mut self, volume: Volume) {
        if !self.contains(&volume.name) {
            self.volumes.push(volume);
        }
    }

    /// Whether a volume with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.volumes.iter().any(|v| v.name == name)
    }

    /// Mount of a volume-backed connection, registering its volume once.
    ///
    /// The first requester fixes the mount path and read-only flag; later
    /// requesters of the same source must agree.
    pub fn connection_mount(&mut self, connection: &Connection) -> Result<Option<VolumeMount>> {
        let (source, volume) = match &connection.schema {
            Some(ConnectionSchema::HostPath(s)) => {
                let name = volume_name(&s.host_path);
                (s.host_path.as_str(), Volume::host_path(&name, &s.host_path))
            }
            Some(ConnectionSchema::Claim(s)) => {
                let name = volume_name(&s.volume_claim);
                (
                    s.volume_claim.as_str(),
                    Volume::claim(&name, &s.volume_claim, s.read_only.unwrap_or(false)),
                )
            }
            _ => return Ok(None),
        };
        let mount_path = connection.mount_path().unwrap_or(source).to_string();
        let read_only = connection.read_only();
        self.claim(volume, mount_path, read_only, &connection.name).map(Some)
    }

    /// Mount of a connection's secret or config map when it asks for one
    pub fn resource_mount(
        &mut self,
        connection: &Connection,
        resource: &ConnectionResource,
        config_map: bool,
    ) -> Result<Option<VolumeMount>> {
        let Some(mount_path) = &resource.mount_path else {
            return Ok(None);
        };
        let name = volume_name(&resource.name);
        let volume = if config_map {
            Volume::config_map(&name, &resource.name, &resource.items)
        } else {
            Volume::secret(&name, &resource.name, &resource.items)
        };
        self.claim(volume, mount_path.clone(), true, &connection.name).map(Some)
    }

    fn claim(
        &mut self,
        volume: Volume,
        mount_path: String,
        read_only: bool,
        connection: &str,
    ) -> Result<VolumeMount> {
        let name = volume.name.clone();
        match self.claims.get(&name) {
            Some(first) if first.mount_path != mount_path || first.read_only != read_only => {
                return Err(ConverterError::VolumeConflict {
                    volume: name,
                    connection: connection.to_string(),
                    reason: format!(
                        "`{}` mounts it at {} (read-only: {}), `{}` asks for {} (read-only: {})",
                        first.connection,
                        first.mount_path,
                        first.read_only,
                        connection,
                        mount_path,
                        read_only
                    ),
                });
            }
            Some(_) => {}
            None => {
                self.claims.insert(
                    name.clone(),
                    MountClaim {
                        mount_path: mount_path.clone(),
                        read_only,
                        connection: connection.to_string(),
                    },
                );
                self.add(volume);
            }
        }
        Ok(VolumeMount::new(name, mount_path, read_only))
    }

    /// Final volume list
    pub fn into_volumes(self) -> Vec<Volume> {
        self.volumes
    }
}

/// Append a mount unless the container already has one at the same path
pub fn push_mount(mounts: &mut Vec<VolumeMount>, mount: VolumeMount) {
    if !mounts.iter().any(|m| m.mount_path == mount.mount_path) {
        mounts.push(mount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_path(name: &str, host: &str, mount: &str, read_only: bool) -> Connection {
        serde_json::from_value(json!({
            "name": name,
            "kind": "host_path",
            "schema": {"hostPath": host, "mountPath": mount, "readOnly": read_only},
        }))
        .unwrap()
    }

    #[test]
    fn volume_name_is_uuid_v5_of_path() {
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"/data").simple().to_string();
        assert_eq!(volume_name("/data"), format!("plx-connection-{}", expected));
        assert_eq!(volume_name("/data"), volume_name("/data"));
        assert_ne!(volume_name("/data"), volume_name("/other"));
    }

    #[test]
    fn same_source_yields_one_volume() {
        let mut set = VolumeSet::new();
        let data = host_path("data", "/data", "/data", false);
        let first = set.connection_mount(&data).unwrap().unwrap();
        let second = set.connection_mount(&data).unwrap().unwrap();
        assert_eq!(first, second);

        let volumes = set.into_volumes();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, volume_name("/data"));
        assert_eq!(volumes[0].host_path.as_ref().unwrap().path, "/data");
    }

    #[test]
    fn disagreeing_requesters_conflict() {
        let mut set = VolumeSet::new();
        set.connection_mount(&host_path("a", "/data", "/data", false))
            .unwrap();
        let err = set
            .connection_mount(&host_path("b", "/data", "/data", true))
            .unwrap_err();
        match err {
            ConverterError::VolumeConflict { volume, connection, .. } => {
                assert_eq!(volume, volume_name("/data"));
                assert_eq!(connection, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_volume_connections_have_no_mount() {
        let bucket: Connection = serde_json::from_value(json!({
            "name": "s3", "kind": "s3", "schema": {"bucket": "s3://runs"},
        }))
        .unwrap();
        assert!(VolumeSet::new().connection_mount(&bucket).unwrap().is_none());
    }

    #[test]
    fn mounts_are_unique_per_path() {
        let mut mounts = Vec::new();
        push_mount(&mut mounts, VolumeMount::new("a", "/x", false));
        push_mount(&mut mounts, VolumeMount::new("b", "/x", true));
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].name, "a");
    }
}
