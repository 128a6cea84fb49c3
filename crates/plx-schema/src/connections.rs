//! Connections: named, typed references to external resources

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::k8s::{lenient_string_list, EnvVar};
use crate::SchemaError;

macro_rules! connection_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Kind of external resource behind a connection
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ConnectionKind {
            $(
                #[doc = $name]
                $variant,
            )+
        }

        impl ConnectionKind {
            /// All kinds, in declaration order
            pub const ALL: &'static [ConnectionKind] = &[$(Self::$variant),+];

            /// Wire name of the kind
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }
    };
}

connection_kinds! {
    HostPath => "host_path",
    VolumeClaim => "volume_claim",
    Gcs => "gcs",
    S3 => "s3",
    Wasb => "wasb",
    Git => "git",
    Registry => "registry",
    Slack => "slack",
    Mattermost => "mattermost",
    Pagerduty => "pagerduty",
    Discord => "discord",
    Webhook => "webhook",
    Hipchat => "hipchat",
    Aws => "aws",
    Gcp => "gcp",
    Azure => "azure",
    Mysql => "mysql",
    Postgres => "postgres",
    Redis => "redis",
    Rabbitmq => "rabbitmq",
    Kafka => "kafka",
    Snowflake => "snowflake",
    Mongo => "mongo",
    Bigquery => "bigquery",
    Presto => "presto",
    Mssql => "mssql",
    Clickhouse => "clickhouse",
    GenericHttp => "generic-http",
    GenericTcp => "generic-tcp",
    GenericCustom => "generic-custom",
}

impl ConnectionKind {
    /// Volume-backed kinds
    pub fn is_mount(&self) -> bool {
        matches!(self, Self::HostPath | Self::VolumeClaim)
    }

    /// Blob-store kinds
    pub fn is_bucket(&self) -> bool {
        matches!(self, Self::Gcs | Self::S3 | Self::Wasb)
    }

    /// Kinds that can hold run artifacts
    pub fn is_artifact_store(&self) -> bool {
        self.is_mount() || self.is_bucket()
    }

    /// Notification kinds used by the notifier run
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            Self::Slack
                | Self::Mattermost
                | Self::Pagerduty
                | Self::Discord
                | Self::Webhook
                | Self::Hipchat
        )
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "custom" {
            return Ok(Self::GenericCustom);
        }
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| {
                SchemaError::schema(
                    "connection.kind",
                    format!(
                        "one of [{}]",
                        Self::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                    s.to_string(),
                )
            })
    }
}

impl Serialize for ConnectionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConnectionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Bucket schema for `gcs`, `s3`, `wasb`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BucketSchema {
    /// Bucket url
    pub bucket: String,
}

/// Claim schema for `volume_claim`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimSchema {
    /// PVC name
    #[serde(alias = "volume_claim")]
    pub volume_claim: String,
    /// Mount path in containers
    #[serde(alias = "mount_path")]
    pub mount_path: String,
    /// Mount read-only
    #[serde(default, alias = "read_only", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

/// Host path schema for `host_path`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostPathSchema {
    /// Path on the node
    #[serde(alias = "host_path")]
    pub host_path: String,
    /// Mount path in containers
    #[serde(alias = "mount_path")]
    pub mount_path: String,
    /// Mount read-only
    #[serde(default, alias = "read_only", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

/// Git schema
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GitSchema {
    /// Repository url
    pub url: String,
    /// Default revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Extra clone flags
    #[serde(default, deserialize_with = "lenient_string_list", skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Host schema for registries, webhooks and databases
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HostSchema {
    /// Url or host
    pub url: String,
    /// Skip TLS verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
}

/// Typed schema of a connection, discriminated by the connection kind
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionSchema {
    /// Blob store
    Bucket(BucketSchema),
    /// Persistent volume claim
    Claim(ClaimSchema),
    /// Host path
    HostPath(HostPathSchema),
    /// Git repository
    Git(GitSchema),
    /// Host
    Host(HostSchema),
    /// Anything else
    Custom(Value),
}

impl ConnectionSchema {
    fn parse(kind: ConnectionKind, raw: Value, name: &str) -> Result<Self, SchemaError> {
        let path = format!("connections.{}.schema", name);
        let err = |e: serde_json::Error| SchemaError::schema(&path, format!("a {} schema", kind), e.to_string());
        let schema = match kind {
            ConnectionKind::Gcs | ConnectionKind::S3 | ConnectionKind::Wasb => {
                Self::Bucket(serde_json::from_value(raw).map_err(err)?)
            }
            ConnectionKind::VolumeClaim => Self::Claim(serde_json::from_value(raw).map_err(err)?),
            ConnectionKind::HostPath => Self::HostPath(serde_json::from_value(raw).map_err(err)?),
            ConnectionKind::Git => Self::Git(serde_json::from_value(raw).map_err(err)?),
            ConnectionKind::Registry
            | ConnectionKind::Webhook
            | ConnectionKind::Slack
            | ConnectionKind::Mattermost
            | ConnectionKind::Discord
            | ConnectionKind::Hipchat
            | ConnectionKind::GenericHttp
            | ConnectionKind::GenericTcp => Self::Host(serde_json::from_value(raw).map_err(err)?),
            _ => Self::Custom(raw),
        };
        Ok(schema)
    }

    fn to_value(&self) -> Value {
        let result = match self {
            Self::Bucket(s) => serde_json::to_value(s),
            Self::Claim(s) => serde_json::to_value(s),
            Self::HostPath(s) => serde_json::to_value(s),
            Self::Git(s) => serde_json::to_value(s),
            Self::Host(s) => serde_json::to_value(s),
            Self::Custom(v) => Ok(v.clone()),
        };
        result.unwrap_or(Value::Null)
    }
}

/// Secret or config map exposed through a connection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResource {
    /// Object name
    pub name: String,
    /// Keys to expose (all keys when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<String>,
    /// Mount the object at this path instead of exposing env vars
    #[serde(default, alias = "mount_path", skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<String>,
}

/// Wire form of a [`Connection`] before its schema is typed
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConnection {
    name: String,
    kind: ConnectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<ConnectionResource>,
    #[serde(default, alias = "config_map", skip_serializing_if = "Option::is_none")]
    config_map: Option<ConnectionResource>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

/// Named connection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawConnection", into = "RawConnection")]
pub struct Connection {
    /// Unique name
    pub name: String,
    /// Resource kind
    pub kind: ConnectionKind,
    /// Description
    pub description: Option<String>,
    /// Tags
    pub tags: Vec<String>,
    /// Typed schema
    pub schema: Option<ConnectionSchema>,
    /// Secret exposed to containers
    pub secret: Option<ConnectionResource>,
    /// Config map exposed to containers
    pub config_map: Option<ConnectionResource>,
    /// Extra env vars
    pub env: Vec<EnvVar>,
    /// Pod annotations requested by the connection
    pub annotations: BTreeMap<String, String>,
}

impl TryFrom<RawConnection> for Connection {
    type Error = SchemaError;

    fn try_from(raw: RawConnection) -> Result<Self, Self::Error> {
        let schema = raw
            .schema
            .map(|s| ConnectionSchema::parse(raw.kind, s, &raw.name))
            .transpose()?;
        Ok(Self {
            name: raw.name,
            kind: raw.kind,
            description: raw.description,
            tags: raw.tags,
            schema,
            secret: raw.secret,
            config_map: raw.config_map,
            env: raw.env,
            annotations: raw.annotations,
        })
    }
}

impl From<Connection> for RawConnection {
    fn from(c: Connection) -> Self {
        Self {
            name: c.name,
            kind: c.kind,
            description: c.description,
            tags: c.tags,
            schema: c.schema.as_ref().map(ConnectionSchema::to_value),
            secret: c.secret,
            config_map: c.config_map,
            env: c.env,
            annotations: c.annotations,
        }
    }
}

impl Connection {
    /// Container path where the connection's content is visible
    pub fn mount_path(&self) -> Option<&str> {
        match &self.schema {
            Some(ConnectionSchema::HostPath(s)) => Some(&s.mount_path),
            Some(ConnectionSchema::Claim(s)) => Some(&s.mount_path),
            _ => None,
        }
    }

    /// Whether volume mounts of this connection are read-only
    pub fn read_only(&self) -> bool {
        match &self.schema {
            Some(ConnectionSchema::HostPath(s)) => s.read_only.unwrap_or(false),
            Some(ConnectionSchema::Claim(s)) => s.read_only.unwrap_or(false),
            _ => false,
        }
    }

    /// Root path or url of an artifacts store connection
    pub fn store_path(&self) -> Option<&str> {
        match &self.schema {
            Some(ConnectionSchema::Bucket(s)) => Some(&s.bucket),
            Some(ConnectionSchema::HostPath(s)) => Some(&s.mount_path),
            Some(ConnectionSchema::Claim(s)) => Some(&s.mount_path),
            _ => None,
        }
    }
}

/// Index connections by name, rejecting duplicates
pub fn connections_by_name(
    connections: impl IntoIterator<Item = Connection>,
) -> Result<BTreeMap<String, Connection>, SchemaError> {
    let mut table = BTreeMap::new();
    for connection in connections {
        let name = connection.name.clone();
        if table.insert(name.clone(), connection).is_some() {
            return Err(SchemaError::schema(
                format!("connections.{}", name),
                "unique connection names",
                format!("duplicate `{}`", name),
            ));
        }
    }
    Ok(table)
}
