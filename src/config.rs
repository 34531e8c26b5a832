//! Loader configuration file support
//!
//! Handles parsing of `.warehouse-loader.toml` configuration files and
//! environment variable overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{LoadError, LoadResult};
use crate::load::classify::DuplicatePolicy;
use crate::table::{ColumnCoercion, TableCatalog, TableDescriptor, TableKind};

/// Default configuration filename
pub const CONFIG_FILENAME: &str = ".warehouse-loader.toml";

/// Default key of the job marker object in the processed bucket
pub const DEFAULT_MARKER_KEY: &str = "lastjob.json";

/// Default processed bucket name
pub const DEFAULT_BUCKET: &str = "processed";

/// Environment variable for the warehouse host
pub const ENV_HOST: &str = "WAREHOUSE_LOADER_HOST";

/// Environment variable for the warehouse port
pub const ENV_PORT: &str = "WAREHOUSE_LOADER_PORT";

/// Environment variable for the warehouse database name
pub const ENV_DBNAME: &str = "WAREHOUSE_LOADER_DBNAME";

/// Environment variable for the warehouse user
pub const ENV_USERNAME: &str = "WAREHOUSE_LOADER_USERNAME";

/// Environment variable for the warehouse password
pub const ENV_PASSWORD: &str = "WAREHOUSE_LOADER_PASSWORD";

/// Environment variable for the processed bucket
pub const ENV_BUCKET: &str = "WAREHOUSE_LOADER_BUCKET";

/// Environment variable for the storage backend
pub const ENV_STORAGE_BACKEND: &str = "WAREHOUSE_LOADER_STORAGE_BACKEND";

/// Object storage backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendType {
    /// Local directory per bucket (default)
    #[default]
    Local,
    /// Amazon S3
    S3,
}

impl std::str::FromStr for StorageBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackendType::Local),
            "s3" => Ok(StorageBackendType::S3),
            _ => Err(format!(
                "Unknown storage backend: {}. Use 'local' or 's3'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for StorageBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendType::Local => write!(f, "local"),
            StorageBackendType::S3 => write!(f, "s3"),
        }
    }
}

/// Warehouse connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseCredentials {
    /// Host name
    #[serde(default = "default_host")]
    pub host: String,

    /// Port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database name
    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// User name
    #[serde(default)]
    pub username: String,

    /// Password (prefer the environment variable over the file)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "warehouse".to_string()
}

impl Default for WarehouseCredentials {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            username: String::new(),
            password: None,
        }
    }
}

impl WarehouseCredentials {
    /// Connection settings with the password masked, for logging only
    pub fn connection_string_masked(&self) -> String {
        let mut conn = format!(
            "host={} port={} dbname={} user={}",
            self.host, self.port, self.dbname, self.username
        );
        if self.password.is_some() {
            conn.push_str(" password=****");
        }
        conn
    }
}

/// Object storage configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Storage backend type
    #[serde(default)]
    pub backend: StorageBackendType,

    /// Processed bucket holding job directories and the marker
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Root directory for the local backend (one sub-directory per bucket)
    #[serde(default = "default_root")]
    pub root: String,

    /// Key of the marker object inside the bucket
    #[serde(default = "default_marker_key")]
    pub marker_key: String,
}

fn default_bucket() -> String {
    DEFAULT_BUCKET.to_string()
}

fn default_root() -> String {
    ".".to_string()
}

fn default_marker_key() -> String {
    DEFAULT_MARKER_KEY.to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackendType::default(),
            bucket: default_bucket(),
            root: default_root(),
            marker_key: default_marker_key(),
        }
    }
}

/// Load behaviour configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSection {
    /// What to do with repeated identifiers inside one dimension export
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

/// One `[[tables]]` entry as written in the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Warehouse table name
    pub name: String,

    /// Table kind; derived from the name prefix when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TableKind>,

    /// Destination column order; the export's header order when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    /// Per-column type coercions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coercions: BTreeMap<String, ColumnCoercion>,
}

impl TableEntry {
    /// Create an entry with only a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            columns: Vec::new(),
            coercions: BTreeMap::new(),
        }
    }

    /// Resolve this entry into a descriptor with a definite kind
    pub fn resolve(&self) -> LoadResult<TableDescriptor> {
        let kind = match self.kind {
            Some(kind) => kind,
            None => TableKind::from_table_name(&self.name).ok_or_else(|| {
                LoadError::ConfigError(format!(
                    "Table '{}' has no kind and its name does not start with 'dim_' or 'fact_'",
                    self.name
                ))
            })?,
        };

        Ok(TableDescriptor {
            name: self.name.clone(),
            kind,
            columns: self.columns.clone(),
            coercions: self.coercions.clone(),
        })
    }
}

/// Main configuration structure
///
/// Represents the `.warehouse-loader.toml` configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoaderConfig {
    /// Warehouse connection settings
    #[serde(default)]
    pub warehouse: WarehouseCredentials,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageSection,

    /// Load behaviour
    #[serde(default)]
    pub load: LoadSection,

    /// Tables to load, in processing order
    #[serde(default)]
    pub tables: Vec<TableEntry>,
}

impl LoaderConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a directory
    ///
    /// Looks for `.warehouse-loader.toml` in the directory.
    /// Falls back to defaults if not found.
    pub fn load(dir: &Path) -> LoadResult<Self> {
        Self::load_file(&dir.join(CONFIG_FILENAME))
    }

    /// Load configuration from an explicit file path
    pub fn load_file(config_path: &Path) -> LoadResult<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| LoadError::IoError(format!("Failed to read config: {}", e)))?;

            Self::parse(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse configuration from TOML string
    ///
    /// Table kinds are resolved here so a bad entry fails before any run starts.
    pub fn parse(content: &str) -> LoadResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LoadError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.table_catalog()?;
        Ok(config)
    }

    /// Save configuration to a directory
    pub fn save(&self, dir: &Path) -> LoadResult<()> {
        let content = self.to_toml()?;

        std::fs::write(dir.join(CONFIG_FILENAME), content)
            .map_err(|e| LoadError::IoError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> LoadResult<String> {
        toml::to_string_pretty(self).map_err(|e| {
            LoadError::SerializationError(format!("Failed to serialize config: {}", e))
        })
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.warehouse.host = host;
        }

        if let Ok(port) = std::env::var(ENV_PORT)
            && let Ok(port) = port.parse()
        {
            self.warehouse.port = port;
        }

        if let Ok(dbname) = std::env::var(ENV_DBNAME) {
            self.warehouse.dbname = dbname;
        }

        if let Ok(username) = std::env::var(ENV_USERNAME) {
            self.warehouse.username = username;
        }

        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.warehouse.password = Some(password);
        }

        if let Ok(bucket) = std::env::var(ENV_BUCKET) {
            self.storage.bucket = bucket;
        }

        if let Ok(backend) = std::env::var(ENV_STORAGE_BACKEND)
            && let Ok(backend_type) = backend.parse()
        {
            self.storage.backend = backend_type;
        }
    }

    /// Resolve every table entry into a catalog of descriptors
    pub fn table_catalog(&self) -> LoadResult<TableCatalog> {
        let descriptors = self
            .tables
            .iter()
            .map(TableEntry::resolve)
            .collect::<LoadResult<Vec<_>>>()?;
        TableCatalog::new(descriptors)
    }

    /// Root directory for the local storage backend, relative to `base`
    pub fn local_root(&self, base: &Path) -> PathBuf {
        if Path::new(&self.storage.root).is_absolute() {
            PathBuf::from(&self.storage.root)
        } else {
            base.join(&self.storage.root)
        }
    }
}

/// Generate a sample configuration file content
pub fn sample_config() -> &'static str {
    r#"# Warehouse loader configuration

[warehouse]
host = "localhost"
port = 5432
dbname = "warehouse"
username = "loader"
# password is read from WAREHOUSE_LOADER_PASSWORD

[storage]
# Object storage backend: "local" (default) or "s3"
backend = "local"
bucket = "processed"
root = "./buckets"
marker_key = "lastjob.json"

[load]
# "keep_all" lets the warehouse arbitrate repeated identifiers,
# "keep_last" keeps only the last row per identifier in each export
duplicate_policy = "keep_all"

[[tables]]
name = "dim_design"

[[tables]]
name = "dim_transaction"
kind = "dimension"

[tables.coercions]
sales_order_id = "nullable_integer"
purchase_order_id = "nullable_integer"

[[tables]]
name = "fact_sales_order"
kind = "fact"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::new();
        assert_eq!(config.storage.backend, StorageBackendType::Local);
        assert_eq!(config.storage.marker_key, DEFAULT_MARKER_KEY);
        assert_eq!(config.warehouse.port, 5432);
        assert_eq!(config.load.duplicate_policy, DuplicatePolicy::KeepAll);
        assert!(config.tables.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[warehouse]
host = "db.internal"
dbname = "dw"
username = "etl"

[storage]
backend = "s3"
bucket = "processed-bucket"

[load]
duplicate_policy = "keep_last"

[[tables]]
name = "dim_staff"

[[tables]]
name = "sales"
kind = "fact"
"#;
        let config = LoaderConfig::parse(toml).unwrap();
        assert_eq!(config.warehouse.host, "db.internal");
        assert_eq!(config.warehouse.dbname, "dw");
        assert_eq!(config.storage.backend, StorageBackendType::S3);
        assert_eq!(config.storage.bucket, "processed-bucket");
        assert_eq!(config.load.duplicate_policy, DuplicatePolicy::KeepLast);

        let catalog = config.table_catalog().unwrap();
        assert_eq!(catalog.get("dim_staff").unwrap().kind, TableKind::Dimension);
        assert_eq!(catalog.get("sales").unwrap().kind, TableKind::Fact);
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let toml = r#"
[[tables]]
name = "staff"
"#;
        let result = LoaderConfig::parse(toml);
        assert!(matches!(result, Err(LoadError::ConfigError(_))));
    }

    #[test]
    fn test_parse_coercions() {
        let toml = r#"
[[tables]]
name = "dim_transaction"

[tables.coercions]
sales_order_id = "nullable_integer"
"#;
        let config = LoaderConfig::parse(toml).unwrap();
        assert_eq!(
            config.tables[0].coercions.get("sales_order_id"),
            Some(&ColumnCoercion::NullableInteger)
        );
    }

    #[test]
    fn test_connection_string_masked() {
        let creds = WarehouseCredentials {
            username: "etl".to_string(),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let masked = creds.connection_string_masked();
        assert!(masked.contains("password=****"));
        assert!(!masked.contains("secret"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = LoaderConfig::new();
        config.storage.bucket = "my-bucket".to_string();
        config.tables.push(TableEntry::new("dim_location"));

        config.save(dir.path()).unwrap();
        assert!(dir.path().join(CONFIG_FILENAME).exists());

        let loaded = LoaderConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.storage.bucket, "my-bucket");
        assert_eq!(loaded.tables, vec![TableEntry::new("dim_location")]);
    }

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!(
            "local".parse::<StorageBackendType>().unwrap(),
            StorageBackendType::Local
        );
        assert_eq!(
            "S3".parse::<StorageBackendType>().unwrap(),
            StorageBackendType::S3
        );
        assert!("gcs".parse::<StorageBackendType>().is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config = LoaderConfig::parse(sample_config()).expect("sample config should parse");
        let catalog = config.table_catalog().unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.get("fact_sales_order").unwrap().kind,
            TableKind::Fact
        );
    }
}
