//! Secrets provider: warehouse credentials and the list of tables to load

use async_trait::async_trait;

use crate::config::{LoaderConfig, WarehouseCredentials};
use crate::error::{LoadError, LoadResult};

/// Source of warehouse credentials and table names
#[async_trait(?Send)]
pub trait SecretsProvider {
    /// Credentials for the warehouse connection
    async fn warehouse_credentials(&self) -> LoadResult<WarehouseCredentials>;

    /// Warehouse tables to load, in processing order
    async fn warehouse_table_names(&self) -> LoadResult<Vec<String>>;
}

/// Secrets taken from the loader configuration (file plus environment)
#[derive(Debug, Clone)]
pub struct ConfigSecrets {
    credentials: WarehouseCredentials,
    table_names: Vec<String>,
}

impl ConfigSecrets {
    pub fn new(credentials: WarehouseCredentials, table_names: Vec<String>) -> Self {
        Self {
            credentials,
            table_names,
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(
            config.warehouse.clone(),
            config.tables.iter().map(|t| t.name.clone()).collect(),
        )
    }
}

#[async_trait(?Send)]
impl SecretsProvider for ConfigSecrets {
    async fn warehouse_credentials(&self) -> LoadResult<WarehouseCredentials> {
        if self.credentials.username.is_empty() {
            return Err(LoadError::ConfigError(
                "Warehouse username is not set".to_string(),
            ));
        }
        Ok(self.credentials.clone())
    }

    async fn warehouse_table_names(&self) -> LoadResult<Vec<String>> {
        Ok(self.table_names.clone())
    }
}
