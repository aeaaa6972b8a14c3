// src/options.rs
// Database configuration

use serde::{Deserialize, Serialize};

use crate::error::{Result, TinyDocError};

fn default_name() -> String {
    "test".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_transaction_operations() -> usize {
    1000
}

/// Options for a [`Database`](crate::Database)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DatabaseOptions {
    /// Database name, used in explain namespaces
    #[serde(default = "default_name")]
    pub name: String,

    /// When false, unknown collections fail with `CollectionNotFound`
    /// until `create_collection` is called
    #[serde(default = "default_true")]
    pub auto_create_collections: bool,

    /// Buffered writes allowed in one transaction
    #[serde(default = "default_max_transaction_operations")]
    pub max_transaction_operations: usize,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            name: default_name(),
            auto_create_collections: true,
            max_transaction_operations: default_max_transaction_operations(),
        }
    }
}

impl DatabaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let options: DatabaseOptions =
            serde_json::from_str(json).map_err(|e| TinyDocError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_auto_create_collections(mut self, enabled: bool) -> Self {
        self.auto_create_collections = enabled;
        self
    }

    pub fn with_max_transaction_operations(mut self, max: usize) -> Self {
        self.max_transaction_operations = max;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TinyDocError::Config("database name cannot be empty".to_string()));
        }
        if self.max_transaction_operations == 0 {
            return Err(TinyDocError::Config(
                "maxTransactionOperations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
