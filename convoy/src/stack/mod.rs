//! Stack output resolution
//!
//! Infrastructure values (roles, subnets, security groups, target group)
//! are provisioned elsewhere and handed to the reconciler by name.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ReconcileError;
use crate::filesys::file::File;

/// Logical names of the outputs the reconciler consumes
pub mod keys {
    pub const EXECUTION_ROLE: &str = "execution_role";
    pub const TASK_ROLE: &str = "task_role";
    pub const VPC_ID: &str = "vpc_id";
    pub const SUBNET_IDS: &str = "subnet_ids";
    pub const SECURITY_GROUP_ID: &str = "security_group_id";
    pub const TARGET_GROUP_REF: &str = "target_group_ref";
}

/// Provider output keys accepted for each logical output
const OUTPUT_ALIASES: [(&str, &[&str]); 6] = [
    (keys::EXECUTION_ROLE, &["ExecutionRoleArn", "TaskExecutionRoleArn"]),
    (keys::TASK_ROLE, &["TaskRoleArn"]),
    (keys::VPC_ID, &["VpcId", "VPCId"]),
    (keys::SUBNET_IDS, &["SubnetIds", "PrivateSubnets", "PrivateSubnetIds"]),
    (
        keys::SECURITY_GROUP_ID,
        &["SecurityGroupId", "ServiceSecurityGroupId", "EcsSecurityGroupId"],
    ),
    (keys::TARGET_GROUP_REF, &["TargetGroupArn"]),
];

/// Environment variables read by [`EnvStackOutputs`]
const ENV_VARS: [(&str, &str); 6] = [
    (keys::EXECUTION_ROLE, "EXECUTION_ROLE_ARN"),
    (keys::TASK_ROLE, "TASK_ROLE_ARN"),
    (keys::VPC_ID, "VPC_ID"),
    (keys::SUBNET_IDS, "SUBNET_IDS"),
    (keys::SECURITY_GROUP_ID, "SECURITY_GROUP_ID"),
    (keys::TARGET_GROUP_REF, "TARGET_GROUP_ARN"),
];

/// Resolved stack outputs keyed by logical name. Blank values count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackOutputs {
    values: HashMap<String, String>,
}

impl StackOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value; blank values are dropped
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let value = value.trim();
        if !value.is_empty() {
            self.values.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// A required output, or a configuration error naming it
    pub fn require(&self, key: &str) -> Result<&str, ReconcileError> {
        self.get(key).ok_or_else(|| ReconcileError::missing(key))
    }

    /// A comma separated output split into trimmed, non-empty items
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Build from provider output keys, mapping known aliases to logical names.
    /// Logical names themselves are accepted as well.
    pub fn from_provider_outputs<I>(outputs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut resolved = Self::new();
        for (key, value) in outputs {
            let logical = OUTPUT_ALIASES
                .iter()
                .find(|(logical, aliases)| *logical == key || aliases.contains(&key.as_str()))
                .map(|(logical, _)| *logical);
            match logical {
                Some(logical) => resolved.insert(logical, value),
                None => debug!("Ignoring unrecognised stack output: {}", key),
            }
        }
        resolved
    }
}

/// Source of stack outputs
#[async_trait]
pub trait StackOutputResolver: Send + Sync {
    async fn resolve(&self) -> Result<StackOutputs, ReconcileError>;
}

/// Stack outputs exported to a JSON file.
///
/// Accepts a flat object (`{"VpcId": "vpc-1"}`) or the list form produced by
/// stack description commands (`[{"OutputKey": "VpcId", "OutputValue": "vpc-1"}]`).
pub struct JsonFileOutputs {
    file: File,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutputDocument {
    Flat(HashMap<String, String>),
    List(Vec<OutputEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OutputEntry {
    output_key: String,
    output_value: String,
}

impl JsonFileOutputs {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Parse an output document
    pub fn parse(contents: &str) -> Result<StackOutputs, ReconcileError> {
        let document: OutputDocument = serde_json::from_str(contents).map_err(|e| {
            ReconcileError::Configuration(format!("unreadable stack outputs: {}", e))
        })?;
        let outputs = match document {
            OutputDocument::Flat(map) => StackOutputs::from_provider_outputs(map),
            OutputDocument::List(entries) => StackOutputs::from_provider_outputs(
                entries.into_iter().map(|e| (e.output_key, e.output_value)),
            ),
        };
        Ok(outputs)
    }
}

#[async_trait]
impl StackOutputResolver for JsonFileOutputs {
    async fn resolve(&self) -> Result<StackOutputs, ReconcileError> {
        if !self.file.exists().await {
            return Err(ReconcileError::Configuration(format!(
                "stack outputs file not found: {}",
                self.file.path().display()
            )));
        }
        let contents = self.file.read_string().await?;
        Self::parse(&contents)
    }
}

/// Stack outputs exported as environment variables
pub struct EnvStackOutputs {
    vars: HashMap<String, String>,
}

impl EnvStackOutputs {
    /// Snapshot of the given variables, usually `std::env::vars()`
    pub fn new<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            vars: vars.into_iter().collect(),
        }
    }
}

#[async_trait]
impl StackOutputResolver for EnvStackOutputs {
    async fn resolve(&self) -> Result<StackOutputs, ReconcileError> {
        let mut outputs = StackOutputs::new();
        for (logical, var) in ENV_VARS {
            if let Some(value) = self.vars.get(var) {
                outputs.insert(logical, value.as_str());
            }
        }
        Ok(outputs)
    }
}
