//! Desired deployment state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ReconcileError;
use crate::utils::sha256_hash;

/// CPU architecture the task must be scheduled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Architecture {
    Arm64,
    X86_64,
}

impl Architecture {
    /// Map a host CPU type to an architecture. Returns `None` for unknown hosts.
    pub fn from_host(machine: &str) -> Option<Self> {
        match machine.trim().to_lowercase().as_str() {
            "aarch64" | "arm64" | "armv8" | "armv8l" => Some(Architecture::Arm64),
            "x86_64" | "amd64" | "x64" => Some(Architecture::X86_64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "ARM64",
            Architecture::X86_64 => "X86_64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: String,
    /// Tag, or `sha256:...` when the reference was pinned by digest
    pub tag: String,
}

impl ImageRef {
    /// Parse `repository[:tag]` or `repository@digest`.
    ///
    /// A colon only separates a tag when it appears after the last `/`, so
    /// `registry:5000/app` is a repository without a tag.
    pub fn parse(reference: &str) -> Result<Self, ReconcileError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReconcileError::missing("image"));
        }

        let (repository, tag) = if let Some((repo, digest)) = reference.split_once('@') {
            (repo, digest)
        } else {
            let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
            match reference[name_start..].rfind(':') {
                Some(i) => (
                    &reference[..name_start + i],
                    &reference[name_start + i + 1..],
                ),
                None => (reference, "latest"),
            }
        };

        if repository.is_empty() {
            return Err(ReconcileError::Configuration(format!(
                "image '{}' has an empty repository",
                reference
            )));
        }
        if tag.is_empty() {
            return Err(ReconcileError::Configuration(format!(
                "image '{}' has an empty tag",
                reference
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn is_digest(&self) -> bool {
        self.tag.starts_with("sha256:")
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_digest() {
            write!(f, "{}@{}", self.repository, self.tag)
        } else {
            write!(f, "{}:{}", self.repository, self.tag)
        }
    }
}

/// Network placement of the service tasks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Subnet ids, deduplicated, in the order they were given
    pub subnets: Vec<String>,
    pub security_group: Option<String>,
    pub assign_public_ip: bool,
    pub vpc_id: Option<String>,
}

impl NetworkConfig {
    /// Whether this configuration carries everything a service creation needs
    pub fn is_complete(&self) -> bool {
        !self.subnets.is_empty() && self.security_group.is_some()
    }
}

/// The desired state of one deployment. Built once per invocation by
/// [`crate::deploy::builder::build_spec`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentSpec {
    pub(crate) service_name: String,
    pub(crate) cluster_name: String,
    pub(crate) task_family: String,
    pub(crate) container_name: String,
    pub(crate) image: ImageRef,
    pub(crate) cpu: u32,
    pub(crate) memory: u32,
    pub(crate) environment: BTreeMap<String, String>,
    pub(crate) port: u16,
    pub(crate) desired_count: u32,
    pub(crate) execution_role_ref: String,
    pub(crate) task_role_ref: String,
    pub(crate) network: NetworkConfig,
    pub(crate) load_balancer_target_ref: Option<String>,
    pub(crate) architecture: Architecture,
}

impl DeploymentSpec {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn task_family(&self) -> &str {
        &self.task_family
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn memory(&self) -> u32 {
        self.memory
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn desired_count(&self) -> u32 {
        self.desired_count
    }

    pub fn execution_role_ref(&self) -> &str {
        &self.execution_role_ref
    }

    pub fn task_role_ref(&self) -> &str {
        &self.task_role_ref
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    pub fn load_balancer_target_ref(&self) -> Option<&str> {
        self.load_balancer_target_ref.as_deref()
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// SHA-256 fingerprint of the desired content.
    ///
    /// Two specs with the same digest describe the same deployment, which
    /// lets a revision be traced back to the inputs that produced it.
    pub fn digest(&self) -> String {
        // Serializing a struct of strings, integers and a BTreeMap cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        sha256_hash(&bytes)
    }
}
