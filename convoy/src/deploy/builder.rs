//! Desired-state builder
//!
//! Turns raw inputs into a validated [`DeploymentSpec`]. Validation is
//! fail-fast and runs in a fixed order: identity, image, sizing, roles,
//! network, load balancer. Nothing here talks to the control plane.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::errors::ReconcileError;
use crate::models::spec::{Architecture, DeploymentSpec, ImageRef, NetworkConfig};
use crate::stack::{keys, StackOutputs};

/// Prefix of variables copied into the container environment
pub const CONTAINER_ENV_PREFIX: &str = "CONTAINER_ENV_";

const DEFAULT_CPU: u32 = 256;
const DEFAULT_MEMORY: u32 = 512;
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DESIRED_COUNT: u32 = 1;

/// Raw, unvalidated deployment inputs
#[derive(Debug, Clone, Default)]
pub struct DeploymentInputs {
    pub project: Option<String>,
    pub environment: Option<String>,
    pub service: Option<String>,
    pub image: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub port: Option<String>,
    pub desired_count: Option<String>,
    pub assign_public_ip: Option<String>,
    pub container_env: BTreeMap<String, String>,
}

impl DeploymentInputs {
    /// Read inputs from process-style variables
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |name: &str| vars.get(name).cloned();

        let container_env = vars
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(CONTAINER_ENV_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect();

        Self {
            project: get("PROJECT_NAME"),
            environment: get("ENVIRONMENT"),
            service: get("SERVICE_NAME"),
            image: get("IMAGE_URI"),
            cpu: get("TASK_CPU"),
            memory: get("TASK_MEMORY"),
            port: get("CONTAINER_PORT"),
            desired_count: get("DESIRED_COUNT"),
            assign_public_ip: get("ASSIGN_PUBLIC_IP"),
            container_env,
        }
    }

    /// Apply `--project=`, `--environment=`, `--service=` and `--image=` overrides
    pub fn with_overrides(mut self, args: &HashMap<String, String>) -> Self {
        let overrides = [
            ("project", &mut self.project),
            ("environment", &mut self.environment),
            ("service", &mut self.service),
            ("image", &mut self.image),
        ];
        for (flag, slot) in overrides {
            if let Some(value) = args.get(flag) {
                *slot = Some(value.clone());
            }
        }
        self
    }
}

/// Map a host CPU type to an architecture. Unknown hosts fall back to X86_64.
pub fn resolve_architecture(host_arch: &str) -> Architecture {
    Architecture::from_host(host_arch).unwrap_or_else(|| {
        warn!(
            "Unknown host architecture '{}', defaulting to {}",
            host_arch.trim(),
            Architecture::X86_64
        );
        Architecture::X86_64
    })
}

/// Build the desired state from raw inputs
pub fn build_spec(
    inputs: &DeploymentInputs,
    outputs: &StackOutputs,
    host_arch: &str,
) -> Result<DeploymentSpec, ReconcileError> {
    // Identity
    let project = identity_part("project", inputs.project.as_deref())?;
    let environment = identity_part("environment", inputs.environment.as_deref())?;
    let service = identity_part("service", inputs.service.as_deref())?;

    // Image
    let image = ImageRef::parse(inputs.image.as_deref().unwrap_or(""))?;

    // Sizing
    let cpu = positive("cpu", inputs.cpu.as_deref(), DEFAULT_CPU)?;
    let memory = positive("memory", inputs.memory.as_deref(), DEFAULT_MEMORY)?;
    let port = positive("port", inputs.port.as_deref(), DEFAULT_PORT as u32)?;
    let port = u16::try_from(port).map_err(|_| {
        ReconcileError::Configuration(format!("port {} is out of range", port))
    })?;
    let desired_count = match inputs.desired_count.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_DESIRED_COUNT,
        Some(raw) => raw.parse::<u32>().map_err(|_| {
            ReconcileError::Configuration(format!("desired_count '{}' is not a number", raw))
        })?,
    };

    // Roles
    let execution_role_ref = outputs.require(keys::EXECUTION_ROLE)?.to_string();
    let task_role_ref = outputs.require(keys::TASK_ROLE)?.to_string();

    // Network
    let network = build_network(inputs, outputs)?;

    // Load balancer
    let load_balancer_target_ref = outputs.get(keys::TARGET_GROUP_REF).map(str::to_string);

    let spec = DeploymentSpec {
        service_name: format!("{}-{}-{}", project, environment, service),
        cluster_name: format!("{}-{}-cluster", project, environment),
        task_family: format!("{}-{}-{}", project, environment, service),
        container_name: service.to_string(),
        image,
        cpu,
        memory,
        environment: inputs.container_env.clone(),
        port,
        desired_count,
        execution_role_ref,
        task_role_ref,
        network,
        load_balancer_target_ref,
        architecture: resolve_architecture(host_arch),
    };

    debug!("Built deployment spec: {:?}", spec);
    Ok(spec)
}

fn identity_part<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, ReconcileError> {
    let value = value.map(str::trim).unwrap_or("");
    if value.is_empty() {
        return Err(ReconcileError::missing(field));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReconcileError::Configuration(format!(
            "{} '{}' may only contain letters, digits, '-' and '_'",
            field, value
        )));
    }
    Ok(value)
}

fn positive(field: &str, value: Option<&str>, default: u32) -> Result<u32, ReconcileError> {
    match value.map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(ReconcileError::Configuration(format!(
                "{} must be a positive integer, got '{}'",
                field, raw
            ))),
        },
    }
}

fn build_network(
    inputs: &DeploymentInputs,
    outputs: &StackOutputs,
) -> Result<NetworkConfig, ReconcileError> {
    let mut subnets: Vec<String> = Vec::new();
    for subnet in outputs.list(keys::SUBNET_IDS) {
        if !subnets.contains(&subnet) {
            subnets.push(subnet);
        }
    }

    let assign_public_ip = match inputs.assign_public_ip.as_deref().map(str::trim) {
        None | Some("") => false,
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "enabled" | "yes" | "1" => true,
            "false" | "disabled" | "no" | "0" => false,
            _ => {
                return Err(ReconcileError::Configuration(format!(
                    "assign_public_ip must be a boolean, got '{}'",
                    raw
                )))
            }
        },
    };

    // Presence of subnets and security group is checked on the create path
    // only; an update keeps the network configuration already attached.
    Ok(NetworkConfig {
        subnets,
        security_group: outputs.get(keys::SECURITY_GROUP_ID).map(str::to_string),
        assign_public_ip,
        vpc_id: outputs.get(keys::VPC_ID).map(str::to_string),
    })
}
