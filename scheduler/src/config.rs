//! C8 — command-line and environment configuration, one flag/env twin per
//! option in the table this mirrors. Environment wins over flag (clap's
//! default resolution order with `env` set).

use clap::Parser;
use scheduler_types::{MinimalResources, Mode, ResourceVector, Target};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(long, env = "ARANGODB_MODE", default_value = "cluster")]
    pub mode: ModeArg,

    #[arg(long, env = "ARANGODB_ASYNC_REPLICATION", default_value_t = false)]
    pub async_replication: bool,

    #[arg(long, env = "ARANGODB_ROLE", default_value = "*")]
    pub role: String,

    #[arg(long, env = "ARANGODB_NR_AGENTS", default_value_t = 1)]
    pub nr_agents: u32,

    #[arg(long, env = "ARANGODB_NR_DBSERVERS", default_value_t = 2)]
    pub nr_dbservers: u32,

    #[arg(long, env = "ARANGODB_NR_COORDINATORS", default_value_t = 1)]
    pub nr_coordinators: u32,

    #[arg(long, env = "ARANGODB_MINIMAL_RESOURCES_AGENT", default_value = "")]
    pub minimal_resources_agent: String,

    #[arg(long, env = "ARANGODB_MINIMAL_RESOURCES_DBSERVER", default_value = "")]
    pub minimal_resources_dbserver: String,

    #[arg(long, env = "ARANGODB_MINIMAL_RESOURCES_SECONDARY", default_value = "")]
    pub minimal_resources_secondary: String,

    #[arg(long, env = "ARANGODB_MINIMAL_RESOURCES_COORDINATOR", default_value = "")]
    pub minimal_resources_coordinator: String,

    #[arg(long, env = "ARANGODB_PRINCIPAL", default_value = "arangodb")]
    pub principal: String,

    #[arg(long, env = "ARANGODB_FRAMEWORK_NAME", default_value = "arangodb")]
    pub framework_name: String,

    #[arg(long, env = "ARANGODB_FRAMEWORK_PORT", default_value_t = 8529)]
    pub framework_port: u16,

    #[arg(long, env = "ARANGODB_WEBUI_PORT")]
    pub webui_port: Option<u16>,

    #[arg(long, env = "ARANGODB_WEBUI")]
    pub webui: Option<String>,

    #[arg(long, env = "ARANGODB_FAILOVER_TIMEOUT", default_value_t = 864_000)]
    pub failover_timeout: u64,

    #[arg(long, env = "ARANGODB_REFUSE_SECONDS", default_value_t = 20)]
    pub refuse_seconds: u64,

    #[arg(long, env = "ARANGODB_OFFER_LIMIT", default_value_t = 10)]
    pub offer_limit: usize,

    #[arg(long, env = "ARANGODB_RESET_STATE", default_value_t = false)]
    pub reset_state: bool,

    #[arg(long, env = "ARANGODB_SECONDARIES_WITH_DBSERVERS", default_value_t = false)]
    pub secondaries_with_dbservers: bool,

    #[arg(long, env = "ARANGODB_COORDINATORS_WITH_DBSERVERS", default_value_t = false)]
    pub coordinators_with_dbservers: bool,

    #[arg(long, env = "ARANGODB_SECONDARY_SAME_SERVER", default_value_t = false)]
    pub secondary_same_server: bool,

    #[arg(long, env = "ARANGODB_IMAGE")]
    pub arangodb_image: String,

    #[arg(long, env = "ARANGODB_FORCE_PULL_IMAGE", default_value_t = true)]
    pub arangodb_force_pull_image: bool,

    #[arg(long, env = "ARANGODB_PRIVILEGED_IMAGE", default_value_t = false)]
    pub arangodb_privileged_image: bool,

    #[arg(long, env = "ARANGODB_ENTERPRISE_KEY", default_value = "")]
    pub arangodb_enterprise_key: String,

    #[arg(long, env = "ARANGODB_JWT_SECRET", default_value = "")]
    pub arangodb_jwt_secret: String,

    #[arg(long, env = "ARANGODB_SSL_KEYFILE", default_value = "")]
    pub arangodb_ssl_keyfile: String,

    #[arg(long, env = "ARANGODB_ENCRYPTION_KEYFILE", default_value = "")]
    pub arangodb_encryption_keyfile: String,

    #[arg(long, env = "ARANGODB_STORAGE_ENGINE", default_value = "auto")]
    pub arangodb_storage_engine: String,

    #[arg(long, env = "ARANGODB_ADDITIONAL_AGENT_ARGS", default_value = "")]
    pub arangodb_additional_agent_args: String,

    #[arg(long, env = "ARANGODB_ADDITIONAL_DBSERVER_ARGS", default_value = "")]
    pub arangodb_additional_dbserver_args: String,

    #[arg(long, env = "ARANGODB_ADDITIONAL_SECONDARY_ARGS", default_value = "")]
    pub arangodb_additional_secondary_args: String,

    #[arg(long, env = "ARANGODB_ADDITIONAL_COORDINATOR_ARGS", default_value = "")]
    pub arangodb_additional_coordinator_args: String,

    #[arg(long, env = "MASTER")]
    pub master: String,

    #[arg(long, env = "ZK", default_value = "")]
    pub zk: String,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModeArg {
    Standalone,
    Cluster,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Standalone => Mode::Standalone,
            ModeArg::Cluster => Mode::Cluster,
        }
    }
}

fn parse_resource_vector(spec: &str) -> ResourceVector {
    let mut vector = ResourceVector::default();
    for field in spec.split(';').map(str::trim).filter(|f| !f.is_empty()) {
        let Some((key, value)) = field.split_once('=') else { continue };
        match key.trim() {
            "cpu" => vector.cpu = value.trim().parse().unwrap_or(0.0),
            "mem" => vector.mem_mb = value.trim().parse().unwrap_or(0.0),
            "disk" => vector.disk_mb = value.trim().parse().unwrap_or(0.0),
            "ports" => vector.ports = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }
    vector
}

fn split_args(spec: &str) -> Vec<String> {
    spec.split_whitespace().map(str::to_string).collect()
}

impl Cli {
    pub fn target(&self) -> Target {
        Target {
            mode: self.mode.into(),
            nr_agents: self.nr_agents.max(1),
            nr_dbservers: self.nr_dbservers.max(1),
            nr_coordinators: self.nr_coordinators.max(1),
            async_replication: self.async_replication,
            minimal_resources: MinimalResources {
                agent: parse_resource_vector(&self.minimal_resources_agent),
                dbserver: parse_resource_vector(&self.minimal_resources_dbserver),
                secondary: parse_resource_vector(&self.minimal_resources_secondary),
                coordinator: parse_resource_vector(&self.minimal_resources_coordinator),
            },
            secondaries_with_dbservers: self.secondaries_with_dbservers,
            coordinators_with_dbservers: self.coordinators_with_dbservers,
            secondary_same_server: self.secondary_same_server,
        }
    }

    pub fn launch_config(&self) -> crate::manager::LaunchConfig {
        crate::manager::LaunchConfig {
            container_image: self.arangodb_image.clone(),
            additional_args: crate::manager::RoleArgs {
                agent: split_args(&self.arangodb_additional_agent_args),
                dbserver: split_args(&self.arangodb_additional_dbserver_args),
                secondary: split_args(&self.arangodb_additional_secondary_args),
                coordinator: split_args(&self.arangodb_additional_coordinator_args),
            },
        }
    }

}
