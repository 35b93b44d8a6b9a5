//! Daemon configuration from `<data_dir>/daemon.toml`.
//!
//! ```toml
//! bind = "127.0.0.1:7411"
//!
//! [agent]
//! base_url = "http://localhost:8001"
//! service_token = "dev-token"
//! timeout_secs = 120
//!
//! [agent.tool_sets]
//! planner = ["issues", "cycles"]
//!
//! [proposals]
//! ttl_minutes = 60
//! execution_timeout_secs = 120
//!
//! [compliance]
//! secret = "dev-secret"
//!
//! [permissions]
//! default_role = "editor"
//!
//! [permissions.roles]
//! "6f1c2a8e-0000-4000-8000-000000000001" = "viewer"
//! ```
//!
//! The deployment's environment variables win over the file:
//! `CREWAI_SERVICE_URL`, `CREWAI_SERVICE_TOKEN` and `COMPLIANCE_SECRET`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dt_chat::AgentClientConfig;
use dt_proposals::{Role, RolePermissions};

pub const CONFIG_FILE: &str = "daemon.toml";

const ENV_AGENT_URL: &str = "CREWAI_SERVICE_URL";
const ENV_AGENT_TOKEN: &str = "CREWAI_SERVICE_TOKEN";
const ENV_COMPLIANCE_SECRET: &str = "COMPLIANCE_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Root for every store. Set from the command line, not the file.
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub proposals: ProposalSection,

    #[serde(default)]
    pub compliance: ComplianceSection,

    #[serde(default)]
    pub permissions: PermissionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_url")]
    pub base_url: String,
    #[serde(default = "default_service_token")]
    pub service_token: String,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    /// Agent id → tool sets that agent may use.
    #[serde(default)]
    pub tool_sets: BTreeMap<String, Vec<String>>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            base_url: default_agent_url(),
            service_token: default_service_token(),
            timeout_secs: default_agent_timeout(),
            tool_sets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalSection {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
}

impl Default for ProposalSection {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            execution_timeout_secs: default_execution_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSection {
    #[serde(default = "default_compliance_secret")]
    pub secret: String,
}

impl Default for ComplianceSection {
    fn default() -> Self {
        Self {
            secret: default_compliance_secret(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSection {
    #[serde(default)]
    pub default_role: Role,
    /// User id → role. Keys that are not UUIDs are ignored with a warning.
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,
}

fn default_bind() -> String {
    "127.0.0.1:7411".to_string()
}

fn default_agent_url() -> String {
    dt_chat::DEFAULT_AGENT_URL.to_string()
}

fn default_service_token() -> String {
    "dev-token".to_string()
}

fn default_agent_timeout() -> u64 {
    dt_chat::DEFAULT_AGENT_TIMEOUT.as_secs()
}

fn default_ttl_minutes() -> i64 {
    dt_proposals::DEFAULT_PROPOSAL_TTL_MINUTES
}

fn default_execution_timeout() -> u64 {
    120
}

fn default_compliance_secret() -> String {
    "dev-secret".to_string()
}

impl DaemonConfig {
    /// Defaults rooted at `data_dir`.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind: default_bind(),
            data_dir: data_dir.into(),
            agent: AgentSection::default(),
            proposals: ProposalSection::default(),
            compliance: ComplianceSection::default(),
            permissions: PermissionSection::default(),
        }
    }

    /// Parse a config file. `data_dir` is not read from the file.
    pub fn load(path: &Path, data_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config in {}", path.display()))?;
        config.data_dir = data_dir.into();
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let ttl = self.proposals.ttl_minutes;
        if ttl <= 0 {
            anyhow::bail!("proposals.ttl_minutes must be positive, got {}", ttl);
        }
        self.proposal_ttl()?;
        Ok(())
    }

    /// Load `path`, or `<data_dir>/daemon.toml` when no path is given.
    /// A missing default file means defaults; a missing explicit file is an error.
    pub fn resolve(path: Option<&Path>, data_dir: &Path) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path, data_dir),
            None => {
                let default_path = data_dir.join(CONFIG_FILE);
                if default_path.exists() {
                    Self::load(&default_path, data_dir)
                } else {
                    Ok(Self::for_data_dir(data_dir))
                }
            }
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_AGENT_URL) {
            self.agent.base_url = url;
        }
        if let Some(token) = lookup(ENV_AGENT_TOKEN) {
            self.agent.service_token = token;
        }
        if let Some(secret) = lookup(ENV_COMPLIANCE_SECRET) {
            self.compliance.secret = secret;
        }
    }

    pub fn agent_client(&self) -> AgentClientConfig {
        AgentClientConfig {
            base_url: self.agent.base_url.clone(),
            service_token: self.agent.service_token.clone(),
            timeout: Duration::from_secs(self.agent.timeout_secs),
        }
    }

    pub fn role_table(&self) -> RolePermissions {
        let mut roles = HashMap::new();
        for (key, role) in &self.permissions.roles {
            match key.parse::<Uuid>() {
                Ok(user_id) => {
                    roles.insert(user_id, *role);
                }
                Err(_) => tracing::warn!(key = %key, "ignoring role for non-UUID user id"),
            }
        }
        RolePermissions::new(self.permissions.default_role, roles)
    }

    pub fn proposal_ttl(&self) -> anyhow::Result<chrono::Duration> {
        chrono::Duration::try_minutes(self.proposals.ttl_minutes).with_context(|| {
            format!(
                "proposals.ttl_minutes is out of range: {}",
                self.proposals.ttl_minutes
            )
        })
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.proposals.execution_timeout_secs)
    }

    pub fn chat_dir(&self) -> PathBuf {
        self.data_dir.join("chat")
    }

    pub fn devtel_dir(&self) -> PathBuf {
        self.data_dir.join("devtel")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }
}
