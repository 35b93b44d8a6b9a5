//! Shared state behind every route.

use std::sync::Arc;

use anyhow::Context;

use dt_actions::{ActionRegistry, DevtelBackend, JsonDevtelBackend};
use dt_audit::{ComplianceExporter, ImpactAnalyzer};
use dt_chat::{AgentService, ChatService, ChatStore, EventHub, HttpAgentClient};
use dt_proposals::{LogSink, ProposalEngine};

use crate::config::DaemonConfig;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub devtel: Arc<dyn DevtelBackend>,
    pub exporter: Arc<ComplianceExporter>,
    pub analyzer: Arc<ImpactAnalyzer>,
}

impl AppState {
    /// Open every store under the configured data directory and connect
    /// to the agent service over HTTP.
    pub fn open(config: &DaemonConfig) -> anyhow::Result<Self> {
        let agent = HttpAgentClient::new(&config.agent_client())
            .context("failed to configure the agent client")?;
        Self::with_agent(config, Arc::new(agent))
    }

    pub fn with_agent(config: &DaemonConfig, agent: Arc<dyn AgentService>) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("failed to create {}", config.data_dir.display()))?;

        let store = Arc::new(ChatStore::open(config.chat_dir())?);
        let devtel: Arc<dyn DevtelBackend> = Arc::new(JsonDevtelBackend::open(config.devtel_dir())?);
        let hub = EventHub::default();

        let registry = ActionRegistry::new(devtel.clone()).with_timeout(config.execution_timeout());
        let mut engine = ProposalEngine::open(
            &config.data_dir,
            registry,
            store.clone(),
            Arc::new(config.role_table()),
        )?
        .with_ttl(config.proposal_ttl()?);
        engine.add_sink(Box::new(hub.clone()));
        engine.add_sink(Box::new(LogSink::new(config.data_dir.join("events.jsonl"))));

        let chat = ChatService::new(store, Arc::new(engine), agent, devtel.clone(), hub)
            .with_tool_sets(config.agent.tool_sets.clone());
        let exporter = ComplianceExporter::open(config.exports_dir(), &config.compliance.secret)?;

        Ok(Self {
            chat,
            devtel,
            exporter: Arc::new(exporter),
            analyzer: Arc::new(ImpactAnalyzer::default()),
        })
    }
}
