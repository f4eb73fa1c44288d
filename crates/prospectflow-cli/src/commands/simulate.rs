//! Simulate command - a demo run against a simulated enrichment provider

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prospectflow_workflows::error_catalog::INSUFFICIENT_API_CREDITS;
use prospectflow_workflows::{
    BatchCounters, BatchSummary, Configuration, EnrichmentCollaborators, EnrichmentData,
    EnrichmentOptions, EnrichmentProvider, FailureNotification, NotificationChannel, Prospect,
    ProviderError, SessionStatus, WorkflowOrchestrator, WorkflowStep,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::commands::{Command, CommandContext};
use crate::error::{CliError, CliResult};
use crate::output::{print_success, print_warning};

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Prospects to enrich
    pub prospects: usize,
    /// Fail every Nth prospect at the persistence stage
    pub fail_every: Option<usize>,
    /// Owning user session
    pub user: String,
    /// Ignore the configured inter-request delay
    pub no_delay: bool,
}

/// Enrichment provider that fabricates plausible data
pub struct SimulatedProvider {
    fail_every: Option<usize>,
    latency: Duration,
}

impl SimulatedProvider {
    /// Provider failing every `fail_every`-th prospect (1-based)
    pub fn new(fail_every: Option<usize>, latency: Duration) -> Self {
        Self {
            fail_every: fail_every.filter(|n| *n > 0),
            latency,
        }
    }

    fn should_fail(&self, prospect: &Prospect) -> bool {
        let ordinal = prospect
            .id
            .rsplit('-')
            .next()
            .and_then(|n| n.parse::<usize>().ok());
        matches!((self.fail_every, ordinal), (Some(every), Some(n)) if n % every == 0)
    }
}

#[async_trait]
impl EnrichmentProvider for SimulatedProvider {
    async fn lookup_profile(&self, prospect: &Prospect) -> Result<Value, ProviderError> {
        tokio::time::sleep(self.latency).await;
        Ok(json!({
            "name": prospect.name,
            "headline": format!("Head of Growth at {}", prospect.company.as_deref().unwrap_or("Acme")),
        }))
    }

    async fn analyze_company(&self, prospect: &Prospect) -> Result<Value, ProviderError> {
        tokio::time::sleep(self.latency).await;
        Ok(json!({
            "website": prospect.website,
            "industry": "software",
            "employees": 120,
        }))
    }

    async fn analyze_tech_stack(&self, _prospect: &Prospect) -> Result<Value, ProviderError> {
        tokio::time::sleep(self.latency).await;
        Ok(json!(["rust", "postgres", "kubernetes"]))
    }

    async fn synthesize(
        &self,
        prospect: &Prospect,
        data: &EnrichmentData,
    ) -> Result<Value, ProviderError> {
        Ok(json!({
            "summary": format!(
                "{} works at a software company using {} technologies",
                prospect.name,
                data.tech_stack.as_ref().and_then(Value::as_array).map_or(0, Vec::len)
            ),
        }))
    }

    async fn persist(&self, prospect: &Prospect, _data: &EnrichmentData) -> Result<(), ProviderError> {
        if self.should_fail(prospect) {
            return Err(ProviderError::new("Insufficient API credits for storage")
                .with_code(INSUFFICIENT_API_CREDITS));
        }
        Ok(())
    }
}

#[derive(Default)]
struct LoggingCounters {
    enriched: AtomicUsize,
    failed: AtomicUsize,
}

#[async_trait]
impl BatchCounters for LoggingCounters {
    async fn increment_enriched(&self, batch_id: &str) -> Result<(), ProviderError> {
        let count = self.enriched.fetch_add(1, Ordering::SeqCst) + 1;
        info!(batch_id = %batch_id, enriched = count, "Prospect enriched");
        Ok(())
    }

    async fn increment_failed(&self, batch_id: &str) -> Result<(), ProviderError> {
        let count = self.failed.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(batch_id = %batch_id, failed = count, "Prospect failed");
        Ok(())
    }
}

struct ConsoleNotifier;

#[async_trait]
impl NotificationChannel for ConsoleNotifier {
    async fn notify_failure(&self, notification: FailureNotification) -> Result<(), ProviderError> {
        print_warning(&format!(
            "{}: {} [{}]",
            notification.prospect_id, notification.user_message, notification.error_code
        ));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    session_id: String,
    status: SessionStatus,
    current_step: WorkflowStep,
    overall_progress: u8,
    batch: BatchSummary,
}

/// Simulate command handler
pub struct SimulateCommand {
    options: SimulateOptions,
}

impl SimulateCommand {
    /// Create a new simulate command
    pub fn new(options: SimulateOptions) -> Self {
        Self { options }
    }

    fn prospects(&self) -> Vec<Prospect> {
        (1..=self.options.prospects)
            .map(|n| Prospect {
                company: Some(format!("Company {}", n)),
                website: Some(format!("https://company{}.example", n)),
                ..Prospect::new(format!("prospect-{}", n), format!("Prospect {}", n))
            })
            .collect()
    }

    async fn configure(
        orchestrator: &WorkflowOrchestrator,
        session_id: &str,
        step: WorkflowStep,
        key: &str,
        value: Value,
    ) -> CliResult<()> {
        orchestrator.begin_step(session_id, step).await?;
        let mut updates = Configuration::new();
        updates.insert(key.to_string(), value);
        orchestrator
            .states()
            .update_configuration(session_id, updates)
            .await?;
        orchestrator.finish_step(session_id, step, None).await?;
        Ok(())
    }

    async fn run(&self, orchestrator: &WorkflowOrchestrator) -> CliResult<SimulationReport> {
        if self.options.prospects == 0 {
            return Err(CliError::InvalidArgument {
                message: "At least one prospect is required".to_string(),
            });
        }

        let session = orchestrator
            .start_workflow(&self.options.user, Some(format!("demo-{}", chrono::Utc::now().timestamp())), None)
            .await?;
        let session_id = session.id.as_str();

        Self::configure(
            orchestrator,
            session_id,
            WorkflowStep::UploadCsv,
            "csv_upload",
            json!({ "file_name": "prospects.csv", "rows": self.options.prospects }),
        )
        .await?;
        Self::configure(
            orchestrator,
            session_id,
            WorkflowStep::CampaignSettings,
            "campaign_settings",
            json!({ "campaign_name": "Demo campaign", "tone": "friendly" }),
        )
        .await?;
        Self::configure(
            orchestrator,
            session_id,
            WorkflowStep::EnrichmentConfig,
            "enrichment",
            json!({ "profile": true, "company": true, "tech_stack": true }),
        )
        .await?;

        let batch = orchestrator
            .run_enrichment_batch(
                session_id,
                self.prospects(),
                EnrichmentOptions::default(),
                EnrichmentCollaborators {
                    provider: Arc::new(SimulatedProvider::new(
                        self.options.fail_every,
                        Duration::from_millis(20),
                    )),
                    counters: Arc::new(LoggingCounters::default()),
                    notifier: Arc::new(ConsoleNotifier),
                },
            )
            .await?;

        let session = orchestrator.sessions().get_session(session_id).await?;
        if session.status == SessionStatus::Active
            && session.current_step == WorkflowStep::EmailGeneration
        {
            orchestrator.begin_step(session_id, WorkflowStep::EmailGeneration).await?;
            orchestrator
                .finish_step(
                    session_id,
                    WorkflowStep::EmailGeneration,
                    Some(format!("Generated {} emails", batch.enriched)),
                )
                .await?;
        }

        let session = orchestrator.sessions().get_session(session_id).await?;
        let progress = orchestrator.progress().get_progress(session_id).await?;
        Ok(SimulationReport {
            session_id: session.id,
            status: session.status,
            current_step: session.current_step,
            overall_progress: progress.overall_progress,
            batch,
        })
    }
}

#[async_trait]
impl Command for SimulateCommand {
    async fn execute(&self, context: &CommandContext) -> CliResult<()> {
        let mut config = context.config.clone();
        if self.options.no_delay {
            config.batch.inter_request_delay_ms = 0;
        }
        let orchestrator = WorkflowOrchestrator::from_config(config)?;
        let report = self.run(&orchestrator).await?;

        if context.json {
            return context.print_json(&report);
        }
        let style = &context.style;
        println!("{}", style.header(&format!("Simulated workflow {}", report.session_id)));
        println!("{}", style.key_value("status", report.status.as_str()));
        println!("{}", style.key_value("step", report.current_step.as_str()));
        println!("{}", style.key_value("progress", &style.progress_bar(report.overall_progress)));
        println!(
            "{}",
            style.key_value(
                "enrichment",
                &format!(
                    "{} enriched, {} failed, {} cancelled of {}",
                    report.batch.enriched, report.batch.failed, report.batch.cancelled, report.batch.total
                )
            )
        );
        if report.status == SessionStatus::Completed {
            print_success("Workflow completed");
        } else {
            print_warning(&format!("Workflow stopped at {}", report.current_step));
        }
        Ok(())
    }
}
