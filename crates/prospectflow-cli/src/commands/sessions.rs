//! Sessions command - browse workflow sessions

use async_trait::async_trait;
use chrono::{Duration, Utc};
use prospectflow_workflows::{
    Pagination, SessionFilter, SessionStatistics, SessionStatus, TimeRange, WorkflowSession,
    WorkflowStep,
};

use crate::commands::{Command, CommandContext};
use crate::error::CliResult;
use crate::output::OutputStyle;

/// Sessions command action
#[derive(Debug, Clone)]
pub enum SessionsAction {
    /// List matching sessions
    List {
        user: Option<String>,
        status: Option<SessionStatus>,
        step: Option<WorkflowStep>,
        offset: usize,
        limit: usize,
    },
    /// Show statistics
    Stats { days: Option<u32> },
}

/// Sessions command handler
pub struct SessionsCommand {
    action: SessionsAction,
}

impl SessionsCommand {
    /// Create a new sessions command
    pub fn new(action: SessionsAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl Command for SessionsCommand {
    async fn execute(&self, context: &CommandContext) -> CliResult<()> {
        let orchestrator = context.orchestrator()?;
        let store = orchestrator.sessions();

        match &self.action {
            SessionsAction::List {
                user,
                status,
                step,
                offset,
                limit,
            } => {
                let filter = SessionFilter {
                    user_session_id: user.clone(),
                    status: *status,
                    current_step: *step,
                    ..Default::default()
                };
                let page = store
                    .search_sessions(
                        &filter,
                        Pagination {
                            offset: *offset,
                            limit: *limit,
                        },
                    )
                    .await?;

                if context.json {
                    return context.print_json(&page);
                }
                if page.items.is_empty() {
                    println!("No sessions found");
                    return Ok(());
                }
                println!("{}", context.style.header(&format!("Sessions ({} total)", page.total)));
                for session in &page.items {
                    println!("{}", format_session_row(session));
                }
                if page.has_more {
                    println!("  ... use --offset {} for more", offset + page.items.len());
                }
                Ok(())
            }
            SessionsAction::Stats { days } => {
                let range = days.map(|days| {
                    let end = Utc::now();
                    TimeRange {
                        start: end - Duration::days(i64::from(days)),
                        end,
                    }
                });
                let stats = store.get_session_statistics(range).await?;

                if context.json {
                    return context.print_json(&stats);
                }
                print_statistics(&context.style, &stats);
                Ok(())
            }
        }
    }
}

/// One line per session: id, user, step, status, creation time
pub fn format_session_row(session: &WorkflowSession) -> String {
    format!(
        "  {}  {:<16} {:<18} {:<10} {}",
        session.id,
        session.user_session_id,
        session.current_step,
        session.status,
        session.created_at.format("%Y-%m-%d %H:%M")
    )
}

fn print_statistics(style: &OutputStyle, stats: &SessionStatistics) {
    println!("{}", style.header("Session statistics"));
    println!("{}", style.key_value("total", &stats.total.to_string()));
    println!("{}", style.key_value("completion rate", &format!("{:.1}%", stats.completion_rate)));
    println!(
        "{}",
        style.key_value("average duration", &format!("{:.1} min", stats.average_duration))
    );

    println!("{}", style.header("By status"));
    for (status, count) in &stats.by_status {
        println!("{}", style.key_value(status.as_str(), &count.to_string()));
    }
    println!("{}", style.header("By step"));
    for (step, count) in &stats.by_step {
        println!("{}", style.key_value(step.as_str(), &count.to_string()));
    }
    println!("{}", style.header("Created in the last 7 days"));
    for (day, count) in &stats.recent_activity {
        println!("{}", style.key_value(day, &count.to_string()));
    }
}
