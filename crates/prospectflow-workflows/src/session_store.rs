//! Workflow session storage and step bookkeeping

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use prospectflow_persistence::Repository;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{WorkflowError, WorkflowResult};
use crate::locks::SessionLocks;
use crate::models::{Configuration, SessionStatus, WorkflowSession, WorkflowStep};

/// Partial update applied by [`SessionStore::update_session`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// New campaign id
    pub campaign_id: Option<String>,
    /// New current step
    pub current_step: Option<WorkflowStep>,
    /// New status
    pub status: Option<SessionStatus>,
    /// Replacement configuration
    pub configuration_data: Option<Configuration>,
    /// New error message
    pub error_message: Option<String>,
}

/// Conjunctive filter for [`SessionStore::search_sessions`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Owning user session
    pub user_session_id: Option<String>,
    /// Campaign id
    pub campaign_id: Option<String>,
    /// Session status
    pub status: Option<SessionStatus>,
    /// Current step
    pub current_step: Option<WorkflowStep>,
    /// Created at or after
    pub created_after: Option<DateTime<Utc>>,
    /// Created at or before
    pub created_before: Option<DateTime<Utc>>,
}

impl SessionFilter {
    fn matches(&self, session: &WorkflowSession) -> bool {
        self.user_session_id
            .as_ref()
            .map_or(true, |user| &session.user_session_id == user)
            && self
                .campaign_id
                .as_ref()
                .map_or(true, |campaign| session.campaign_id.as_ref() == Some(campaign))
            && self.status.map_or(true, |status| session.status == status)
            && self
                .current_step
                .map_or(true, |step| session.current_step == step)
            && self
                .created_after
                .map_or(true, |after| session.created_at >= after)
            && self
                .created_before
                .map_or(true, |before| session.created_at <= before)
    }
}

/// Offset/limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Items to skip
    pub offset: usize,
    /// Maximum items to return
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult<T> {
    /// Items in this page
    pub items: Vec<T>,
    /// Total matching items
    pub total: usize,
    /// Whether more items follow this page
    pub has_more: bool,
}

/// Inclusive creation-time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Whether an instant lies inside the window
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Aggregate statistics over stored sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    /// Sessions considered
    pub total: usize,
    /// Count per status
    pub by_status: BTreeMap<SessionStatus, usize>,
    /// Count per current step
    pub by_step: BTreeMap<WorkflowStep, usize>,
    /// Completed sessions in percent of `total`
    pub completion_rate: f64,
    /// Mean duration of completed sessions in minutes
    pub average_duration: f64,
    /// Sessions created per day (YYYY-MM-DD) over the last seven days
    pub recent_activity: BTreeMap<String, usize>,
}

/// Owns workflow sessions
pub struct SessionStore {
    repository: Arc<dyn Repository<WorkflowSession>>,
    locks: SessionLocks,
}

impl SessionStore {
    /// Create a store over a repository, sharing the given locks
    pub fn new(repository: Arc<dyn Repository<WorkflowSession>>, locks: SessionLocks) -> Self {
        Self { repository, locks }
    }

    /// Create a new session
    pub async fn create_session(
        &self,
        user_session_id: &str,
        campaign_id: Option<String>,
        initial_step: Option<WorkflowStep>,
        configuration: Option<Configuration>,
    ) -> WorkflowResult<WorkflowSession> {
        if user_session_id.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "User session id cannot be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let current_step = initial_step.unwrap_or(WorkflowStep::UploadCsv);
        let mut session = WorkflowSession {
            id: uuid::Uuid::new_v4().to_string(),
            user_session_id: user_session_id.to_string(),
            campaign_id,
            current_step,
            status: SessionStatus::Active,
            configuration_data: configuration.unwrap_or_default(),
            steps_completed: Vec::new(),
            created_at: now,
            updated_at: now,
            error_message: None,
        };
        session.normalize();

        let _guard = self.locks.lock(&session.id).await;
        self.repository.save(&session.id, &session).await?;

        info!(
            session_id = %session.id,
            user_session_id = %session.user_session_id,
            step = %session.current_step,
            "Created workflow session"
        );
        Ok(session)
    }

    /// Get a session
    pub async fn get_session(&self, session_id: &str) -> WorkflowResult<WorkflowSession> {
        self.repository
            .find(session_id)
            .await?
            .ok_or_else(|| WorkflowError::session_not_found(session_id))
    }

    /// Apply a partial update
    pub async fn update_session(
        &self,
        session_id: &str,
        update: SessionUpdate,
    ) -> WorkflowResult<WorkflowSession> {
        self.mutate(session_id, |session| {
            if let Some(campaign_id) = update.campaign_id {
                session.campaign_id = Some(campaign_id);
            }
            if let Some(step) = update.current_step {
                session.current_step = step;
            }
            if let Some(status) = update.status {
                session.status = status;
            }
            if let Some(configuration) = update.configuration_data {
                session.configuration_data = configuration;
            }
            if let Some(message) = update.error_message {
                session.error_message = Some(message);
            }
            // The terminal step wins over a conflicting status
            session.normalize();
            Ok(())
        })
        .await
    }

    /// Mark the current step completed and move to `next_step`.
    ///
    /// Advancing to the step the session is already on only bumps `updated_at`.
    pub async fn advance_to_next_step(
        &self,
        session_id: &str,
        next_step: WorkflowStep,
    ) -> WorkflowResult<WorkflowSession> {
        let session = self
            .mutate(session_id, |session| {
                if session.current_step == next_step {
                    return Ok(());
                }

                match session.status {
                    SessionStatus::Paused | SessionStatus::Abandoned | SessionStatus::Completed => {
                        return Err(WorkflowError::InvalidTransition(format!(
                            "Cannot start {} on a {:?} session",
                            next_step, session.status
                        )));
                    }
                    SessionStatus::Active | SessionStatus::Error => {}
                }

                let finished = session.current_step;
                session.mark_step_completed(finished);
                session.current_step = next_step;
                session.status = if next_step.is_terminal() {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Active
                };
                Ok(())
            })
            .await?;

        debug!(session_id = %session_id, step = %session.current_step, "Advanced workflow session");
        Ok(session)
    }

    /// Pause an active session
    pub async fn pause(&self, session_id: &str) -> WorkflowResult<WorkflowSession> {
        self.transition(session_id, SessionStatus::Paused, None).await
    }

    /// Resume a paused or errored session and clear its error message
    pub async fn resume(&self, session_id: &str) -> WorkflowResult<WorkflowSession> {
        self.transition(session_id, SessionStatus::Active, None).await
    }

    /// Complete a session, moving it to the terminal step
    pub async fn complete(&self, session_id: &str) -> WorkflowResult<WorkflowSession> {
        let session = self
            .mutate(session_id, |session| {
                if session.status == SessionStatus::Abandoned {
                    return Err(WorkflowError::InvalidTransition(
                        "Cannot complete an abandoned session".to_string(),
                    ));
                }
                if !session.current_step.is_terminal() {
                    let finished = session.current_step;
                    session.mark_step_completed(finished);
                }
                session.current_step = WorkflowStep::Completed;
                session.status = SessionStatus::Completed;
                Ok(())
            })
            .await?;

        info!(session_id = %session_id, "Completed workflow session");
        Ok(session)
    }

    /// Abandon a session, recording the reason
    pub async fn abandon(&self, session_id: &str, reason: &str) -> WorkflowResult<WorkflowSession> {
        self.transition(session_id, SessionStatus::Abandoned, Some(reason.to_string()))
            .await
    }

    /// Put a session into the error status
    pub async fn error(&self, session_id: &str, message: &str) -> WorkflowResult<WorkflowSession> {
        self.transition(session_id, SessionStatus::Error, Some(message.to_string()))
            .await
    }

    /// Delete a session; returns whether it existed
    pub async fn delete_session(&self, session_id: &str) -> WorkflowResult<bool> {
        let deleted = {
            let _guard = self.locks.lock(session_id).await;
            self.repository.delete(session_id).await?
        };
        if deleted {
            info!(session_id = %session_id, "Deleted workflow session");
        }
        Ok(deleted)
    }

    /// Most recently updated active session of a user
    pub async fn find_active_session_by_user(
        &self,
        user_session_id: &str,
    ) -> WorkflowResult<WorkflowSession> {
        self.repository
            .list()
            .await?
            .into_iter()
            .filter(|s| s.user_session_id == user_session_id && s.status == SessionStatus::Active)
            .max_by_key(|s| s.updated_at)
            .ok_or_else(|| {
                WorkflowError::NotFound(format!(
                    "No active workflow session for user: {}",
                    user_session_id
                ))
            })
    }

    /// Filtered, paginated search, newest first
    pub async fn search_sessions(
        &self,
        filter: &SessionFilter,
        pagination: Pagination,
    ) -> WorkflowResult<SearchResult<WorkflowSession>> {
        let mut matching: Vec<WorkflowSession> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|session| filter.matches(session))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let total = matching.len();
        let items: Vec<WorkflowSession> = matching
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect();
        let has_more = pagination.offset + items.len() < total;

        Ok(SearchResult {
            items,
            total,
            has_more,
        })
    }

    /// Statistics over all sessions, optionally restricted by creation time
    pub async fn get_session_statistics(
        &self,
        time_range: Option<TimeRange>,
    ) -> WorkflowResult<SessionStatistics> {
        let sessions: Vec<WorkflowSession> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|s| time_range.map_or(true, |range| range.contains(s.created_at)))
            .collect();

        let total = sessions.len();
        let mut by_status = BTreeMap::new();
        let mut by_step = BTreeMap::new();
        for session in &sessions {
            *by_status.entry(session.status).or_insert(0) += 1;
            *by_step.entry(session.current_step).or_insert(0) += 1;
        }

        let completed: Vec<&WorkflowSession> = sessions
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();
        let completion_rate = if total == 0 {
            0.0
        } else {
            completed.len() as f64 / total as f64 * 100.0
        };
        let average_duration = if completed.is_empty() {
            0.0
        } else {
            let minutes: f64 = completed
                .iter()
                .map(|s| s.duration().num_milliseconds() as f64 / 60_000.0)
                .sum();
            minutes / completed.len() as f64
        };

        let today = Utc::now().date_naive();
        let mut recent_activity = BTreeMap::new();
        for days_back in 0..7 {
            let day = today - Duration::days(days_back);
            recent_activity.insert(day.format("%Y-%m-%d").to_string(), 0);
        }
        for session in &sessions {
            let key = session.created_at.date_naive().format("%Y-%m-%d").to_string();
            if let Some(count) = recent_activity.get_mut(&key) {
                *count += 1;
            }
        }

        Ok(SessionStatistics {
            total,
            by_status,
            by_step,
            completion_rate,
            average_duration,
            recent_activity,
        })
    }

    async fn transition(
        &self,
        session_id: &str,
        status: SessionStatus,
        message: Option<String>,
    ) -> WorkflowResult<WorkflowSession> {
        let session = self
            .mutate(session_id, |session| {
                if session.status == SessionStatus::Completed && status != SessionStatus::Completed {
                    return Err(WorkflowError::InvalidTransition(format!(
                        "Session is completed and cannot become {:?}",
                        status
                    )));
                }
                if status == SessionStatus::Active {
                    session.error_message = None;
                }
                if let Some(message) = message {
                    session.error_message = Some(message);
                }
                session.status = status;
                Ok(())
            })
            .await?;

        info!(session_id = %session_id, status = ?session.status, "Workflow session status changed");
        Ok(session)
    }

    async fn mutate<F>(&self, session_id: &str, apply: F) -> WorkflowResult<WorkflowSession>
    where
        F: FnOnce(&mut WorkflowSession) -> WorkflowResult<()>,
    {
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.get_session(session_id).await?;
        apply(&mut session)?;
        session.updated_at = Utc::now();
        self.repository.save(session_id, &session).await?;
        Ok(session)
    }
}
