//! Property-based tests for the append-only checkpoint log

#[cfg(test)]
mod tests {
    use crate::error::WorkflowError;
    use crate::error_handler::ErrorLedger;
    use crate::locks::SessionLocks;
    use crate::models::*;
    use crate::state::StateManager;
    use chrono::Utc;
    use proptest::prelude::*;
    use prospectflow_persistence::InMemoryRepository;
    use std::sync::Arc;

    fn manager() -> StateManager {
        StateManager::new(
            Arc::new(InMemoryRepository::new()),
            ErrorLedger::new(Arc::new(InMemoryRepository::new())),
            SessionLocks::new(),
        )
    }

    fn session(id: &str) -> WorkflowSession {
        let now = Utc::now();
        WorkflowSession {
            id: id.to_string(),
            user_session_id: "user".to_string(),
            campaign_id: None,
            current_step: WorkflowStep::UploadCsv,
            status: SessionStatus::Active,
            configuration_data: Configuration::new(),
            steps_completed: vec![],
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    fn arb_step() -> impl Strategy<Value = WorkflowStep> {
        prop::sample::select(WorkflowStep::ALL.to_vec())
    }

    proptest! {
        /// Restoring any valid checkpoint grows the log by exactly one entry
        /// and leaves every earlier entry untouched.
        #[test]
        fn prop_restore_appends_exactly_one_checkpoint(
            steps in prop::collection::vec(arb_step(), 1..8),
            pick in any::<prop::sample::Index>(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let manager = manager();
                manager
                    .save_state("s1", session("s1"), WorkflowProgress::new("s1"), Configuration::new())
                    .await
                    .unwrap();
                for (i, step) in steps.iter().enumerate() {
                    manager
                        .create_checkpoint("s1", *step, &format!("checkpoint {}", i))
                        .await
                        .unwrap();
                }

                let before = manager.get_workflow_history("s1").await.unwrap();
                let index = pick.index(steps.len());
                let restored = manager.restore_from_checkpoint("s1", index).await.unwrap();
                let after = manager.get_workflow_history("s1").await.unwrap();

                assert_eq!(after.len(), before.len() + 1);
                assert_eq!(&after[..before.len()], &before[..]);
                assert_eq!(restored.session.current_step, steps[index]);
                assert_eq!(
                    after.last().map(|entry| entry.description.clone()),
                    Some(format!("Restored from checkpoint {}", index))
                );
            });
        }

        /// Out-of-range indexes are rejected and the log is unchanged
        #[test]
        fn prop_restore_rejects_out_of_range(count in 0usize..5, extra in 0usize..5) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let manager = manager();
                manager
                    .save_state("s1", session("s1"), WorkflowProgress::new("s1"), Configuration::new())
                    .await
                    .unwrap();
                for i in 0..count {
                    manager
                        .create_checkpoint("s1", WorkflowStep::UploadCsv, &format!("checkpoint {}", i))
                        .await
                        .unwrap();
                }

                let result = manager.restore_from_checkpoint("s1", count + extra).await;
                assert!(matches!(result, Err(WorkflowError::InvalidCheckpoint { .. })));
                assert_eq!(manager.get_workflow_history("s1").await.unwrap().len(), count);
            });
        }
    }
}
