//! Property-based tests for the aggregate progress formula
//! and session step bookkeeping

#[cfg(test)]
mod tests {
    use crate::locks::SessionLocks;
    use crate::models::*;
    use crate::session_store::SessionStore;
    use proptest::prelude::*;
    use prospectflow_persistence::InMemoryRepository;
    use std::sync::Arc;

    fn arb_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::Pending),
            Just(StepStatus::InProgress),
            Just(StepStatus::Completed),
            Just(StepStatus::Failed),
            Just(StepStatus::Skipped),
        ]
    }

    fn arb_progress() -> impl Strategy<Value = WorkflowProgress> {
        prop::collection::vec((arb_status(), 0u8..=100), 5).prop_map(|entries| {
            let mut progress = WorkflowProgress::new("session");
            for (step, (status, percent)) in WorkflowStep::NON_TERMINAL.iter().zip(entries) {
                let entry = progress.step_mut(*step);
                entry.status = status;
                entry.progress = percent;
            }
            progress.recompute();
            progress
        })
    }

    fn arb_step() -> impl Strategy<Value = WorkflowStep> {
        prop::sample::select(WorkflowStep::NON_TERMINAL.to_vec())
    }

    proptest! {
        /// The aggregate is the rounded mean of the non-terminal step
        /// contributions, where done steps count 100.
        #[test]
        fn prop_overall_progress_is_mean_of_contributions(progress in arb_progress()) {
            let sum: u32 = WorkflowStep::NON_TERMINAL
                .iter()
                .map(|step| {
                    let entry = progress.step(*step).unwrap();
                    if entry.status.is_done() { 100 } else { u32::from(entry.progress) }
                })
                .sum();
            let expected = (f64::from(sum) / 5.0).round() as u8;

            prop_assert_eq!(progress.overall_progress, expected);
            prop_assert!(progress.overall_progress <= 100);
        }

        /// Completing every non-terminal step always yields 100
        #[test]
        fn prop_all_done_is_one_hundred(mut progress in arb_progress(), skip in any::<bool>()) {
            for step in WorkflowStep::NON_TERMINAL {
                progress.step_mut(step).status =
                    if skip { StepStatus::Skipped } else { StepStatus::Completed };
            }
            progress.recompute();
            prop_assert_eq!(progress.overall_progress, 100);
            prop_assert_eq!(progress.completed_step_count(), 5);
        }

        /// Advancing through any sequence of steps never records a step
        /// twice and keeps the status consistent with the terminal step.
        #[test]
        fn prop_advance_never_duplicates_completed_steps(
            steps in prop::collection::vec(arb_step(), 1..12),
            finish in any::<bool>(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = SessionStore::new(
                    Arc::new(InMemoryRepository::new()),
                    SessionLocks::new(),
                );
                let session = store.create_session("user", None, None, None).await.unwrap();

                let mut last = session;
                for step in &steps {
                    last = store.advance_to_next_step(&last.id, *step).await.unwrap();
                }
                if finish {
                    last = store
                        .advance_to_next_step(&last.id, WorkflowStep::Completed)
                        .await
                        .unwrap();
                }

                let mut seen = last.steps_completed.clone();
                seen.sort();
                seen.dedup();
                assert_eq!(seen.len(), last.steps_completed.len());
                assert_eq!(
                    last.status == SessionStatus::Completed,
                    last.current_step == WorkflowStep::Completed
                );
            });
        }
    }
}
