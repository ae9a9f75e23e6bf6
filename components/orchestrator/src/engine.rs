use crate::progress::{ExecutionProgress, RunFailure, RunReport};
use cluster_context::JobOptions;
use provisioning_primitives::{ProvisioningError, StepList, StepName};
use provisioning_steps::{Pipeline, PipelineTable, ProvisioningContext, Step, StepFactory};
use tokio::sync::mpsc;

/// Drives a step list through a factory, unwinding completed steps in
/// reverse when one fails.
pub struct Orchestrator<'a> {
    factory: &'a StepFactory,
    table: Option<&'a PipelineTable>,
    progress: Option<mpsc::Sender<ExecutionProgress>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            factory: pipeline.factory,
            table: Some(pipeline.table),
            progress: None,
        }
    }

    pub fn with_factory(factory: &'a StepFactory) -> Self {
        Self {
            factory,
            table: None,
            progress: None,
        }
    }

    /// Annotate progress events with positions from `table`.
    pub fn with_table(mut self, table: &'a PipelineTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::Sender<ExecutionProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Forward run, or compensation run when `options.undo` is set.
    pub async fn execute(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> Result<RunReport, RunFailure> {
        if options.undo {
            self.undo(ctx, options, step_list).await
        } else {
            self.run(ctx, options, step_list).await
        }
    }

    /// Run every step in list order. On the first failure the steps that
    /// completed are undone newest first and the original error is returned.
    pub async fn run(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> Result<RunReport, RunFailure> {
        self.validate(step_list)?;
        tracing::info!(
            "🚀 Running {} step(s) for cluster {}",
            step_list.len(),
            ctx.cluster().name()
        );

        let mut executed: Vec<Box<dyn Step>> = Vec::with_capacity(step_list.len());
        for (n, name) in step_list.iter().enumerate() {
            self.started(name, n, step_list.len()).await;

            match self.forward(name, ctx, options, step_list).await {
                Ok(step) => {
                    tracing::info!("✅ {name} complete");
                    self.emit(ExecutionProgress::Complete { id: name.clone() })
                        .await;
                    executed.push(step);
                }
                Err(e) => {
                    let error = e.in_step(name);
                    tracing::error!("❌ {name} failed: {error}");
                    self.emit(ExecutionProgress::Failed {
                        id: name.clone(),
                        error: error.to_string(),
                    })
                    .await;
                    return Err(self
                        .unwind(ctx, options, step_list, executed, name, error)
                        .await);
                }
            }
        }

        tracing::info!("🎉 All {} step(s) complete", executed.len());
        Ok(RunReport {
            completed: executed.iter().map(|s| s.name().clone()).collect(),
        })
    }

    /// Compensate every step in list order, stopping at the first failure.
    /// Callers list the steps newest first.
    pub async fn undo(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> Result<RunReport, RunFailure> {
        self.validate(step_list)?;
        tracing::info!(
            "⏪ Undoing {} step(s) for cluster {}",
            step_list.len(),
            ctx.cluster().name()
        );

        let mut undone = Vec::with_capacity(step_list.len());
        for name in step_list {
            self.emit(ExecutionProgress::RollingBack { id: name.clone() })
                .await;
            let result = match self.factory.resolve(name) {
                Ok(step) => step.undo_execute(ctx, options, step_list).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let error = e.in_step(name);
                tracing::error!("❌ Undo of {name} failed: {error}");
                self.emit(ExecutionProgress::Failed {
                    id: name.clone(),
                    error: error.to_string(),
                })
                .await;
                return Err(RunFailure {
                    error,
                    failed_step: Some(name.clone()),
                    rolled_back: undone,
                    rollback_error: None,
                });
            }
            tracing::info!("↩️  {name} undone");
            self.emit(ExecutionProgress::Undone { id: name.clone() })
                .await;
            undone.push(name.clone());
        }

        Ok(RunReport { completed: undone })
    }

    fn validate(&self, step_list: &StepList) -> Result<(), RunFailure> {
        match step_list.iter().find(|name| !self.factory.contains(name)) {
            Some(unknown) => {
                let error = ProvisioningError::unknown_step(unknown);
                tracing::error!("❌ Rejecting step list {step_list}: {error}");
                Err(RunFailure::rejected(error))
            }
            None => Ok(()),
        }
    }

    async fn forward(
        &self,
        name: &StepName,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
    ) -> provisioning_primitives::Result<Box<dyn Step>> {
        let step = self.factory.resolve(name)?;
        step.do_execute(ctx, options, step_list).await?;
        Ok(step)
    }

    async fn unwind(
        &self,
        ctx: &ProvisioningContext,
        options: &JobOptions,
        step_list: &StepList,
        mut executed: Vec<Box<dyn Step>>,
        failed: &StepName,
        error: ProvisioningError,
    ) -> RunFailure {
        let mut rolled_back = Vec::with_capacity(executed.len());
        let mut rollback_error = None;

        if !executed.is_empty() {
            tracing::warn!("⏪ Rolling back {} completed step(s)", executed.len());
            self.emit(ExecutionProgress::Progress {
                id: failed.clone(),
                message: format!("rolling back {} completed step(s)", executed.len()),
            })
            .await;
        }

        while let Some(step) = executed.pop() {
            let name = step.name().clone();
            self.emit(ExecutionProgress::RollingBack { id: name.clone() })
                .await;
            match step.undo_execute(ctx, options, step_list).await {
                Ok(()) => {
                    tracing::info!("↩️  {name} undone");
                    self.emit(ExecutionProgress::Undone { id: name.clone() })
                        .await;
                    rolled_back.push(name);
                }
                Err(e) => {
                    let e = e.in_step(&name);
                    tracing::error!(
                        "❌ Undo of {name} failed, {} step(s) left in place: {e}",
                        executed.len()
                    );
                    self.emit(ExecutionProgress::Failed {
                        id: name,
                        error: e.to_string(),
                    })
                    .await;
                    rollback_error = Some(e);
                    break;
                }
            }
        }

        RunFailure {
            error,
            failed_step: Some(failed.clone()),
            rolled_back,
            rollback_error,
        }
    }

    async fn started(&self, name: &StepName, n: usize, total: usize) {
        let entry = self.table.and_then(|table| table.entry_for(name));
        let description = entry
            .map(|e| e.description.clone())
            .unwrap_or_else(|| name.to_string());
        tracing::info!("📍 Step {}/{total}: {name} ({description})", n + 1);
        self.emit(ExecutionProgress::Started {
            id: name.clone(),
            position: entry.map(|e| e.index),
            description,
        })
        .await;
    }

    async fn emit(&self, event: ExecutionProgress) {
        if let Some(progress) = &self.progress {
            if progress.send(event).await.is_err() {
                tracing::debug!("Progress receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use provisioning_primitives::{steps, ErrorKind};
    use provisioning_steps::stub::{Harness, Journal, RecordingStep};
    use provisioning_steps::{FactoryKind, PipelineKind, StepConstructor};
    use std::sync::Arc;

    fn recording(name: &'static str, journal: &Journal) -> StepConstructor {
        let journal = journal.clone();
        Arc::new(move || Box::new(RecordingStep::new(name, journal.clone())) as Box<dyn Step>)
    }

    fn failing_do(name: &'static str, journal: &Journal) -> StepConstructor {
        let journal = journal.clone();
        Arc::new(move || {
            Box::new(RecordingStep::new(name, journal.clone()).failing_do()) as Box<dyn Step>
        })
    }

    fn failing_undo(name: &'static str, journal: &Journal) -> StepConstructor {
        let journal = journal.clone();
        Arc::new(move || {
            Box::new(RecordingStep::new(name, journal.clone()).failing_undo()) as Box<dyn Step>
        })
    }

    /// A, B and C record their calls; D fails forward; E fails undo.
    fn factory(journal: &Journal) -> StepFactory {
        StepFactory::new(FactoryKind::Custom("test"))
            .register("A", recording("A", journal))
            .register("B", recording("B", journal))
            .register("C", recording("C", journal))
            .register("D", failing_do("D", journal))
            .register("E", failing_undo("E", journal))
    }

    #[tokio::test]
    async fn runs_steps_in_list_order() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let report = Orchestrator::with_factory(&factory)
            .run(&harness.context(), &JobOptions::default(), &StepList::parse("A,B,C"))
            .await
            .unwrap();

        assert_eq!(harness.journal(), vec!["do A", "do B", "do C"]);
        assert_eq!(report.completed, vec![StepName::from("A"), "B".into(), "C".into()]);
    }

    #[tokio::test]
    async fn failure_unwinds_completed_steps_in_reverse() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let failure = Orchestrator::with_factory(&factory)
            .run(&harness.context(), &JobOptions::default(), &StepList::parse("A,B,D,C"))
            .await
            .unwrap_err();

        assert_eq!(
            harness.journal(),
            vec!["do A", "do B", "do D", "undo B", "undo A"]
        );
        assert_matches!(failure.error.kind(), ErrorKind::ExternalToolFailure);
        assert_eq!(failure.error.step(), Some(&StepName::from("D")));
        assert_eq!(failure.failed_step, Some(StepName::from("D")));
        assert_eq!(failure.rolled_back, vec![StepName::from("B"), "A".into()]);
        assert!(failure.fully_rolled_back());
    }

    #[tokio::test]
    async fn failing_first_step_has_nothing_to_undo() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let failure = Orchestrator::with_factory(&factory)
            .run(&harness.context(), &JobOptions::default(), &StepList::parse("D,A"))
            .await
            .unwrap_err();

        assert_eq!(harness.journal(), vec!["do D"]);
        assert!(failure.rolled_back.is_empty());
    }

    #[tokio::test]
    async fn undo_failure_aborts_the_unwind() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let failure = Orchestrator::with_factory(&factory)
            .run(&harness.context(), &JobOptions::default(), &StepList::parse("A,E,B,D"))
            .await
            .unwrap_err();

        assert_eq!(
            harness.journal(),
            vec!["do A", "do E", "do B", "do D", "undo B", "undo E"]
        );
        assert_eq!(failure.error.step(), Some(&StepName::from("D")));
        assert_eq!(failure.rolled_back, vec![StepName::from("B")]);
        let rollback_error = failure.rollback_error.as_ref().unwrap();
        assert_eq!(rollback_error.step(), Some(&StepName::from("E")));
        assert!(!failure.fully_rolled_back());
    }

    #[tokio::test]
    async fn unknown_step_rejects_the_whole_list() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let failure = Orchestrator::with_factory(&factory)
            .run(&harness.context(), &JobOptions::default(), &StepList::parse("A,B,NOPE"))
            .await
            .unwrap_err();

        assert!(harness.journal().is_empty());
        assert_matches!(failure.error.kind(), ErrorKind::Configuration);
        assert_eq!(failure.failed_step, None);
        assert!(failure.rolled_back.is_empty());
    }

    #[tokio::test]
    async fn empty_list_is_a_no_op() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let report = Orchestrator::with_factory(&factory)
            .run(&harness.context(), &JobOptions::default(), &StepList::default())
            .await
            .unwrap();

        assert!(report.completed.is_empty());
        assert!(harness.journal().is_empty());
    }

    #[tokio::test]
    async fn undo_mode_follows_list_order_and_stops_at_first_failure() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);

        let failure = Orchestrator::with_factory(&factory)
            .undo(&harness.context(), &JobOptions::default(), &StepList::parse("C,E,A"))
            .await
            .unwrap_err();

        assert_eq!(harness.journal(), vec!["undo C", "undo E"]);
        assert_eq!(failure.failed_step, Some(StepName::from("E")));
        assert_eq!(failure.rolled_back, vec![StepName::from("C")]);
    }

    #[tokio::test]
    async fn execute_dispatches_on_the_undo_flag() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);
        let options = JobOptions {
            undo: true,
            ..JobOptions::default()
        };

        let report = Orchestrator::with_factory(&factory)
            .execute(&harness.context(), &options, &StepList::parse("B,A"))
            .await
            .unwrap();

        assert_eq!(harness.journal(), vec!["undo B", "undo A"]);
        assert_eq!(report.completed.len(), 2);
    }

    #[tokio::test]
    async fn progress_events_carry_table_positions() {
        let harness = Harness::asm();
        let factory = StepFactory::new(FactoryKind::Custom("test"))
            .register(steps::PREVM_CHECKS, recording(steps::PREVM_CHECKS, &harness.journal))
            .register(steps::CREATE_VM, failing_do(steps::CREATE_VM, &harness.journal));
        let (tx, mut rx) = mpsc::channel(64);

        let orchestrator = Orchestrator::with_factory(&factory)
            .with_table(PipelineKind::Default.table())
            .with_progress(tx);
        let list = StepList::parse(&format!("{},{}", steps::PREVM_CHECKS, steps::CREATE_VM));
        let _ = orchestrator
            .run(&harness.context(), &JobOptions::default(), &list)
            .await;
        drop(orchestrator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_matches!(
            &events[0],
            ExecutionProgress::Started { position: Some(1), description, .. }
                if description.starts_with("Pre-VM checks")
        );
        assert_matches!(&events[1], ExecutionProgress::Complete { id } if id == steps::PREVM_CHECKS);
        assert_matches!(&events[2], ExecutionProgress::Started { position: Some(3), .. });
        assert_matches!(&events[3], ExecutionProgress::Failed { id, .. } if id == steps::CREATE_VM);
        assert_matches!(&events[4], ExecutionProgress::Progress { .. });
        assert_matches!(&events[5], ExecutionProgress::RollingBack { id } if id == steps::PREVM_CHECKS);
        assert_matches!(&events[6], ExecutionProgress::Undone { id } if id == steps::PREVM_CHECKS);
        assert_eq!(events.len(), 7);
    }

    #[tokio::test]
    async fn steps_outside_the_table_use_their_name() {
        let harness = Harness::asm();
        let factory = factory(&harness.journal);
        let (tx, mut rx) = mpsc::channel(8);

        Orchestrator::with_factory(&factory)
            .with_table(PipelineKind::Default.table())
            .with_progress(tx)
            .run(&harness.context(), &JobOptions::default(), &StepList::parse("A"))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            ExecutionProgress::Started {
                id: "A".into(),
                position: None,
                description: "A".into(),
            }
        );
    }
}
