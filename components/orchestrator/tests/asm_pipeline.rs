use cluster_context::JobOptions;
use orchestrator::Orchestrator;
use provisioning_primitives::{steps, ErrorKind, StepList, StepName};
use provisioning_steps::stub::Harness;
use provisioning_steps::{Pipeline, PipelineKind};
use serde_json::json;
use step_executor::SubOperation;

fn options() -> JobOptions {
    JobOptions::with_payload(json!({"users": {"opc": {"uid": "2000", "gid": "2000"}}}))
}

#[tokio::test]
async fn full_default_pipeline_completes() {
    let harness = Harness::asm();
    let pipeline = Pipeline::of(PipelineKind::Default);

    let report = Orchestrator::new(pipeline)
        .run(&harness.context(), &options(), &pipeline.full_step_list())
        .await
        .unwrap();

    assert_eq!(report.completed.len(), pipeline.table.len());
    assert_eq!(harness.count("oeda undo"), 0);
    assert!(
        harness.position("oeda do CREATE_VM").unwrap()
            < harness.position("oeda do SETUP_CELL").unwrap()
    );
}

#[tokio::test]
async fn storage_failure_rolls_back_earlier_steps_newest_first() {
    let harness = Harness::asm();
    harness.executor.fail_on(SubOperation::CalibrateCells, false);
    let pipeline = Pipeline::of(PipelineKind::Default);

    let failure = Orchestrator::new(pipeline)
        .run(&harness.context(), &options(), &pipeline.full_step_list())
        .await
        .unwrap_err();

    assert_eq!(failure.error.kind(), ErrorKind::ExternalToolFailure);
    assert_eq!(failure.failed_step, Some(StepName::from(steps::CREATE_STORAGE)));
    assert_eq!(
        failure.rolled_back,
        vec![
            StepName::from(steps::CREATE_USER),
            steps::CREATE_VM.into(),
            steps::PREVM_SETUP.into(),
            steps::PREVM_CHECKS.into(),
        ]
    );
    assert!(failure.fully_rolled_back());

    // The failing step is not compensated by the engine.
    assert_eq!(harness.count("oeda undo CALIBRATE_CELLS"), 0);
    assert_eq!(harness.count("oeda do INSTALL_CLUSTER"), 0);
    assert!(
        harness.position("oeda undo CREATE_USER").unwrap()
            < harness.position("oeda undo CREATE_VM").unwrap()
    );
}

#[tokio::test]
async fn undo_run_tears_down_in_given_order() {
    let harness = Harness::asm();
    let pipeline = Pipeline::of(PipelineKind::Default);
    let list = StepList::parse(&format!("{},{}", steps::CREATE_USER, steps::CREATE_VM));

    let report = Orchestrator::new(pipeline)
        .undo(&harness.context(), &options(), &list)
        .await
        .unwrap();

    assert_eq!(report.completed.len(), 2);
    assert!(
        harness.position("oeda undo CREATE_USER").unwrap()
            < harness.position("oeda undo CREATE_VM").unwrap()
    );
}

#[tokio::test]
async fn exascale_only_step_is_rejected_by_asm_pipeline() {
    let harness = Harness::asm();
    let pipeline = Pipeline::of(PipelineKind::Default);
    let list = StepList::parse(&format!("{},{}", steps::PREVM_CHECKS, steps::CONFIG_COMPUTE));

    let failure = Orchestrator::new(pipeline)
        .run(&harness.context(), &options(), &list)
        .await
        .unwrap_err();

    assert_eq!(failure.error.kind(), ErrorKind::Configuration);
    assert!(harness.journal().is_empty());
}
