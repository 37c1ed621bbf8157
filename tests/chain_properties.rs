use chrono::NaiveDate;
use esteira::workflow::{DependencyResolver, Priority, Step, StepStatus};
use esteira::{
    EngineConfig, InMemoryStore, StageSpec, StaticDirectory, StepStore, Worker, WorkflowEngine,
    WorkflowSpec,
};
use proptest::prelude::*;
use uuid::Uuid;

type Engine = WorkflowEngine<InMemoryStore, StaticDirectory>;

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Complete,
    Return,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Start), Just(Op::Complete), Just(Op::Return)]
}

/// Chain of `n` stages where stage `i` has an owner `w{i}` and a reviewer `r{i}`.
fn chain_engine(n: usize) -> (Engine, WorkflowSpec) {
    let mut workers = Vec::new();
    let mut stages = Vec::new();
    for i in 0..n {
        let function = format!("f{i}");
        workers.push(Worker::new(&format!("w{i}"), &format!("Owner {i}"), &[function.as_str()]));
        workers.push(Worker::new(&format!("r{i}"), &format!("Reviewer {i}"), &[function.as_str()]));
        stages.push(StageSpec {
            function,
            assignee: format!("w{i}"),
            tags: Vec::new(),
            priority: None,
            weight: 1,
        });
    }
    let engine = WorkflowEngine::new(
        InMemoryStore::new(),
        StaticDirectory::new(workers),
        EngineConfig::default(),
    );
    let spec = WorkflowSpec {
        title: "chain".into(),
        description: None,
        drive_link: None,
        deadline: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
        priority: Priority::Medium,
        functions: Vec::new(),
        stages,
    };
    (engine, spec)
}

fn assert_chain_order(steps: &[Step]) {
    for pair in steps.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if matches!(next.status, StepStatus::InProgress | StepStatus::Completed) {
            assert_eq!(
                prev.status,
                StepStatus::Completed,
                "step {} is {} while its predecessor is {}",
                next.position,
                next.status,
                prev.status
            );
        }
    }
}

fn eligible_ids(steps: &[Step]) -> Vec<Uuid> {
    let resolver = DependencyResolver::new(false);
    steps
        .iter()
        .filter(|s| resolver.is_eligible(s, steps))
        .map(|s| s.id)
        .collect()
}

async fn drive(n: usize, ops: Vec<(usize, Op)>) {
    let (engine, spec) = chain_engine(n);
    let view = engine.create_workflow(spec).await.unwrap();
    let macro_id = view.macro_task.id;

    for (index, op) in ops {
        let before = engine.store().steps(macro_id).await.unwrap();
        let step = &before[index % n];
        let caller = step.assignee.clone().unwrap_or_default();

        let result = match op {
            Op::Start => engine.start_step(step.id, &caller).await,
            Op::Complete => engine.complete_step(step.id, &caller).await,
            Op::Return => {
                let other = if caller.starts_with('w') {
                    caller.replacen('w', "r", 1)
                } else {
                    caller.replacen('r', "w", 1)
                };
                engine
                    .return_step(step.id, &caller, &other, "needs another pass")
                    .await
            }
        };

        let after = engine.store().steps(macro_id).await.unwrap();
        assert_chain_order(&after);

        if result.is_err() {
            assert_eq!(before, after, "rejected operation changed state");
            continue;
        }

        if matches!(op, Op::Complete) {
            let was = eligible_ids(&before);
            let now = eligible_ids(&after);
            let flipped: Vec<Uuid> = now.iter().filter(|id| !was.contains(id)).copied().collect();
            let expected: Vec<Uuid> = after.get(index % n + 1).map(|s| s.id).into_iter().collect();
            assert_eq!(flipped, expected);
            assert!(was.iter().all(|id| now.contains(id)));

            let done = after
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .count();
            let task = engine.store().macro_task(macro_id).await.unwrap();
            let expected = (done as f64 * 100.0 / n as f64).round() as u8;
            assert_eq!(task.progress, Some(expected));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chain_respects_dependencies(
        n in 2usize..6,
        ops in prop::collection::vec((0usize..6, op_strategy()), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(drive(n, ops));
    }
}
