//! End-to-end workflow scenarios exercised through the public API.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;
use weft_core::{
    Envelope, ExternalResponse, FnExecutor, InMemoryCheckpointStore, MessageType, RunMode,
    RunOptions, RunStatus, RequestPort, WatchOptions, Workflow, WorkflowBuilder, WorkflowError,
    WorkflowEvent, WorkflowExecutor,
};

const INIT: &str = "signal.init";
const GUESS: &str = "guess";
const FEEDBACK: &str = "feedback";
const RESULT: &str = "result";

/// Guesser/Judge loop: binary search over [1, 100] against a fixed target.
fn guessing_workflow(target: i64) -> Workflow {
    let guesser = FnExecutor::builder("guesser")
        .handle(INIT, |_, ctx| async move {
            let guess = (1 + 100) / 2;
            ctx.queue_state_update("guesser", "low", json!(1));
            ctx.queue_state_update("guesser", "high", json!(100));
            ctx.queue_state_update("guesser", "last", json!(guess));
            ctx.send_message(json!(guess), Some(MessageType::named(GUESS)))
                .await
        })
        .handle(FEEDBACK, |envelope, ctx| async move {
            let hint = envelope.payload["hint"].as_str().unwrap_or_default().to_string();
            let low = ctx
                .read_state("guesser", "low")
                .and_then(|v| v.as_i64())
                .unwrap_or(1);
            let high = ctx
                .read_state("guesser", "high")
                .and_then(|v| v.as_i64())
                .unwrap_or(100);
            let last = ctx
                .read_state("guesser", "last")
                .and_then(|v| v.as_i64())
                .unwrap_or(50);

            let (low, high) = match hint.as_str() {
                "lower" => (low, last - 1),
                _ => (last + 1, high),
            };
            let guess = (low + high) / 2;
            ctx.queue_state_update("guesser", "low", json!(low));
            ctx.queue_state_update("guesser", "high", json!(high));
            ctx.queue_state_update("guesser", "last", json!(guess));
            ctx.send_message(json!(guess), Some(MessageType::named(GUESS)))
                .await
        })
        .build_arc();

    let judge = FnExecutor::builder("judge")
        .handle(GUESS, move |envelope, ctx| async move {
            let guess = envelope.payload.as_i64().unwrap_or(0);
            let tries = ctx
                .read_state("judge", "tries")
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
                + 1;
            ctx.queue_state_update("judge", "tries", json!(tries));

            if guess == target {
                ctx.send_message(
                    json!(format!("{target} found in {tries} tries!")),
                    Some(MessageType::named(RESULT)),
                )
                .await
            } else {
                let hint = if target < guess { "lower" } else { "higher" };
                ctx.send_message(json!({ "hint": hint }), Some(MessageType::named(FEEDBACK)))
                    .await
            }
        })
        .build_arc();

    WorkflowBuilder::new()
        .add_executor(guesser)
        .add_executor(judge)
        .add_edge("guesser", "judge")
        .add_edge("judge", "guesser")
        .set_start("guesser")
        .declare_output("judge")
        .build()
        .expect("guessing workflow builds")
}

/// Strip checkpoint ids so traces from different runs compare equal.
fn normalized(events: Vec<WorkflowEvent>) -> Vec<WorkflowEvent> {
    events
        .into_iter()
        .map(|event| match event {
            WorkflowEvent::SuperStepCompleted {
                step,
                has_actions,
                has_requests,
                ..
            } => WorkflowEvent::SuperStepCompleted {
                step,
                has_actions,
                has_requests,
                checkpoint_id: None,
            },
            other => other,
        })
        .collect()
}

async fn collect_run(workflow: Workflow, options: RunOptions) -> Vec<WorkflowEvent> {
    let handle = workflow.start(options);
    handle
        .enqueue_as(json!(null), MessageType::named(INIT))
        .await
        .expect("initial input accepted");
    let stream = handle
        .watch_event_stream(WatchOptions::default())
        .expect("watcher available");
    stream.collect().await
}

#[tokio::test]
async fn guessing_loop_finds_target_within_seven_tries() {
    let events = collect_run(
        guessing_workflow(42),
        RunOptions::new().with_mode(RunMode::Lockstep),
    )
    .await;

    let outputs: Vec<&Value> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::Output { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(outputs.len(), 1, "exactly one terminating output");
    let text = outputs[0].as_str().unwrap();
    assert!(text.starts_with("42 found in "), "got {text}");

    let tries: i64 = text
        .trim_start_matches("42 found in ")
        .trim_end_matches(" tries!")
        .parse()
        .unwrap();
    assert!(tries <= 7, "binary search needs at most 7 tries, took {tries}");

    // The superstep that produced the output reports no further actions.
    let output_position = events
        .iter()
        .position(|e| matches!(e, WorkflowEvent::Output { .. }))
        .unwrap();
    let completion_after_output = events[output_position..]
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::SuperStepCompleted { has_actions, .. } => Some(*has_actions),
            _ => None,
        })
        .expect("a superstep completion follows the output");
    assert!(!completion_after_output);

    assert!(matches!(events.last(), Some(WorkflowEvent::Halted { .. })));
}

#[tokio::test]
async fn fan_in_aggregates_once_per_complete_cycle() {
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();

    let letter_sender = |id: &str, first: &str, second: &str| {
        let first = first.to_string();
        let second = second.to_string();
        FnExecutor::builder(id)
            .handle("go", move |_, ctx| {
                let letter = first.clone();
                async move {
                    ctx.send_message(json!(letter), Some(MessageType::named("letter")))
                        .await
                }
            })
            .handle("again", move |_, ctx| {
                let letter = second.clone();
                async move {
                    ctx.send_message(json!(letter), Some(MessageType::named("letter")))
                        .await
                }
            })
            .build_arc()
    };

    let workflow = WorkflowBuilder::new()
        .add_executor(
            FnExecutor::builder("seed")
                .handle_any(|envelope, ctx| async move {
                    ctx.send_message(json!(null), Some(envelope.declared_type))
                        .await
                })
                .build_arc(),
        )
        .add_executor(letter_sender("a", "a", "a2"))
        .add_executor(letter_sender("b", "b", "b2"))
        .add_executor(
            // c answers the first round only.
            FnExecutor::builder("c")
                .handle("go", |_, ctx| async move {
                    ctx.send_message(json!("c"), Some(MessageType::named("letter")))
                        .await
                })
                .build_arc(),
        )
        .add_executor(
            FnExecutor::builder("t")
                .handle(MessageType::composite(), move |envelope, _| {
                    let received = received_clone.clone();
                    async move {
                        received.lock().unwrap().push(envelope.payload);
                        Ok(())
                    }
                })
                .build_arc(),
        )
        .add_edge("seed", "a")
        .add_edge("seed", "b")
        .add_edge("seed", "c")
        .add_fan_in(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            "t",
        )
        .set_start("seed")
        .build()
        .unwrap();

    let handle = workflow.start(RunOptions::new().with_mode(RunMode::Lockstep));

    handle
        .enqueue_as(json!(null), MessageType::named("go"))
        .await
        .unwrap();
    while handle.step().await.unwrap() {}

    {
        let seen = received.lock().unwrap();
        assert_eq!(seen.len(), 1, "one composite per complete cycle");
        assert_eq!(seen[0], json!(["a", "b", "c"]));
    }

    // a and b fire again; c stays silent, so no further composite.
    handle
        .enqueue_as(json!(null), MessageType::named("again"))
        .await
        .unwrap();
    while handle.step().await.unwrap() {}

    let seen = received.lock().unwrap();
    assert_eq!(seen.len(), 1, "incomplete cycle releases nothing");
}

#[tokio::test]
async fn checkpoint_restore_resumes_mid_search() {
    let store = Arc::new(InMemoryCheckpointStore::new());

    let trace1 = collect_run(
        guessing_workflow(42),
        RunOptions::new()
            .with_mode(RunMode::Lockstep)
            .with_checkpoint_store(store.clone())
            .with_run_id("guess-run"),
    )
    .await;

    let step3_checkpoint = trace1
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::SuperStepCompleted {
                step: 3,
                checkpoint_id: Some(id),
                ..
            } => Some(id.clone()),
            _ => None,
        })
        .expect("step 3 committed a checkpoint");

    // A fresh run of the same workflow resumes the same logical run.
    let handle = guessing_workflow(42).start(
        RunOptions::new()
            .with_mode(RunMode::Lockstep)
            .with_checkpoint_store(store.clone())
            .with_run_id("guess-run"),
    );
    handle.restore_checkpoint(&step3_checkpoint).await.unwrap();

    let stream = handle.watch_event_stream(WatchOptions::default()).unwrap();
    let trace2: Vec<WorkflowEvent> = stream.collect().await;

    // The resumed run begins at step 4.
    assert!(matches!(
        trace2.first(),
        Some(WorkflowEvent::StepStarted { step: 4 })
    ));

    // Tries were restored to their step-3 value (1), so the final count
    // still lands on 7 rather than restarting from zero.
    let final_output = trace2
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::Output { value, .. } => value.as_str(),
            _ => None,
        })
        .expect("resumed run produces the output");
    assert_eq!(final_output, "42 found in 7 tries!");

    // From step 4 onwards the traces match.
    let tail_start = trace1
        .iter()
        .position(|e| matches!(e, WorkflowEvent::StepStarted { step: 4 }))
        .unwrap();
    assert_eq!(
        normalized(trace1[tail_start..].to_vec()),
        normalized(trace2)
    );
}

#[tokio::test]
async fn external_request_round_trip() {
    let judged: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let judged_clone = judged.clone();

    let workflow = WorkflowBuilder::new()
        .add_executor(
            FnExecutor::builder("prompter")
                .handle("signal.start", |_, ctx| async move {
                    ctx.send_message(json!("Guess the number."), Some(MessageType::string()))
                        .await
                })
                .build_arc(),
        )
        .add_input_port(RequestPort::new(
            "Guess",
            MessageType::string(),
            MessageType::integer(),
        ))
        .add_executor(
            FnExecutor::builder("judge")
                .handle(MessageType::integer(), move |envelope, _| {
                    let judged = judged_clone.clone();
                    async move {
                        judged.lock().unwrap().push(envelope.payload.as_i64().unwrap());
                        Ok(())
                    }
                })
                .build_arc(),
        )
        .add_edge("prompter", "Guess")
        .add_edge("Guess", "judge")
        .set_start("prompter")
        .build()
        .unwrap();

    let handle = workflow.start(RunOptions::new().with_mode(RunMode::Lockstep));
    handle
        .enqueue_as(json!(null), MessageType::named("signal.start"))
        .await
        .unwrap();

    let mut stream = Box::pin(handle.watch_event_stream(WatchOptions::default()).unwrap());
    let mut request_count = 0;
    let mut responded = false;

    while let Some(event) = stream.next().await {
        match event {
            WorkflowEvent::RequestInfo {
                port_id,
                payload,
                response_type,
                ..
            } => {
                request_count += 1;
                assert_eq!(port_id, "Guess");
                assert_eq!(payload, json!("Guess the number."));
                assert_eq!(response_type, MessageType::integer());

                // A mistyped response is rejected and changes nothing.
                let mistyped = ExternalResponse::typed(
                    "Guess",
                    json!("fifty"),
                    MessageType::string(),
                );
                assert!(matches!(
                    handle.respond(mistyped).await,
                    Err(WorkflowError::TypeMismatch { .. })
                ));

                handle
                    .respond(ExternalResponse::typed(
                        "Guess",
                        json!(50),
                        MessageType::integer(),
                    ))
                    .await
                    .unwrap();
                responded = true;
            }
            WorkflowEvent::Halted { .. } => break,
            _ => {}
        }
    }

    assert_eq!(request_count, 1, "host observes exactly one RequestInfo");
    assert!(responded);
    assert_eq!(*judged.lock().unwrap(), vec![50]);
}

#[tokio::test]
async fn fan_out_partition_skips_excluded_target() {
    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let recorder = |id: &str, hits: &Arc<Mutex<Vec<String>>>| {
        let hits = hits.clone();
        let id_owned = id.to_string();
        FnExecutor::builder(id)
            .handle_any(move |_, _| {
                let hits = hits.clone();
                let id = id_owned.clone();
                async move {
                    hits.lock().unwrap().push(id);
                    Ok(())
                }
            })
            .build_arc()
    };

    let workflow = WorkflowBuilder::new()
        .add_executor(
            FnExecutor::builder("s")
                .handle_any(|envelope, ctx| async move {
                    ctx.send_message(envelope.payload, Some(MessageType::named("m")))
                        .await
                })
                .build_arc(),
        )
        .add_executor(recorder("x", &hits))
        .add_executor(recorder("y", &hits))
        .add_executor(recorder("z", &hits))
        .add_fan_out(
            "s",
            vec!["x".to_string(), "y".to_string(), "z".to_string()],
            Arc::new(|_msg, candidates| {
                candidates.iter().filter(|c| *c != "y").cloned().collect()
            }),
        )
        .set_start("s")
        .build()
        .unwrap();

    let handle = workflow.start(RunOptions::new().with_mode(RunMode::Lockstep));
    handle.enqueue(json!("payload")).await.unwrap();
    while handle.step().await.unwrap() {}

    let mut seen = hits.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["x".to_string(), "z".to_string()]);
}

#[tokio::test]
async fn restore_into_different_workflow_is_rejected() {
    let store = Arc::new(InMemoryCheckpointStore::new());

    // Run the guessing workflow far enough to commit checkpoints.
    let trace = collect_run(
        guessing_workflow(42),
        RunOptions::new()
            .with_mode(RunMode::Lockstep)
            .with_checkpoint_store(store.clone())
            .with_run_id("shared-run"),
    )
    .await;
    let checkpoint_id = trace
        .iter()
        .find_map(|e| match e {
            WorkflowEvent::SuperStepCompleted {
                checkpoint_id: Some(id),
                ..
            } => Some(id.clone()),
            _ => None,
        })
        .expect("a checkpoint was committed");

    // A structurally different workflow (different start id).
    let other = WorkflowBuilder::new()
        .add_executor(
            FnExecutor::builder("other")
                .handle_any(|envelope, ctx| async move {
                    ctx.send_message(envelope.payload, None).await
                })
                .build_arc(),
        )
        .set_start("other")
        .declare_output("other")
        .build()
        .unwrap();

    let handle = other.start(
        RunOptions::new()
            .with_mode(RunMode::Lockstep)
            .with_checkpoint_store(store)
            .with_run_id("shared-run"),
    );

    let result = handle.restore_checkpoint(&checkpoint_id).await;
    assert!(matches!(
        result,
        Err(WorkflowError::CheckpointIncompatible(_))
    ));

    // The run is unaffected: it still accepts input and completes.
    handle.enqueue(json!("still alive")).await.unwrap();
    let events: Vec<WorkflowEvent> = handle
        .watch_event_stream(WatchOptions::default())
        .unwrap()
        .collect()
        .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::Output { value, .. } if value == &json!("still alive"))));
    assert_eq!(handle.status(), RunStatus::Halted);
}

#[tokio::test]
async fn subworkflow_advances_in_lockstep_with_parent() {
    // Two-hop child: the parent must keep stepping while the child works
    // through its own supersteps, even with an empty parent inbox.
    let child = WorkflowBuilder::new()
        .add_executor(
            FnExecutor::builder("shout")
                .handle_any(|envelope, ctx| async move {
                    let text = envelope.payload.as_str().unwrap_or_default().to_uppercase();
                    ctx.send_message(json!(text), Some(MessageType::string()))
                        .await
                })
                .build_arc(),
        )
        .add_executor(
            FnExecutor::builder("bang")
                .handle_any(|envelope, ctx| async move {
                    let text = envelope.payload.as_str().unwrap_or_default().to_string();
                    ctx.send_message(json!(format!("{text}!")), Some(MessageType::string()))
                        .await
                })
                .build_arc(),
        )
        .add_edge("shout", "bang")
        .set_start("shout")
        .declare_output("bang")
        .build()
        .unwrap();

    let collected: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let collected_clone = collected.clone();

    let parent = WorkflowBuilder::new()
        .add_executor(WorkflowExecutor::new("inner", child).into_arc())
        .add_executor(
            FnExecutor::builder("sink")
                .handle_any(move |envelope, _| {
                    let collected = collected_clone.clone();
                    async move {
                        collected.lock().unwrap().push(envelope.payload);
                        Ok(())
                    }
                })
                .build_arc(),
        )
        .add_edge("inner", "sink")
        .set_start("inner")
        .build()
        .unwrap();

    let handle = parent.start(RunOptions::new().with_mode(RunMode::Lockstep));
    handle.enqueue(json!("hello")).await.unwrap();
    let events: Vec<WorkflowEvent> = handle
        .watch_event_stream(WatchOptions::default())
        .unwrap()
        .collect()
        .await;

    assert_eq!(*collected.lock().unwrap(), vec![json!("HELLO!")]);
    assert!(matches!(events.last(), Some(WorkflowEvent::Halted { .. })));
}

#[tokio::test]
async fn enqueue_envelope_carrying_response_routes_to_response_queue() {
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();

    let workflow = WorkflowBuilder::new()
        .add_input_port(RequestPort::new(
            "Ask",
            MessageType::string(),
            MessageType::string(),
        ))
        .add_executor(
            FnExecutor::builder("sink")
                .handle(MessageType::string(), move |envelope, _| {
                    let received = received_clone.clone();
                    async move {
                        received.lock().unwrap().push(envelope.payload);
                        Ok(())
                    }
                })
                .build_arc(),
        )
        .add_edge("Ask", "sink")
        .set_start("Ask")
        .build()
        .unwrap();

    let handle = workflow.start(RunOptions::new().with_mode(RunMode::Lockstep));

    // Route a response through the untyped enqueue surface.
    let response = ExternalResponse::typed("Ask", json!("routed"), MessageType::string());
    let envelope = Envelope::new(
        serde_json::to_value(&response).unwrap(),
        MessageType::named(ExternalResponse::TYPE_ID),
    );
    handle.enqueue_envelope(envelope).await.unwrap();
    while handle.step().await.unwrap() {}

    assert_eq!(*received.lock().unwrap(), vec![json!("routed")]);
}
