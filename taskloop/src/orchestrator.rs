//! Multi-iteration run loop.
//!
//! Each iteration selects a task (or, for the single-document workflow, lets
//! the agent choose its own), invokes the agent once, streams its output
//! through the decoder and display filter, and resolves the outcome. The
//! orchestrator never returns an error: every way a run can end is a
//! [`RunStop`], delivered both as the return value and as the final
//! [`RunEvent::RunEnded`].

use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::control::RunControl;
use crate::core::display::{
    contains_sentinel, extract_plain_text, filter_for_display, format_message,
};
use crate::core::stream::{DecoderState, decode_chunk, finish};
use crate::core::types::{StreamMessage, Task};
use crate::error::AgentError;
use crate::events::{RunEvent, RunOutcome, RunStop};
use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::config::LoopConfig;
use crate::io::iteration_log::{IterationMeta, IterationPaths, new_run_id, unix_millis, write_meta};
use crate::io::prompt::PromptBuilder;
use crate::io::tracker::Tracker;
use crate::select::{SelectOutcome, query_snapshot, select_next};
use crate::workflow::{LegacyDocument, TrackerScope, Workflow};

/// Close reason recorded on a scope parent once all of its children are closed.
pub const SCOPE_CLOSE_REASON: &str = "All child tasks closed";

/// Where the current iteration is, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Idle,
    Selecting,
    RunningAgent,
    Resolving,
}

/// Per-invocation bookkeeping, owned by [`Orchestrator::run`] alone.
#[derive(Debug)]
struct IterationRun {
    iterations_requested: u32,
    iterations_completed: u32,
    current_task_id: Option<String>,
    phase: RunPhase,
}

impl IterationRun {
    fn new(iterations_requested: u32) -> Self {
        Self {
            iterations_requested,
            iterations_completed: 0,
            current_task_id: None,
            phase: RunPhase::Idle,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, task = ?self.current_task_id, "phase");
        self.phase = phase;
    }
}

/// How an iteration ended.
enum Flow {
    /// The iteration ran to completion; the run may still end after it.
    Completed(Option<RunStop>),
    /// The run ends without completing the iteration.
    Abort(RunStop),
}

/// Result of one agent invocation.
struct AgentTurn {
    result: Result<(), AgentError>,
    sentinel_seen: bool,
}

pub struct Orchestrator<'a, T: Tracker, A: AgentRunner> {
    tracker: &'a T,
    agent: &'a A,
    prompts: &'a PromptBuilder,
    config: &'a LoopConfig,
    workdir: PathBuf,
    run_id: String,
}

impl<'a, T: Tracker, A: AgentRunner> Orchestrator<'a, T, A> {
    pub fn new(
        tracker: &'a T,
        agent: &'a A,
        prompts: &'a PromptBuilder,
        config: &'a LoopConfig,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tracker,
            agent,
            prompts,
            config,
            workdir: workdir.into(),
            run_id: new_run_id(),
        }
    }

    /// Override the generated run id (names the iteration log directory).
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run up to `iterations` iterations of `workflow`.
    ///
    /// Events are sent to `events` in order; the last one is always
    /// [`RunEvent::RunEnded`]. A dropped receiver does not stop the run.
    #[instrument(skip_all, fields(run_id = %self.run_id, iterations = iterations))]
    pub fn run(
        &self,
        workflow: &Workflow,
        iterations: u32,
        control: &RunControl,
        events: &Sender<RunEvent>,
    ) -> RunOutcome {
        let mut run = IterationRun::new(iterations);
        let stop = self.drive(&mut run, workflow, control, events);
        let outcome = RunOutcome {
            iterations_requested: run.iterations_requested,
            iterations_completed: run.iterations_completed,
            stop,
        };
        info!(
            completed = outcome.iterations_completed,
            reason = %outcome.stop.reason(),
            "run ended"
        );
        emit(events, RunEvent::RunEnded(outcome.clone()));
        outcome
    }

    fn drive(
        &self,
        run: &mut IterationRun,
        workflow: &Workflow,
        control: &RunControl,
        events: &Sender<RunEvent>,
    ) -> RunStop {
        while run.iterations_completed < run.iterations_requested {
            if control.is_cancelled() {
                return RunStop::Stopped { immediate: true };
            }
            let iteration = run.iterations_completed + 1;
            let total = run.iterations_requested;
            emit(events, RunEvent::IterationStarted { iteration, total });

            let flow = match workflow {
                Workflow::TrackerBacked(scope) => {
                    self.tracker_iteration(run, iteration, scope, control, events)
                }
                Workflow::LegacyDocument(document) => {
                    self.legacy_iteration(run, iteration, document, control, events)
                }
            };
            run.current_task_id = None;
            run.enter(RunPhase::Idle);

            match flow {
                Flow::Abort(stop) => return stop,
                Flow::Completed(after) => {
                    run.iterations_completed = iteration;
                    emit(events, RunEvent::IterationCompleted { iteration, total });
                    if let Some(stop) = after {
                        return stop;
                    }
                    if control.stop_requested() {
                        return RunStop::Stopped { immediate: false };
                    }
                }
            }
        }
        RunStop::Finished
    }

    fn tracker_iteration(
        &self,
        run: &mut IterationRun,
        iteration: u32,
        scope: &TrackerScope,
        control: &RunControl,
        events: &Sender<RunEvent>,
    ) -> Flow {
        run.enter(RunPhase::Selecting);
        let tasks = match query_snapshot(self.tracker, scope) {
            Ok(tasks) => tasks,
            Err(err) => {
                error!(err = %err, "task query failed");
                return Flow::Abort(RunStop::Errored {
                    message: err.to_string(),
                });
            }
        };
        let task = match select_next(&tasks, &self.config.manual_label) {
            SelectOutcome::Ready(task) => task,
            SelectOutcome::Exhausted { all_closed } => {
                return Flow::Abort(self.finish_batch(scope, &tasks, all_closed));
            }
            SelectOutcome::NothingSelectable => return Flow::Abort(RunStop::NoReadyTasks),
        };

        info!(task = %task.id, priority = task.priority, "selected task");
        run.current_task_id = Some(task.id.clone());
        emit(
            events,
            RunEvent::TaskStarted {
                id: task.id.clone(),
                title: task.title.clone(),
            },
        );

        let prompt = match self.prompts.render_task(&task, scope.parent.as_deref()) {
            Ok(prompt) => prompt,
            Err(err) => {
                return Flow::Abort(RunStop::Errored {
                    message: format!("{err:#}"),
                });
            }
        };
        let turn = self.invoke_agent(run, iteration, Some(&task), prompt, control, events);

        run.enter(RunPhase::Resolving);
        if let Some(stop) = self.resolve(iteration, Some(&task), &turn, control, events) {
            return Flow::Abort(stop);
        }
        if turn.sentinel_seen && turn.result.is_ok() {
            return Flow::Completed(self.verify_sentinel(scope));
        }
        Flow::Completed(None)
    }

    fn legacy_iteration(
        &self,
        run: &mut IterationRun,
        iteration: u32,
        document: &LegacyDocument,
        control: &RunControl,
        events: &Sender<RunEvent>,
    ) -> Flow {
        let prompt = match self.prompts.render_legacy(document) {
            Ok(prompt) => prompt,
            Err(err) => {
                return Flow::Abort(RunStop::Errored {
                    message: format!("{err:#}"),
                });
            }
        };
        let turn = self.invoke_agent(run, iteration, None, prompt, control, events);

        run.enter(RunPhase::Resolving);
        if let Some(stop) = self.resolve(iteration, None, &turn, control, events) {
            return Flow::Abort(stop);
        }
        if turn.sentinel_seen && turn.result.is_ok() {
            info!("completion sentinel seen");
            return Flow::Completed(Some(RunStop::BatchComplete {
                all_closed: true,
                closed_scope: None,
            }));
        }
        Flow::Completed(None)
    }

    /// Emit the task outcome. Returns the terminal state for a cancelled run.
    fn resolve(
        &self,
        iteration: u32,
        task: Option<&Task>,
        turn: &AgentTurn,
        control: &RunControl,
        events: &Sender<RunEvent>,
    ) -> Option<RunStop> {
        let id = task.map(|t| t.id.clone());
        let err = match &turn.result {
            Ok(()) => {
                emit(
                    events,
                    RunEvent::TaskCompleted {
                        id,
                        success: true,
                        error: None,
                    },
                );
                return None;
            }
            Err(err) => err,
        };

        let message = describe(err);
        let cancelled = err.is_aborted() || control.is_cancelled();
        if cancelled {
            warn!("agent run cancelled");
        } else if let Some(task) = task {
            warn!(task = %task.id, err = %message, "agent run failed");
            let body = format!("Automated iteration {iteration} failed: {message}");
            if let Err(comment_err) = self.tracker.add_comment(&task.id, &body) {
                warn!(task = %task.id, err = %comment_err, "failed to record failure comment");
            }
        } else {
            warn!(err = %message, "agent run failed");
        }
        emit(
            events,
            RunEvent::TaskCompleted {
                id,
                success: false,
                error: Some(message),
            },
        );
        cancelled.then_some(RunStop::Stopped { immediate: true })
    }

    /// The agent claimed everything is done; end the run only if the tracker agrees.
    fn verify_sentinel(&self, scope: &TrackerScope) -> Option<RunStop> {
        info!("completion sentinel seen, re-checking tracker");
        match query_snapshot(self.tracker, scope) {
            Ok(tasks) => match select_next(&tasks, &self.config.manual_label) {
                SelectOutcome::Exhausted { all_closed } => {
                    Some(self.finish_batch(scope, &tasks, all_closed))
                }
                _ => {
                    warn!("completion sentinel seen but ready work remains");
                    None
                }
            },
            Err(err) => {
                warn!(err = %err, "could not verify completion sentinel");
                None
            }
        }
    }

    /// Terminal state for an exhausted batch, closing the scope parent if due.
    fn finish_batch(&self, scope: &TrackerScope, tasks: &[Task], all_closed: bool) -> RunStop {
        let due = all_closed && self.config.auto_close_scope && !tasks.is_empty();
        let closed_scope = match scope.parent.as_deref() {
            Some(parent) if due => match self.tracker.close(parent, SCOPE_CLOSE_REASON) {
                Ok(()) => {
                    info!(parent, "closed completed scope");
                    Some(parent.to_string())
                }
                Err(err) => {
                    warn!(parent, err = %err, "failed to close completed scope");
                    None
                }
            },
            _ => None,
        };
        RunStop::BatchComplete {
            all_closed,
            closed_scope,
        }
    }

    fn invoke_agent(
        &self,
        run: &mut IterationRun,
        iteration: u32,
        task: Option<&Task>,
        prompt: String,
        control: &RunControl,
        events: &Sender<RunEvent>,
    ) -> AgentTurn {
        run.enter(RunPhase::RunningAgent);
        let paths = self.config.log_iterations.then(|| {
            IterationPaths::new(
                &self.workdir.join(&self.config.log_dir),
                &self.run_id,
                iteration,
            )
        });
        let request = AgentRequest {
            workdir: self.workdir.clone(),
            prompt,
            stream_log_path: paths.as_ref().map(|p| p.stream_path.clone()),
        };
        let started_at_ms = unix_millis();
        let started = Instant::now();

        let mut messages: Vec<StreamMessage> = Vec::new();
        let mut decoder = DecoderState::new();
        let mut result = {
            let mut on_output = |chunk: &str| {
                let (next, decoded) = decode_chunk(std::mem::take(&mut decoder), chunk);
                decoder = next;
                absorb(&mut messages, decoded, events);
            };
            self.agent.run(&request, &control.cancel, &mut on_output)
        };
        absorb(&mut messages, finish(decoder), events);

        if result.is_ok() && reported_error(&messages) {
            result = Err(AgentError::ProcessError {
                code: Some(0),
                detail: "agent reported an error result".to_string(),
            });
        }
        let sentinel_seen = contains_sentinel(
            &extract_plain_text(&messages),
            &self.config.completion_sentinel,
        );

        if let Some(paths) = paths {
            let meta = IterationMeta {
                run_id: self.run_id.clone(),
                iteration,
                task_id: task.map(|t| t.id.clone()),
                success: result.is_ok(),
                error: result.as_ref().err().map(describe),
                sentinel_seen,
                started_at_ms,
                duration_ms: started.elapsed().as_millis() as u64,
            };
            if let Err(err) = write_meta(&paths, &meta) {
                warn!(err = %format!("{err:#}"), "failed to write iteration meta");
            }
        }

        AgentTurn {
            result,
            sentinel_seen,
        }
    }
}

/// Append newly decoded frames and publish the refreshed display view.
fn absorb(
    messages: &mut Vec<StreamMessage>,
    decoded: Vec<StreamMessage>,
    events: &Sender<RunEvent>,
) {
    if decoded.is_empty() {
        return;
    }
    let appended = decoded.iter().filter_map(format_message).collect();
    messages.extend(decoded);
    emit(
        events,
        RunEvent::Output {
            appended,
            view: filter_for_display(messages),
        },
    );
}

fn reported_error(messages: &[StreamMessage]) -> bool {
    messages
        .iter()
        .any(|m| matches!(m, StreamMessage::Result(summary) if summary.is_error))
}

/// Error message including its source chain.
fn describe(err: &AgentError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

fn emit(events: &Sender<RunEvent>, event: RunEvent) {
    if events.send(event).is_err() {
        debug!("event listener disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DisplayMessage, DisplaySource};
    use crate::test_support::{
        FakeTracker, ScriptedAgent, ScriptedExit, ScriptedRun, assistant_text, blocked_task,
        child_of, closed_task, result_frame, task,
    };
    use std::sync::mpsc;

    struct Harness {
        config: LoopConfig,
        prompts: PromptBuilder,
        temp: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let config = LoopConfig {
                log_iterations: false,
                ..LoopConfig::default()
            };
            let prompts = PromptBuilder::new(&config.completion_sentinel, "bd").expect("prompts");
            Self {
                config,
                prompts,
                temp: tempfile::tempdir().expect("tempdir"),
            }
        }

        fn run(
            &self,
            tracker: &FakeTracker,
            agent: &ScriptedAgent,
            workflow: &Workflow,
            iterations: u32,
            control: &RunControl,
        ) -> (RunOutcome, Vec<RunEvent>) {
            let (tx, rx) = mpsc::channel();
            let orchestrator =
                Orchestrator::new(tracker, agent, &self.prompts, &self.config, self.temp.path())
                    .with_run_id("run-test");
            let outcome = orchestrator.run(workflow, iterations, control, &tx);
            drop(tx);
            (outcome, rx.into_iter().collect())
        }
    }

    fn tracker_workflow() -> Workflow {
        Workflow::TrackerBacked(TrackerScope::all())
    }

    fn ended(events: &[RunEvent]) -> &RunOutcome {
        match events.last() {
            Some(RunEvent::RunEnded(outcome)) => outcome,
            other => panic!("last event is not RunEnded: {other:?}"),
        }
    }

    #[test]
    fn runs_requested_iterations_in_order() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 1), task("T2", 0)]);
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::success(vec![assistant_text("working on it")]),
            ScriptedRun::success(Vec::new()),
        ]);

        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 2, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Finished);
        assert_eq!(outcome.iterations_completed, 2);
        assert_eq!(ended(&events), &outcome);
        assert_eq!(
            events[..4],
            [
                RunEvent::IterationStarted {
                    iteration: 1,
                    total: 2
                },
                RunEvent::TaskStarted {
                    id: "T2".to_string(),
                    title: "T2 title".to_string()
                },
                RunEvent::Output {
                    appended: vec![DisplayMessage::new(
                        DisplaySource::Assistant,
                        "working on it"
                    )],
                    view: vec![DisplayMessage::new(
                        DisplaySource::Assistant,
                        "working on it"
                    )],
                },
                RunEvent::TaskCompleted {
                    id: Some("T2".to_string()),
                    success: true,
                    error: None
                },
            ]
        );
        let prompts = agent.requests();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].prompt.contains("T2"));
    }

    #[test]
    fn zero_iterations_finishes_immediately() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(Vec::new());
        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 0, &RunControl::new());
        assert_eq!(outcome.stop, RunStop::Finished);
        assert_eq!(events.len(), 1);
        assert!(agent.requests().is_empty());
    }

    #[test]
    fn failed_task_gets_a_comment_and_the_run_continues() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::failure(2, "rate limited"),
            ScriptedRun::success(Vec::new()),
        ]);

        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 2, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Finished);
        assert_eq!(outcome.iterations_completed, 2);
        let comments = tracker.comments();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, "T1");
        assert_eq!(
            comments[0].1,
            "Automated iteration 1 failed: agent failed (exit code 2): rate limited"
        );
        assert!(events.contains(&RunEvent::TaskCompleted {
            id: Some("T1".to_string()),
            success: false,
            error: Some("agent failed (exit code 2): rate limited".to_string()),
        }));
    }

    #[test]
    fn spawn_failure_is_recorded_and_not_fatal() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(vec![ScriptedRun {
            exit: ScriptedExit::SpawnFailure,
            ..ScriptedRun::success(Vec::new())
        }]);

        let (outcome, _) =
            harness.run(&tracker, &agent, &tracker_workflow(), 1, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Finished);
        assert!(tracker.comments()[0].1.contains("failed to spawn agent"));
        assert!(tracker.comments()[0].1.contains("not found"));
    }

    #[test]
    fn comment_failure_does_not_mask_the_outcome() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        tracker.fail_writes();
        let agent = ScriptedAgent::new(vec![ScriptedRun::failure(1, "boom")]);

        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 1, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Finished);
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::TaskCompleted { success: false, .. }
        )));
    }

    #[test]
    fn error_result_frame_counts_as_failure() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(vec![ScriptedRun::success(vec![result_frame(
            true, 100, 0.01,
        )])]);

        let (_, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 1, &RunControl::new());

        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::TaskCompleted { success: false, .. }
        )));
        assert_eq!(tracker.comments().len(), 1);
    }

    #[test]
    fn cancel_during_agent_stops_without_more_iterations() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(vec![ScriptedRun {
            cancel: true,
            ..ScriptedRun::success(vec![assistant_text("partial")])
        }]);

        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 5, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Stopped { immediate: true });
        assert_eq!(outcome.iterations_completed, 0);
        assert_eq!(agent.requests().len(), 1);
        assert!(tracker.comments().is_empty());
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, RunEvent::IterationCompleted { .. }))
        );
    }

    #[test]
    fn cancel_before_start_runs_nothing() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(Vec::new());
        let control = RunControl::new();
        control.cancel_now();

        let (outcome, events) = harness.run(&tracker, &agent, &tracker_workflow(), 3, &control);

        assert_eq!(outcome.stop, RunStop::Stopped { immediate: true });
        assert_eq!(events.len(), 1);
        assert!(tracker.queries().is_empty());
    }

    #[test]
    fn graceful_stop_lets_the_current_iteration_finish() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let control = RunControl::new();
        let agent = ScriptedAgent::new(vec![ScriptedRun {
            stop: Some(control.stop.clone()),
            ..ScriptedRun::success(vec![assistant_text("still going")])
        }]);

        let (outcome, events) = harness.run(&tracker, &agent, &tracker_workflow(), 5, &control);

        assert_eq!(outcome.stop, RunStop::Stopped { immediate: false });
        assert_eq!(outcome.iterations_completed, 1);
        let n = events.len();
        assert_eq!(
            events[n - 2],
            RunEvent::IterationCompleted {
                iteration: 1,
                total: 5
            }
        );
        assert!(events.contains(&RunEvent::TaskCompleted {
            id: Some("T1".to_string()),
            success: true,
            error: None,
        }));
    }

    #[test]
    fn blocked_backlog_ends_as_batch_complete_without_closing() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![
            child_of(closed_task("T1"), "E1"),
            child_of(blocked_task("T2", 0, &["X"]), "E1"),
        ]);
        let agent = ScriptedAgent::new(Vec::new());
        let workflow = Workflow::TrackerBacked(TrackerScope::under("E1"));

        let (outcome, _) = harness.run(&tracker, &agent, &workflow, 3, &RunControl::new());

        assert_eq!(
            outcome.stop,
            RunStop::BatchComplete {
                all_closed: false,
                closed_scope: None
            }
        );
        assert!(tracker.closed().is_empty());
        assert!(agent.requests().is_empty());
    }

    #[test]
    fn finished_scope_is_closed_automatically() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![
            child_of(closed_task("T1"), "E1"),
            child_of(closed_task("T2"), "E1"),
        ]);
        let agent = ScriptedAgent::new(Vec::new());
        let workflow = Workflow::TrackerBacked(TrackerScope::under("E1"));

        let (outcome, _) = harness.run(&tracker, &agent, &workflow, 3, &RunControl::new());

        assert_eq!(
            outcome.stop,
            RunStop::BatchComplete {
                all_closed: true,
                closed_scope: Some("E1".to_string())
            }
        );
        assert_eq!(
            tracker.closed(),
            vec![("E1".to_string(), SCOPE_CLOSE_REASON.to_string())]
        );
        assert_eq!(tracker.queries()[0].parent.as_deref(), Some("E1"));
    }

    #[test]
    fn empty_scope_is_not_closed() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(Vec::new());
        let agent = ScriptedAgent::new(Vec::new());
        let workflow = Workflow::TrackerBacked(TrackerScope::under("E1"));

        let (outcome, _) = harness.run(&tracker, &agent, &workflow, 1, &RunControl::new());

        assert_eq!(
            outcome.stop,
            RunStop::BatchComplete {
                all_closed: true,
                closed_scope: None
            }
        );
        assert!(tracker.closed().is_empty());
    }

    #[test]
    fn manual_only_backlog_ends_with_no_ready_tasks() {
        let harness = Harness::new();
        let mut reserved = task("T1", 0);
        reserved.labels = vec!["manual".to_string()];
        let tracker = FakeTracker::new(vec![reserved]);
        let agent = ScriptedAgent::new(Vec::new());

        let (outcome, _) =
            harness.run(&tracker, &agent, &tracker_workflow(), 1, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::NoReadyTasks);
    }

    #[test]
    fn query_failure_is_fatal() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        tracker.fail_next_query("database locked");
        let agent = ScriptedAgent::new(Vec::new());

        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 3, &RunControl::new());

        match &outcome.stop {
            RunStop::Errored { message } => assert!(message.contains("database locked")),
            other => panic!("unexpected stop {other:?}"),
        }
        assert_eq!(events.len(), 2);
        assert!(agent.requests().is_empty());
    }

    #[test]
    fn requeries_the_tracker_every_iteration() {
        let harness = Harness::new();
        let tracker = FakeTracker::with_snapshots(vec![
            vec![task("T1", 0), task("T2", 1)],
            vec![closed_task("T1"), task("T2", 1)],
        ]);
        let agent = ScriptedAgent::new(Vec::new());

        let (outcome, events) =
            harness.run(&tracker, &agent, &tracker_workflow(), 2, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Finished);
        let started: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::TaskStarted { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["T1", "T2"]);
    }

    #[test]
    fn sentinel_ends_the_run_when_the_tracker_agrees() {
        let harness = Harness::new();
        let tracker = FakeTracker::with_snapshots(vec![
            vec![task("T1", 0)],
            vec![closed_task("T1")],
        ]);
        let agent = ScriptedAgent::new(vec![ScriptedRun::success(vec![assistant_text(
            "done <promise>COMPLETE</promise>",
        )])]);

        let (outcome, _) =
            harness.run(&tracker, &agent, &tracker_workflow(), 5, &RunControl::new());

        assert_eq!(outcome.iterations_completed, 1);
        assert_eq!(
            outcome.stop,
            RunStop::BatchComplete {
                all_closed: true,
                closed_scope: None
            }
        );
    }

    #[test]
    fn sentinel_is_ignored_while_ready_work_remains() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(vec![ScriptedRun::success(vec![assistant_text(
            "<promise>COMPLETE</promise>",
        )])]);

        let (outcome, _) =
            harness.run(&tracker, &agent, &tracker_workflow(), 2, &RunControl::new());

        assert_eq!(outcome.stop, RunStop::Finished);
        assert_eq!(outcome.iterations_completed, 2);
    }

    #[test]
    fn legacy_document_runs_until_the_sentinel() {
        let harness = Harness::new();
        let tracker = FakeTracker::new(Vec::new());
        let agent = ScriptedAgent::new(vec![
            ScriptedRun::success(vec![assistant_text("did item 1")]),
            ScriptedRun::success(vec![assistant_text("<promise>COMPLETE</promise>")]),
        ]);
        let workflow = Workflow::LegacyDocument(LegacyDocument {
            path: PathBuf::from("PRD.md"),
        });

        let (outcome, events) = harness.run(&tracker, &agent, &workflow, 10, &RunControl::new());

        assert_eq!(outcome.iterations_completed, 2);
        assert_eq!(
            outcome.stop,
            RunStop::BatchComplete {
                all_closed: true,
                closed_scope: None
            }
        );
        assert!(tracker.queries().is_empty());
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, RunEvent::TaskStarted { .. }))
        );
        assert!(agent.requests()[0].prompt.contains("PRD.md"));
    }

    #[test]
    fn writes_iteration_artifacts_when_enabled() {
        let mut harness = Harness::new();
        harness.config.log_iterations = true;
        let tracker = FakeTracker::new(vec![task("T1", 0)]);
        let agent = ScriptedAgent::new(Vec::new());

        harness.run(&tracker, &agent, &tracker_workflow(), 1, &RunControl::new());

        let requests = agent.requests();
        let stream_path = requests[0].stream_log_path.as_ref().expect("stream path");
        assert!(stream_path.ends_with("run-test/1/stream.jsonl"));
        let meta_path = harness
            .temp
            .path()
            .join(".taskloop/iterations/run-test/1/meta.json");
        let meta = std::fs::read_to_string(meta_path).expect("meta.json");
        assert!(meta.contains("\"task_id\": \"T1\""));
    }
}
