//! Batch test runner
//!
//! Runs scripts strictly one after another. A script that cannot run is
//! recorded as `Error` and the batch moves on; nothing is retried.

use std::path::Path;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::common::{Error, Result};

use super::config::ScriptSource;
use super::report::{RunReport, ScriptEntry, ScriptResult};

/// Something that can run one script file to a verdict
pub trait ScriptExecutor {
    /// Run the script at `path`, appending everything it prints to `output`
    ///
    /// An `Err` means the script could not run to completion; the runner
    /// records it as `Error` along with the message.
    fn execute(&mut self, path: &Path, output: &mut String) -> Result<ScriptResult>;
}

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Running { done: usize, total: usize },
    Completed { total: usize },
}

/// Progress notifications emitted while a batch runs
#[derive(Debug, Clone)]
pub enum RunEvent {
    Started { total: usize },
    ScriptStarted { index: usize, name: String },
    ScriptFinished { entry: ScriptEntry, done: usize, total: usize },
    Completed { pass: usize, fail: usize, error: usize },
}

/// Banner line opening a script's output
pub fn banner(name: &str) -> String {
    format!("====== {} ========================\n", name)
}

/// Line closing a script's output
pub fn result_line(result: ScriptResult) -> String {
    format!("====== Result: {}\n", result)
}

pub struct TestRunner<E> {
    executor: E,
    state: RunState,
}

impl<E: ScriptExecutor> TestRunner<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run `scripts` in order and return the finished report
    pub fn run(
        &mut self,
        scripts: &[ScriptSource],
        mut on_event: impl FnMut(&RunEvent),
    ) -> RunReport {
        let total = scripts.len();
        let mut report = RunReport::new();

        self.state = RunState::Running { done: 0, total };
        tracing::info!(total, "Starting test batch");
        on_event(&RunEvent::Started { total });

        for (index, script) in scripts.iter().enumerate() {
            on_event(&RunEvent::ScriptStarted {
                index,
                name: script.name.clone(),
            });

            let mut output = banner(&script.name);
            let result = match self.executor.execute(&script.path, &mut output) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(script = %script.name, error = %e, "Script error");
                    if !output.ends_with('\n') {
                        output.push('\n');
                    }
                    output.push_str(&e.to_string());
                    output.push('\n');
                    ScriptResult::Error
                }
            };
            output.push_str(&result_line(result));

            if result != ScriptResult::Pass {
                tracing::warn!(script = %script.name, %result, "Script did not pass");
            } else {
                tracing::debug!(script = %script.name, "Script passed");
            }

            let entry = ScriptEntry {
                name: script.name.clone(),
                result,
                output,
            };
            report.record(entry.clone());

            let done = index + 1;
            self.state = RunState::Running { done, total };
            on_event(&RunEvent::ScriptFinished { entry, done, total });
        }

        self.state = RunState::Completed { total };
        tracing::info!(
            pass = report.pass,
            fail = report.fail,
            error = report.error,
            "Test batch complete"
        );
        on_event(&RunEvent::Completed {
            pass: report.pass,
            fail: report.fail,
            error: report.error,
        });

        report
    }
}

/// Run a batch on a blocking worker thread
///
/// The executor is built on the worker, so it may hold non-`Send` state.
/// Events are forwarded over `events` as they happen; a dropped receiver
/// does not stop the batch.
pub async fn run_in_background<F, E>(
    make_executor: F,
    scripts: Vec<ScriptSource>,
    events: mpsc::UnboundedSender<RunEvent>,
) -> Result<RunReport>
where
    F: FnOnce() -> Result<E> + Send + 'static,
    E: ScriptExecutor,
{
    tokio::task::spawn_blocking(move || {
        let executor = make_executor()?;
        let mut runner = TestRunner::new(executor);
        Ok(runner.run(&scripts, |event| {
            let _ = events.send(event.clone());
        }))
    })
    .await
    .map_err(|e| Error::Internal(format!("Test worker failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    /// Verdict chosen by file stem: pass, fail, error, or anything else fails to run
    struct ByName;

    impl ScriptExecutor for ByName {
        fn execute(&mut self, path: &Path, output: &mut String) -> Result<ScriptResult> {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            output.push_str("running\n");
            match stem {
                "pass" => Ok(ScriptResult::Pass),
                "fail" => Ok(ScriptResult::Fail),
                "error" => Ok(ScriptResult::Error),
                _ => Err(Error::script_load(path, "no such script")),
            }
        }
    }

    fn sources(names: &[&str]) -> Vec<ScriptSource> {
        names
            .iter()
            .map(|n| ScriptSource {
                name: format!("{}.rhai", n),
                path: PathBuf::from(format!("{}.rhai", n)),
            })
            .collect()
    }

    #[test]
    fn test_batch_counts_and_output() {
        let mut runner = TestRunner::new(ByName);
        assert_eq!(runner.state(), RunState::Idle);

        let report = runner.run(&sources(&["pass", "fail", "error", "missing"]), |_| {});

        assert_eq!((report.pass, report.fail, report.error), (1, 1, 2));
        assert_eq!(report.pass + report.fail + report.error, 4);
        assert_eq!(runner.state(), RunState::Completed { total: 4 });

        assert_eq!(
            report.entries[0].output,
            "====== pass.rhai ========================\nrunning\n====== Result: PASS\n"
        );
        let missing = &report.entries[3].output;
        assert!(missing.contains("no such script"));
        assert!(missing.ends_with("====== Result: ERROR\n"));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut runner = TestRunner::new(ByName);
        let mut progress = vec![0];
        runner.run(&sources(&["pass", "pass", "fail"]), |event| {
            if let RunEvent::ScriptFinished { done, total, .. } = event {
                assert_eq!(*total, 3);
                progress.push(*done);
            }
        });
        assert_eq!(progress, vec![0, 1, 2, 3]);
    }

    proptest! {
        #[test]
        fn test_counts_cover_every_script(
            stems in prop::collection::vec(
                prop::sample::select(vec!["pass", "fail", "error", "missing"]),
                0..40,
            )
        ) {
            let mut runner = TestRunner::new(ByName);
            let mut progress = vec![0];
            let report = runner.run(&sources(&stems), |event| {
                if let RunEvent::ScriptFinished { done, .. } = event {
                    progress.push(*done);
                }
            });

            prop_assert_eq!(report.pass + report.fail + report.error, stems.len());
            prop_assert_eq!(report.total(), stems.len());
            prop_assert!(progress.windows(2).all(|w| w[1] == w[0] + 1));
            prop_assert_eq!(progress.last().copied(), Some(stems.len()));

            let passed = stems.iter().filter(|s| **s == "pass").count();
            prop_assert_eq!(report.pass, passed);
            prop_assert_eq!(runner.state(), RunState::Completed { total: stems.len() });
        }
    }

    #[test]
    fn test_empty_batch_completes() {
        let mut runner = TestRunner::new(ByName);
        let report = runner.run(&[], |_| {});
        assert_eq!(report.total(), 0);
        assert!(report.all_passed());
        assert_eq!(runner.state(), RunState::Completed { total: 0 });
    }

    #[tokio::test]
    async fn test_background_run_streams_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = run_in_background(|| Ok(ByName), sources(&["pass", "fail"]), tx)
            .await
            .unwrap();
        assert_eq!(report.total(), 2);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(RunEvent::Started { total: 2 })));
        assert!(matches!(
            events.last(),
            Some(RunEvent::Completed { pass: 1, fail: 1, error: 0 })
        ));
    }

    #[tokio::test]
    async fn test_background_executor_setup_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = run_in_background(
            || -> Result<ByName> { Err(Error::Config("no device".to_string())) },
            sources(&["pass"]),
            tx,
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
