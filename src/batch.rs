// src/batch.rs
use crate::config::BatchProfile;
use crate::errors::{GradeError, ModuleError, Result};
use crate::models::Reply;
use crate::protocol::{GraderModule, TestCase, Verdict};
use crate::sandbox::{Sandbox, SandboxFile};
use std::time::Instant;

/// How a batch run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Stopped before the suite finished; the reply is final.
    ShortCircuit(Reply),
    /// Every case ran and `evaluate` produced a verdict. `note` is the last
    /// message attached to a rate, if any.
    Evaluated { verdict: Verdict, note: Option<String> },
}

/// Expands a one-case suite to the configured sample size.
fn fill_sample(mut cases: Vec<TestCase>, sample_size: usize) -> Vec<TestCase> {
    if cases.len() == 1 && sample_size > 1 {
        let case = cases.remove(0);
        cases = vec![case; sample_size];
    }
    cases
}

/// Run a submission through the module's suite inside a single sandbox
pub async fn run_batch<S: Sandbox>(
    module: &dyn GraderModule,
    sandbox: &S,
    profile: &BatchProfile,
    submission: &str,
    sample_size: usize,
) -> Result<BatchOutcome> {
    let grader = module.name().to_string();
    let defect = |e: ModuleError| GradeError::module(&grader, e);
    let started = Instant::now();

    let cases = module.generate().map_err(defect)?;
    if cases.is_empty() {
        return Err(defect(ModuleError::failed("generate", "suite is empty")));
    }
    let cases = fill_sample(cases, sample_size);
    log::info!("Grading with '{}': {} cases", grader, cases.len());

    let files = vec![SandboxFile::new(&profile.file_name, submission)];
    let handle = sandbox
        .create(&profile.profile, &profile.command, files, &profile.limits)
        .await?;

    let mut rates = Vec::with_capacity(cases.len());
    let mut note = None;

    for (index, case) in cases.iter().enumerate() {
        let output = sandbox.run(&handle, case.prompt().as_bytes()).await?;

        if let Some(fault) = output.fault() {
            log::info!(
                "Case {} of '{}' failed: {} ({})",
                index + 1,
                grader,
                fault.message(),
                output.stderr_tail(300)
            );
            return Ok(BatchOutcome::ShortCircuit(Reply::zero(fault.message())));
        }

        let answer = module.post_process(&output.stdout).map_err(defect)?;
        let expected = match case {
            TestCase::Clued { clue, .. } => clue.clone(),
            TestCase::Bare(prompt) => module.solve(prompt).await.map_err(defect)?,
        };

        let rate = module.check(&answer, &expected).map_err(defect)?;
        if let Some(msg) = rate.message() {
            note = Some(msg.to_string());
        }
        if rate.value().is_none() {
            log::info!("Case {} of '{}' aborted the run", index + 1, grader);
            return Ok(BatchOutcome::ShortCircuit(Reply::zero(
                note.unwrap_or_default(),
            )));
        }
        rates.push(rate);
    }
    drop(handle);

    let verdict = module.evaluate(&rates).map_err(defect)?;
    log::info!(
        "'{}' evaluated to {} in {}ms",
        grader,
        verdict.score(),
        started.elapsed().as_millis()
    );
    Ok(BatchOutcome::Evaluated { verdict, note })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::ModuleResult;
    use crate::protocol::Rate;
    use crate::sandbox::{Limits, RunOutput};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned outputs and records what it was asked to do.
    #[derive(Default)]
    pub(crate) struct ScriptedSandbox {
        pub outputs: Vec<RunOutput>,
        pub creates: AtomicUsize,
        pub stdins: Mutex<Vec<String>>,
    }

    impl ScriptedSandbox {
        pub fn new(outputs: Vec<RunOutput>) -> Self {
            Self {
                outputs,
                ..Default::default()
            }
        }

        pub fn runs(&self) -> usize {
            self.stdins.lock().unwrap().len()
        }
    }

    pub(crate) fn ok(stdout: &str) -> RunOutput {
        RunOutput {
            stdout: stdout.as_bytes().to_vec(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        type Handle = ();

        async fn create(&self, _: &str, _: &str, _: Vec<SandboxFile>, _: &Limits) -> Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self, _: &(), stdin: &[u8]) -> Result<RunOutput> {
            let mut stdins = self.stdins.lock().unwrap();
            let output = self.outputs[stdins.len() % self.outputs.len()].clone();
            stdins.push(String::from_utf8_lossy(stdin).into_owned());
            Ok(output)
        }
    }

    /// Bare prompts "0".."n-1" whose answer is the prompt doubled.
    struct Doubler {
        cases: usize,
        abort_on: Option<String>,
    }

    #[async_trait]
    impl GraderModule for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn generate(&self) -> ModuleResult<Vec<TestCase>> {
            Ok((0..self.cases).map(|i| TestCase::Bare(i.to_string())).collect())
        }

        async fn solve(&self, prompt: &str) -> ModuleResult<String> {
            let n: u32 = prompt.parse().map_err(|_| ModuleError::failed("solve", "bad prompt"))?;
            Ok((n * 2).to_string())
        }

        fn check(&self, output: &str, expected: &str) -> ModuleResult<Rate> {
            if self.abort_on.as_deref() == Some(output) {
                return Ok(Rate::Noted(None, "Cheating detected".to_string()));
            }
            if output == expected {
                Ok(Rate::Scalar(1.0))
            } else {
                Ok(Rate::Noted(Some(0.0), format!("expected {}", expected)))
            }
        }
    }

    pub(crate) fn profile() -> BatchProfile {
        BatchProfile {
            profile: "python".to_string(),
            command: "python3 main.py".to_string(),
            file_name: "main.py".to_string(),
            limits: Limits::default(),
        }
    }

    fn doubled(n: usize) -> Vec<RunOutput> {
        (0..n).map(|i| ok(&format!("{}\n", i * 2))).collect()
    }

    #[tokio::test]
    async fn test_runtime_error_short_circuits() {
        let mut outputs = doubled(10);
        outputs[3] = RunOutput {
            exit_code: Some(1),
            ..Default::default()
        };
        let sandbox = ScriptedSandbox::new(outputs);
        let module = Doubler { cases: 10, abort_on: None };

        let outcome = run_batch(&module, &sandbox, &profile(), "print()", 10).await.unwrap();

        assert_eq!(outcome, BatchOutcome::ShortCircuit(Reply::zero("Runtime error")));
        assert_eq!(sandbox.runs(), 4);
        assert_eq!(sandbox.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_and_resource_faults() {
        let slow = ScriptedSandbox::new(vec![RunOutput {
            timed_out: true,
            ..Default::default()
        }]);
        let module = Doubler { cases: 3, abort_on: None };
        let outcome = run_batch(&module, &slow, &profile(), "", 3).await.unwrap();
        assert_eq!(outcome, BatchOutcome::ShortCircuit(Reply::zero("Timeout")));

        let greedy = ScriptedSandbox::new(vec![RunOutput {
            oom_killed: true,
            ..Default::default()
        }]);
        let outcome = run_batch(&module, &greedy, &profile(), "", 3).await.unwrap();
        assert_eq!(outcome, BatchOutcome::ShortCircuit(Reply::zero("Resource error")));
    }

    #[tokio::test]
    async fn test_one_sandbox_many_cases_in_order() {
        let sandbox = ScriptedSandbox::new(doubled(5));
        let module = Doubler { cases: 5, abort_on: None };

        let outcome = run_batch(&module, &sandbox, &profile(), "", 5).await.unwrap();

        assert_eq!(
            outcome,
            BatchOutcome::Evaluated {
                verdict: Verdict::Score(1.0),
                note: None
            }
        );
        assert_eq!(sandbox.creates.load(Ordering::SeqCst), 1);
        assert_eq!(*sandbox.stdins.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_single_case_fills_sample() {
        let sandbox = ScriptedSandbox::new(vec![ok("0")]);
        let module = Doubler { cases: 1, abort_on: None };

        run_batch(&module, &sandbox, &profile(), "", 7).await.unwrap();

        assert_eq!(sandbox.runs(), 7);
    }

    #[tokio::test]
    async fn test_noted_rate_sets_message_and_null_aborts() {
        let sandbox = ScriptedSandbox::new(vec![ok("0"), ok("5"), ok("4")]);
        let module = Doubler { cases: 3, abort_on: None };
        let outcome = run_batch(&module, &sandbox, &profile(), "", 3).await.unwrap();
        match outcome {
            BatchOutcome::Evaluated { verdict, note } => {
                assert!((verdict.score() - 2.0 / 3.0).abs() < 1e-9);
                assert_eq!(note.as_deref(), Some("expected 2"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let sandbox = ScriptedSandbox::new(vec![ok("0"), ok("rm -rf"), ok("4")]);
        let module = Doubler {
            cases: 3,
            abort_on: Some("rm -rf".to_string()),
        };
        let outcome = run_batch(&module, &sandbox, &profile(), "", 3).await.unwrap();
        assert_eq!(outcome, BatchOutcome::ShortCircuit(Reply::zero("Cheating detected")));
        assert_eq!(sandbox.runs(), 2);
    }

    #[tokio::test]
    async fn test_empty_suite_is_a_module_defect() {
        let sandbox = ScriptedSandbox::new(vec![ok("")]);
        let module = Doubler { cases: 0, abort_on: None };
        let err = run_batch(&module, &sandbox, &profile(), "", 3).await.unwrap_err();
        assert!(matches!(err, GradeError::ModuleDefect { .. }));
        assert_eq!(sandbox.creates.load(Ordering::SeqCst), 0);
    }
}
