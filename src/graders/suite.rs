// src/graders/suite.rs

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::{ModuleError, ModuleResult};
use crate::protocol::{GraderModule, Rate, TestCase, Verdict, mean_of};

/// How long a reference solver may take per prompt.
const SOLVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize, Debug, Clone)]
struct SuiteDefinition {
    #[serde(default)]
    name: Option<String>,
    cases: Vec<CaseDefinition>,
    #[serde(default)]
    solve: Option<SolveDefinition>,
    #[serde(default)]
    check: CheckDefinition,
    #[serde(default)]
    evaluate: EvaluateDefinition,
    #[serde(default)]
    post_process: PostProcess,
}

#[derive(Deserialize, Debug, Clone)]
struct CaseDefinition {
    #[serde(default)]
    input: String,
    #[serde(default)]
    clue: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
struct SolveDefinition {
    #[serde(default)]
    answer: Option<String>,
    /// Shell command run from the grader's directory, prompt on stdin
    #[serde(default)]
    command: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
enum CheckMethod {
    #[default]
    Exact,
    Tokens,
    Numeric,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
struct CheckDefinition {
    method: CheckMethod,
    tolerance: f64,
    fail_message: Option<String>,
    abort_on_mismatch: bool,
}

impl Default for CheckDefinition {
    fn default() -> Self {
        Self {
            method: CheckMethod::Exact,
            tolerance: 1e-6,
            fail_message: None,
            abort_on_mismatch: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
enum EvaluateMethod {
    #[default]
    Mean,
    All,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
struct EvaluateDefinition {
    method: EvaluateMethod,
    pass_score: f64,
    message: Option<String>,
}

impl Default for EvaluateDefinition {
    fn default() -> Self {
        Self {
            method: EvaluateMethod::Mean,
            pass_score: 1.0,
            message: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
enum PostProcess {
    #[default]
    Trim,
    Raw,
    LastLine,
}

/// A grader described entirely by a TOML file: fixed cases, a reference
/// answer or solver command, and a choice of comparison and aggregation.
#[derive(Debug, Clone)]
pub struct SuiteGrader {
    name: String,
    definition: SuiteDefinition,
    workdir: PathBuf,
}

impl SuiteGrader {
    pub fn from_toml(reference: &str, text: &str, workdir: PathBuf) -> ModuleResult<Self> {
        let definition: SuiteDefinition =
            toml::from_str(text).map_err(|e| ModuleError::Definition(e.to_string()))?;

        if let Some(solve) = &definition.solve {
            if solve.answer.is_some() == solve.command.is_some() {
                return Err(ModuleError::Definition(
                    "[solve] needs exactly one of `answer` or `command`".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&definition.evaluate.pass_score) {
            return Err(ModuleError::Definition(format!(
                "pass_score {} is outside [0, 1]",
                definition.evaluate.pass_score
            )));
        }

        let name = definition
            .name
            .clone()
            .unwrap_or_else(|| reference.to_string());
        Ok(Self {
            name,
            definition,
            workdir,
        })
    }

    fn matches(&self, output: &str, expected: &str) -> ModuleResult<bool> {
        let check = &self.definition.check;
        match check.method {
            CheckMethod::Exact => Ok(output == expected),
            CheckMethod::Tokens => Ok(output.split_whitespace().eq(expected.split_whitespace())),
            CheckMethod::Numeric => {
                let want: f64 = expected.trim().parse().map_err(|_| {
                    ModuleError::failed("check", format!("expected value '{}' is not a number", expected))
                })?;
                Ok(output
                    .trim()
                    .parse::<f64>()
                    .map(|got| (got - want).abs() <= check.tolerance)
                    .unwrap_or(false))
            }
        }
    }

    async fn run_solver(&self, command: &str, prompt: &str) -> ModuleResult<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ModuleError::failed("solve", e.to_string()))?;

        if let Some(mut pipe) = child.stdin.take() {
            let data = prompt.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&data).await;
            });
        }

        let output = tokio::time::timeout(SOLVE_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ModuleError::failed("solve", "reference solver timed out"))?
            .map_err(|e| ModuleError::failed("solve", e.to_string()))?;

        if !output.status.success() {
            return Err(ModuleError::failed(
                "solve",
                format!(
                    "reference solver exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        self.post_process(&output.stdout)
    }
}

#[async_trait]
impl GraderModule for SuiteGrader {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self) -> ModuleResult<Vec<TestCase>> {
        Ok(self
            .definition
            .cases
            .iter()
            .map(|case| match &case.clue {
                Some(clue) => TestCase::Clued {
                    prompt: case.input.clone(),
                    clue: clue.clone(),
                },
                None => TestCase::Bare(case.input.clone()),
            })
            .collect())
    }

    async fn solve(&self, prompt: &str) -> ModuleResult<String> {
        let Some(solve) = &self.definition.solve else {
            return Err(ModuleError::Missing("solve"));
        };
        match (&solve.answer, &solve.command) {
            (Some(answer), _) => Ok(answer.clone()),
            (None, Some(command)) => self.run_solver(command, prompt).await,
            (None, None) => Err(ModuleError::Missing("solve")),
        }
    }

    fn check(&self, output: &str, expected: &str) -> ModuleResult<Rate> {
        if self.matches(output, expected)? {
            return Ok(Rate::Scalar(1.0));
        }
        let check = &self.definition.check;
        Ok(match (&check.fail_message, check.abort_on_mismatch) {
            (msg, true) => Rate::Noted(None, msg.clone().unwrap_or_else(|| "Wrong answer".to_string())),
            (Some(msg), false) => Rate::Noted(Some(0.0), msg.clone()),
            (None, false) => Rate::Scalar(0.0),
        })
    }

    fn evaluate(&self, rates: &[Rate]) -> ModuleResult<Verdict> {
        let evaluate = &self.definition.evaluate;
        let score = match evaluate.method {
            EvaluateMethod::Mean => mean_of(rates)?,
            EvaluateMethod::All => {
                let passed = !rates.is_empty()
                    && rates.iter().all(|r| r.value().is_some_and(|v| v > 0.0));
                if passed { evaluate.pass_score } else { 0.0 }
            }
        };
        Ok(match &evaluate.message {
            Some(msg) => Verdict::Scored(score, msg.clone()),
            None => Verdict::Score(score),
        })
    }

    fn post_process(&self, stdout: &[u8]) -> ModuleResult<String> {
        let text = String::from_utf8_lossy(stdout);
        Ok(match self.definition.post_process {
            PostProcess::Raw => text.into_owned(),
            PostProcess::Trim => text.trim().to_string(),
            PostProcess::LastLine => text
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("")
                .to_string(),
        })
    }
}
