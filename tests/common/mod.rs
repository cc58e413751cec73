//! Shared test fixtures: generator stubs.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use goews_forge::build::{BuildError, BuildResult, CommandBuilder, GeneratorCommand, ProcessRunner};

/// In-process generator: records invocations and peak parallelism.
pub struct StubRunner {
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
    pub seen: Mutex<Vec<Vec<String>>>,
}

impl StubRunner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessRunner for StubRunner {
    async fn run(&self, command: &GeneratorCommand) -> BuildResult<Vec<u8>> {
        let args = command.args_lossy();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(args.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if args.iter().any(|a| a == "fail=true") {
            return Err(BuildError::Generation {
                exit_code: Some(1),
                diagnostics: "ERROR: forced failure".into(),
            });
        }
        Ok(format!("solid stub\n{}\n", args.join(" ")).into_bytes())
    }
}

/// Shell-script generator living in a temp dir. Runs as `sh <script> ...`
/// so nothing freshly written is ever exec'd directly.
pub struct ScriptGenerator {
    pub dir: tempfile::TempDir,
    pub script: PathBuf,
    pub runs_file: PathBuf,
}

impl ScriptGenerator {
    /// Every run appends a line to `runs`, sleeps `sleep_secs`, fails if any
    /// argument is `fail=true`, and otherwise prints its arguments.
    pub fn new(sleep_secs: f64) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let runs_file = dir.path().join("runs");
        let done_file = dir.path().join("done");
        let script = dir.path().join("generator.sh");
        let body = format!(
            r#"echo run >> "{runs}"
sleep {sleep}
for a in "$@"; do
  if [ "$a" = "fail=true" ]; then
    echo "ERROR: forced failure" >&2
    exit 1
  fi
done
echo done >> "{done}"
printf 'solid stub\n'
printf '%s\n' "$@"
"#,
            runs = runs_file.display(),
            done = done_file.display(),
            sleep = sleep_secs,
        );
        std::fs::write(&script, body)?;
        Ok(Self { dir, script, runs_file })
    }

    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder::new("sh", "GOEWS.scad").with_launcher_args([self.script.as_os_str()])
    }

    pub fn runs(&self) -> usize {
        count_lines(&self.runs_file)
    }

    pub fn completed(&self) -> usize {
        count_lines(&self.dir.path().join("done"))
    }
}

fn count_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}
