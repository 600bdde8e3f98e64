//! External font-location process
//!
//! Fonts are found (and generated on demand) by a kpathsea-style program
//! that prints one path per line on stdout and reports font generation
//! progress on stderr. One request runs at a time:
//!
//! ```text
//! Idle → Requesting → AwaitingOutput → Completed
//!                  ↘                 ↘ Failed
//! ```
//!
//! The child's pipes are drained by reader threads into a flume channel, so
//! the caller can enforce a timeout and watch a cancel flag between lines.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use super::error::LocateError;
use crate::notification::Notifier;

/// How often the cancel flag is checked while waiting for output
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Marker kpathsea puts in front of each font generation command line
const GENERATION_MARKER: &str = "kpathsea:";

/// Output of a running locator process
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    StdoutClosed,
    StderrClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Success,
    Failure(i32),
    /// Killed by a signal or crashed
    Abnormal,
}

pub trait RunningProcess: Send {
    /// Line events, ending with both `*Closed` events
    fn events(&self) -> &Receiver<ProcessEvent>;

    fn wait(&mut self) -> std::io::Result<ExitKind>;

    fn kill(&mut self);
}

/// Starts locator processes; replaced by a scripted launcher in tests
pub trait ProcessLauncher: Send {
    fn launch(&mut self, program: &str, args: &[String]) -> std::io::Result<Box<dyn RunningProcess>>;
}

/// Launches real child processes
#[derive(Debug, Default)]
pub struct SystemLauncher;

struct SystemProcess {
    child: Child,
    events: Receiver<ProcessEvent>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&mut self, program: &str, args: &[String]) -> std::io::Result<Box<dyn RunningProcess>> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = flume::unbounded();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone(), ProcessEvent::Stdout, ProcessEvent::StdoutClosed));
        } else {
            let _ = tx.send(ProcessEvent::StdoutClosed);
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx, ProcessEvent::Stderr, ProcessEvent::StderrClosed));
        } else {
            let _ = tx.send(ProcessEvent::StderrClosed);
        }

        Ok(Box::new(SystemProcess {
            child,
            events: rx,
            readers,
        }))
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: R,
    tx: Sender<ProcessEvent>,
    line: fn(String) -> ProcessEvent,
    closed: ProcessEvent,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for text in BufReader::new(pipe).lines() {
            match text {
                Ok(text) => {
                    if tx.send(line(text)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(closed);
    })
}

impl RunningProcess for SystemProcess {
    fn events(&self) -> &Receiver<ProcessEvent> {
        &self.events
    }

    fn wait(&mut self) -> std::io::Result<ExitKind> {
        let status = self.child.wait()?;
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        Ok(match status.code() {
            Some(0) => ExitKind::Success,
            Some(code) => ExitKind::Failure(code),
            None => ExitKind::Abnormal,
        })
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("Could not kill locator process: {e}");
        }
        let _ = self.child.wait();
    }
}

/// The three location passes, in the order they are tried
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocatePass {
    /// Existing PK, virtual and outline files only
    Existing,
    /// Same search, generating missing PK files
    Generate,
    /// Metrics-only fallback
    MetricsOnly,
}

impl LocatePass {
    #[must_use]
    pub fn generates(self) -> bool {
        self == LocatePass::Generate
    }
}

/// One font the locator is asked for
#[derive(Clone, Debug, PartialEq)]
pub struct LocateTarget {
    pub name: String,
    pub enlargement: f64,
    pub outline_alias: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LocatorState {
    Idle,
    Requesting(LocatePass),
    AwaitingOutput(LocatePass),
    Completed(LocatePass),
    Failed(LocatePass, String),
}

#[derive(Clone, Debug)]
pub struct LocatorConfig {
    pub program: String,
    pub generation_dpi: u32,
    pub metafont_mode: String,
    pub timeout: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            program: "kpsewhich".to_string(),
            generation_dpi: 1200,
            metafont_mode: "lexmarks".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Result of one finished locator run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocateOutcome {
    /// Non-empty stdout lines in output order
    pub files: Vec<String>,
    pub exit: ExitKind,
}

/// Shared flag that aborts a running location request
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct FontLocator {
    config: LocatorConfig,
    launcher: Box<dyn ProcessLauncher>,
    state: LocatorState,
    /// Command lines and process output of every run
    log: String,
    cancel: CancelToken,
}

impl FontLocator {
    #[must_use]
    pub fn new(config: LocatorConfig, launcher: Box<dyn ProcessLauncher>) -> Self {
        Self {
            config,
            launcher,
            state: LocatorState::Idle,
            log: String::new(),
            cancel: CancelToken::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &LocatorState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    #[must_use]
    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn build_args(&self, pass: LocatePass, targets: &[LocateTarget]) -> Vec<String> {
        let mut args = vec![
            "--dpi".to_string(),
            self.config.generation_dpi.to_string(),
            "--mode".to_string(),
            self.config.metafont_mode.clone(),
            if pass.generates() { "--mktex" } else { "--no-mktex" }.to_string(),
            "pk".to_string(),
        ];
        for target in targets {
            if pass == LocatePass::MetricsOnly {
                args.push(format!("{}.tfm", target.name));
                continue;
            }
            if let Some(alias) = &target.outline_alias {
                args.push(alias.clone());
            }
            args.push(format!("{}.vf", target.name));
            let dpi = (f64::from(self.config.generation_dpi) * target.enlargement).round() as i64;
            args.push(format!("{}.{dpi}pk", target.name));
        }
        args
    }

    /// Run one pass and collect the candidate paths it prints
    pub fn run(
        &mut self,
        pass: LocatePass,
        targets: &[LocateTarget],
        notifier: &mut dyn Notifier,
    ) -> Result<LocateOutcome, LocateError> {
        if matches!(
            self.state,
            LocatorState::Requesting(_) | LocatorState::AwaitingOutput(_)
        ) {
            return Err(LocateError::Busy);
        }
        self.state = LocatorState::Requesting(pass);

        let args = self.build_args(pass, targets);
        let program = self.config.program.clone();
        self.log.push_str(&format!("{program} {}\n", args.join(" ")));
        debug!("Locator pass {pass:?}: {program} {}", args.join(" "));
        notifier.status(if pass.generates() {
            "Generating fonts..."
        } else {
            "Locating fonts..."
        });

        let mut process = match self.launcher.launch(&program, &args) {
            Ok(process) => process,
            Err(source) => {
                error!("Could not launch {program}: {source}");
                self.state = LocatorState::Failed(pass, source.to_string());
                return Err(LocateError::Launch { program, source });
            }
        };
        self.state = LocatorState::AwaitingOutput(pass);

        let deadline = Instant::now() + self.config.timeout;
        let mut files = Vec::new();
        let (mut stdout_open, mut stderr_open) = (true, true);
        while stdout_open || stderr_open {
            if self.cancel.is_cancelled() {
                process.kill();
                self.state = LocatorState::Failed(pass, "cancelled".into());
                info!("Font location cancelled");
                return Err(LocateError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                process.kill();
                let secs = self.config.timeout.as_secs();
                self.state = LocatorState::Failed(pass, format!("timed out after {secs} s"));
                error!("{program} timed out after {secs} s");
                return Err(LocateError::Timeout(secs));
            }
            match process.events().recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(ProcessEvent::Stdout(line)) => {
                    self.log.push_str(&line);
                    self.log.push('\n');
                    let path = line.trim();
                    if !path.is_empty() {
                        files.push(path.to_string());
                    }
                }
                Ok(ProcessEvent::Stderr(line)) => {
                    self.log.push_str(&line);
                    self.log.push('\n');
                    if let Some((font, dpi)) = generation_progress(&line) {
                        info!("Generating {font} at {dpi} dpi");
                        notifier.status(&format!("Currently generating {font} at {dpi} dpi"));
                    }
                }
                Ok(ProcessEvent::StdoutClosed) => stdout_open = false,
                Ok(ProcessEvent::StderrClosed) => stderr_open = false,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let exit = process.wait().unwrap_or_else(|e| {
            error!("Waiting for {program} failed: {e}");
            ExitKind::Abnormal
        });
        self.state = LocatorState::Completed(pass);
        Ok(LocateOutcome { files, exit })
    }
}

/// Font name and resolution from a kpathsea generation line such as
/// `kpathsea: Running mktexpk --mfmode ljfour --bdpi 600 --mag 1+0/600 --dpi 600 cmr10`
fn generation_progress(line: &str) -> Option<(&str, &str)> {
    let start = line.find(GENERATION_MARKER)?;
    let mut words = line[start + GENERATION_MARKER.len()..].split_whitespace().rev();
    let font = words.next()?;
    let dpi = words.next()?;
    Some((font, dpi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationManager;
    use crate::test_utils::ScriptedLauncher;

    fn target(name: &str, enlargement: f64, alias: Option<&str>) -> LocateTarget {
        LocateTarget {
            name: name.into(),
            enlargement,
            outline_alias: alias.map(str::to_string),
        }
    }

    #[test]
    fn arguments_per_pass() {
        let locator = FontLocator::new(LocatorConfig::default(), Box::new(ScriptedLauncher::new()));
        let targets = [target("cmr10", 1.2, Some("cmr10.otf"))];
        assert_eq!(
            locator.build_args(LocatePass::Existing, &targets),
            [
                "--dpi", "1200", "--mode", "lexmarks", "--no-mktex", "pk", "cmr10.otf",
                "cmr10.vf", "cmr10.1440pk"
            ]
        );
        let generate = locator.build_args(LocatePass::Generate, &targets);
        assert_eq!(generate[4], "--mktex");
        assert_eq!(
            locator.build_args(LocatePass::MetricsOnly, &targets)[6..],
            ["cmr10.tfm"]
        );
    }

    #[test]
    fn collects_stdout_and_reports_progress() {
        let launcher = ScriptedLauncher::new().respond(
            &["/fonts/cmr10.1200pk", ""],
            &["kpathsea: Running mktexpk --mfmode lexmarks --dpi 1200 cmr10"],
            ExitKind::Success,
        );
        let mut locator = FontLocator::new(LocatorConfig::default(), Box::new(launcher));
        let mut notes = NotificationManager::new();
        let outcome = locator
            .run(LocatePass::Generate, &[target("cmr10", 1.0, None)], &mut notes)
            .unwrap();
        assert_eq!(outcome.files, ["/fonts/cmr10.1200pk"]);
        assert_eq!(outcome.exit, ExitKind::Success);
        assert_eq!(locator.state(), &LocatorState::Completed(LocatePass::Generate));
        assert!(
            notes
                .all()
                .iter()
                .any(|n| n.message == "Currently generating cmr10 at 1200 dpi")
        );
        assert!(locator.log().contains("kpsewhich --dpi 1200"));
    }

    #[test]
    fn launch_failure_is_reported() {
        let mut locator = FontLocator::new(LocatorConfig::default(), Box::new(ScriptedLauncher::new()));
        let mut notes = NotificationManager::new();
        let err = locator
            .run(LocatePass::Existing, &[target("cmr10", 1.0, None)], &mut notes)
            .unwrap_err();
        assert!(matches!(err, LocateError::Launch { .. }));
        assert!(matches!(locator.state(), LocatorState::Failed(..)));
    }

    #[test]
    fn hung_process_times_out() {
        let launcher = ScriptedLauncher::new().hang();
        let config = LocatorConfig {
            timeout: Duration::from_millis(50),
            ..LocatorConfig::default()
        };
        let mut locator = FontLocator::new(config, Box::new(launcher));
        let mut notes = NotificationManager::new();
        let err = locator
            .run(LocatePass::Existing, &[target("cmr10", 1.0, None)], &mut notes)
            .unwrap_err();
        assert!(matches!(err, LocateError::Timeout(0)));
    }

    #[test]
    fn cancellation_kills_the_process() {
        let launcher = ScriptedLauncher::new().hang();
        let killed = launcher.kill_flag();
        let mut locator = FontLocator::new(LocatorConfig::default(), Box::new(launcher));
        locator.cancel_token().cancel();
        let mut notes = NotificationManager::new();
        let err = locator
            .run(LocatePass::Existing, &[target("cmr10", 1.0, None)], &mut notes)
            .unwrap_err();
        assert!(matches!(err, LocateError::Cancelled));
        assert!(killed.load(Ordering::SeqCst));
    }

    #[test]
    fn progress_line_parsing() {
        assert_eq!(
            generation_progress("kpathsea: Running mktexpk --dpi 600 cmbx12"),
            Some(("cmbx12", "600"))
        );
        assert_eq!(generation_progress("mktexpk: done"), None);
    }
}
