//! Test-server backend lifecycle
//!
//! Spawns the backend process, watches its stdout for the line advertising
//! the WebSocket endpoint, and connects a [`Connection`] to it.
//!
//! The process is supervised by a background task for its whole life: it
//! forwards the endpoint once, mirrors output when asked, and fires
//! [`ConnectionEvent::Close`](crate::ConnectionEvent::Close) on the launcher's
//! [`EventHub`] when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::{ClientHooks, Connection, DefaultHooks, EventHub};
use crate::driver::{NodeResolver, RuntimeResolver};
use crate::error::{Error, Result};
use crate::transport::WebSocketTransport;

const LISTENING_PREFIX: &str = "Listening on ";

/// Supplies environment overrides at spawn time; `None` deletes a variable.
pub type EnvProvider = Arc<dyn Fn() -> HashMap<String, Option<String>> + Send + Sync>;

/// Fully owned configuration for one backend launch.
#[derive(Clone, Default)]
pub struct LaunchOptions {
	/// Arguments passed to the runtime executable (script path first).
	pub args: Vec<String>,
	/// Working directory; the current directory when unset.
	pub cwd: Option<PathBuf>,
	/// Overrides applied after the provider's; `None` deletes the variable.
	pub env: BTreeMap<String, Option<String>>,
	pub env_provider: Option<EnvProvider>,
	/// Mirror the backend's stdout and stderr to tracing at info level.
	pub dump_io: bool,
}

impl fmt::Debug for LaunchOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LaunchOptions")
			.field("args", &self.args)
			.field("cwd", &self.cwd)
			.field("env", &self.env)
			.field("env_provider", &self.env_provider.is_some())
			.field("dump_io", &self.dump_io)
			.finish()
	}
}

impl LaunchOptions {
	pub fn new<I, S>(args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			args: args.into_iter().map(Into::into).collect(),
			..Self::default()
		}
	}

	pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
		self.cwd = Some(cwd.into());
		self
	}

	pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.env.insert(key.into(), Some(value.into()));
		self
	}

	pub fn unset(mut self, key: impl Into<String>) -> Self {
		self.env.insert(key.into(), None);
		self
	}

	pub fn env_provider<F>(mut self, provider: F) -> Self
	where
		F: Fn() -> HashMap<String, Option<String>> + Send + Sync + 'static,
	{
		self.env_provider = Some(Arc::new(provider));
		self
	}

	pub fn dump_io(mut self, dump_io: bool) -> Self {
		self.dump_io = dump_io;
		self
	}

	fn resolved_cwd(&self) -> Result<PathBuf> {
		match &self.cwd {
			Some(cwd) => Ok(cwd.clone()),
			None => Ok(std::env::current_dir()?),
		}
	}

	/// Builds the spawn command: inherited environment, then provider
	/// overrides, then explicit overrides.
	fn build_command(&self, program: &Path, cwd: &Path) -> Command {
		let mut cmd = Command::new(program);
		cmd.args(&self.args)
			.current_dir(cwd)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let provided = self
			.env_provider
			.as_ref()
			.map(|provider| provider())
			.unwrap_or_default();
		for (key, value) in provided.iter().chain(self.env.iter()) {
			match value {
				Some(value) => cmd.env(key, value),
				None => cmd.env_remove(key),
			};
		}
		cmd
	}
}

/// Observable launch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
	Idle,
	Spawning,
	AwaitingEndpoint,
	Connected,
	ExitedWithoutEndpoint,
}

/// Handle to the supervised backend process.
///
/// Dropping the handle kills the process.
pub struct ProcessHandle {
	pid: Option<u32>,
	kill_tx: Mutex<Option<oneshot::Sender<()>>>,
	exit_rx: watch::Receiver<Option<ExitStatus>>,
}

impl ProcessHandle {
	pub fn pid(&self) -> Option<u32> {
		self.pid
	}

	/// Asks the supervisor to kill the process. Idempotent.
	pub fn kill(&self) {
		if let Some(tx) = self.kill_tx.lock().take() {
			let _ = tx.send(());
		}
	}

	/// Exit status, once the process has exited.
	pub fn exit_status(&self) -> Option<ExitStatus> {
		*self.exit_rx.borrow()
	}

	/// Waits until the process has exited.
	pub async fn wait(&self) -> Option<ExitStatus> {
		let mut rx = self.exit_rx.clone();
		let _ = rx.wait_for(Option::is_some).await;
		let status = *rx.borrow();
		status
	}
}

impl fmt::Debug for ProcessHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProcessHandle")
			.field("pid", &self.pid)
			.field("exit_status", &self.exit_status())
			.finish()
	}
}

/// Connected backend: the process plus the client talking to it.
pub struct BackendClient {
	connection: Arc<Connection>,
	process: ProcessHandle,
	endpoint: String,
	run_task: JoinHandle<()>,
}

impl BackendClient {
	pub fn connection(&self) -> &Arc<Connection> {
		&self.connection
	}

	pub fn events(&self) -> &EventHub {
		self.connection.events()
	}

	pub fn process(&self) -> &ProcessHandle {
		&self.process
	}

	/// Endpoint the client connected to, after hook rewriting.
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Closes the connection, kills the process, and waits for both to finish.
	pub async fn shutdown(self) {
		self.connection.close();
		self.process.kill();
		self.process.wait().await;
		let _ = self.run_task.await;
	}
}

impl fmt::Debug for BackendClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BackendClient")
			.field("endpoint", &self.endpoint)
			.field("process", &self.process)
			.finish()
	}
}

/// Launches a backend and connects to it.
pub struct BackendLauncher {
	options: LaunchOptions,
	resolver: Arc<dyn RuntimeResolver>,
	hooks: Arc<dyn ClientHooks>,
	events: EventHub,
	state_tx: watch::Sender<LaunchState>,
}

impl BackendLauncher {
	pub fn new(options: LaunchOptions) -> Self {
		let (state_tx, _) = watch::channel(LaunchState::Idle);
		Self {
			options,
			resolver: Arc::new(NodeResolver::new()),
			hooks: Arc::new(DefaultHooks),
			events: EventHub::new(),
			state_tx,
		}
	}

	pub fn with_resolver(mut self, resolver: impl RuntimeResolver + 'static) -> Self {
		self.resolver = Arc::new(resolver);
		self
	}

	pub fn with_hooks(mut self, hooks: impl ClientHooks + 'static) -> Self {
		self.hooks = Arc::new(hooks);
		self
	}

	/// Hub receiving process errors, server events, and the close event.
	///
	/// Subscribe before [`start`](Self::start) to observe spawn failures.
	pub fn events(&self) -> &EventHub {
		&self.events
	}

	pub fn state(&self) -> LaunchState {
		*self.state_tx.borrow()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<LaunchState> {
		self.state_tx.subscribe()
	}

	pub fn options(&self) -> &LaunchOptions {
		&self.options
	}

	/// Spawns the backend and waits for its endpoint.
	///
	/// Returns `Ok(None)` when the process exits (or fails to spawn) before
	/// advertising an endpoint. Resolver and connect failures are errors.
	pub async fn start(&self) -> Result<Option<BackendClient>> {
		self.start_with_cancel(&CancellationToken::new()).await
	}

	/// Like [`start`](Self::start); a cancelled launch kills the process and
	/// returns `Ok(None)`.
	pub async fn start_with_cancel(
		&self,
		token: &CancellationToken,
	) -> Result<Option<BackendClient>> {
		let cwd = self.options.resolved_cwd()?;
		let program = self.resolver.find_runtime_executable(&cwd)?;

		self.set_state(LaunchState::Spawning);
		tracing::debug!(program = %program.display(), args = ?self.options.args, "Spawning test server");

		let mut child = match self.options.build_command(&program, &cwd).spawn() {
			Ok(child) => child,
			Err(e) => {
				tracing::error!(program = %program.display(), "Failed to spawn test server: {}", e);
				self.events.emit_error(Error::LaunchFailed(format!(
					"Failed to spawn {}: {}",
					program.display(),
					e
				)));
				self.events.emit_close();
				self.set_state(LaunchState::ExitedWithoutEndpoint);
				return Ok(None);
			}
		};

		let pid = child.id();
		let (kill_tx, kill_rx) = oneshot::channel();
		let (exit_tx, exit_rx) = watch::channel(None);
		let (endpoint_tx, endpoint_rx) = oneshot::channel();

		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(mirror_stream(stderr, "stderr", self.options.dump_io));
		}
		let stdout = child.stdout.take();

		tokio::spawn(supervise(Supervisor {
			child,
			stdout,
			kill_rx,
			exit_tx,
			endpoint_tx: Some(endpoint_tx),
			events: self.events.clone(),
			dump_io: self.options.dump_io,
		}));

		let process = ProcessHandle {
			pid,
			kill_tx: Mutex::new(Some(kill_tx)),
			exit_rx,
		};
		self.set_state(LaunchState::AwaitingEndpoint);

		let endpoint = tokio::select! {
			biased;
			_ = token.cancelled() => {
				tracing::debug!(?pid, "Launch cancelled; killing test server");
				process.kill();
				self.set_state(LaunchState::ExitedWithoutEndpoint);
				return Ok(None);
			}
			endpoint = endpoint_rx => endpoint.ok(),
		};

		let Some(endpoint) = endpoint else {
			tracing::debug!(?pid, "Test server exited without advertising an endpoint");
			self.set_state(LaunchState::ExitedWithoutEndpoint);
			return Ok(None);
		};

		let endpoint = self.hooks.rewrite_endpoint(&endpoint);
		let headers = self.hooks.rewrite_headers(Vec::new());
		tracing::debug!(%endpoint, "Connecting to test server");

		let (transport, message_rx) = WebSocketTransport::connect(&endpoint, &headers).await?;
		let connection = Arc::new(Connection::new(
			transport.into_transport_parts(message_rx),
			self.events.clone(),
		));
		let run_task = {
			let connection = Arc::clone(&connection);
			tokio::spawn(async move { connection.run().await })
		};

		self.hooks.initialize(&connection).await?;
		self.set_state(LaunchState::Connected);

		Ok(Some(BackendClient {
			connection,
			process,
			endpoint,
			run_task,
		}))
	}

	fn set_state(&self, state: LaunchState) {
		tracing::debug!(?state, "Launch state");
		self.state_tx.send_replace(state);
	}
}

/// Extracts the endpoint from a `Listening on <endpoint>` line.
pub fn parse_listening_line(line: &str) -> Option<&str> {
	let start = line.find(LISTENING_PREFIX)? + LISTENING_PREFIX.len();
	let endpoint = line[start..].trim();
	(!endpoint.is_empty()).then_some(endpoint)
}

struct Supervisor {
	child: Child,
	stdout: Option<ChildStdout>,
	kill_rx: oneshot::Receiver<()>,
	exit_tx: watch::Sender<Option<ExitStatus>>,
	endpoint_tx: Option<oneshot::Sender<String>>,
	events: EventHub,
	dump_io: bool,
}

async fn supervise(mut sup: Supervisor) {
	let mut lines = sup.stdout.take().map(|stdout| BufReader::new(stdout).lines());
	let mut kill_armed = true;

	let status = loop {
		tokio::select! {
			biased;
			_ = &mut sup.kill_rx, if kill_armed => {
				kill_armed = false;
				if let Err(e) = sup.child.start_kill() {
					tracing::debug!("Failed to kill test server: {}", e);
				}
			}
			line = next_line(&mut lines) => match line {
				Some(line) => {
					mirror_line("stdout", &line, sup.dump_io);
					if let Some(endpoint) = parse_listening_line(&line) {
						if let Some(tx) = sup.endpoint_tx.take() {
							let _ = tx.send(endpoint.to_string());
						}
					}
				}
				None => lines = None,
			},
			status = sup.child.wait() => break status,
		}
	};

	match status {
		Ok(status) => {
			tracing::debug!(%status, "Test server exited");
			sup.exit_tx.send_replace(Some(status));
		}
		Err(e) => {
			tracing::error!("Failed to wait for test server: {}", e);
			sup.events.emit_error(Error::Io(e));
		}
	}

	// Close must be observable before the launcher learns there is no endpoint.
	sup.events.emit_close();
	drop(sup.endpoint_tx.take());
}

/// Next stdout line; pends forever once stdout is gone.
async fn next_line<R: AsyncRead + Unpin>(
	lines: &mut Option<tokio::io::Lines<BufReader<R>>>,
) -> Option<String> {
	let Some(reader) = lines.as_mut() else {
		return std::future::pending().await;
	};
	match reader.next_line().await {
		Ok(line) => line,
		Err(e) => {
			tracing::debug!("Failed to read test server output: {}", e);
			None
		}
	}
}

async fn mirror_stream<R: AsyncRead + Unpin>(stream: R, name: &'static str, dump_io: bool) {
	let mut lines = BufReader::new(stream).lines();
	while let Ok(Some(line)) = lines.next_line().await {
		mirror_line(name, &line, dump_io);
	}
}

fn mirror_line(stream: &'static str, line: &str, dump_io: bool) {
	if dump_io {
		tracing::info!(target: "pwt::server", stream, "{}", line);
	} else {
		tracing::trace!(target: "pwt::server", stream, "{}", line);
	}
}
