//! Runtime executable discovery
//!
//! The test server is a script run by a JS runtime (normally `node`). The
//! launcher asks a [`RuntimeResolver`] for the executable; [`NodeResolver`]
//! is the default.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::warn;

use crate::error::{Error, Result};

/// Environment variable that pins the runtime executable.
pub const NODE_EXE_ENV: &str = "PLAYWRIGHT_NODE_EXE";

/// Finds the executable that runs the test server.
pub trait RuntimeResolver: Send + Sync {
	fn find_runtime_executable(&self, cwd: &Path) -> Result<PathBuf>;
}

impl<F> RuntimeResolver for F
where
	F: Fn(&Path) -> Result<PathBuf> + Send + Sync,
{
	fn find_runtime_executable(&self, cwd: &Path) -> Result<PathBuf> {
		self(cwd)
	}
}

/// Resolves `node`.
///
/// Checks in order:
/// 1. `PLAYWRIGHT_NODE_EXE` environment variable
/// 2. `node` on `PATH`, relative entries resolved against the working directory
/// 3. Common install locations
///
/// A candidate that does not answer `--version` is skipped in favor of the next one.
#[derive(Debug, Clone, Default)]
pub struct NodeResolver {
	/// Replaces the `PLAYWRIGHT_NODE_EXE` lookup when set.
	pub explicit: Option<PathBuf>,
}

impl NodeResolver {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_executable(path: impl Into<PathBuf>) -> Self {
		Self {
			explicit: Some(path.into()),
		}
	}
}

impl RuntimeResolver for NodeResolver {
	fn find_runtime_executable(&self, cwd: &Path) -> Result<PathBuf> {
		let pinned = self
			.explicit
			.clone()
			.or_else(|| std::env::var_os(NODE_EXE_ENV).map(PathBuf::from));

		if let Some(node) = pinned {
			if node.exists() {
				if let Some(path) =
					resolve_candidate_with_fallback(NODE_EXE_ENV, node, || find_node_executable(cwd))
				{
					return Ok(path);
				}
			} else {
				warn!(
					target = "pwt",
					node = %node.display(),
					"Pinned runtime executable does not exist; searching PATH"
				);
			}
		}

		let node = find_node_executable(cwd)?;
		if node_is_usable(&node) {
			return Ok(node);
		}
		Err(Error::RuntimeNotFound(format!(
			"{} does not run. Install Node.js or set {}.",
			node.display(),
			NODE_EXE_ENV
		)))
	}
}

fn resolve_candidate_with_fallback<F>(label: &str, node: PathBuf, find_node: F) -> Option<PathBuf>
where
	F: Fn() -> Result<PathBuf>,
{
	let usable = node_is_usable(&node);
	tracing::debug!(source = label, node = %node.display(), usable, "Runtime candidate");
	if usable {
		return Some(node);
	}

	warn!(
		target = "pwt",
		source = label,
		node = %node.display(),
		"Runtime candidate is not runnable; trying fallback node"
	);

	let fallback_node = find_node().ok()?;
	if fallback_node == node {
		return None;
	}

	let fallback_usable = node_is_usable(&fallback_node);
	tracing::debug!(
		source = label,
		node = %fallback_node.display(),
		usable = fallback_usable,
		"Fallback runtime candidate"
	);
	fallback_usable.then_some(fallback_node)
}

fn node_is_usable(node: &Path) -> bool {
	Command::new(node)
		.arg("--version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.map(|status| status.success())
		.unwrap_or(false)
}

/// Find the node executable in PATH or common locations
fn find_node_executable(cwd: &Path) -> Result<PathBuf> {
	if let Ok(path) = which::which_in("node", std::env::var_os("PATH"), cwd) {
		return Ok(path);
	}

	#[cfg(not(windows))]
	let common_locations = [
		"/usr/local/bin/node",
		"/usr/bin/node",
		"/opt/homebrew/bin/node",
		"/opt/local/bin/node",
	];

	#[cfg(windows)]
	let common_locations = [
		"C:\\Program Files\\nodejs\\node.exe",
		"C:\\Program Files (x86)\\nodejs\\node.exe",
	];

	for location in &common_locations {
		let path = PathBuf::from(location);
		if path.exists() {
			return Ok(path);
		}
	}

	Err(Error::RuntimeNotFound(format!(
		"Node.js executable not found. Please install Node.js or set {}.",
		NODE_EXE_ENV
	)))
}
