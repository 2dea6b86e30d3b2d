//! Run configuration as seen by a report sink.
//!
//! [`FullConfig::default`] is the baseline; wire config from `onConfigure`
//! overlays it and [`ConfigOverrides`] overlays the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pw_test_protocol::{JsonConfig, JsonPattern};
use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::model::millis;

/// Reporter entry: name plus its options.
#[derive(Debug, Clone, PartialEq)]
pub struct ReporterDescription {
	pub name: String,
	pub options: Value,
}

impl ReporterDescription {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			options: Value::Null,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSlowTests {
	pub max: u32,
	pub threshold: Duration,
}

#[derive(Debug, Clone)]
pub struct FullConfig {
	pub config_file: Option<PathBuf>,
	pub forbid_only: bool,
	pub fully_parallel: bool,
	pub global_timeout: Duration,
	pub grep: Vec<Pattern>,
	pub grep_invert: Vec<Pattern>,
	pub max_failures: u32,
	pub metadata: Value,
	pub preserve_output: String,
	pub quiet: bool,
	pub reporter: Vec<ReporterDescription>,
	pub report_slow_tests: Option<ReportSlowTests>,
	pub root_dir: PathBuf,
	pub update_snapshots: String,
	pub version: String,
	pub workers: u32,
}

impl Default for FullConfig {
	fn default() -> Self {
		Self {
			config_file: None,
			forbid_only: false,
			fully_parallel: false,
			global_timeout: Duration::ZERO,
			grep: vec![Pattern::match_all()],
			grep_invert: Vec::new(),
			max_failures: 0,
			metadata: Value::Object(Default::default()),
			preserve_output: "always".to_string(),
			quiet: false,
			reporter: vec![ReporterDescription::new("list")],
			report_slow_tests: Some(ReportSlowTests {
				max: 5,
				threshold: Duration::from_secs(300),
			}),
			root_dir: PathBuf::new(),
			update_snapshots: "missing".to_string(),
			version: String::new(),
			workers: 0,
		}
	}
}

impl FullConfig {
	/// Baseline overlaid by the fields the wire config carries.
	pub fn from_wire(config: &JsonConfig) -> Self {
		let base = Self::default();
		Self {
			config_file: config
				.config_file
				.as_deref()
				.filter(|file| !file.is_empty())
				.map(PathBuf::from),
			global_timeout: config.global_timeout.map_or(base.global_timeout, millis),
			max_failures: config.max_failures.unwrap_or(base.max_failures),
			metadata: config.metadata.clone().unwrap_or(base.metadata.clone()),
			root_dir: PathBuf::from(&config.root_dir),
			version: config.version.clone().unwrap_or_default(),
			workers: config.workers.unwrap_or(base.workers),
			..base
		}
	}

	/// Applies every override that is set.
	pub fn apply(&mut self, overrides: &ConfigOverrides) {
		if let Some(config_file) = &overrides.config_file {
			self.config_file = Some(config_file.clone());
		}
		if let Some(quiet) = overrides.quiet {
			self.quiet = quiet;
		}
		if let Some(report_slow_tests) = overrides.report_slow_tests {
			self.report_slow_tests = report_slow_tests;
		}
		if let Some(reporter) = &overrides.reporter {
			self.reporter = reporter.clone();
		}
	}
}

/// Local settings that win over whatever the server reports.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
	pub config_file: Option<PathBuf>,
	pub quiet: Option<bool>,
	/// `Some(None)` disables slow-test reporting.
	pub report_slow_tests: Option<Option<ReportSlowTests>>,
	pub reporter: Option<Vec<ReporterDescription>>,
}

/// Project as seen by a report sink. Directories are absolute.
#[derive(Debug, Clone)]
pub struct FullProject {
	pub name: String,
	pub metadata: Value,
	pub output_dir: Option<PathBuf>,
	pub repeat_each: u32,
	pub retries: u32,
	pub test_dir: Option<PathBuf>,
	pub test_ignore: Vec<Pattern>,
	pub test_match: Vec<Pattern>,
	pub timeout: Duration,
	pub grep: Vec<Pattern>,
	pub grep_invert: Vec<Pattern>,
	pub dependencies: Vec<String>,
	pub snapshot_dir: Option<PathBuf>,
	pub teardown: Option<String>,
	pub use_options: Value,
}

/// Test-file or title pattern: a glob string or a regular expression.
#[derive(Debug, Clone)]
pub enum Pattern {
	Glob(String),
	Regex { regex: Regex, flags: String },
	/// A JS regular expression the Rust engine cannot compile.
	Source { source: String, flags: String },
}

impl Pattern {
	fn match_all() -> Self {
		Self::compile(".*", "")
	}

	/// Parses the wire form: `{s}` is a glob, `{r: {source, flags}}` a regex.
	pub fn from_wire(pattern: &JsonPattern) -> Option<Self> {
		if let Some(glob) = &pattern.s {
			return Some(Pattern::Glob(glob.clone()));
		}
		let regex = pattern.r.as_ref()?;
		Some(Self::compile(&regex.source, &regex.flags))
	}

	/// Compiles a JS-style regex; `i`, `m`, and `s` map to engine options.
	pub fn compile(source: &str, flags: &str) -> Self {
		let built = RegexBuilder::new(source)
			.case_insensitive(flags.contains('i'))
			.multi_line(flags.contains('m'))
			.dot_matches_new_line(flags.contains('s'))
			.build();
		match built {
			Ok(regex) => Pattern::Regex {
				regex,
				flags: flags.to_string(),
			},
			Err(e) => {
				tracing::warn!(source, flags, "Keeping uncompilable pattern as source: {}", e);
				Pattern::Source {
					source: source.to_string(),
					flags: flags.to_string(),
				}
			}
		}
	}

	/// Pattern text as written: the glob or the regex source.
	pub fn source(&self) -> &str {
		match self {
			Pattern::Glob(glob) => glob,
			Pattern::Regex { regex, .. } => regex.as_str(),
			Pattern::Source { source, .. } => source,
		}
	}

	/// Regex match. Globs and uncompiled sources never match here.
	pub fn is_match(&self, text: &str) -> bool {
		match self {
			Pattern::Regex { regex, .. } => regex.is_match(text),
			Pattern::Glob(_) | Pattern::Source { .. } => false,
		}
	}
}

impl PartialEq for Pattern {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Pattern::Glob(a), Pattern::Glob(b)) => a == b,
			(Pattern::Regex { regex: a, flags: fa }, Pattern::Regex { regex: b, flags: fb }) => {
				a.as_str() == b.as_str() && fa == fb
			}
			(
				Pattern::Source { source: a, flags: fa },
				Pattern::Source { source: b, flags: fb },
			) => a == b && fa == fb,
			_ => false,
		}
	}
}

pub(crate) fn parse_patterns(patterns: &[JsonPattern]) -> Vec<Pattern> {
	patterns.iter().filter_map(Pattern::from_wire).collect()
}

/// Joins a wire path onto `rootDir`.
pub fn default_resolve_path(root_dir: &Path, relative: &str) -> PathBuf {
	root_dir.join(relative)
}
