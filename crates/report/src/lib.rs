//! Rebuilds a Playwright test run from tele-report events.
//!
//! [`TeleReporterReceiver`] consumes [`ReportEvent`](pw_test_protocol::ReportEvent)s
//! in arrival order, maintains a [`ReportTree`] of projects, suites, tests,
//! results, and steps, and forwards each change to a [`Reporter`].

pub mod config;
pub mod error;
pub mod model;
pub mod receiver;
pub mod sink;

pub use config::{
	ConfigOverrides, FullConfig, FullProject, Pattern, ReportSlowTests, ReporterDescription,
	default_resolve_path,
};
pub use error::{CorrelationKind, ReceiverError, Result};
pub use model::{
	Annotation, Attachment, Entry, FullResult, Location, Outcome, ReportTree, StepId, Suite,
	SuiteId, SuiteKind, TestCase, TestError, TestId, TestResult, TestStep, TestView,
};
pub use receiver::{PathResolver, ReceiverOptions, TeleReporterReceiver};
pub use sink::{NullReporter, Reporter, SinkError, SinkResult};
