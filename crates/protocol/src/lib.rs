//! Wire types for the Playwright test-server protocol.
//!
//! This crate contains the serde-serializable shapes exchanged with an
//! out-of-process Playwright test server:
//!
//! - [`report`]: tele-report payloads (`onConfigure`, `onProject`, `onTestEnd`, ...)
//!   and the [`ReportEvent`] sum type that the receiver folds into a report tree
//! - [`server`]: unsolicited test-server events (`report`, `stdio`, `listChanged`, ...)
//! - [`encoding`]: base64 helpers for inline binary payloads
//!
//! Types in this crate are pure data. Tree reconstruction, merging and path
//! resolution live in `pw-test-report`.

pub mod encoding;
pub mod report;
pub mod server;

pub use encoding::*;
pub use report::*;
pub use server::*;
