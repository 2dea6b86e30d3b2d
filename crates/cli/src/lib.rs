//! `pwt`: command-line front end for the test-server client.
//!
//! `replay` folds a recorded tele-report log into a report tree; `launch`
//! starts a test server and does the same with its live event stream.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod reporter;
pub mod styles;
