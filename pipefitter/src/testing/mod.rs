//! Testing utilities for pipefitter pipes.
//!
//! This module provides:
//! - Request and context builders
//! - Recording, failing and slow fittings
//! - Assertions on finished contexts

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_error_status, assert_header, assert_no_error, assert_output_json};
pub use fixtures::{test_context, test_runtime, test_runtime_with, TestRequest};
pub use mocks::{CallLog, FailingFitting, RecordingFitting, SlowFitting};
