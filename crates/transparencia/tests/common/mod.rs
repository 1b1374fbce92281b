//! Shared test utilities for transparencia integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp storage root and database
//! - Builders for CSV, XML, xlsx and config fixtures

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
