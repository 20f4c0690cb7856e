//! Tests for walbridge-ingest

pub mod line_test;
pub mod queue_test;
