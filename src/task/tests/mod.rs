//! Unit tests for the task engine.

mod support;
