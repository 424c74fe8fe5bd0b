//! Test suites for the host bootstrap and runtime.

mod support;
