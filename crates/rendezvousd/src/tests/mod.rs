//! Behavioural suites for the broker and its process lifecycle.

pub(crate) mod support;
