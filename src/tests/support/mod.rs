//! Integration test harness: a real cache wired to a real IPC server over a
//! Unix-domain socket, used by the `cases_*_test` modules in this directory.

pub mod harness;
