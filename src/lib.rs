//! falla - a syscall-level fault-injection fuzzer that drives the external
//! `strace` binary as a black-box ptrace tracer.
//!
//! This library provides the fuzzing engine: process spawning and
//! handshaking (`child`), non-blocking stream reading (`stream`), line
//! classification and watchers (`watcher`, `parser`), the per-run state
//! machine (`controller`, `reporter`), fault generation (`generator`,
//! `catalog`, `fault`), and the report sink (`report`).

pub mod catalog;
pub mod child;
pub mod cli;
pub mod config;
pub mod controller;
pub mod driver;
pub mod errors;
pub mod fault;
pub mod generator;
pub mod logging;
pub mod parser;
pub mod report;
pub mod reporter;
pub mod stream;
pub mod watcher;
