//! Bosun Exec - subprocess execution and path translation
//!
//! The command runner is the single place a child process is spawned and
//! waited on; it owns timeout and cancellation semantics so callers can
//! distinguish "user aborted" from "tool failed". The path translator
//! rewrites host paths for tools that execute in a secondary environment
//! (WSL), and is an identity function everywhere else.

pub mod path;
pub mod runner;

pub use path::{PathTranslator, TranslationMode};
pub use runner::CommandRunner;
