//! # kdsh: KodData remote shell
//!
//! Interactive front end for `kdsh-core`: reads statements from the
//! terminal, sends them to the server and prints whatever comes back.
//!
//! - **config**: `ShellConfig`, loaded from TOML with defaults for every field
//! - **repl**: statement accumulation and dispatch (`upload`, `consult`, commands)

pub mod config;
pub mod repl;
