//! UI Module - interactive front end
//!
//! The REPL host used when running standalone.

pub mod cli;
