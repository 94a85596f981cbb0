//! `graph-rs` CLI tools: an interactive shell over an in-process graph
//! storage engine. [Author fengyang]
//!
//! ## Getting started
//!
//! ```doc
//! ❯ ./graphcli
//!
//! ██████   ██████
//! ██       ██  ██
//! ██  ███  ██████
//! ██   ██  ██ ██
//! ██████   ██  ██  Graph Storage CLI
//!
//! Welcome to graphcli.
//!
//! graphcli > VERTEX
//! vertex 1
//!
//! graphcli > VERTEX
//! vertex 2
//!
//! graphcli > EDGE 1 2 likes
//! edge 3: 1 -[likes]-> 2
//!
//! graphcli > LABEL 1 person
//! OK ~
//!
//! graphcli > DEGREE 1
//! 1
//!
//! graphcli > STATS
//! vertices: 2, edges: 1, last tx: 4
//! ```

pub mod config;
pub mod session;
pub mod trace;
