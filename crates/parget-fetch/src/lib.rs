//! Parallel, resumable ranged downloads.
//!
//! # Architecture
//!
//! A run flows through these pieces:
//! - [`Producer`] probes the resource, validates the progress ledger and
//!   emits [`Range`]s onto an unbuffered queue
//! - workers pull ranges, resume each at its recorded offset and stream the
//!   body into the payload file, recording progress as they go
//! - [`StatusBoard`] aggregates progress and drives the phase machine
//! - [`Manager`] verifies every range and commits the payload once planning
//!   is done and the last worker has left
//!
//! The network side sits behind [`Source`]; [`HttpSource`] implements it
//! with `reqwest` range requests.

mod config;
mod error;
mod manager;
mod plan;
mod pool;
mod producer;
mod size;
mod source;
mod speed;
mod status;
mod worker;

pub use config::{Configure, ConfigureBuilder, default_user_agent, max_workers};
pub use error::{ErrorKind, FetchError, Result};
pub use manager::{Controller, Manager, Report};
pub use plan::{Range, RangePlan};
pub use producer::{Prepared, Producer};
pub use size::{ByteSize, ParseSizeError, format_duration};
pub use source::{BoxStream, HttpSource, Probe, Source};
pub use speed::{Throughput, eta};
pub use status::{Inbox, Mailboxes, Phase, Snapshot, StatusBoard, View};
pub use worker::Job;
