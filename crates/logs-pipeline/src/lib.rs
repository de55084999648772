// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Logs Pipeline
//!
//! Runtime core of a log-collection receiver. Log entries enter a chain of
//! operators, leave the tail of the chain into a batching converter, and
//! are delivered to a downstream consumer in batches.
//!
//! ## Architecture
//!
//! ```text
//!   external input
//!        │
//!        v
//!   ┌──────────┐   ┌──────────┐         ┌──────────┐
//!   │ operator │──>│ operator │── ... ─>│ operator │   (Pipeline)
//!   └──────────┘   └──────────┘         └────┬─────┘
//!        │ checkpoints                       │
//!        v                                   v
//!   ┌──────────┐                       ┌───────────┐
//!   │Persister │                       │ Converter │  (count / interval)
//!   └──────────┘                       └────┬──────┘
//!                                           v
//!                                      LogsConsumer
//! ```
//!
//! - [`persister`]: key-value checkpoint store with atomic batches
//! - [`operator`]: operator contract, registry and lifecycle-tracked stages
//! - [`pipeline`]: chain resolution, ordered start/stop, record entry point
//! - [`converter`]: batching with count and interval triggers
//! - [`receiver`]: startup/shutdown orchestration of all of the above
//! - [`error_bus`]: channel carrying non-fatal errors to the embedder

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]
#![deny(unused_extern_crates)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod converter;
pub mod entry;
pub mod error_bus;
pub mod errors;
pub mod logger;
pub mod operator;
pub mod persister;
pub mod pipeline;
pub mod receiver;

pub use entry::Entry;
