// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults shared by the converter, receiver and configuration layer.

use std::time::Duration;

/// Default number of entries that triggers an immediate converter flush.
pub const DEFAULT_MAX_FLUSH_COUNT: usize = 100;

/// Default longest time a non-empty converter buffer waits before flushing.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the error bus channel.
///
/// Reports are sent with `try_send`, so a full channel drops the report
/// (logged and counted) instead of stalling the record path.
pub(crate) const MAX_ERROR_REPORTS: usize = 1_000;

/// Default receiver name, also used as the persister scope.
pub const DEFAULT_RECEIVER_NAME: &str = "logs_receiver";

/// Separator between a persister scope and the caller's key.
pub(crate) const SCOPE_SEPARATOR: char = '.';
