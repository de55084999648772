// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatter for the receiver.
//!
//! ```text
//! LOGS_RECEIVER | LEVEL | [span{fields}: ]message fields
//! LOGS_RECEIVER | LEVEL | [target] message fields
//! ```
//!
//! Events from the receiver's own crates carry a component prefix in the
//! message (`CONVERTER |`, `PIPELINE |`); events from dependencies such as
//! `sled` are tagged with their target instead.

use std::fmt;

use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_PREFIX: &str = "LOGS_RECEIVER";

const OWN_TARGETS: [&str; 2] = ["logs_pipeline", "logs_receiver"];

fn is_own_target(target: &str) -> bool {
    OWN_TARGETS
        .iter()
        .any(|own| target == *own || target.starts_with(&format!("{own}::")))
}

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(writer, "{LOG_PREFIX} | {} | ", metadata.level())?;
        if !is_own_target(metadata.target()) {
            write!(writer, "[{}] ", metadata.target())?;
        }

        for span in ctx.event_scope().into_iter().flat_map(|scope| scope.from_root()) {
            write!(writer, "{}", span.name())?;
            let ext = span.extensions();
            match ext.get::<FormattedFields<N>>() {
                Some(fields) if !fields.is_empty() => write!(writer, "{{{fields}}}: ")?,
                _ => write!(writer, ": ")?,
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
