//! Console log formatting for the proxy driver.
//!
//! The driver can host output for several proxied modules at once, and the
//! library tags every event with the owning module's id in a `module`
//! field. The default field renderer would print that as a long
//! `module=8f14e45f-...` pair on every line, which drowns the message. The
//! formatter here pulls the field out and turns it into a short bracketed
//! tag in front of the message, then colors the whole line by severity so
//! warnings and errors stand out in an interactive session.
//!
//! ## Output Shape
//!
//! ```text
//! [8f14e45f] module started
//! [8f14e45f] warning: re-attach attempt failed: receive timed out
//! connecting to module host control=ipc:///tmp/mod.control ...
//! ```
//!
//! Timestamps, targets, and level words are deliberately absent; the
//! detailed stderr/file layer configured in `main` records those.

use colored::*;
use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// User-facing stdout formatter for the driver binary.
///
/// Renders one line per event: an optional `[module-tag]` prefix, the
/// event message, any remaining fields in `key=value` form, all colored
/// by level. See the module documentation for the rationale and the
/// output shape.
pub struct ConsoleFormatter;

/// Field visitor that splits an event into the pieces the console line is
/// assembled from.
///
/// Three destinations:
/// - `module`: the proxy's module-id field, captured for the line prefix
/// - `message`: the event's primary text
/// - `rest`: every other field, appended as ` key=value`
#[derive(Default)]
struct LineParts {
    module: Option<String>,
    message: String,
    rest: String,
}

impl LineParts {
    fn capture(&mut self, field: &Field, value: String) {
        match field.name() {
            "module" => self.module = Some(value),
            "message" => self.message = value,
            name => {
                let _ = write!(self.rest, " {name}={value}");
            }
        }
    }
}

impl Visit for LineParts {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.capture(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.capture(field, format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for ConsoleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut parts = LineParts::default();
        event.record(&mut parts);

        let mut line = String::new();
        if let Some(module) = parts.module.as_deref() {
            // The first uuid segment is enough to tell modules apart.
            let tag = module.split('-').next().unwrap_or(module);
            let _ = write!(line, "[{tag}] ");
        }
        line.push_str(&parts.message);
        line.push_str(&parts.rest);

        let rendered = match *event.metadata().level() {
            Level::ERROR => format!("error: {line}").red(),
            Level::WARN => format!("warning: {line}").yellow(),
            Level::INFO => line.normal(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.dimmed(),
        };

        writeln!(writer, "{rendered}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::field::FieldSet;

    #[test]
    fn line_parts_split_module_message_and_rest() {
        // Drive the visitor directly with a synthetic field set.
        let callsite = tracing::callsite::Identifier(&TEST_CALLSITE);
        let fields = FieldSet::new(&["message", "module", "count"], callsite);
        let mut iter = fields.iter();
        let (message, module, count) = (
            iter.next().unwrap(),
            iter.next().unwrap(),
            iter.next().unwrap(),
        );

        let mut parts = LineParts::default();
        parts.record_str(&message, "module started");
        parts.record_str(&module, "8f14e45f-ceea-467f-9538-af930328d8c8");
        parts.record_debug(&count, &3u32);

        assert_eq!(parts.message, "module started");
        assert_eq!(
            parts.module.as_deref(),
            Some("8f14e45f-ceea-467f-9538-af930328d8c8")
        );
        assert_eq!(parts.rest, " count=3");
    }

    struct TestCallsite;
    static TEST_CALLSITE: TestCallsite = TestCallsite;

    impl tracing::Callsite for TestCallsite {
        fn set_interest(&self, _: tracing::subscriber::Interest) {}
        fn metadata(&self) -> &tracing::Metadata<'static> {
            unimplemented!("metadata is not consulted by these tests")
        }
    }
}
