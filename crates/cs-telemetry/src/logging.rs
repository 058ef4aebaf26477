use std::fmt;
use std::io::IsTerminal;

use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{FmtContext, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Human,
    Json,
}

/// Initialize logging with human-readable output format.
///
/// Uses the `RUST_LOG` environment variable if set, otherwise falls back
/// to `default_level` (e.g. "info", "debug", "cs_session=debug,warn").
/// Every line is prefixed with `[service_name]`.
///
/// Safe to call multiple times (e.g. in tests) -- subsequent calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) -> bool {
    init(service_name, default_level, LogFormat::Human)
}

/// Initialize logging with one JSON object per line, carrying a top-level
/// `"service"` field.
///
/// Same filter rules as [`init_logging`]. Safe to call multiple times.
pub fn init_logging_json(service_name: &str, default_level: &str) -> bool {
    init(service_name, default_level, LogFormat::Json)
}

/// Returns whether this call installed the global subscriber.
fn init(service_name: &str, default_level: &str, format: LogFormat) -> bool {
    let ansi = format == LogFormat::Human && std::io::stderr().is_terminal();
    let subscriber = build(service_name, default_level, format, ansi, std::io::stderr);
    let installed = tracing::subscriber::set_global_default(subscriber).is_ok();
    if installed {
        tracing::debug!(service = service_name, ?format, "logging initialised");
    }
    installed
}

fn build<W>(
    service_name: &str,
    default_level: &str,
    format: LogFormat,
    ansi: bool,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);

    match format {
        LogFormat::Human => Box::new(
            builder
                .event_format(ServiceTag {
                    service: service_name.to_string(),
                    format,
                    inner: format::Format::default().with_target(true),
                })
                .finish(),
        ),
        LogFormat::Json => Box::new(
            builder
                .fmt_fields(format::JsonFields::new())
                .event_format(ServiceTag {
                    service: service_name.to_string(),
                    format,
                    inner: format::Format::default()
                        .json()
                        .with_file(true)
                        .with_line_number(true),
                })
                .finish(),
        ),
    }
}

/// Stamps the service name onto every event produced by `inner`.
struct ServiceTag<F> {
    service: String,
    format: LogFormat,
    inner: F,
}

impl<S, N, F> FormatEvent<S, N> for ServiceTag<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        match self.format {
            LogFormat::Human => {
                write!(writer, "[{}] ", self.service)?;
                self.inner.format_event(ctx, writer, event)
            }
            LogFormat::Json => {
                let mut line = String::new();
                self.inner.format_event(ctx, Writer::new(&mut line), event)?;
                match line.strip_prefix('{') {
                    Some(rest) => write!(
                        writer,
                        "{{\"service\":\"{}\",{rest}",
                        json_escape(&self.service)
                    ),
                    None => writer.write_str(&line),
                }
            }
        }
    }
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
