use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use tracing::Metadata;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    let writer = Scrubbed::new(io::stderr);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(writer)).init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(writer),
            )
            .init(),
    }
}

/// Credentials this server handles, each with the label that replaces it.
static CREDENTIAL_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Upstream LLM keys echoed back in provider errors.
        (r"sk-[A-Za-z0-9_\-]{16,}", "[openai-key]"),
        // Access tokens issued by /api/login: header.payload.signature.
        (
            r"eyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+",
            "[access-token]",
        ),
        (r"(?i)(bearer\s+)[A-Za-z0-9_\-\.=]{8,}", "${1}[token]"),
        (r#"("password"\s*:\s*)"[^"]*""#, r#"${1}"[password]""#),
        // bcrypt hashes from the users table.
        (r"\$2[abxy]?\$\d{2}\$[./A-Za-z0-9]{53}", "[password-hash]"),
    ]
    .into_iter()
    .filter_map(|(pattern, label)| Regex::new(pattern).ok().map(|re| (re, label)))
    .collect()
});

/// Mask every credential in `line`. Borrows when nothing matched.
pub fn scrub(line: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(line);
    for (re, label) in CREDENTIAL_RULES.iter() {
        let replaced = match re.replace_all(&out, *label) {
            Cow::Borrowed(_) => continue,
            Cow::Owned(replaced) => replaced,
        };
        out = Cow::Owned(replaced);
    }
    out
}

/// [`MakeWriter`] adapter: every formatted event is scrubbed before it
/// reaches the wrapped writer.
#[derive(Debug, Clone)]
pub struct Scrubbed<M> {
    inner: M,
}

impl<M> Scrubbed<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for Scrubbed<M> {
    type Writer = ScrubbedWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        ScrubbedWriter(self.inner.make_writer())
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        ScrubbedWriter(self.inner.make_writer_for(meta))
    }
}

pub struct ScrubbedWriter<W>(W);

impl<W: Write> Write for ScrubbedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match std::str::from_utf8(buf) {
            Ok(text) => self.0.write_all(scrub(text).as_bytes())?,
            Err(_) => self.0.write_all(scrub(&String::from_utf8_lossy(buf)).as_bytes())?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
