use std::collections::VecDeque;
use std::fmt;
use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the `env_logger` backend once. `filter` wins over `RUST_LOG`; later calls are ignored.
pub fn init_logging(filter: Option<&str>) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        if let Some(filter) = filter {
            builder.parse_filters(filter);
        } else if let Ok(filter) = std::env::var("RUST_LOG") {
            builder.parse_filters(&filter);
        } else {
            builder.filter_level(log::LevelFilter::Info);
        }
        builder.init();
        log::debug!("logging initialized");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn to_log(self) -> log::Level {
        match self {
            LogLevel::Info => log::Level::Info,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line emitted by a script through its context, or by the host about a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub frame: u64,
    pub script: String,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.script, self.message)
    }
}

/// Bounded console log. Every record is forwarded to the `log` facade under the `script` target;
/// only the most recent `capacity` records are retained for inspection.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    records: VecDeque<LogRecord>,
    capacity: usize,
    dropped: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { records: VecDeque::with_capacity(capacity.min(1024)), capacity, dropped: 0 }
    }

    pub fn push(&mut self, record: LogRecord) {
        log::log!(
            target: "script",
            record.level.to_log(),
            "[frame {}] {}: {}",
            record.frame,
            record.script,
            record.message
        );
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> impl Iterator<Item = &LogRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records evicted because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn drain(&mut self) -> Vec<LogRecord> {
        self.records.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&record.to_string());
            out.push('\n');
        }
        out
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(message: &str) -> LogRecord {
        LogRecord { frame: 1, script: "movement".into(), level: LogLevel::Info, message: message.into() }
    }

    #[test]
    fn records_render_with_level_and_script() {
        assert_eq!(record("Hello, script!").to_string(), "[info] movement: Hello, script!");
    }

    #[test]
    fn buffer_keeps_most_recent_records() {
        let mut buffer = LogBuffer::new(2);
        buffer.push(record("one"));
        buffer.push(record("two"));
        buffer.push(record("three"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.text(), "[info] movement: two\n[info] movement: three\n");
        let drained = buffer.drain();
        assert_eq!(drained[0].message, "two");
        assert!(buffer.is_empty());
    }
}
