//! Progress and log events reported by archive operations.

/// Severity of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A log line, a progress step, or both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub severity: Severity,
    pub message: Option<String>,
    /// `(current, max)`.
    pub progress: Option<(usize, usize)>,
    pub file: Option<String>,
}

impl Event {
    fn message(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: Some(message.into()),
            progress: None,
            file: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::message(Severity::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::message(Severity::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::message(Severity::Error, message)
    }

    /// A progress step for `file`.
    pub fn step(current: usize, max: usize, file: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: None,
            progress: Some((current, max)),
            file: Some(file.into()),
        }
    }
}

/// A callback that drops every event.
pub fn silent(_: &Event) {}

/// Width of the text progress bar.
const BAR_WIDTH: usize = 30;

/// Turns events into log output, emitting at most one progress line per
/// whole percent.
#[derive(Debug, Default)]
pub struct ProgressLog {
    last_percent: Option<usize>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward the message of `event` to `tracing` and return the progress
    /// line to print, if any.
    pub fn handle(&mut self, event: &Event) -> Option<String> {
        if let Some(message) = &event.message {
            match event.severity {
                Severity::Info => tracing::info!("{message}"),
                Severity::Warn => tracing::warn!("{message}"),
                Severity::Error => tracing::error!("{message}"),
            }
        }
        self.line(event)
    }

    /// The progress line for `event`, or `None` when it carries no progress
    /// or its percentage was already shown.
    pub fn line(&mut self, event: &Event) -> Option<String> {
        let (current, max) = event.progress?;
        let percent = if max == 0 {
            100
        } else {
            (current.min(max) * 100) / max
        };

        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);

        let filled = percent * BAR_WIDTH / 100;
        Some(format!(
            "[{}{}] {percent}%: {}",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            event.file.as_deref().unwrap_or_default()
        ))
    }

    /// Forget the last percentage, e.g. between two phases.
    pub fn reset(&mut self) {
        self.last_percent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesces_per_percent() {
        let mut log = ProgressLog::new();

        let lines: Vec<String> = (1..=1000)
            .filter_map(|i| log.line(&Event::step(i, 1000, "f")))
            .collect();
        assert_eq!(lines.len(), 101);
        assert_eq!(lines.last().unwrap(), &format!("[{}] 100%: f", "#".repeat(30)));
    }

    #[test]
    fn test_bar_shape() {
        let mut log = ProgressLog::new();
        let line = log.line(&Event::step(1, 2, "a.txt")).unwrap();
        assert_eq!(line, format!("[{}{}] 50%: a.txt", "#".repeat(15), "-".repeat(15)));
    }

    #[test]
    fn test_messages_have_no_line() {
        let mut log = ProgressLog::new();
        assert_eq!(log.handle(&Event::warn("careful")), None);
        assert_eq!(
            log.line(&Event::step(0, 0, "x")),
            Some(format!("[{}] 100%: x", "#".repeat(30)))
        );
    }

    #[test]
    fn test_reset() {
        let mut log = ProgressLog::new();
        assert!(log.line(&Event::step(1, 4, "a")).is_some());
        assert!(log.line(&Event::step(1, 4, "b")).is_none());
        log.reset();
        assert!(log.line(&Event::step(1, 4, "b")).is_some());
    }
}
