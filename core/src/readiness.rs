//! Pattern-based readiness detection for plugin output.
//!
//! The marker strings below are a versioned contract with
//! `session-manager-plugin`; everything that knows about its log format lives
//! here so the orchestration logic never touches raw substrings.

/// Emitted on stdout once the local listener is bound.
pub const LOCAL_PORT_OPENED_MARKER: &str = "opened for sessionId";

/// Emitted on stdout when the plugin starts accepting connections.
pub const CONNECTION_WAITING_MARKER: &str = "Waiting for connections";

/// Case-insensitive substrings that mark a stderr line as fatal.
const STDERR_FAILURE_MARKERS: &[&str] = &["error", "failed", "cannot perform"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    /// The tunnel is usable.
    Ready,
    /// The plugin reported a failure; carries the offending line.
    Error { line: String },
    /// Progress noise, ignored.
    Ignorable,
}

pub fn classify_line(stream: OutputStream, line: &str) -> LineClass {
    match stream {
        OutputStream::Stdout => {
            if line.contains(LOCAL_PORT_OPENED_MARKER) && line.contains(CONNECTION_WAITING_MARKER) {
                LineClass::Ready
            } else {
                LineClass::Ignorable
            }
        }
        OutputStream::Stderr => {
            let lowered = line.to_lowercase();
            if STDERR_FAILURE_MARKERS
                .iter()
                .any(|marker| lowered.contains(marker))
            {
                LineClass::Error {
                    line: line.to_string(),
                }
            } else {
                LineClass::Ignorable
            }
        }
    }
}
