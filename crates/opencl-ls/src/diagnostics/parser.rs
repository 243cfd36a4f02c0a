//! Turns a compiler build log into structured diagnostics.

use log::info;
use regex::{Captures, Regex};

use crate::diagnostics::{Diagnostic, Range};

/// Maps a captured severity token to the wire severity.
///
/// `warning` is 2, anything ending in `error` (including `fatal error`) is 1,
/// everything else is reported as -1 so clients can still render it.
pub fn parse_severity(token: &str) -> i32 {
    if token == "warning" {
        2
    } else if token.ends_with("error") {
        1
    } else {
        -1
    }
}

/// Line-by-line scanner for clang-style build logs.
///
/// A diagnostic line looks like:
///
/// ```text
/// <program source>:13:5: warning: no previous prototype for function 'getChannel'
/// ```
pub struct LogParser {
    regex: Regex,
}

impl LogParser {
    pub fn new() -> LogParser {
        LogParser {
            regex: Regex::new(r"^(.*):(\d+):(\d+): ((fatal )?error|warning|Scholar): (.*)$")
                .unwrap(),
        }
    }

    /// Extracts `(source, line, character, severity, message)` from one match.
    ///
    /// The compiler reports 1-based lines while the protocol is 0-based, so
    /// the line is shifted down by one; a reported line of 0 has no valid
    /// protocol position and yields `None`.
    pub fn parse_match(captures: &Captures<'_>) -> Option<(String, u32, u32, i32, String)> {
        let source = captures.get(1)?.as_str().to_string();
        let line: u32 = captures.get(2)?.as_str().parse().ok()?;
        let line = line.checked_sub(1)?;
        let character: u32 = captures.get(3)?.as_str().parse().ok()?;
        let severity = parse_severity(captures.get(4)?.as_str());
        let message = captures.get(6)?.as_str().to_string();
        Some((source, line, character, severity, message))
    }

    /// Scans `build_log` and returns at most `limit` diagnostics.
    ///
    /// A non-empty `name_override` replaces the source label captured from
    /// the log. Lines that do not match are skipped; an unparsable log is an
    /// empty result, never an error.
    pub fn parse(&self, build_log: &str, name_override: &str, limit: u64) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for log_line in build_log.lines() {
            let captures = match self.regex.captures(log_line) {
                Some(captures) => captures,
                None => continue,
            };
            if diagnostics.len() as u64 >= limit {
                info!("Maximum number of problems reached, the rest of the log is skipped");
                break;
            }
            let (source, line, character, severity, message) = match Self::parse_match(&captures)
            {
                Some(parsed) => parsed,
                None => continue,
            };
            let source = if name_override.is_empty() {
                source
            } else {
                name_override.to_string()
            };
            diagnostics.push(Diagnostic {
                source,
                range: Range::point(line, character),
                severity,
                message,
            });
        }
        diagnostics
    }
}

impl Default for LogParser {
    fn default() -> LogParser {
        LogParser::new()
    }
}
