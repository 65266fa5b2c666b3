//! Terminal rendering of server replies and crash reports.
//!
//! Replies are printed the way redis-cli prints them, colored by type.

use colored::Colorize;
use corral_protocol::Frame;
use corral_server::CrashReport;

/// Formats a reply for terminal display.
pub fn format_response(frame: &Frame) -> String {
    format_frame(frame)
}

/// Formats an error reply the server sent back as a failed command.
pub fn format_error_reply(message: &str) -> String {
    format_frame(&Frame::Error(message.to_string()))
}

/// Removes ANSI escape sequences and control characters from text that
/// came from a server. Tabs and line breaks are kept.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if matches!(ch, '\t' | '\n' | '\r') || !ch.is_control() {
            out.push(ch);
        }
    }
    out
}

fn format_frame(frame: &Frame) -> String {
    match frame {
        Frame::Simple(s) => sanitize(s).green().to_string(),

        Frame::Error(e) => format!("{} {}", "(error)".red(), sanitize(e).red()),

        Frame::Integer(n) => format!("{} {}", "(integer)".yellow(), n.to_string().yellow()),

        Frame::Boolean(b) => format!("{} {}", "(boolean)".yellow(), b.to_string().yellow()),

        Frame::Bulk(data) => match std::str::from_utf8(data) {
            // INFO and friends read better unquoted
            Ok(s) if s.contains('\n') => sanitize(s).green().to_string(),
            Ok(s) => format!("\"{}\"", sanitize(s)).green().to_string(),
            Err(_) => {
                let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
                hex.green().to_string()
            }
        },

        Frame::Null => "(nil)".dimmed().to_string(),

        Frame::Array(items) if items.is_empty() => "(empty array)".dimmed().to_string(),

        Frame::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) {}", i + 1, format_frame(item)))
            .collect::<Vec<_>>()
            .join("\n"),

        Frame::Map(pairs) if pairs.is_empty() => "(empty map)".dimmed().to_string(),

        Frame::Map(pairs) => pairs
            .iter()
            .enumerate()
            .map(|(i, (key, val))| {
                format!("{}) {} => {}", i + 1, format_frame(key), format_frame(val))
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Renders the crash report of an instance that died on its own.
pub fn format_crash_report(server_id: u32, role: &str, report: &CrashReport) -> String {
    let header = format!(
        "server {server_id} ({role}) crashed, report from {}:",
        report.log_path.display()
    );
    let mut out = header.red().bold().to_string();
    for line in &report.lines {
        out.push('\n');
        out.push_str(&sanitize(line));
    }
    out
}
