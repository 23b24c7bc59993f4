// src/formatting.rs

use crate::config::Config;
use crate::core::{LogRecord, Severity};
use anyhow::Result;
use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};

/// Appended to any payload cut to fit the length limit.
pub const TRUNCATION_MARKER: &str = "…";
/// Substituted for empty message bodies.
pub const EMPTY_PLACEHOLDER: &str = "(empty message)";

/// Renders notification payloads for the destination's markup dialect.
///
/// Implementations never fail: anything that cannot be represented is
/// replaced rather than aborting the dispatch.
pub trait MessageFormatter: Send + Sync {
    /// Renders free text, optionally prefixed with a severity header.
    fn render_text(&self, text: &str, severity: Option<Severity>) -> String;

    /// Renders a structured log event.
    fn render_event(&self, record: &LogRecord) -> String;

    /// Renders a media caption. Empty captions are omitted.
    fn render_caption(&self, caption: Option<&str>) -> Option<String>;
}

/// Limits and layout switches for [`HtmlFormatter`].
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub max_length: usize,
    pub caption_max_length: usize,
    pub include_stack_trace: bool,
    pub max_stack_trace_lines: usize,
    pub offset: FixedOffset,
}

impl FormatOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_length: config.message.max_length,
            caption_max_length: config.message.caption_max_length,
            include_stack_trace: config.logging.include_stack_trace,
            max_stack_trace_lines: config.logging.max_stack_trace_lines,
            offset: config.message.offset()?,
        })
    }
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_length: 4000,
            caption_max_length: 1024,
            include_stack_trace: true,
            max_stack_trace_lines: 5,
            offset: Utc.fix(),
        }
    }
}

/// A formatter for Telegram's HTML parse mode.
#[derive(Debug, Clone, Default)]
pub struct HtmlFormatter {
    options: FormatOptions,
}

impl HtmlFormatter {
    pub fn new(options: FormatOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    fn format_timestamp(&self, millis: i64) -> String {
        match DateTime::<Utc>::from_timestamp_millis(millis) {
            Some(ts) => ts
                .with_timezone(&self.options.offset)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            None => "(invalid timestamp)".to_string(),
        }
    }

    fn stack_section(&self, record: &LogRecord) -> Option<String> {
        if !self.options.include_stack_trace {
            return None;
        }
        let cause = record.cause.as_ref()?;
        let frames: Vec<String> = cause
            .frames
            .iter()
            .take(self.options.max_stack_trace_lines)
            .map(|frame| escape_html(&sanitize(frame)))
            .collect();
        let summary = escape_html(&sanitize(cause.summary.trim()));

        if frames.is_empty() && summary.is_empty() {
            return None;
        }

        let mut section = String::from("\n\n<b>Stacktrace:</b>");
        if !summary.is_empty() {
            section.push(' ');
            section.push_str(&summary);
        }
        if !frames.is_empty() {
            section.push_str("\n<pre>");
            section.push_str(&frames.join("\n"));
            section.push_str("</pre>");
        }
        Some(section)
    }
}

impl MessageFormatter for HtmlFormatter {
    fn render_text(&self, text: &str, severity: Option<Severity>) -> String {
        let header = severity
            .map(|level| format!("<b>{}</b>\n", level))
            .unwrap_or_default();
        let body = escape_html(&sanitize(non_empty(text)));
        let max = self.options.max_length;
        // The header goes when it would leave no room for the body.
        let header = if text_len(&header) < max { header } else { String::new() };
        let budget = max - text_len(&header);
        format!("{}{}", header, truncate_escaped(&body, budget))
    }

    fn render_event(&self, record: &LogRecord) -> String {
        let header = format!(
            "🚨 <b>{}</b>\n📦 <b>{}</b>\n🕒 {}\n\n",
            record.level,
            escape_html(&sanitize(&record.logger_name)),
            self.format_timestamp(record.timestamp_millis)
        );
        let body = escape_html(&sanitize(non_empty(&record.message)));
        let stack = self.stack_section(record).unwrap_or_default();

        let max = self.options.max_length;
        let tags = text_len("<pre></pre>");
        let fixed = text_len(&header) + tags;

        // Drop the stack first, then shorten the body, then drop the header,
        // so tags stay balanced.
        if fixed + text_len(&body) + text_len(&stack) <= max {
            return format!("{header}<pre>{body}</pre>{stack}");
        }
        if fixed + text_len(&body) <= max {
            return format!("{header}<pre>{body}</pre>");
        }
        if fixed < max {
            let body = truncate_escaped(&body, max - fixed);
            return format!("{header}<pre>{body}</pre>");
        }
        if tags < max {
            let body = truncate_escaped(&body, max - tags);
            return format!("<pre>{body}</pre>");
        }
        truncate_escaped(&body, max)
    }

    fn render_caption(&self, caption: Option<&str>) -> Option<String> {
        let caption = caption.map(str::trim).filter(|c| !c.is_empty())?;
        let escaped = escape_html(&sanitize(caption));
        Some(truncate_escaped(&escaped, self.options.caption_max_length))
    }
}

/// Escapes the characters Telegram's HTML mode treats as markup.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Replaces control characters other than line breaks and tabs.
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
                char::REPLACEMENT_CHARACTER
            } else {
                c
            }
        })
        .collect()
}

fn non_empty(text: &str) -> &str {
    if text.trim().is_empty() {
        EMPTY_PLACEHOLDER
    } else {
        text
    }
}

/// Length as the Bot API counts it: UTF-16 code units.
fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Cuts already-escaped text to at most `max_len` UTF-16 code units, marker
/// included, without splitting an HTML entity.
pub fn truncate_escaped(text: &str, max_len: usize) -> String {
    if text_len(text) <= max_len {
        return text.to_string();
    }
    let marker_len = text_len(TRUNCATION_MARKER);
    if max_len < marker_len {
        return String::new();
    }

    let keep = max_len - marker_len;
    let mut used = 0;
    let mut end = 0;
    for (i, c) in text.char_indices() {
        if used + c.len_utf16() > keep {
            break;
        }
        used += c.len_utf16();
        end = i + c.len_utf8();
    }
    let mut head = &text[..end];
    if let Some(amp) = head.rfind('&') {
        if !head[amp..].contains(';') {
            head = &head[..amp];
        }
    }
    format!("{head}{TRUNCATION_MARKER}")
}
