//! Filename and command templating: strftime plus camera-specific
//! specifiers.
//!
//! Expansion runs in two phases. Custom `%` codes are substituted first,
//! building an intermediate format string; whatever `%` codes remain are
//! then handed to strftime. A numeric width modifier is honored on every
//! custom code (`%05v`). Unknown long-form words (`%{nope}`) expand to `~`
//! with a logged warning.

use std::fmt::Write as _;

use tracing::warn;

/// Everything the expander can be asked to interpolate. Built fresh by the
/// caller for each expansion; cheap to construct.
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    /// `%v`: per-camera event number.
    pub event_number: u64,
    /// `%q`: shot index within the current second.
    pub shot: u32,
    /// `%D`: changed pixel count.
    pub changed_pixels: u32,
    /// `%N`: noise level.
    pub noise: u8,
    /// `%i` / `%J`: detection box width and height.
    pub motion_width: u32,
    pub motion_height: u32,
    /// `%K` / `%L`: detection box center.
    pub motion_center_x: u32,
    pub motion_center_y: u32,
    /// `%o`: threshold.
    pub threshold: u32,
    /// `%Q`: label count.
    pub total_labels: u16,
    /// `%t`: camera id.
    pub camera_id: u32,
    /// `%$`: camera name; empty swallows the code.
    pub camera_name: String,
    /// `%C`: user text-event string; empty swallows the code.
    pub text_event: String,
    /// `%w` / `%h`: image dimensions.
    pub width: u32,
    pub height: u32,
    /// `%{fps}` and `%fps`.
    pub fps: u32,
    /// `%{host}`.
    pub hostname: String,
    /// `%{dbeventid}`: best effort, 0 when the backend does not report it.
    pub db_event_id: u64,
    /// `%{ver}`.
    pub version: &'static str,
}

/// Expand `template` at `ts`.
///
/// `filename` feeds `%f` (swallowed when absent); `sqltype` feeds `%n`
/// (swallowed when 0).
pub fn expand(
    template: &str,
    ts: chrono::DateTime<chrono::Local>,
    filename: Option<&str>,
    sqltype: u32,
    ctx: &TemplateContext,
) -> String {
    let mut fmt = String::with_capacity(template.len() * 2);
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            fmt.push(ch);
            continue;
        }

        let mut width = 0usize;
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }

        let code = match chars.next() {
            Some(c) => c,
            None => break,
        };

        match code {
            'v' => zero_pad(&mut fmt, ctx.event_number, if width == 0 { 2 } else { width }),
            'q' => zero_pad(&mut fmt, ctx.shot, if width == 0 { 2 } else { width }),
            'D' => space_pad(&mut fmt, ctx.changed_pixels, width),
            'N' => space_pad(&mut fmt, ctx.noise, width),
            'i' => space_pad(&mut fmt, ctx.motion_width, width),
            'J' => space_pad(&mut fmt, ctx.motion_height, width),
            'K' => space_pad(&mut fmt, ctx.motion_center_x, width),
            'L' => space_pad(&mut fmt, ctx.motion_center_y, width),
            'o' => space_pad(&mut fmt, ctx.threshold, width),
            'Q' => space_pad(&mut fmt, ctx.total_labels, width),
            't' => space_pad(&mut fmt, ctx.camera_id, width),
            'w' => space_pad(&mut fmt, ctx.width, width),
            'h' => space_pad(&mut fmt, ctx.height, width),
            'C' => {
                if !ctx.text_event.is_empty() {
                    space_pad_str(&mut fmt, &ctx.text_event, width);
                }
            }
            '$' => {
                if !ctx.camera_name.is_empty() {
                    fmt.push_str(&ctx.camera_name);
                }
            }
            'f' => {
                // `%fps` shares the prefix with `%f`.
                if next_two_are(&mut chars, 'p', 's') {
                    space_pad(&mut fmt, ctx.fps, width);
                } else if let Some(name) = filename {
                    space_pad_str(&mut fmt, name, width);
                }
            }
            'n' => {
                if sqltype != 0 {
                    space_pad(&mut fmt, sqltype, width);
                }
            }
            '{' => {
                let mut word = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    word.push(c);
                }
                expand_long_form(&mut fmt, &word, width, ctx);
            }
            other => {
                // Not ours; leave it for strftime. Any width digits do not
                // carry over.
                fmt.push('%');
                fmt.push(other);
            }
        }
    }

    render_strftime(&fmt, ts)
}

/// Long-form specifier words: `%{host}`, `%{fps}`, `%{dbeventid}`,
/// `%{ver}`.
fn expand_long_form(fmt: &mut String, word: &str, width: usize, ctx: &TemplateContext) {
    match word {
        "host" => space_pad_str(fmt, &ctx.hostname, width),
        "fps" => space_pad(fmt, ctx.fps, width),
        "dbeventid" => space_pad(fmt, ctx.db_event_id, width),
        "ver" => space_pad_str(fmt, ctx.version, width),
        other => {
            warn!("invalid format specifier keyword {other:?}");
            fmt.push('~');
        }
    }
}

fn zero_pad(out: &mut String, value: impl std::fmt::Display, width: usize) {
    let _ = write!(out, "{value:0>width$}");
}

fn space_pad(out: &mut String, value: impl std::fmt::Display, width: usize) {
    let _ = write!(out, "{value:>width$}");
}

fn space_pad_str(out: &mut String, value: &str, width: usize) {
    let _ = write!(out, "{value:>width$}");
}

fn next_two_are(chars: &mut std::iter::Peekable<std::str::Chars>, a: char, b: char) -> bool {
    let mut look = chars.clone();
    if look.next() == Some(a) && look.next() == Some(b) {
        chars.next();
        chars.next();
        true
    } else {
        false
    }
}

fn render_strftime(fmt: &str, ts: chrono::DateTime<chrono::Local>) -> String {
    use chrono::format::{Item, StrftimeItems};
    let items: Vec<Item> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|it| matches!(it, Item::Error)) {
        // A malformed strftime code would otherwise poison the whole
        // expansion; deliver the intermediate string instead.
        warn!("template {fmt:?} contains an invalid strftime code");
        return fmt.to_string();
    }
    let mut out = String::with_capacity(fmt.len());
    let _ = write!(out, "{}", ts.format_with_items(items.into_iter()));
    out
}
