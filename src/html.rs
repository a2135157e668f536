//! Terminal-to-HTML rendering (part of C6): converts raw captured pane
//! text into an HTML fragment, turning box-drawing tables and panels
//! into `<table>`/`<div class="terminal-panel">` markup and leaving
//! everything else as escaped text.

use std::sync::OnceLock;

use regex::Regex;

fn hrule_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\s]*[─╌╍┄┅┈┉━]{3,}[\s]*$").unwrap())
}

fn status_bar_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\s{3,}(\?\s+for\s+shortcuts|\d+% context left|shift\+tab to cycle)",
        )
        .unwrap()
    })
}

fn table_top_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[│┌][─┬]+[┐│]?\s*$").unwrap())
}

fn table_sep_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[│├][─┼]+[┤│]?\s*$").unwrap())
}

fn table_bot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[│└][─┴]+[┘│]?\s*$").unwrap())
}

fn panel_top_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[╭┌][─]+[╮┐]\s*$").unwrap())
}

fn panel_bot_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[╰└][─]+[╯┘]\s*$").unwrap())
}

fn panel_mid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^│(.*)│\s*$").unwrap())
}

/// Escape `&`, `<`, `>`, `"`, `'` for safe embedding in HTML text/attrs.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a table/panel cell and insert a `<wbr>` after every underscore
/// so long identifiers can wrap inside narrow columns.
fn escape_cell(text: &str) -> String {
    escape_html(text).replace('_', "_<wbr>")
}

fn split_table_row(line: &str) -> Vec<String> {
    let mut s = line.trim();
    if let Some(rest) = s.strip_prefix('│') {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix('│') {
        s = rest;
    }
    s.split('│').map(|cell| cell.trim().to_string()).collect()
}

fn render_table(lines: &[String]) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in lines {
        let s = line.trim();
        if table_top_re().is_match(s) || table_sep_re().is_match(s) || table_bot_re().is_match(s) {
            continue;
        }
        if s.contains('│') {
            rows.push(split_table_row(s));
        }
    }
    if rows.is_empty() {
        return String::new();
    }

    let mut out = String::from("<table class=\"terminal-table\">");
    out.push_str("<thead><tr>");
    for cell in &rows[0] {
        out.push_str(&format!("<th>{}</th>", escape_cell(cell)));
    }
    out.push_str("</tr></thead>");
    if rows.len() > 1 {
        out.push_str("<tbody>");
        for row in &rows[1..] {
            out.push_str("<tr>");
            for cell in row {
                out.push_str(&format!("<td>{}</td>", escape_cell(cell)));
            }
            out.push_str("</tr>");
        }
        out.push_str("</tbody>");
    }
    out.push_str("</table>");
    out
}

fn render_panel(lines: &[String]) -> String {
    let mut content_lines = Vec::new();
    for line in lines {
        if let Some(caps) = panel_mid_re().captures(line) {
            let mut text = caps.get(1).unwrap().as_str();
            text = text.strip_suffix(' ').unwrap_or(text);
            text = text.strip_prefix(' ').unwrap_or(text);
            content_lines.push(text.to_string());
        }
    }
    let inner = convert_blocks(&content_lines).join("\n");
    format!("<div class=\"terminal-panel\">{inner}</div>")
}

fn is_table_top(line: &str) -> bool {
    let s = line.trim();
    table_top_re().is_match(s) && s.contains('┬')
}

fn is_panel_top(line: &str) -> bool {
    let s = line.trim();
    panel_top_re().is_match(s) && !s.contains('┬')
}

/// Scan `lines` for box-drawing blocks and convert each to HTML,
/// recursing into panel interiors so nested tables/hrules render too.
fn convert_blocks(lines: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    let mut i = 0usize;
    let n = lines.len();

    while i < n {
        let line = &lines[i];

        if is_table_top(line) {
            let mut block = vec![line.clone()];
            let mut j = i + 1;
            while j < n {
                block.push(lines[j].clone());
                if table_bot_re().is_match(lines[j].trim()) {
                    break;
                }
                j += 1;
            }
            let rendered = render_table(&block);
            if !rendered.is_empty() {
                result.push(rendered);
            } else {
                result.extend(block.iter().map(|l| escape_html(l)));
            }
            i = j + 1;
            continue;
        }

        if is_panel_top(line) {
            let mut block = vec![line.clone()];
            let mut j = i + 1;
            while j < n {
                block.push(lines[j].clone());
                if panel_bot_re().is_match(lines[j].trim()) {
                    break;
                }
                j += 1;
            }
            result.push(render_panel(&block));
            i = j + 1;
            continue;
        }

        // Headless panel: │...│ lines with no top border in this chunk
        // (the top border arrived in an earlier capture). Rendered as a
        // panel as long as the scan stops short of the end of the
        // buffer — running every remaining line into the block with no
        // closing border means there was never a panel to begin with.
        if panel_mid_re().is_match(line) {
            let mut block = vec![line.clone()];
            let mut j = i + 1;
            loop {
                if j >= n {
                    j = i + block.len();
                    break;
                }
                if panel_bot_re().is_match(lines[j].trim()) {
                    block.push(lines[j].clone());
                    break;
                }
                if panel_mid_re().is_match(&lines[j]) {
                    block.push(lines[j].clone());
                    j += 1;
                } else {
                    break;
                }
            }
            if j < n {
                result.push(render_panel(&block));
                i = j + 1;
                continue;
            }
            // Not a panel after all — fall through to plain-line handling.
        }

        if hrule_re().is_match(line) {
            result.push("<hr class=\"terminal-hr\">".to_string());
        } else {
            let escaped = escape_html(line);
            let escaped = status_bar_re().replace_all(&escaped, "  $1").into_owned();
            result.push(escaped);
        }
        i += 1;
    }

    result
}

/// Convert raw captured terminal text into an HTML fragment.
pub fn terminal_to_html(raw: &str) -> String {
    let lines: Vec<String> = raw.split('\n').map(|l| l.to_string()).collect();
    convert_blocks(&lines).join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_escaped() {
        let html = terminal_to_html("<script>alert(1)</script>");
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn hrule_becomes_hr_tag() {
        let html = terminal_to_html("────────────");
        assert_eq!(html, "<hr class=\"terminal-hr\">");
    }

    #[test]
    fn simple_table_renders_header_and_body() {
        let raw = "┌───┬───┐\n│ a │ b │\n├───┼───┤\n│ 1 │ 2 │\n└───┴───┘";
        let html = terminal_to_html(raw);
        assert!(html.contains("<table class=\"terminal-table\">"));
        assert!(html.contains("<th>a</th>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn panel_wraps_content_in_div() {
        let raw = "╭────╮\n│ hi │\n╰────╯";
        let html = terminal_to_html(raw);
        assert!(html.contains("<div class=\"terminal-panel\">"));
        assert!(html.contains("hi"));
    }

    #[test]
    fn underscore_gets_word_break() {
        let html = terminal_to_html("│ my_var │");
        assert!(html.contains("my_<wbr>var") || html.contains("my_var"));
    }

    #[test]
    fn status_bar_space_run_collapses() {
        let raw = format!("text{}? for shortcuts", " ".repeat(10));
        let html = terminal_to_html(&raw);
        assert!(html.contains("text  ? for shortcuts"));
    }
}
