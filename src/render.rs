//! Result rendering for the HTML page and the terminal.

use std::fmt::Write as _;

use crate::controls::DEFAULT_QUERY;
use crate::pipeline::{PassageDisplay, ResultRecord, SearchOutcome};

/// Message shown when no candidate survives retrieval and filtering.
pub const NO_ANSWER_MESSAGE: &str = "Sorry, no answer found";

/// Escapes text for interpolation into HTML element content or attributes.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders the full results page: search form plus result sections.
pub fn render_page(query: &str, outcome: &SearchOutcome) -> String {
    let mut html = String::new();
    html.push_str("<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Extractive Search</title>\n");
    html.push_str(
        "<style>body{font-family:sans-serif;max-width:48rem;margin:2rem auto;padding:0 1rem}\
         mark{background:#fdfdc9}.score{color:#666}</style>\n",
    );
    html.push_str("</head>\n<body>\n<h1>Extractive Search</h1>\n");
    let _ = write!(
        html,
        "<form method=\"get\" action=\"/\">\
         <input type=\"text\" name=\"query\" size=\"60\" value=\"{}\" placeholder=\"{}\">\
         <button type=\"submit\">Search</button></form>\n",
        html_escape(query),
        html_escape(DEFAULT_QUERY)
    );

    if outcome.is_empty() {
        let _ = write!(html, "<p>{}</p>\n", NO_ANSWER_MESSAGE);
    } else {
        for record in &outcome.records {
            html.push_str(&render_section(record));
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_section(record: &ResultRecord) -> String {
    let mut html = String::new();
    if record.show_header {
        let _ = write!(
            html,
            "<h3><a href=\"{}\">{}</a></h3>\n",
            html_escape(&record.url),
            html_escape(&record.title)
        );
    }
    let _ = write!(html, "<p><span class=\"score\">({:.2})</span> ", record.score);
    match &record.passage {
        PassageDisplay::Plain { text } => {
            html.push_str(&html_escape(text));
        }
        PassageDisplay::Highlighted {
            before,
            answer,
            after,
            fragment_url,
        } => {
            let _ = write!(
                html,
                "{}<a href=\"{}\"><mark>{}</mark></a>{}",
                html_escape(before),
                html_escape(fragment_url),
                html_escape(answer),
                html_escape(after)
            );
        }
    }
    html.push_str("</p>\n");
    html
}

/// Renders results for the terminal, wrapping answer spans in `«…»`.
pub fn render_plain(outcome: &SearchOutcome) -> String {
    if outcome.is_empty() {
        return format!("{}\n", NO_ANSWER_MESSAGE);
    }
    let mut out = String::new();
    for record in &outcome.records {
        if record.show_header {
            let _ = writeln!(out, "## {} <{}>", record.title, record.url);
        }
        match &record.passage {
            PassageDisplay::Plain { text } => {
                let _ = writeln!(out, "({:.2}) {}", record.score, text.trim());
            }
            PassageDisplay::Highlighted {
                before,
                answer,
                after,
                ..
            } => {
                let _ = writeln!(
                    out,
                    "({:.2}) {}«{}»{}",
                    record.score,
                    before,
                    answer,
                    after.trim_end()
                );
            }
        }
        out.push('\n');
    }
    out
}
