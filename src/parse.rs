use std::sync::{Arc, OnceLock};

use regex::Regex;
use scraper::{Html, Node, Selector};
use tokio::task::spawn_blocking;

use crate::{Error, Result};

/// Label the school directory prints above the postal address.
const ADDRESS_LABEL: &str = "Adress";

/// Attempts to find the postal address on a school page.
/// HTML parsing is blocking work, so it runs on the blocking pool.
pub(crate) async fn parse_address(html: Arc<String>) -> Result<Option<String>> {
    let address = spawn_blocking(move || extract_address(&html)).await??;
    Ok(address)
}

/// Collects the visible text lines of the page body and looks for the line
/// after the `Adress` label, falling back to an inline `Adress: ...` match.
pub fn extract_address(html: &str) -> Result<Option<String>> {
    let lines = text_lines(html)?;

    let labelled = lines
        .windows(2)
        .find(|pair| pair[0] == ADDRESS_LABEL && pair[1].chars().count() > 3)
        .map(|pair| pair[1].clone());
    if labelled.is_some() {
        return Ok(labelled);
    }

    let inline = inline_pattern();
    Ok(lines.iter().find_map(|line| {
        inline
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|a| !a.is_empty())
    }))
}

/// Every non-empty text node under `<body>`, trimmed, in document order.
/// Script and style contents are skipped.
fn text_lines(html: &str) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let body_selector = create_selector("body")?;

    let mut lines = Vec::new();
    for body in doc.select(&body_selector) {
        for node in body.descendants() {
            let Node::Text(text) = node.value() else {
                continue;
            };
            let in_code = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript"));
            if in_code {
                continue;
            }
            lines.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from),
            );
        }
    }
    Ok(lines)
}

fn inline_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Adress:?\s*(.+)").expect("address pattern is valid"))
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}
