//! HTML text extraction shared by the local extractor and the page fetcher

use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static META: Lazy<Selector> = Lazy::new(|| Selector::parse("meta[name], meta[property]").unwrap());
static BLOCKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("body h1, body h2, body h3, body h4, body h5, body h6, body p, body li, body pre, body blockquote, body td, body th")
        .unwrap()
});
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Text and metadata pulled out of an HTML page
#[derive(Debug, Clone, Default)]
pub struct HtmlText {
    pub title: Option<String>,
    /// Block-level text, one block per line
    pub text: String,
    /// `<meta name|property=... content=...>` pairs
    pub meta: Vec<(String, String)>,
    /// Raw `href` values
    pub links: Vec<String>,
}

/// Parse an HTML page into readable text
pub fn extract_html(html: &str) -> HtmlText {
    let document = Html::parse_document(html);

    let title = document
        .select(&TITLE)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let meta = document
        .select(&META)
        .filter_map(|m| {
            let el = m.value();
            let key = el.attr("name").or_else(|| el.attr("property"))?;
            let content = el.attr("content")?;
            Some((key.to_string(), content.to_string()))
        })
        .collect();

    let mut blocks: Vec<String> = document
        .select(&BLOCKS)
        .map(|b| collapse_whitespace(&b.text().collect::<String>()))
        .filter(|b| !b.is_empty())
        .collect();

    // Pages without block markup: fall back to all body text
    if blocks.is_empty() {
        if let Some(body) = document.select(&BODY).next() {
            let text = collapse_whitespace(&body.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                blocks.push(text);
            }
        }
    }
    blocks.dedup();

    let links = document
        .select(&LINKS)
        .filter_map(|a| a.value().attr("href").map(str::to_string))
        .collect();

    HtmlText {
        title,
        text: blocks.join("\n"),
        meta,
        links,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
