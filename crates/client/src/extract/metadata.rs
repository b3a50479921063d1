//! Document metadata from `<meta>`/`<link>` tags and JSON-LD blocks.
//!
//! Open Graph and article tags win over plain HTML tags; JSON-LD fills
//! whatever the tags left empty.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scrape_core::Metadata;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("invalid selector")
}

/// Collapse runs of whitespace into single spaces.
pub(crate) fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr_values(doc: &Html, css: &str, attr: &str) -> Vec<String> {
    doc.select(&selector(css))
        .filter_map(|el| el.value().attr(attr))
        .map(collapse)
        .filter(|value| !value.is_empty())
        .collect()
}

fn first_content(doc: &Html, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|css| attr_values(doc, css, "content").into_iter().next())
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    doc.select(&selector(css))
        .map(|el| collapse(&el.text().collect::<String>()))
        .find(|text| !text.is_empty())
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = collapse(value);
    if !value.is_empty() && !list.contains(&value) {
        list.push(value);
    }
}

/// Parse the date formats pages commonly publish.
pub(crate) fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(date.and_utc());
    }
    let day = NaiveDate::parse_from_str(value.get(..10)?, "%Y-%m-%d").ok()?;
    Some(day.and_hms_opt(0, 0, 0)?.and_utc())
}

/// `<link rel=canonical>` resolved against `base`.
pub(crate) fn canonical_link(doc: &Html, base: &Url) -> Option<Url> {
    doc.select(&selector(r#"link[rel="canonical"][href]"#))
        .filter_map(|el| el.value().attr("href"))
        .find_map(|href| resolve(base, href))
}

pub(crate) fn read_metadata(doc: &Html, base: &Url) -> Metadata {
    let mut authors = Vec::new();
    for author in attr_values(doc, r#"meta[name="author"], meta[property="article:author"]"#, "content") {
        push_unique(&mut authors, &author);
    }

    let mut tags = Vec::new();
    for keywords in attr_values(doc, r#"meta[name="keywords"]"#, "content") {
        for keyword in keywords.split(',') {
            push_unique(&mut tags, keyword);
        }
    }
    for tag in attr_values(doc, r#"meta[property="article:tag"]"#, "content") {
        push_unique(&mut tags, &tag);
    }

    let mut categories = Vec::new();
    for section in attr_values(doc, r#"meta[property="article:section"]"#, "content") {
        push_unique(&mut categories, &section);
    }

    let date = first_content(
        doc,
        &[r#"meta[property="article:published_time"]"#, r#"meta[name="date"]"#, r#"meta[itemprop="datePublished"]"#],
    )
    .or_else(|| attr_values(doc, "time[datetime]", "datetime").into_iter().next())
    .and_then(|value| parse_date(&value));

    let language = doc
        .root_element()
        .value()
        .attr("lang")
        .map(collapse)
        .filter(|lang| !lang.is_empty())
        .or_else(|| first_content(doc, &[r#"meta[http-equiv="content-language"]"#]))
        .unwrap_or_default();

    let image = first_content(doc, &[r#"meta[property="og:image"]"#, r#"meta[name="twitter:image"]"#])
        .and_then(|src| resolve(base, &src))
        .map(String::from)
        .unwrap_or_default();

    let license = attr_values(doc, r#"link[rel="license"][href]"#, "href")
        .iter()
        .find_map(|href| resolve(base, href))
        .map(String::from)
        .unwrap_or_default();

    let mut metadata = Metadata {
        title: first_content(doc, &[r#"meta[property="og:title"]"#, r#"meta[name="twitter:title"]"#])
            .or_else(|| first_text(doc, "title"))
            .or_else(|| first_text(doc, "h1"))
            .unwrap_or_default(),
        description: first_content(
            doc,
            &[r#"meta[name="description"]"#, r#"meta[property="og:description"]"#, r#"meta[name="twitter:description"]"#],
        )
        .unwrap_or_default(),
        sitename: first_content(doc, &[r#"meta[property="og:site_name"]"#, r#"meta[name="application-name"]"#])
            .unwrap_or_default(),
        authors,
        date,
        categories,
        tags,
        language,
        image,
        page_type: first_content(doc, &[r#"meta[property="og:type"]"#]).unwrap_or_default(),
        license,
        ..Metadata::default()
    };

    for block in linked_data(doc) {
        merge_linked_data(&mut metadata, &block);
    }
    metadata
}

/// Every JSON-LD object on the page, with `@graph` and arrays flattened.
fn linked_data(doc: &Html) -> Vec<Value> {
    let mut objects = Vec::new();
    for script in doc.select(&selector(r#"script[type="application/ld+json"]"#)) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => flatten_linked_data(value, &mut objects),
            Err(e) => tracing::debug!(error = %e, "ignoring malformed JSON-LD block"),
        }
    }
    objects
}

fn flatten_linked_data(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.into_iter().for_each(|item| flatten_linked_data(item, out)),
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten_linked_data(graph, out);
            }
            out.push(Value::Object(map));
        }
        _ => {}
    }
}

fn names(value: &Value) -> Vec<String> {
    match value {
        Value::String(name) => vec![name.clone()],
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(String::from).into_iter().collect(),
        Value::Array(items) => items.iter().flat_map(names).collect(),
        _ => Vec::new(),
    }
}

fn merge_linked_data(metadata: &mut Metadata, block: &Value) {
    if metadata.title.is_empty()
        && let Some(headline) = block.get("headline").and_then(Value::as_str)
    {
        metadata.title = collapse(headline);
    }
    if metadata.description.is_empty()
        && let Some(description) = block.get("description").and_then(Value::as_str)
    {
        metadata.description = collapse(description);
    }
    if metadata.date.is_none() {
        metadata.date = block.get("datePublished").and_then(Value::as_str).and_then(parse_date);
    }
    if metadata.authors.is_empty()
        && let Some(author) = block.get("author")
    {
        for name in names(author) {
            push_unique(&mut metadata.authors, &name);
        }
    }
    if metadata.sitename.is_empty()
        && let Some(publisher) = block.get("publisher")
        && let Some(name) = names(publisher).into_iter().next()
    {
        metadata.sitename = collapse(&name);
    }
    if metadata.categories.is_empty()
        && let Some(section) = block.get("articleSection")
    {
        for name in names(section) {
            push_unique(&mut metadata.categories, &name);
        }
    }
    if metadata.tags.is_empty() {
        match block.get("keywords") {
            Some(Value::String(keywords)) => keywords.split(',').for_each(|k| push_unique(&mut metadata.tags, k)),
            Some(keywords @ Value::Array(_)) => names(keywords).iter().for_each(|k| push_unique(&mut metadata.tags, k)),
            _ => {}
        }
    }
}
