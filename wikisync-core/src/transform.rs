//! HTML transformation: wiki parser output in, publishable body fragment out.
//!
//! Pure and deterministic; no network or storage access. The pipeline is a
//! sequence of DOM passes over a parsed tree followed by string-level
//! rewrites of the serialized output. The two phases are a deliberate
//! design and their ordering is part of the contract: the final tag
//! stripping operates on serialized output, so collapsing the phases would
//! change the output byte-for-byte.
//!
//! Malformed markup never raises; the parser is lenient and a missing
//! marker simply yields an empty extraction.

use std::sync::LazyLock;

use ego_tree::{NodeId, NodeRef, Tree};
use regex::Regex;
use scraper::node::{Comment, Node};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::config::{DataboxSpec, TagSelector};

/// Wiki-internal path stubs dropped from every URL in the serialized body.
/// Longest prefix first.
const WIKI_URL_PATTERNS: &[&str] = &["/mediawiki/index.php", "/mediawiki"];

const TOPLINK_HTML: &str =
    r##"<div class="toplink"><a href="#top"><i class="icon-chevron-up"></i> Top</a></div>"##;

/// Site context for a transform run.
#[derive(Debug, Clone, Default)]
pub struct TransformContext<'a> {
    /// Subtrees to remove, as `attr=value` selectors.
    pub hidden_selectors: &'a [TagSelector],
    /// Leave an HTML comment where each hidden subtree was removed, so
    /// published output stays diffable against the wiki rendering.
    pub hidden_comments: bool,
    /// Print rendering skips the "back to top" anchors.
    pub printed: bool,
}

/// Parses and cleans the body of a wiki page.
///
/// `source_ids` are the encyclopedia ids of the primary sources known to
/// be embedded in this page; their thumbnail links are removed from the
/// body because sources are displayed in a separate sidebar.
pub fn parse_wiki_text(html: &str, source_ids: &[String], ctx: &TransformContext) -> String {
    let body = html.replace("<p><br />\n</p>", "");
    let mut doc = Html::parse_document(&body);
    remove_static_titles(&mut doc);
    remove_edit_links(&mut doc);
    rewrite_newpage_links(&mut doc);
    rewrite_listing_links(&mut doc);
    remove_status_markers(&mut doc);
    if !ctx.printed {
        insert_top_links(&mut doc);
    }
    remove_hidden_tags(&mut doc, ctx.hidden_selectors, ctx.hidden_comments);
    remove_front_excluded(&mut doc);
    remove_source_links(&mut doc, source_ids);
    let serialized = doc.root_element().html();
    strip_wrapper_tags(&rewrite_wiki_urls(&serialized))
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

fn detach_all(doc: &mut Html, css: &str) {
    let sel = selector(css);
    let ids: Vec<NodeId> = doc.select(&sel).map(|el| el.id()).collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// "Static" pages carry a redundant `<h1>` in the page body; the title is
/// served separately, so the heading is stripped here.
fn remove_static_titles(doc: &mut Html) {
    detach_all(doc, "h1");
}

/// Removes `[edit]` affordances. Security precaution: readers must not be
/// able to find edit entry points.
fn remove_edit_links(doc: &mut Html) {
    detach_all(doc, "span.mw-editsection");
}

/// Removes the editorial status banners ("this page is complete" etc.).
fn remove_status_markers(doc: &mut Html) {
    detach_all(doc, "div.alert.published");
}

/// Removes subtrees excluded from the front channel.
fn remove_front_excluded(doc: &mut Html) {
    detach_all(doc, "div.nopublish-front");
}

fn rewrite_hrefs<F>(doc: &mut Html, css: &str, rewrite: F)
where
    F: Fn(&str) -> String,
{
    let sel = selector(css);
    let changes: Vec<(NodeId, String)> = doc
        .select(&sel)
        .filter_map(|el| el.value().attr("href").map(|href| (el.id(), rewrite(href))))
        .collect();
    for (id, href) in changes {
        if let Some(mut node) = doc.tree.get_mut(id) {
            if let Node::Element(el) = node.value() {
                for (name, value) in el.attrs.iter_mut() {
                    if &*name.local == "href" {
                        *value = href.as_str().into();
                    }
                }
            }
        }
    }
}

/// Rewrites create-new-page links from query-string form to path form,
/// e.g. `/index.php?title=Nisei&action=edit&redlink=1` -> `/Nisei`.
fn rewrite_newpage_links(doc: &mut Html) {
    rewrite_hrefs(doc, r#"a[href*="action=edit"]"#, |href| {
        href.replace("?title=", "/")
            .replace("&action=edit", "")
            .replace("&redlink=1", "")
    });
}

/// Rewrites the previous/next links of paginated category listings,
/// e.g. `/index.php?title=Category:X&pagefrom=Y` -> `/Category:X?pagefrom=Y`.
fn rewrite_listing_links(doc: &mut Html) {
    rewrite_hrefs(doc, r#"a[href*="pagefrom="]"#, |href| {
        href.replace("?title=", "/").replace("&pagefrom=", "?pagefrom=")
    });
    rewrite_hrefs(doc, r#"a[href*="pageuntil="]"#, |href| {
        href.replace("?title=", "/").replace("&pageuntil=", "?pageuntil=")
    });
}

fn is_toplink(el: ElementRef) -> bool {
    el.value()
        .attr("class")
        .is_some_and(|c| c.split_whitespace().any(|c| c == "toplink"))
}

fn preceded_by_toplink(doc: &Html, id: NodeId) -> bool {
    doc.tree
        .get(id)
        .and_then(|node| node.prev_siblings().find_map(ElementRef::wrap))
        .is_some_and(is_toplink)
}

fn copy_children(src: NodeRef<'_, Node>, dest: NodeId, tree: &mut Tree<Node>) {
    for child in src.children() {
        let id = match tree.get_mut(dest) {
            Some(mut node) => node.append(child.value().clone()).id(),
            None => return,
        };
        copy_children(child, id, tree);
    }
}

/// Adds `^ Top` anchors at the end of page sections: before the third and
/// later `<h2>` headers, and at the very end of the page. Headers already
/// carrying an anchor are left alone, so re-running the transform on its
/// own output changes nothing.
fn insert_top_links(doc: &mut Html) {
    let snippet = Html::parse_fragment(TOPLINK_HTML);
    let toplink_sel = selector("div.toplink");
    let Some(template) = snippet.select(&toplink_sel).next() else {
        return;
    };

    let h2_ids: Vec<NodeId> = doc.select(&selector("h2")).map(|el| el.id()).collect();
    for id in h2_ids.iter().skip(2) {
        if preceded_by_toplink(doc, *id) {
            continue;
        }
        let new_id = match doc.tree.get_mut(*id) {
            Some(mut h2) => h2
                .insert_before(Node::Element(template.value().clone()))
                .id(),
            None => continue,
        };
        copy_children(*template, new_id, &mut doc.tree);
    }

    let body_sel = selector("body");
    let (body_id, last_is_toplink) = {
        let Some(body) = doc.select(&body_sel).next() else {
            return;
        };
        let last = body.children().filter_map(ElementRef::wrap).last();
        (body.id(), last.is_some_and(is_toplink))
    };
    if !last_is_toplink {
        let new_id = match doc.tree.get_mut(body_id) {
            Some(mut body) => body.append(Node::Element(template.value().clone())).id(),
            None => return,
        };
        copy_children(*template, new_id, &mut doc.tree);
    }
}

/// Strips configured subtrees, optionally leaving a comment placeholder.
fn remove_hidden_tags(doc: &mut Html, selectors: &[TagSelector], comments: bool) {
    for tag in selectors {
        let css = format!("[{}=\"{}\"]", tag.attr, tag.value);
        let Ok(sel) = Selector::parse(&css) else {
            tracing::warn!(attr = %tag.attr, value = %tag.value, "unusable hidden tag selector, skipping");
            continue;
        };
        let ids: Vec<NodeId> = doc.select(&sel).map(|el| el.id()).collect();
        for id in ids {
            if let Some(mut node) = doc.tree.get_mut(id) {
                if comments {
                    let text = format!("\"{}\" removed", tag.value);
                    node.insert_before(Node::Comment(Comment {
                        comment: text.as_str().into(),
                    }));
                }
                node.detach();
            }
        }
    }
}

/// Removes every thumbnail link whose image resolves to a known primary
/// source. Sources are displayed in a sidebar elsewhere, not inline.
fn remove_source_links(doc: &mut Html, source_ids: &[String]) {
    let link_sel = selector("a.image");
    let img_sel = selector("img");
    let ids: Vec<NodeId> = doc
        .select(&link_sel)
        .filter(|a| {
            a.select(&img_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
                .and_then(extract_source_id)
                .is_some_and(|eid| source_ids.contains(&eid))
        })
        .map(|el| el.id())
        .collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn rewrite_wiki_urls(html: &str) -> String {
    let mut html = html.to_string();
    for pattern in WIKI_URL_PATTERNS {
        html = html.replace(pattern, "");
    }
    html
}

/// The transformer returns a body fragment, not a full document.
fn strip_wrapper_tags(html: &str) -> String {
    html.replace("<html>", "")
        .replace("</html>", "")
        .replace("<head></head>", "")
        .replace("<body>", "")
        .replace("</body>", "")
}

/// Attempts to extract an encyclopedia id from an image URI.
///
/// Thumbnail URIs keep the original filename as the parent directory:
/// `.../thumb/a/ab/en-denshopd-i37-00239-1.jpg/200px-en-....jpg`.
pub fn extract_source_id(uri: &str) -> Option<String> {
    let filename = if uri.contains("thumb") {
        let dir = uri.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(uri);
        dir.rsplit('/').next().unwrap_or(dir)
    } else {
        uri.rsplit('/').next().unwrap_or(uri)
    };
    let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// First paragraph of the *cleaned* body that is not a databox fragment.
pub fn extract_description(body: &str) -> String {
    let doc = Html::parse_document(body);
    let p_sel = selector("p");
    for p in doc.select(&p_sel) {
        let text: String = p.text().collect();
        if !text.trim().is_empty() && !text.contains(";\n") {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// One value of a databox field; `Title:A Bridge Between Us;` is a single
/// value, `Genre:Fiction; Drama;` becomes a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataboxValue {
    One(String),
    Many(Vec<String>),
}

impl DataboxValue {
    pub fn is_empty(&self) -> bool {
        match self {
            DataboxValue::One(v) => v.is_empty(),
            DataboxValue::Many(v) => v.is_empty(),
        }
    }
}

/// A hidden structured key/value block embedded in wiki HTML, e.g.
///
/// ```html
/// <div id="databox-Books" style="display:none;">
/// <p>Title:A Bridge Between Us;
/// Author:Julie Shigekuni;
/// </p>
/// </div>
/// ```
///
/// Field order is preserved as authored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Databox {
    pub div_id: String,
    pub prefix: String,
    pub fields: Vec<(String, DataboxValue)>,
}

impl Databox {
    pub fn get(&self, key: &str) -> Option<&DataboxValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Finds the configured databox marker divs in the *original* (uncleaned)
/// HTML and parses their `key:value;` lines. Keys are lowercased; values
/// keep inline markup verbatim.
pub fn extract_databoxes(html: &str, specs: &[DataboxSpec]) -> Vec<Databox> {
    let doc = Html::parse_document(html);
    let p_sel = selector("p");
    let mut boxes = Vec::new();
    for spec in specs {
        let Ok(sel) = Selector::parse(&format!("[id=\"{}\"]", spec.div_id)) else {
            continue;
        };
        let Some(tag) = doc.select(&sel).next() else {
            continue;
        };
        let Some(p) = tag.select(&p_sel).next() else {
            continue;
        };
        // Contents are a mix of text runs and inline tags like <i>; keep
        // the tags by re-serializing them into one big string.
        let mut parts = String::new();
        for child in p.children() {
            match child.value() {
                Node::Text(text) => parts.push_str(&text.text),
                _ => {
                    if let Some(el) = ElementRef::wrap(child) {
                        parts.push_str(&el.html());
                    }
                }
            }
        }
        let mut fields = Vec::new();
        for line in parts.split('\n') {
            let line = line.trim();
            // Many field values contain colons; split on the first only.
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            if key.trim().is_empty() {
                continue;
            }
            let value = value.trim().trim_end_matches(';').trim();
            let value = if value.contains(';') {
                DataboxValue::Many(
                    value
                        .split(';')
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .map(String::from)
                        .collect(),
                )
            } else {
                DataboxValue::One(value.to_string())
            };
            fields.push((key.trim().to_lowercase(), value));
        }
        boxes.push(Databox {
            div_id: spec.div_id.clone(),
            prefix: spec.prefix.clone(),
            fields,
        });
    }
    boxes
}

/// True when any databox declares a non-empty value for the
/// restricted-channel field.
pub fn restricted_channel_published(databoxes: &[Databox], field: &str) -> bool {
    databoxes
        .iter()
        .any(|b| b.get(field).is_some_and(|v| !v.is_empty()))
}

/// True when the page carries a front-channel exclusion marker. Must be
/// checked against the original HTML, before the marker divs are removed.
pub fn front_channel_excluded(html: &str) -> bool {
    let doc = Html::parse_document(html);
    doc.select(&selector("div.nopublish-front")).next().is_some()
}

static GIS_LNG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GISLo*ng: (-?[0-9]+\.[0-9]+)").unwrap());
static GIS_LAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"GISLat: (-?[0-9]+\.[0-9]+)").unwrap());

/// Best-effort scan for coordinates in the camps databox.
///
/// Takes the *last* matching longitude and latitude when several appear.
/// Returns (lng, lat).
pub fn find_coordinates(html: &str) -> Option<(f64, f64)> {
    if !html.contains("databox-Camps") {
        return None;
    }
    let lng = GIS_LNG
        .captures_iter(html)
        .last()
        .and_then(|c| c[1].parse().ok());
    let lat = GIS_LAT
        .captures_iter(html)
        .last()
        .and_then(|c| c[1].parse().ok());
    match (lng, lat) {
        (Some(lng), Some(lat)) => Some((lng, lat)),
        _ => None,
    }
}

/// Byline information extracted from a page body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bylines {
    /// Display names, in byline order.
    pub display: Vec<String>,
    /// Parsed `[surname, given name]` pairs from the citation block.
    pub parsed: Vec<Vec<String>>,
}

/// Extracts author display and citation names from the raw page HTML:
///
/// ```html
/// <div id="authorByline"><b>Authored by
///   <a href="/Tom_Coffman" title="Tom Coffman">Tom Coffman</a></b></div>
/// <div id="citationAuthor" style="display:none;">Coffman, Tom</div>
/// ```
pub fn find_author_bylines(html: &str) -> Bylines {
    let doc = Html::parse_document(&html.replace("<p><br />\n</p>", ""));
    let mut bylines = Bylines::default();
    for byline in doc.select(&selector("div#authorByline")) {
        for a in byline.select(&selector("a")) {
            let name = a.text().collect::<String>().trim().to_string();
            if !name.is_empty() {
                bylines.display.push(name);
            }
        }
    }
    for citation in doc.select(&selector("div#citationAuthor")) {
        let text: String = citation.text().collect();
        for part in text.trim().split(';') {
            let names: Vec<&str> = if part.contains(" and ") {
                part.split(" and ").collect()
            } else {
                vec![part]
            };
            for name in names {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let pieces: Vec<&str> = name.split(',').collect();
                if pieces.len() == 2 {
                    bylines
                        .parsed
                        .push(vec![pieces[0].trim().to_string(), pieces[1].trim().to_string()]);
                } else {
                    bylines.parsed.push(vec![name.to_string()]);
                }
            }
        }
    }
    bylines
}

static EXTERNAL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"http://ddr\.densho\.org/(\w+)/(\w+)/(\d+)/(\d+)/").unwrap()
});

/// Normalizes archive links still written in the legacy slash form:
///
/// - `http://lccn.loc.gov/sn83025333` -> unchanged
/// - `http://ddr.densho.org/ddr-densho-67-19/` -> unchanged
/// - `http://ddr.densho.org/ddr/densho/67/19/` -> `http://ddr.densho.org/ddr-densho-67-19/`
pub fn fix_external_url(url: &str) -> String {
    EXTERNAL_URL
        .replace(url, "http://ddr.densho.org/${1}-${2}-${3}-${4}/")
        .into_owned()
}
