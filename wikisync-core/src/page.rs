//! Source page model and classification.
//!
//! A [`SourcePage`] is constructed fresh from a fetched [`RawPage`] on
//! every run, never persisted as-is; it is immediately converted into a
//! typed document or discarded.

use chrono::{DateTime, Utc};

use crate::config::DataboxSpec;
use crate::contract::{RawPage, SourceRecord};
use crate::transform::{self, Bylines, Databox, TransformContext};

const STOP_WORDS: &[&str] = &["a", "an", "the"];

/// Derives the sort key from the title when none was authored; normalizes
/// either to lowercase alphanumerics.
///
/// The leading stop word is only dropped when it matches one of the
/// lowercase stop words literally, so `"The Title"` sorts as `"thetitle"`.
pub fn make_titlesort(title_sort: &str, title: &str) -> String {
    let text = if !title_sort.is_empty() {
        title_sort.to_string()
    } else {
        let first_word = title.split(' ').next().unwrap_or("");
        if STOP_WORDS.contains(&first_word) {
            title.replacen(&format!("{first_word} "), "", 1)
        } else {
            title.to_string()
        }
    };
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Which document a page becomes, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Member of the Authors category. Author wins over Article: author
    /// pages are excluded from the article set.
    Author,
    Article,
    /// Matches no variant; recorded in the run report, never written.
    Unpublishable,
}

/// Everything page construction needs besides the page itself, gathered
/// once per run.
#[derive(Debug, Clone, Default)]
pub struct PageContext<'a> {
    /// Titles of all published pages.
    pub published_titles: &'a [String],
    /// Members of the Authors category.
    pub author_titles: &'a [String],
    /// Published article titles sorted A-Z, for prev/next navigation.
    pub articles_az: &'a [String],
    /// Article-type category whitelist, without the `Category:` prefix.
    pub category_whitelist: &'a [String],
    /// Published titles that are site furniture, never articles.
    pub non_article_titles: &'a [String],
    pub databox_specs: &'a [DataboxSpec],
    /// Databox field marking restricted-channel publication.
    pub restricted_field: Option<&'a str>,
    pub transform: TransformContext<'a>,
}

impl<'a> PageContext<'a> {
    /// Classification by title alone; rules in order, Author first.
    pub fn classify(&self, title: &str) -> Classification {
        if self.author_titles.iter().any(|t| t == title) {
            return Classification::Author;
        }
        let lowered = title.to_lowercase();
        if self.published_titles.iter().any(|t| t == title)
            && !self.non_article_titles.contains(&lowered)
        {
            return Classification::Article;
        }
        Classification::Unpublishable
    }
}

/// A wiki page after transformation, ready for conversion into a document.
#[derive(Debug, Clone)]
pub struct SourcePage {
    pub url_title: String,
    pub title: String,
    pub title_sort: String,
    pub published: bool,
    /// False when the page carries a front-channel exclusion marker.
    pub published_front: bool,
    pub published_restricted: bool,
    pub modified: DateTime<Utc>,
    /// Cleaned body fragment.
    pub body: String,
    pub description: String,
    pub categories: Vec<String>,
    pub authors: Bylines,
    /// (lng, lat)
    pub coordinates: Option<(f64, f64)>,
    /// Encyclopedia ids of primary sources embedded in the page.
    pub source_ids: Vec<String>,
    pub databoxes: Vec<Databox>,
    pub prev_page: Option<String>,
    pub next_page: Option<String>,
    pub is_article: bool,
    pub is_author: bool,
    /// Titles of articles attributed to this author; filled by the
    /// orchestrator from backlinks when the page is an author.
    pub author_articles: Vec<String>,
}

impl SourcePage {
    /// Builds a page from fetched data. Pure; all lookups come from the
    /// context so the whole construction is testable offline.
    pub fn build(raw: &RawPage, sources: &[SourceRecord], ctx: &PageContext<'_>) -> SourcePage {
        let classification = ctx.classify(&raw.url_title);
        let is_article = classification == Classification::Article;
        let is_author = classification == Classification::Author;

        let published = raw.categories.iter().any(|c| c == "Published");
        let title_sort = make_titlesort(&raw.default_sort, &raw.display_title);
        let source_ids: Vec<String> = sources
            .iter()
            .map(|s| s.encyclopedia_id.clone())
            .collect();
        let databoxes = transform::extract_databoxes(&raw.html, ctx.databox_specs);
        // Must be checked before the marker divs are removed by the
        // transform below.
        let published_front = !transform::front_channel_excluded(&raw.html);
        let published_restricted = ctx
            .restricted_field
            .is_some_and(|field| transform::restricted_channel_published(&databoxes, field));
        let body = transform::parse_wiki_text(&raw.html, &source_ids, &ctx.transform);

        let mut page = SourcePage {
            url_title: raw.url_title.clone(),
            title: raw.display_title.clone(),
            title_sort,
            published,
            published_front,
            published_restricted,
            modified: raw.modified,
            body,
            description: String::new(),
            categories: Vec::new(),
            authors: Bylines::default(),
            coordinates: None,
            source_ids,
            databoxes,
            prev_page: None,
            next_page: None,
            is_article,
            is_author,
            author_articles: Vec::new(),
        };

        if is_article {
            page.description = transform::extract_description(&page.body);
            // Only categories from the article-type whitelist survive.
            page.categories = raw
                .categories
                .iter()
                .filter(|c| ctx.category_whitelist.contains(*c))
                .cloned()
                .collect();
            (page.prev_page, page.next_page) = neighbors(ctx.articles_az, &raw.url_title);
            page.coordinates = transform::find_coordinates(&raw.html);
            page.authors = transform::find_author_bylines(&raw.html);
        }

        page
    }

    pub fn classification(&self) -> Classification {
        if self.is_author {
            Classification::Author
        } else if self.is_article {
            Classification::Article
        } else {
            Classification::Unpublishable
        }
    }
}

/// Previous and next titles in the A-Z list; out of range means no
/// neighbor, with no wraparound at either end.
fn neighbors(articles_az: &[String], title: &str) -> (Option<String>, Option<String>) {
    let Some(index) = articles_az.iter().position(|t| t == title) else {
        return (None, None);
    };
    let prev = index.checked_sub(1).map(|i| articles_az[i].clone());
    let next = articles_az.get(index + 1).cloned();
    (prev, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titlesort_prefers_explicit_sort_key() {
        assert_eq!(make_titlesort("abesanji", "Sanji Abe"), "abesanji");
        assert_eq!(make_titlesort("Sanji Abe", "Sanji Abe"), "sanjiabe");
        assert_eq!(make_titlesort("", "Sanji Abe"), "sanjiabe");
        assert_eq!(make_titlesort("", "The Title"), "thetitle");
    }

    #[test]
    fn titlesort_strips_literal_stop_words() {
        assert_eq!(make_titlesort("", "the title"), "title");
        assert_eq!(make_titlesort("", "an owl"), "owl");
    }

    #[test]
    fn neighbors_do_not_wrap_around() {
        let titles: Vec<String> = ["Aiko", "Ben", "Chiyo"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(neighbors(&titles, "Aiko"), (None, Some("Ben".to_string())));
        assert_eq!(
            neighbors(&titles, "Ben"),
            (Some("Aiko".to_string()), Some("Chiyo".to_string()))
        );
        assert_eq!(neighbors(&titles, "Chiyo"), (Some("Ben".to_string()), None));
        assert_eq!(neighbors(&titles, "Missing"), (None, None));
    }

    #[test]
    fn author_wins_over_article() {
        let published = vec!["Tom Coffman".to_string(), "Manzanar".to_string()];
        let authors = vec!["Tom Coffman".to_string()];
        let non_article = vec!["about".to_string()];
        let ctx = PageContext {
            published_titles: &published,
            author_titles: &authors,
            non_article_titles: &non_article,
            ..PageContext::default()
        };
        assert_eq!(ctx.classify("Tom Coffman"), Classification::Author);
        assert_eq!(ctx.classify("Manzanar"), Classification::Article);
        assert_eq!(ctx.classify("Unknown"), Classification::Unpublishable);
    }

    #[test]
    fn static_pages_are_not_articles() {
        let published = vec!["About".to_string()];
        let non_article: Vec<String> = crate::config::NON_ARTICLE_TITLES
            .iter()
            .map(|t| t.to_string())
            .collect();
        let ctx = PageContext {
            published_titles: &published,
            non_article_titles: &non_article,
            ..PageContext::default()
        };
        assert_eq!(ctx.classify("About"), Classification::Unpublishable);
    }
}
