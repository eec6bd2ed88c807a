use chrono::{DateTime, TimeZone, Utc};

use wikisync_core::config::{
    DocstoreConfig, SourcesConfig, SyncConfig, WikiConfig, NON_ARTICLE_TITLES,
};
use wikisync_core::contract::{
    MockContentSource, MockDocStore, MockSourceCatalog, RawPage, SourceRecord, Stamp,
};
use wikisync_core::document::{Article, Author, DocKind, Document, PrimarySource};
use wikisync_core::publish::{
    publish_articles, publish_authors, publish_sources, PublishOptions, Stage,
};
use wikisync_core::error::SyncError;

fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 1, 1, 0, minute, 0).unwrap()
}

fn stamp(key: &str, minute: u32) -> Stamp {
    Stamp::new(key, ts(minute))
}

fn test_config() -> SyncConfig {
    SyncConfig {
        wiki: WikiConfig {
            api_url: "http://wiki.local/api.php".to_string(),
            username: "sync".to_string(),
            password: "secret".to_string(),
            http_user: None,
            http_pass: None,
            timeout_secs: 5,
        },
        sources: SourcesConfig {
            api_url: "http://psms.local/api/v1".to_string(),
            http_user: None,
            http_pass: None,
            media_bucket: "media".to_string(),
            media_url: "http://media.local/".to_string(),
            streaming_prefix: None,
            timeout_secs: 5,
        },
        docstore: DocstoreConfig {
            url: "http://docstore.local:9200".to_string(),
            index_prefix: "wiki".to_string(),
            timeout_secs: 5,
        },
        hidden_categories: vec!["NeedsReview".to_string()],
        hidden_tags: vec![],
        hidden_tag_comments: true,
        non_article_titles: NON_ARTICLE_TITLES.iter().map(|t| t.to_string()).collect(),
        databoxes: vec![],
        restricted_field: None,
        show_unpublished: false,
    }
}

fn raw_page(title: &str, minute: u32, published: bool) -> RawPage {
    let mut categories = vec!["Camps".to_string()];
    if published {
        categories.push("Published".to_string());
    }
    RawPage {
        url_title: title.to_string(),
        display_title: title.to_string(),
        html: "<p>Body text.</p>".to_string(),
        categories,
        default_sort: String::new(),
        images: vec![],
        modified: ts(minute),
    }
}

fn article_doc(key: &str, minute: u32) -> Document {
    Document::Article(Article {
        url_title: key.to_string(),
        title: key.to_string(),
        title_sort: key.to_lowercase(),
        description: String::new(),
        body: String::new(),
        modified: ts(minute),
        published: true,
        published_front: true,
        published_restricted: false,
        categories: vec![],
        coordinates: None,
        authors: vec![],
        authors_citation: vec![],
        source_ids: vec![],
        prev_page: None,
        next_page: None,
        databoxes: vec![],
    })
}

#[tokio::test]
async fn articles_end_to_end_scenario() {
    // source {A: t=10, B: t=5}, index {A: t=5, C: t=1}
    // expected: upsert {A, B}, delete {C}
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("A", 10), stamp("B", 5)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories()
        .returning(|| Ok(vec!["Category:Camps".to_string()]));
    wiki.expect_page_source()
        .returning(|title| Ok(raw_page(title, 10, true)));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store
        .expect_list()
        .returning(|_| Ok(vec![stamp("A", 5), stamp("C", 1)]));
    store
        .expect_delete()
        .withf(|kind, key| *kind == DocKind::Articles && key == "C")
        .times(1)
        .returning(|_, _| Ok(()));
    store
        .expect_get()
        .returning(|_, key| Ok(Some(article_doc(key, 5))));
    store.expect_upsert().times(2).returning(|_| Ok(()));

    let report = publish_articles(
        &wiki,
        &catalog,
        &store,
        &test_config(),
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.considered, 3);
    assert_eq!(report.updated, 2);
    assert_eq!(report.created, 0);
    assert_eq!(report.deleted, 1);
    assert!(report.failed.is_empty());
    assert!(report.unpublishable.is_empty());
}

#[tokio::test]
async fn author_pages_are_excluded_from_the_article_set() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("Manzanar", 10), stamp("Tom Coffman", 10)]));
    wiki.expect_author_titles()
        .returning(|| Ok(vec!["Tom Coffman".to_string()]));
    wiki.expect_article_categories()
        .returning(|| Ok(vec!["Category:Camps".to_string()]));
    wiki.expect_page_source()
        .withf(|title| title == "Manzanar")
        .times(1)
        .returning(|title| Ok(raw_page(title, 10, true)));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![]));
    // First get: does not exist yet. The readback get must see the write.
    store.expect_get().times(1).returning(|_, _| Ok(None));
    store
        .expect_get()
        .returning(|_, key| Ok(Some(article_doc(key, 10))));
    store.expect_upsert().times(1).returning(|_| Ok(()));

    let report = publish_articles(
        &wiki,
        &catalog,
        &store,
        &test_config(),
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.created, 1);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn one_failed_key_does_not_abort_the_batch() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("Bad", 10), stamp("Good", 10)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));
    wiki.expect_page_source().returning(|title| {
        if title == "Bad" {
            Err(SyncError::MissingPage(title.to_string()))
        } else {
            Ok(raw_page(title, 10, true))
        }
    });

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![]));
    store
        .expect_get()
        .returning(|_, key| Ok(Some(article_doc(key, 10))));
    store.expect_upsert().times(1).returning(|_| Ok(()));

    let report = publish_articles(
        &wiki,
        &catalog,
        &store,
        &test_config(),
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "Bad");
    assert_eq!(report.failed[0].stage, Stage::Fetch);
    assert_eq!(report.updated, 1);
}

#[tokio::test]
async fn unpublished_pages_are_removed_from_the_index() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("A", 10)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));
    // The listing still carries the page but its detail has lost the
    // Published category.
    wiki.expect_page_source()
        .returning(|title| Ok(raw_page(title, 10, false)));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![stamp("A", 5)]));
    store
        .expect_delete()
        .withf(|kind, key| *kind == DocKind::Articles && key == "A")
        .times(1)
        .returning(|_, _| Ok(()));
    store.expect_upsert().never();

    let report = publish_articles(
        &wiki,
        &catalog,
        &store,
        &test_config(),
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.unpublishable, vec!["A".to_string()]);
}

#[tokio::test]
async fn verify_readback_failure_is_a_hard_failure_for_the_key() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("A", 10)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));
    wiki.expect_page_source()
        .returning(|title| Ok(raw_page(title, 10, true)));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![]));
    // Both the existence check and the readback see nothing.
    store.expect_get().returning(|_, _| Ok(None));
    store.expect_upsert().returning(|_| Ok(()));

    let report = publish_articles(
        &wiki,
        &catalog,
        &store,
        &test_config(),
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.created, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].stage, Stage::Verify);
}

#[tokio::test]
async fn authors_carry_their_article_titles() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("Tom Coffman", 10)]));
    wiki.expect_author_titles()
        .returning(|| Ok(vec!["Tom Coffman".to_string()]));
    wiki.expect_page_source().returning(|title| {
        let mut raw = raw_page(title, 10, true);
        raw.categories = vec!["Published".to_string(), "Authors".to_string()];
        Ok(raw)
    });
    wiki.expect_backlinks()
        .withf(|title| title == "Tom Coffman")
        .returning(|_| Ok(vec!["How Hawaii Changed America".to_string()]));

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![]));
    store.expect_get().times(1).returning(|_, _| Ok(None));
    store
        .expect_upsert()
        .withf(|doc| {
            matches!(doc, Document::Author(a)
                if a.article_titles == vec!["How Hawaii Changed America".to_string()])
        })
        .times(1)
        .returning(|_| Ok(()));
    // Readback after the write.
    store.expect_get().returning(|_, _| {
        Ok(Some(Document::Author(Author {
            url_title: "Tom Coffman".to_string(),
            title: "Tom Coffman".to_string(),
            title_sort: "coffmantom".to_string(),
            body: String::new(),
            modified: ts(10),
            published: true,
            article_titles: vec!["How Hawaii Changed America".to_string()],
        })))
    });

    let report = publish_authors(&wiki, &store, &test_config(), &PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert!(report.failed.is_empty());
}

fn source_record() -> SourceRecord {
    SourceRecord {
        id: 37,
        encyclopedia_id: "en-denshopd-i37-00239-1".to_string(),
        created: "2019-01-01 00:00:00".to_string(),
        modified: "2019-01-01 00:10:00".to_string(),
        published: true,
        headword: "Manzanar".to_string(),
        original: "http://media.local/sources/en-denshopd-i37-00239-1.jpg".to_string(),
        external_url: "http://ddr.densho.org/ddr/densho/67/19/".to_string(),
        ..SourceRecord::default()
    }
}

#[tokio::test]
async fn source_catalog_is_reconciled_by_encyclopedia_id() {
    let mut catalog = MockSourceCatalog::new();
    catalog
        .expect_published()
        .returning(|| Ok(vec![source_record()]));

    let mut store = MockDocStore::new();
    store
        .expect_list()
        .returning(|_| Ok(vec![stamp("en-gone-1", 1)]));
    store
        .expect_delete()
        .withf(|kind, key| *kind == DocKind::Sources && key == "en-gone-1")
        .times(1)
        .returning(|_, _| Ok(()));
    store.expect_get().times(1).returning(|_, _| Ok(None));
    store
        .expect_upsert()
        .withf(|doc| {
            matches!(doc, Document::Source(s)
                if s.encyclopedia_id == "en-denshopd-i37-00239-1"
                && s.original == "en-denshopd-i37-00239-1.jpg"
                && s.external_url == "http://ddr.densho.org/ddr-densho-67-19/")
        })
        .times(1)
        .returning(|_| Ok(()));
    store.expect_get().returning(|_, _| {
        let doc = PrimarySource::from_record(&source_record(), &test_config().sources).unwrap();
        Ok(Some(Document::Source(doc)))
    });

    let report = publish_sources(&catalog, &store, &test_config(), &PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(report.created, 1);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn empty_source_listing_still_deletes_everything() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages().returning(|| Ok(vec![]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store
        .expect_list()
        .returning(|_| Ok(vec![stamp("Orphan", 1)]));
    store
        .expect_delete()
        .withf(|_, key| key == "Orphan")
        .times(1)
        .returning(|_, _| Ok(()));

    let report = publish_articles(
        &wiki,
        &catalog,
        &store,
        &test_config(),
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, 1);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("A", 10)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));
    wiki.expect_page_source()
        .returning(|title| Ok(raw_page(title, 10, true)));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store
        .expect_list()
        .returning(|_| Ok(vec![stamp("Gone", 1)]));
    store.expect_get().returning(|_, _| Ok(None));
    store.expect_upsert().never();
    store.expect_delete().never();

    let opts = PublishOptions {
        dry_run: true,
        ..PublishOptions::default()
    };
    let report = publish_articles(&wiki, &catalog, &store, &test_config(), &opts)
        .await
        .unwrap();

    assert_eq!(report.created, 1);
    assert_eq!(report.deleted, 1);
}

#[tokio::test]
async fn report_only_stops_after_reconciliation() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("A", 10)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));
    wiki.expect_page_source().never();

    let mut catalog = MockSourceCatalog::new();

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![]));
    store.expect_upsert().never();

    let opts = PublishOptions {
        report_only: true,
        ..PublishOptions::default()
    };
    let report = publish_articles(&wiki, &catalog, &store, &test_config(), &opts)
        .await
        .unwrap();

    assert_eq!(report.considered, 1);
    assert_eq!(report.created + report.updated + report.deleted, 0);
}

#[tokio::test]
async fn single_title_bypasses_reconciliation() {
    let mut wiki = MockContentSource::new();
    wiki.expect_published_pages()
        .returning(|| Ok(vec![stamp("A", 10), stamp("B", 10)]));
    wiki.expect_author_titles().returning(|| Ok(vec![]));
    wiki.expect_article_categories().returning(|| Ok(vec![]));
    wiki.expect_page_source()
        .withf(|title| title == "B")
        .times(1)
        .returning(|title| Ok(raw_page(title, 10, true)));

    let mut catalog = MockSourceCatalog::new();
    catalog.expect_for_ids().returning(|_| Ok(vec![]));

    let mut store = MockDocStore::new();
    store.expect_list().returning(|_| Ok(vec![]));
    store
        .expect_get()
        .returning(|_, key| Ok(Some(article_doc(key, 10))));
    store.expect_upsert().times(1).returning(|_| Ok(()));
    store.expect_delete().never();

    let opts = PublishOptions {
        title: Some("B".to_string()),
        ..PublishOptions::default()
    };
    let report = publish_articles(&wiki, &catalog, &store, &test_config(), &opts)
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
}
