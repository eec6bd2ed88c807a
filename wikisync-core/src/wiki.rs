//! Session-scoped client for the authoring wiki's API.
//!
//! The editors' wiki sits behind session-cookie authentication (and
//! optionally HTTP Basic auth); login and logout bracket each run. The
//! session handle is created once per run and passed to every call, so
//! there is no global cached HTTP state.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::WikiConfig;
use crate::contract::{parse_timestamp, ContentSource, RawPage, Stamp};
use crate::error::SyncError;

/// An authenticated wiki session. Obtain with [`WikiSession::login`],
/// release with [`WikiSession::logout`] once the batch is done.
pub struct WikiSession {
    http: reqwest::Client,
    cfg: WikiConfig,
}

impl WikiSession {
    /// Performs the two-round login token dance and returns a session
    /// whose cookie jar carries the wiki credentials.
    pub async fn login(cfg: &WikiConfig) -> Result<WikiSession, SyncError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let session = WikiSession {
            http,
            cfg: cfg.clone(),
        };

        let round1 = session
            .post_form(&[
                ("action", "login"),
                ("format", "json"),
                ("lgname", cfg.username.as_str()),
                ("lgpassword", cfg.password.as_str()),
            ])
            .await?;
        let token = round1["login"]["token"]
            .as_str()
            .ok_or_else(|| SyncError::Auth("login returned no token".to_string()))?
            .to_string();

        let round2 = session
            .post_form(&[
                ("action", "login"),
                ("format", "json"),
                ("lgname", cfg.username.as_str()),
                ("lgpassword", cfg.password.as_str()),
                ("lgtoken", token.as_str()),
            ])
            .await?;
        match round2["login"]["result"].as_str() {
            Some("Success") => {
                info!(user = %cfg.username, api = %cfg.api_url, "wiki session established");
                Ok(session)
            }
            other => Err(SyncError::Auth(format!(
                "wiki login failed: {}",
                other.unwrap_or("no result in response")
            ))),
        }
    }

    /// Releases the session. Failures are logged, not propagated: the
    /// batch result must not depend on whether the logout round-trip
    /// succeeded.
    pub async fn logout(&self) {
        match self
            .post_form(&[("action", "logout"), ("format", "json")])
            .await
        {
            Ok(_) => debug!("wiki session released"),
            Err(err) => warn!(error = %err, "wiki logout failed"),
        }
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.http_user {
            Some(user) => req.basic_auth(user, self.cfg.http_pass.as_deref()),
            None => req,
        }
    }

    async fn get_json<T: Serialize + ?Sized>(&self, params: &T) -> Result<Value, SyncError> {
        let req = self.with_auth(self.http.get(&self.cfg.api_url).query(params));
        debug!(api = %self.cfg.api_url, "GET");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Api {
                status,
                url: resp.url().to_string(),
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<Value, SyncError> {
        let req = self.with_auth(self.http.post(&self.cfg.api_url).form(form));
        debug!(api = %self.cfg.api_url, "POST");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::Api {
                status,
                url: resp.url().to_string(),
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    /// Titles of all members of a category, following API continuation.
    async fn category_members(&self, category: &str) -> Result<Vec<String>, SyncError> {
        let cmtitle = format!("Category:{category}");
        let mut titles = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("action", "query".to_string()),
                ("format", "json".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", cmtitle.clone()),
                ("cmlimit", "500".to_string()),
            ];
            if let Some(c) = &cont {
                params.push(("cmcontinue", c.clone()));
            }
            let v = self.get_json(&params).await?;
            if let Some(members) = v["query"]["categorymembers"].as_array() {
                titles.extend(
                    members
                        .iter()
                        .filter_map(|m| m["title"].as_str())
                        .map(String::from),
                );
            }
            cont = v["continue"]["cmcontinue"].as_str().map(String::from);
            if cont.is_none() {
                break;
            }
        }
        Ok(titles)
    }

    /// All pages of a category with their latest revision timestamps,
    /// sorted by title. Subcategory entries are skipped.
    async fn pages_in_category(&self, category: &str) -> Result<Vec<Stamp>, SyncError> {
        let gcmtitle = format!("Category:{category}");
        let mut pages = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("action", "query".to_string()),
                ("format", "json".to_string()),
                ("generator", "categorymembers".to_string()),
                ("gcmtitle", gcmtitle.clone()),
                ("gcmlimit", "500".to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "timestamp".to_string()),
            ];
            if let Some(c) = &cont {
                params.push(("gcmcontinue", c.clone()));
            }
            let v = self.get_json(&params).await?;
            if let Some(obj) = v["query"]["pages"].as_object() {
                for page in obj.values() {
                    let Some(title) = page["title"].as_str() else {
                        continue;
                    };
                    if title.starts_with("Category:") {
                        continue;
                    }
                    let Some(ts) = page["revisions"][0]["timestamp"].as_str() else {
                        continue;
                    };
                    pages.push(Stamp::new(title, parse_timestamp(ts)?));
                }
            }
            cont = v["continue"]["gcmcontinue"].as_str().map(String::from);
            if cont.is_none() {
                break;
            }
        }
        pages.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(pages)
    }

    async fn page_lastmod(&self, title: &str) -> Result<chrono::DateTime<chrono::Utc>, SyncError> {
        let v = self
            .get_json(&[
                ("action", "query"),
                ("format", "json"),
                ("prop", "revisions"),
                ("rvprop", "ids|timestamp"),
                ("titles", title),
            ])
            .await?;
        if let Some(obj) = v["query"]["pages"].as_object() {
            for page in obj.values() {
                if let Some(ts) = page["revisions"][0]["timestamp"].as_str() {
                    return parse_timestamp(ts);
                }
            }
        }
        Err(SyncError::BadResponse(format!(
            "no revision timestamp for \"{title}\""
        )))
    }
}

#[async_trait]
impl ContentSource for WikiSession {
    async fn published_pages(&self) -> Result<Vec<Stamp>, SyncError> {
        self.pages_in_category("Published").await
    }

    async fn author_titles(&self) -> Result<Vec<String>, SyncError> {
        self.category_members("Authors").await
    }

    async fn article_categories(&self) -> Result<Vec<String>, SyncError> {
        self.category_members("Articles").await
    }

    async fn page_source(&self, title: &str) -> Result<RawPage, SyncError> {
        debug!(title, "fetching page detail");
        let v = self
            .get_json(&[("action", "parse"), ("format", "json"), ("page", title)])
            .await?;
        if let Some(code) = v["error"]["code"].as_str() {
            if code == "missingtitle" {
                return Err(SyncError::MissingPage(title.to_string()));
            }
            return Err(SyncError::BadResponse(format!(
                "{}: {code}",
                self.cfg.api_url
            )));
        }
        let parse = &v["parse"];
        let html = parse["text"]["*"]
            .as_str()
            .ok_or_else(|| {
                SyncError::BadResponse(format!("page \"{title}\" has no rendered text"))
            })?
            .to_string();
        let display_title = parse["displaytitle"]
            .as_str()
            .or_else(|| parse["title"].as_str())
            .unwrap_or(title)
            .to_string();
        let categories = parse["categories"]
            .as_array()
            .map(|cats| {
                cats.iter()
                    .filter_map(|c| c["*"].as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let mut default_sort = String::new();
        if let Some(props) = parse["properties"].as_array() {
            for prop in props {
                if prop["name"]
                    .as_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case("defaultsort"))
                {
                    default_sort = prop["*"].as_str().unwrap_or("").to_string();
                }
            }
        }
        let images = parse["images"]
            .as_array()
            .map(|imgs| {
                imgs.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let modified = self.page_lastmod(title).await?;
        Ok(RawPage {
            url_title: title.to_string(),
            display_title,
            html,
            categories,
            default_sort,
            images,
            modified,
        })
    }

    async fn backlinks(&self, title: &str) -> Result<Vec<String>, SyncError> {
        let mut titles = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("action", "query".to_string()),
                ("format", "json".to_string()),
                ("list", "backlinks".to_string()),
                ("bltitle", title.to_string()),
                ("bllimit", "500".to_string()),
            ];
            if let Some(c) = &cont {
                params.push(("blcontinue", c.clone()));
            }
            let v = self.get_json(&params).await?;
            if let Some(links) = v["query"]["backlinks"].as_array() {
                titles.extend(
                    links
                        .iter()
                        .filter_map(|l| l["title"].as_str())
                        .map(String::from),
                );
            }
            cont = v["continue"]["blcontinue"].as_str().map(String::from);
            if cont.is_none() {
                break;
            }
        }
        Ok(titles)
    }
}
