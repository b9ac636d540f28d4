use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use reqwest::{Client, StatusCode};
use scraper::{ElementRef, Html, Selector};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::query::encode_query;

pub const DEFAULT_SEARCH_URL: &str = "https://tatoeba.org/eng/sentences/search";

// Tatoeba result layout. If the site changes its markup these stop matching
// and every element is reported as skipped.
const RESULT_SEL: &str =
    "body > div > div.container > div > div.section > div.sentence-and-translations > div";
const PERMALINK_SEL: &str = "md-subheader > a";
const TEXT_SEL: &str = "div.sentence > div.text";

struct Selectors {
    result: Selector,
    permalink: Selector,
    text: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    result: Selector::parse(RESULT_SEL).unwrap(),
    permalink: Selector::parse(PERMALINK_SEL).unwrap(),
    text: Selector::parse(TEXT_SEL).unwrap(),
});

/// Applied in order to the text element's markup. Highlighted matches become
/// `<...>` gap markers and the wrapping text div goes away. Divs nested
/// inside the text are left alone.
static TEXT_SUBSTITUTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"</span>").unwrap(), ">"),
        (Regex::new(r#"<span[^>]*class="match"[^>]*>"#).unwrap(), "<"),
        (Regex::new(r"^\s*<div[^>]*>\n? *|\s*</div>\s*$").unwrap(), ""),
    ]
});

const DEFAULT_PARAMS: &[(&str, &str)] = &[
    ("from", "eng"),
    ("to", "und"),
    ("orphans", "no"),
    ("unapproved", "no"),
    ("native", ""),
    ("user", ""),
    ("tags", ""),
    ("list", "907"),
    ("has_audio", ""),
    ("trans_filter", "limit"),
    ("trans_to", "und"),
    ("trans_link", ""),
    ("trans_user", ""),
    ("trans_orphan", ""),
    ("trans_unapproved", ""),
    ("trans_has_audio", ""),
    ("sort", "words"),
    ("sort_reverse", "yes"),
];

/// Extra search parameters, appended to the URL in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams(Vec<(String, String)>);

impl Default for SearchParams {
    fn default() -> Self {
        DEFAULT_PARAMS.iter().copied().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl SearchParams {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn to_query_string(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedSentence {
    /// Tatoeba sentence id, taken from the permalink.
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingPermalink,
    UnresolvableLink,
    MissingText,
    EmptyText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    Found(ScrapedSentence),
    Skipped(SkipReason),
}

/// Per-element outcomes of one results page, in document order.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub outcomes: Vec<ScrapeOutcome>,
}

impl ScrapeReport {
    pub fn sentences(&self) -> impl Iterator<Item = &ScrapedSentence> {
        self.outcomes.iter().filter_map(|o| match o {
            ScrapeOutcome::Found(s) => Some(s),
            ScrapeOutcome::Skipped(_) => None,
        })
    }

    pub fn into_texts(self) -> Vec<String> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                ScrapeOutcome::Found(s) => Some(s.text),
                ScrapeOutcome::Skipped(_) => None,
            })
            .collect()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ScrapeOutcome::Skipped(_)))
            .count()
    }
}

/// HTTP client for the sentence site. No timeout is set here; callers
/// bound each request themselves (see [`SentenceScraper::scrape_all`]).
pub fn http_client() -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("gapfill/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Fetches Tatoeba search results and turns them into marked-up sentences.
#[derive(Clone)]
pub struct SentenceScraper {
    client: Client,
    search_url: String,
    params: SearchParams,
}

impl SentenceScraper {
    pub fn new(client: Client, search_url: impl Into<String>) -> Self {
        Self {
            client,
            search_url: search_url.into(),
            params: SearchParams::default(),
        }
    }

    /// Full search URL for an already encoded query. Empty or missing
    /// `params` fall back to the scraper's configured set.
    pub fn build_url(&self, encoded_query: &str, params: Option<&SearchParams>) -> String {
        let params = params.filter(|p| !p.is_empty()).unwrap_or(&self.params);
        format!(
            "{}?query={}&{}",
            self.search_url,
            encoded_query,
            params.to_query_string()
        )
    }

    /// Encode `raw_query` and scrape the first results page.
    pub async fn scrape(&self, raw_query: &str) -> Option<ScrapeReport> {
        self.fetch(&encode_query(raw_query), None).await
    }

    /// One GET, no retries. `None` on transport errors and non-200 answers.
    pub async fn fetch(
        &self,
        encoded_query: &str,
        params: Option<&SearchParams>,
    ) -> Option<ScrapeReport> {
        let url = self.build_url(encoded_query, params);
        info!("Scraping tatoeba for {}", url);

        let page_url = match Url::parse(&url) {
            Ok(u) => u,
            Err(e) => {
                warn!("Invalid search URL {}: {}", url, e);
                return None;
            }
        };

        let response = match self.client.get(page_url.clone()).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Cannot reach tatoeba: {}", e);
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            warn!("Cannot reach tatoeba: HTTP {}", response.status());
            return None;
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to read tatoeba response: {}", e);
                return None;
            }
        };

        let report = parse_results(&body, &page_url);
        info!(
            "OK: {} sentences, {} skipped",
            report.outcomes.len() - report.skipped(),
            report.skipped()
        );
        Some(report)
    }

    /// Scrape every query with at most `concurrency` requests in flight.
    /// Results keep the order of `queries`; a query that times out is `None`.
    pub async fn scrape_all(
        &self,
        queries: &[String],
        concurrency: usize,
        timeout: Duration,
    ) -> Vec<Option<ScrapeReport>> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        let handles: Vec<_> = queries
            .iter()
            .cloned()
            .map(|query| {
                let scraper = self.clone();
                let sem = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.ok()?;
                    match tokio::time::timeout(timeout, scraper.scrape(&query)).await {
                        Ok(report) => report,
                        Err(_) => {
                            warn!("Scraping {:?} timed out after {:?}", query, timeout);
                            None
                        }
                    }
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|e| {
                warn!("Scrape task failed: {}", e);
                None
            }));
        }
        results
    }
}

/// Extract sentences from a results page. `page_url` resolves relative
/// permalinks.
pub fn parse_results(html: &str, page_url: &Url) -> ScrapeReport {
    let sel = &*SELECTORS;
    let document = Html::parse_document(html);
    let outcomes = document
        .select(&sel.result)
        .map(|element| match parse_element(element, sel, page_url) {
            Ok(sentence) => ScrapeOutcome::Found(sentence),
            Err(reason) => {
                debug!("Skipping result element: {:?}", reason);
                ScrapeOutcome::Skipped(reason)
            }
        })
        .collect();
    ScrapeReport { outcomes }
}

fn parse_element(
    element: ElementRef,
    sel: &Selectors,
    page_url: &Url,
) -> Result<ScrapedSentence, SkipReason> {
    let link = element
        .select(&sel.permalink)
        .next()
        .and_then(|a| a.value().attr("href"))
        .ok_or(SkipReason::MissingPermalink)?;
    let id = sentence_id(page_url, link).ok_or(SkipReason::UnresolvableLink)?;

    let text_el = element
        .select(&sel.text)
        .next()
        .ok_or(SkipReason::MissingText)?;
    let text = clean_text(&text_el.html()).ok_or(SkipReason::EmptyText)?;

    Ok(ScrapedSentence { id, text })
}

/// Last non-empty path segment of the permalink, resolved against the page
/// URL. A link without one still yields the sentence, with an empty id.
fn sentence_id(page_url: &Url, href: &str) -> Option<String> {
    let absolute = page_url.join(href).ok()?;
    let id = absolute
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .unwrap_or_default();
    Some(id.to_string())
}

/// Apply the text substitutions and keep the sentence line.
pub fn clean_text(markup: &str) -> Option<String> {
    let cleaned = TEXT_SUBSTITUTIONS
        .iter()
        .fold(markup.to_string(), |text, (re, to)| {
            re.replace_all(&text, *to).into_owned()
        });
    cleaned
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
