//! Remote widget page → self-contained HTML shell.
//!
//! A bundle runs as ordered passes: stylesheets, scripts, link rewriting,
//! bootstrap stripping. Each pass owns its own fault boundary; a failed
//! sub-resource leaves that one reference untouched and the pass goes on.
//!
//! The parsed tree is not `Send`, so every pass first plans its work
//! against a parse of the page, fetches outside of it, and the edits are
//! applied to a fresh parse of the same markup at the end. Parsing is
//! deterministic, so node ids line up between the two.

use std::time::Duration;

use ego_tree::NodeId;
use futures_util::future::join_all;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use super::cache::{ShellCache, ShellKey};
use super::document::{Document, ElementInfo, Shell};
use super::inject::{fallback_document, inject_data};
use super::WidgetRequest;
use crate::config::GlobalConfig;
use crate::{AppError, Result};

/// `rel` tokens of resource hints emitted by the widget host's build.
const RESOURCE_HINTS: &[&str] = &["preload", "prefetch", "modulepreload"];

/// Bundler settings resolved from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct BundlerConfig {
    /// Origin serving widget pages and their assets.
    pub source_base: Url,
    /// Top-level page fetch timeout.
    pub page_timeout: Duration,
    /// Per sub-resource fetch timeout.
    pub asset_timeout: Duration,
    /// Script path prefixes that stay external.
    pub runtime_bundles: Vec<String>,
    /// Path prefix of host build-runtime assets.
    pub bootstrap_prefix: String,
    /// Whether finished shells are cached.
    pub cache_shells: bool,
}

impl BundlerConfig {
    /// Derive bundler settings from the global configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the source base URL is invalid.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        Ok(Self {
            source_base: config.widgets.source_base()?,
            page_timeout: config.widgets.page_timeout(),
            asset_timeout: config.widgets.asset_timeout(),
            runtime_bundles: config.widgets.runtime_bundles.clone(),
            bootstrap_prefix: config.widgets.bootstrap_prefix.clone(),
            cache_shells: config.mode.caches_shells(),
        })
    }
}

/// A stylesheet `<link>` to replace with an inline `<style>`.
#[derive(Debug)]
struct StylesheetRef {
    node: NodeId,
    url: Url,
    media: Option<String>,
}

/// What to do with one `<script src>`.
#[derive(Debug)]
enum ScriptPlan {
    /// Runtime bundle: keep external, point at the source host.
    Externalize { node: NodeId, url: Url },
    /// Fetch and inline the body.
    Inline { node: NodeId, url: Url },
}

/// Edits collected by the asynchronous passes.
#[derive(Debug, Default)]
struct Edits {
    styles: Vec<(StylesheetRef, String)>,
    externalized: Vec<(NodeId, Url)>,
    scripts: Vec<(NodeId, String)>,
}

/// Fetches, inlines, caches and injects widget pages.
pub struct WidgetBundler {
    client: reqwest::Client,
    config: BundlerConfig,
    cache: ShellCache,
}

impl WidgetBundler {
    /// Create a bundler with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(config: BundlerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("widget-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self::with_client(client, config))
    }

    /// Create a bundler around an existing HTTP client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, config: BundlerConfig) -> Self {
        Self {
            client,
            config,
            cache: ShellCache::default(),
        }
    }

    /// Active settings.
    #[must_use]
    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    /// Shell cache, exposed for diagnostics.
    #[must_use]
    pub fn cache(&self) -> &ShellCache {
        &self.cache
    }

    /// Produce the widget document for `request`.
    ///
    /// Never fails: when the page cannot be fetched or parsed the fallback
    /// document is returned instead. The data script is appended only when
    /// `request.data` is present and is never part of the cached shell.
    pub async fn bundle(&self, request: &WidgetRequest) -> String {
        let span = info_span!(
            "bundle_widget",
            source_path = %request.source_path,
            locale = %request.locale,
        );

        async {
            match self.shell(&request.source_path, &request.locale).await {
                Ok(shell) => match &request.data {
                    Some(data) => inject_data(&shell, data),
                    None => shell.as_str().to_owned(),
                },
                Err(err) => {
                    warn!(%err, "widget bundling failed; serving fallback document");
                    fallback_document(request.data.as_ref(), &err.to_string())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Inlined, pre-injection shell for `(source_path, locale)`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Upstream` if the page cannot be fetched or has an
    /// empty body.
    pub async fn shell(&self, source_path: &str, locale: &str) -> Result<Shell> {
        let key = ShellKey::new(source_path, locale);
        if self.config.cache_shells {
            if let Some(shell) = self.cache.get(&key) {
                debug!("shell cache hit");
                return Ok(shell);
            }
        }

        let page_url = self.page_url(source_path, locale)?;
        let markup = self.fetch_page(&page_url, locale).await?;

        let mut edits = Edits::default();
        self.inline_stylesheets(&markup, &mut edits).await;
        self.inline_scripts(&markup, &mut edits).await;

        let mut document = Document::parse(&markup);
        apply_edits(&mut document, edits);
        self.rewrite_links(&mut document);
        self.strip_bootstrap(&mut document);

        let shell = document.to_shell();
        info!(url = %page_url, bytes = shell.as_str().len(), "widget bundled");

        if self.config.cache_shells {
            self.cache.insert(key, shell.clone());
        }
        Ok(shell)
    }

    /// `{base}/{locale}{path}`.
    fn page_url(&self, source_path: &str, locale: &str) -> Result<Url> {
        let base = self.config.source_base.as_str().trim_end_matches('/');
        let raw = format!("{base}/{locale}{source_path}");
        Url::parse(&raw)
            .map_err(|err| AppError::Upstream(format!("invalid widget url '{raw}': {err}")))
    }

    async fn fetch_page(&self, url: &Url, locale: &str) -> Result<String> {
        debug!(%url, "fetching widget page");
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html")
            .header(ACCEPT_LANGUAGE, locale)
            .timeout(self.config.page_timeout)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("GET {url} failed: {err}")))?
            .error_for_status()
            .map_err(|err| AppError::Upstream(format!("GET {url} failed: {err}")))?;

        let body = response
            .text()
            .await
            .map_err(|err| AppError::Upstream(format!("reading {url} failed: {err}")))?;
        if body.trim().is_empty() {
            return Err(AppError::Upstream(format!("GET {url} returned an empty body")));
        }
        Ok(body)
    }

    /// Fetch one sub-resource body within the asset timeout.
    async fn fetch_asset(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.asset_timeout)
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("GET {url} failed: {err}")))?
            .error_for_status()
            .map_err(|err| AppError::Upstream(format!("GET {url} failed: {err}")))?;
        response
            .text()
            .await
            .map_err(|err| AppError::Upstream(format!("reading {url} failed: {err}")))
    }

    /// Fetch every url concurrently; results keep input order.
    async fn fetch_all(&self, kind: &'static str, urls: &[&Url]) -> Vec<Option<String>> {
        join_all(urls.iter().map(|url| async move {
            match self.fetch_asset(url).await {
                Ok(body) => {
                    debug!(%url, kind, "inlined");
                    Some(body)
                }
                Err(err) => {
                    warn!(%url, kind, %err, "sub-resource left unresolved");
                    None
                }
            }
        }))
        .await
    }

    async fn inline_stylesheets(&self, markup: &str, edits: &mut Edits) {
        let planned = match self.plan_stylesheets(markup) {
            Ok(planned) => planned,
            Err(err) => {
                warn!(%err, "stylesheet pass skipped");
                return;
            }
        };
        if planned.is_empty() {
            return;
        }

        let urls: Vec<&Url> = planned.iter().map(|sheet| &sheet.url).collect();
        let bodies = self.fetch_all("stylesheet", &urls).await;
        edits.styles.extend(
            planned
                .into_iter()
                .zip(bodies)
                .filter_map(|(sheet, body)| body.map(|body| (sheet, body))),
        );
    }

    fn plan_stylesheets(&self, markup: &str) -> Result<Vec<StylesheetRef>> {
        let document = Document::parse(markup);
        Ok(document
            .select("link[rel][href]")?
            .into_iter()
            .filter(|link| link.has_token("rel", "stylesheet"))
            .filter_map(|link| {
                let url = self.resolve_relative(link.attr("href")?)?;
                Some(StylesheetRef {
                    node: link.id(),
                    url,
                    media: link.attr("media").map(str::to_owned),
                })
            })
            .collect())
    }

    async fn inline_scripts(&self, markup: &str, edits: &mut Edits) {
        let planned = match self.plan_scripts(markup) {
            Ok(planned) => planned,
            Err(err) => {
                warn!(%err, "script pass skipped");
                return;
            }
        };

        let mut inline = Vec::new();
        for plan in planned {
            match plan {
                ScriptPlan::Externalize { node, url } => edits.externalized.push((node, url)),
                ScriptPlan::Inline { node, url } => inline.push((node, url)),
            }
        }
        if inline.is_empty() {
            return;
        }

        let urls: Vec<&Url> = inline.iter().map(|(_, url)| url).collect();
        let bodies = self.fetch_all("script", &urls).await;
        edits.scripts.extend(
            inline
                .into_iter()
                .zip(bodies)
                .filter_map(|((node, _), body)| body.map(|body| (node, body))),
        );
    }

    fn plan_scripts(&self, markup: &str) -> Result<Vec<ScriptPlan>> {
        let document = Document::parse(markup);
        Ok(document
            .select("script[src]")?
            .into_iter()
            .filter(|script| !self.is_bootstrap_polyfill(script))
            .filter_map(|script| {
                let node = script.id();
                let url = self.resolve_relative(script.attr("src")?)?;
                if self.is_runtime_bundle(&url) {
                    Some(ScriptPlan::Externalize { node, url })
                } else {
                    Some(ScriptPlan::Inline { node, url })
                }
            })
            .collect())
    }

    fn rewrite_links(&self, document: &mut Document) {
        for (css, attr) in [("img[src]", "src"), ("a[href]", "href")] {
            let elements = match document.select(css) {
                Ok(elements) => elements,
                Err(err) => {
                    warn!(%err, "link rewrite skipped");
                    continue;
                }
            };
            for element in elements {
                let Some(reference) = element.attr(attr) else {
                    continue;
                };
                if reference.starts_with('#') {
                    continue;
                }
                if let Some(url) = self.resolve_relative(reference) {
                    document.set_attribute(element.id(), attr, url.into());
                }
            }
        }
    }

    fn strip_bootstrap(&self, document: &mut Document) {
        let mut stripped = 0_usize;

        match document.select("base") {
            Ok(bases) => {
                for base in bases {
                    document.remove(base.id());
                    stripped += 1;
                }
            }
            Err(err) => warn!(%err, "base stripping skipped"),
        }

        match document.select("link[rel][href]") {
            Ok(links) => {
                for link in links {
                    let is_hint = RESOURCE_HINTS.iter().any(|hint| link.has_token("rel", hint));
                    if is_hint && link.attr("href").is_some_and(|href| self.is_bootstrap(href)) {
                        document.remove(link.id());
                        stripped += 1;
                    }
                }
            }
            Err(err) => warn!(%err, "resource hint stripping skipped"),
        }

        match document.select("script[src]") {
            Ok(scripts) => {
                for script in scripts {
                    if self.is_bootstrap_polyfill(&script) {
                        document.remove(script.id());
                        stripped += 1;
                    }
                }
            }
            Err(err) => warn!(%err, "polyfill stripping skipped"),
        }

        if stripped > 0 {
            debug!(stripped, "bootstrap elements removed");
        }
    }

    /// Resolve a relative reference against the source base.
    ///
    /// Returns `None` for empty, data-URI and already-absolute references.
    fn resolve_relative(&self, reference: &str) -> Option<Url> {
        let reference = reference.trim();
        if reference.is_empty() || is_absolute(reference) {
            return None;
        }
        self.config.source_base.join(reference).ok()
    }

    fn is_runtime_bundle(&self, url: &Url) -> bool {
        self.config
            .runtime_bundles
            .iter()
            .any(|bundle| url.path().starts_with(bundle.as_str()))
    }

    /// Whether `reference` points under the bootstrap prefix on the source host.
    fn is_bootstrap(&self, reference: &str) -> bool {
        let base = &self.config.source_base;
        let Ok(url) = base.join(reference.trim()) else {
            return false;
        };
        url.origin() == base.origin() && url.path().starts_with(&self.config.bootstrap_prefix)
    }

    fn is_bootstrap_polyfill(&self, script: &ElementInfo) -> bool {
        script.attr("nomodule").is_some()
            && script.attr("src").is_some_and(|src| self.is_bootstrap(src))
    }
}

fn apply_edits(document: &mut Document, edits: Edits) {
    for (sheet, body) in edits.styles {
        let mut attributes = Vec::new();
        if let Some(media) = sheet.media {
            attributes.push(("media".to_owned(), media));
        }
        document.replace(sheet.node, "style", attributes, body);
    }
    for (node, url) in edits.externalized {
        document.set_attribute(node, "src", url.into());
    }
    for (node, body) in edits.scripts {
        // `defer` and `async` have no effect on inline scripts.
        for attr in ["src", "defer", "async"] {
            document.remove_attribute(node, attr);
        }
        document.set_inner_text(node, body);
    }
}

/// Protocol-relative or scheme-qualified (including `data:`).
fn is_absolute(reference: &str) -> bool {
    reference.starts_with("//") || Url::parse(reference).is_ok()
}
