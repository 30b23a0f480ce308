//! Integration tests for widget bundling against a mock widget host.

use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use widget_relay::widget::WidgetRequest;

use super::test_helpers::{
    injected_data, mount_assets, mount_widget_site, test_bundler, APP_CSS, PAGE_JS, WIDGET_PAGE,
};

#[tokio::test]
async fn bundles_page_into_self_contained_document() {
    let server = MockServer::start().await;
    mount_widget_site(&server, "/ko/widgets/greet").await;
    let base = server.uri();
    let bundler = test_bundler(&base, true);

    let data = json!({ "name": "철수" });
    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", Some(data.clone())))
        .await;

    assert!(html.contains(&format!("<style>{APP_CSS}</style>")), "{html}");
    assert!(html.contains(PAGE_JS), "page script inlined: {html}");
    assert!(!html.contains("page-9f.js"));
    assert!(html.contains(&format!(
        r#"src="{base}/_next/static/chunks/webpack-1a2b.js""#
    )));
    assert!(html.contains(&format!(r#"src="{base}/images/hello.png""#)));
    assert!(html.contains(&format!(r#"href="{base}/ko/about""#)));
    assert!(html.contains(r##"href="#top""##));
    assert!(html.contains(r#"href="https://other.example/x""#));

    assert!(!html.contains("<base"));
    assert!(!html.contains("rel=\"preload\""));
    assert!(!html.contains("polyfills"));
    assert!(!html.contains("href=\"/"), "relative href left behind: {html}");
    assert!(!html.contains("src=\"/"), "relative src left behind: {html}");

    assert!(html.contains("window.__WIDGET_DATA__ = data;"));
    assert_eq!(injected_data(&html), data);
    assert!(html.find("id=\"widget-data\"") < html.find("</head>"));
}

#[tokio::test]
async fn template_read_has_no_data_script() {
    let server = MockServer::start().await;
    mount_widget_site(&server, "/ko/widgets/greet").await;
    let bundler = test_bundler(&server.uri(), true);

    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", None))
        .await;

    assert!(html.contains(APP_CSS));
    assert!(!html.contains("widget-data"));
}

#[tokio::test]
async fn cached_shell_is_reused_byte_for_byte() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
        .expect(1)
        .mount(&server)
        .await;
    mount_assets(&server).await;
    let bundler = test_bundler(&server.uri(), true);

    let first = bundler.shell("/widgets/greet", "ko").await.expect("first shell");
    let second = bundler.shell("/widgets/greet", "ko").await.expect("second shell");
    assert_eq!(first, second);
    assert_eq!(bundler.cache().len(), 1);

    let a = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", Some(json!({ "n": 1 }))))
        .await;
    let b = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", Some(json!({ "n": 2 }))))
        .await;
    assert_eq!(injected_data(&a), json!({ "n": 1 }));
    assert_eq!(injected_data(&b), json!({ "n": 2 }));
    assert!(!first.as_str().contains("widget-data"), "cached shell must not carry data");
}

#[tokio::test]
async fn development_mode_refetches_every_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
        .expect(2)
        .mount(&server)
        .await;
    mount_assets(&server).await;
    let bundler = test_bundler(&server.uri(), false);

    bundler.shell("/widgets/greet", "ko").await.expect("first shell");
    bundler.shell("/widgets/greet", "ko").await.expect("second shell");
    assert!(bundler.cache().is_empty());
}

#[tokio::test]
async fn locale_is_part_of_the_cache_key() {
    let server = MockServer::start().await;
    for page in ["/ko/widgets/greet", "/en/widgets/greet"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
            .expect(1)
            .mount(&server)
            .await;
    }
    mount_assets(&server).await;
    let bundler = test_bundler(&server.uri(), true);

    bundler.shell("/widgets/greet", "ko").await.expect("ko shell");
    bundler.shell("/widgets/greet", "en").await.expect("en shell");
    bundler.shell("/widgets/greet", "en").await.expect("cached en shell");
    assert_eq!(bundler.cache().len(), 2);
}

#[tokio::test]
async fn slow_page_falls_back_with_formatted_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(WIDGET_PAGE)
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let bundler = test_bundler(&server.uri(), true);

    let data = json!({ "name": "철수" });
    let started = Instant::now();
    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", Some(data.clone())))
        .await;

    assert!(started.elapsed() < Duration::from_secs(4), "page timeout not honored");
    assert!(html.contains("<pre id=\"data\">"));
    assert!(html.contains("\"name\": \"철수\""), "pretty payload rendered: {html}");
    assert_eq!(injected_data(&html), data);
    assert!(bundler.cache().is_empty(), "failures are never cached");
}

#[tokio::test]
async fn missing_page_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let bundler = test_bundler(&server.uri(), true);

    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", None))
        .await;
    assert!(html.contains("<pre id=\"data\">{}</pre>"));
    assert!(bundler.shell("/widgets/greet", "ko").await.is_err());
}

#[tokio::test]
async fn empty_page_is_an_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
        .mount(&server)
        .await;
    let bundler = test_bundler(&server.uri(), true);

    let err = bundler
        .shell("/widgets/greet", "ko")
        .await
        .expect_err("empty body rejected");
    assert!(err.to_string().contains("empty body"));
}

#[tokio::test]
async fn failed_asset_is_left_unresolved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_next/static/css/app.css"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_next/static/chunks/app/page-9f.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_JS))
        .mount(&server)
        .await;
    let bundler = test_bundler(&server.uri(), true);

    let shell = bundler.shell("/widgets/greet", "ko").await.expect("shell");

    assert!(shell.as_str().contains(r#"rel="stylesheet""#));
    assert!(shell.as_str().contains(r#"href="/_next/static/css/app.css""#));
    assert!(!shell.as_str().contains("<style>"));
    assert!(shell.as_str().contains(PAGE_JS), "other sub-resources still inlined");
}

#[tokio::test]
async fn slow_asset_does_not_block_the_bundle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/greet"))
        .respond_with(ResponseTemplate::new(200).set_body_string(WIDGET_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_next/static/css/app.css"))
        .respond_with(ResponseTemplate::new(200).set_body_string(APP_CSS))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_next/static/chunks/app/page-9f.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(PAGE_JS)
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    let bundler = test_bundler(&server.uri(), true);

    let started = Instant::now();
    let shell = bundler.shell("/widgets/greet", "ko").await.expect("shell");

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(shell.as_str().contains(APP_CSS));
    assert!(shell.as_str().contains("page-9f.js"), "timed-out script keeps its reference");
}

#[tokio::test]
async fn payload_with_markup_survives_injection() {
    let server = MockServer::start().await;
    mount_widget_site(&server, "/ko/widgets/calculate").await;
    let bundler = test_bundler(&server.uri(), true);

    let data = json!({
        "expression": "1 < 2 && 3 > 2",
        "note": "</script><script>alert(1)</script>",
        "sep": "a\u{2028}b",
        "nested": { "list": [1, 2.5, null, true] },
    });
    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/calculate", "ko", Some(data.clone())))
        .await;

    assert!(!html.contains("</script><script>alert(1)"));
    assert_eq!(injected_data(&html), data);
}

#[tokio::test]
async fn inlined_scripts_drop_loading_attributes() {
    let server = MockServer::start().await;
    mount_widget_site(&server, "/ko/widgets/greet").await;
    let base = server.uri();
    let bundler = test_bundler(&base, true);

    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/greet", "ko", None))
        .await;

    assert!(html.contains(&format!("<script>{PAGE_JS}</script>")), "{html}");
    assert!(!html.contains("async"), "inline script kept async: {html}");
    assert!(html.contains(&format!(
        r#"src="{base}/_next/static/chunks/webpack-1a2b.js" defer"#
    )));
}

#[tokio::test]
async fn data_script_lands_after_inlined_markup_templates() {
    const TEMPLATE_JS: &str = "var tpl = '<html><head></head><body></body></html>';";

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ko/widgets/template"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<!DOCTYPE html><html><head><script src="/_next/static/chunks/app/tpl.js"></script></head><body><div id="root"></div></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_next/static/chunks/app/tpl.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string(TEMPLATE_JS))
        .mount(&server)
        .await;
    let bundler = test_bundler(&server.uri(), false);

    let data = json!({ "a": 1 });
    let html = bundler
        .bundle(&WidgetRequest::new("/widgets/template", "ko", Some(data.clone())))
        .await;

    assert!(html.contains(TEMPLATE_JS), "inlined script left intact: {html}");
    assert_eq!(html.matches("id=\"widget-data\"").count(), 1);
    assert_eq!(injected_data(&html), data);

    let template_at = html.find(TEMPLATE_JS).expect("template script");
    let data_at = html.find("id=\"widget-data\"").expect("data script");
    let root_at = html.find("<div id=\"root\">").expect("body content");
    assert!(template_at < data_at && data_at < root_at, "{html}");
}
