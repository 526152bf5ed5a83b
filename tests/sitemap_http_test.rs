//! HTTP-strategy sitemap resolution against a mock server.

use docpack::sitemap::resolve_via_http;

fn client() -> reqwest::Client {
    reqwest::Client::builder().build().unwrap()
}

#[tokio::test]
async fn resolves_flat_sitemap() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(
            r#"<?xml version="1.0"?>
            <urlset>
              <url><loc>https://docs.example.com/a</loc></url>
              <url><loc>https://docs.example.com/b</loc></url>
            </urlset>"#,
        )
        .create_async()
        .await;

    let urls = resolve_via_http(&client(), &format!("{}/sitemap.xml", server.url()), 0)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(
        urls,
        vec![
            "https://docs.example.com/a".to_string(),
            "https://docs.example.com/b".to_string(),
        ]
    );
}

#[tokio::test]
async fn resolves_index_of_two_sub_sitemaps_into_six_urls() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    let index_body = format!(
        r"<sitemapindex>
            <sitemap><loc>{base}/sitemap-1.xml</loc></sitemap>
            <sitemap><loc>{base}/sitemap-2.xml</loc></sitemap>
        </sitemapindex>"
    );
    let sub = |prefix: &str| {
        format!(
            r"<urlset>
                <url><loc>https://docs.example.com/{prefix}/1</loc></url>
                <url><loc>https://docs.example.com/{prefix}/2</loc></url>
                <url><loc>https://docs.example.com/{prefix}/3</loc></url>
            </urlset>"
        )
    };

    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(index_body)
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap-1.xml")
        .with_status(200)
        .with_body(sub("guide"))
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap-2.xml")
        .with_status(200)
        .with_body(sub("api"))
        .create_async()
        .await;

    let urls = resolve_via_http(&client(), &format!("{base}/sitemap.xml"), 0)
        .await
        .unwrap();

    assert_eq!(urls.len(), 6);
    assert!(urls.contains(&"https://docs.example.com/guide/1".to_string()));
    assert!(urls.contains(&"https://docs.example.com/api/3".to_string()));
}

#[tokio::test]
async fn one_failing_sub_sitemap_does_not_abort_the_rest() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();

    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(format!(
            r"<sitemapindex>
                <sitemap><loc>{base}/broken.xml</loc></sitemap>
                <sitemap><loc>{base}/good.xml</loc></sitemap>
            </sitemapindex>"
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/broken.xml")
        .with_status(503)
        .create_async()
        .await;
    server
        .mock("GET", "/good.xml")
        .with_status(200)
        .with_body("<urlset><url><loc>https://docs.example.com/ok</loc></url></urlset>")
        .create_async()
        .await;

    let urls = resolve_via_http(&client(), &format!("{base}/sitemap.xml"), 0)
        .await
        .unwrap();
    assert_eq!(urls, vec!["https://docs.example.com/ok".to_string()]);
}

#[tokio::test]
async fn html_wrapped_sitemap_is_unwrapped() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(
            "<!DOCTYPE html><html><body><pre><urlset><url><loc>https://docs.example.com/w</loc></url></urlset></pre></body></html>",
        )
        .create_async()
        .await;

    let urls = resolve_via_http(&client(), &format!("{}/sitemap.xml", server.url()), 0)
        .await
        .unwrap();
    assert_eq!(urls, vec!["https://docs.example.com/w".to_string()]);
}

#[tokio::test]
async fn http_error_surfaces_as_strategy_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(403)
        .create_async()
        .await;

    let result = resolve_via_http(&client(), &format!("{}/sitemap.xml", server.url()), 0).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn discovered_urls_are_absolute_and_unique() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(
            r"<urlset>
                <url><loc>https://docs.example.com/a</loc></url>
                <url><loc>https://docs.example.com/a</loc></url>
                <url><loc>/relative/path</loc></url>
            </urlset>",
        )
        .create_async()
        .await;

    let urls = resolve_via_http(&client(), &format!("{}/sitemap.xml", server.url()), 0)
        .await
        .unwrap();

    assert_eq!(urls, vec!["https://docs.example.com/a".to_string()]);
    assert!(urls.iter().all(|u| u.starts_with("https://")));
}
