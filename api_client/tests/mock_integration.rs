use api_client::{ApiClient, ApiClientError, GalleryApi};
use httptest::{matchers::*, responders::*, Expectation, Server};
use serde_json::json;

fn photos_body(ids: &[&str]) -> serde_json::Value {
    let photos: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "owner": "owner",
                "title": format!("photo {}", id),
                "url_s": format!("https://live.staticflickr.com/{}.jpg", id)
            })
        })
        .collect();
    json!({ "photos": { "page": 1, "photo": photos }, "stat": "ok" })
}

#[tokio::test]
async fn test_fetch_default_uses_interestingness() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/services/rest/"),
            request::query(url_decoded(contains(("method", "flickr.interestingness.getList")))),
            request::query(url_decoded(contains(("api_key", "key")))),
            request::query(url_decoded(contains(("extras", "url_s")))),
            request::query(url_decoded(contains(("nojsoncallback", "1")))),
        ])
        .respond_with(json_encoded(photos_body(&["1", "2"]))),
    );

    let client = ApiClient::with_base_url("key".into(), server.url_str(""));
    let items = client.fetch_default().await.unwrap();
    let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_search_sends_text() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/services/rest/"),
            request::query(url_decoded(contains(("method", "flickr.photos.search")))),
            request::query(url_decoded(contains(("text", "snowy mountains")))),
        ])
        .respond_with(json_encoded(photos_body(&["9"]))),
    );

    let client = ApiClient::with_base_url("key".into(), server.url_str(""));
    let items = client.search("snowy mountains").await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "9");
}

#[tokio::test]
async fn test_http_error_is_network_error() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/services/rest/"))
            .respond_with(status_code(500).body("boom")),
    );

    let client = ApiClient::with_base_url("key".into(), server.url_str(""));
    let err = client.search("x").await.unwrap_err();
    assert!(matches!(err, ApiClientError::Network(ref msg) if msg.contains("boom")));
}

#[tokio::test]
async fn test_fail_stat_is_network_error() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/services/rest/")).respond_with(
            json_encoded(json!({"stat": "fail", "code": 100, "message": "Invalid API Key"})),
        ),
    );

    let client = ApiClient::with_base_url("bad".into(), server.url_str(""));
    assert!(client.fetch_default().await.is_err());
}

#[tokio::test]
async fn test_unreachable_host_is_network_error() {
    let client = ApiClient::with_base_url("key".into(), "http://127.0.0.1:1".into());
    assert!(matches!(
        client.fetch_default().await,
        Err(ApiClientError::Network(_))
    ));
}
