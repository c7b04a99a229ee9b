use api_client::{ApiClientError, GalleryApi, GalleryItem};
use async_trait::async_trait;
use httptest::{matchers::*, responders::*, Expectation, Server};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Gallery item with predictable fields derived from `id`.
pub fn item(id: &str) -> GalleryItem {
    GalleryItem {
        title: format!("Photo {}", id),
        id: id.to_string(),
        url: format!("https://live.staticflickr.com/65535/{}_s.jpg", id),
        owner: "owner@N00".to_string(),
    }
}

pub fn items(ids: &[&str]) -> Vec<GalleryItem> {
    ids.iter().map(|id| item(id)).collect()
}

fn photos_body(ids: &[&str]) -> serde_json::Value {
    let photos: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "owner": "owner@N00",
                "secret": "abc",
                "server": "65535",
                "title": format!("Photo {}", id),
                "url_s": format!("https://live.staticflickr.com/65535/{}_s.jpg", id)
            })
        })
        .collect();
    json!({
        "photos": { "page": 1, "pages": 1, "perpage": 100, "total": ids.len(), "photo": photos },
        "stat": "ok"
    })
}

/// Create an empty mock server for the Flickr REST endpoint.
pub fn flickr_server() -> Server {
    Server::run()
}

/// Expect any number of `flickr.interestingness.getList` calls answered with `ids`.
pub fn expect_interesting(server: &Server, ids: &[&str]) {
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/services/rest/"),
            request::query(url_decoded(contains(("method", "flickr.interestingness.getList")))),
        ])
        .times(..)
        .respond_with(json_encoded(photos_body(ids))),
    );
}

/// Expect any number of `flickr.photos.search` calls for `text` answered with `ids`.
pub fn expect_search(server: &Server, text: &str, ids: &[&str]) {
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/services/rest/"),
            request::query(url_decoded(contains(("method", "flickr.photos.search")))),
            request::query(url_decoded(contains(("text", eq(text.to_string()))))),
        ])
        .times(..)
        .respond_with(json_encoded(photos_body(ids))),
    );
}

/// Base URL to hand to `ApiClient::with_base_url`.
pub fn base_url(server: &Server) -> String {
    server.url_str("")
}

/// Scripted [`GalleryApi`]. The empty query stands for the default page.
#[derive(Default)]
pub struct FakeGalleryApi {
    responses: Mutex<HashMap<String, Result<Vec<GalleryItem>, ApiClientError>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

/// Holds back responses for one query until released.
#[derive(Clone)]
pub struct Gate(Arc<Notify>);

impl Gate {
    /// Let one pending (or the next) call through.
    pub fn release(&self) {
        self.0.notify_one();
    }
}

impl FakeGalleryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, query: &str, ids: &[&str]) {
        self.responses
            .lock()
            .unwrap()
            .insert(query.to_string(), Ok(items(ids)));
    }

    pub fn fail(&self, query: &str) {
        self.responses.lock().unwrap().insert(
            query.to_string(),
            Err(ApiClientError::Network(format!("scripted failure for {:?}", query))),
        );
    }

    /// Make calls for `query` wait until the returned gate is released.
    pub fn hold(&self, query: &str) -> Gate {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(query.to_string(), notify.clone());
        Gate(notify)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn answer(&self, query: &str) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.calls.lock().unwrap().push(query.to_string());
        let gate = self.gates.lock().unwrap().get(query).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_else(|| Err(ApiClientError::Network(format!("no response for {:?}", query))))
    }
}

#[async_trait]
impl GalleryApi for FakeGalleryApi {
    async fn fetch_default(&self) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.answer("").await
    }

    async fn search(&self, text: &str) -> Result<Vec<GalleryItem>, ApiClientError> {
        self.answer(text).await
    }
}
