use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::app::Result;
use crate::domain::FetchedHotItem;
use crate::fetcher::HotSource;
use crate::normalizer::Normalizer;

pub const DEFAULT_API_BASE: &str = "https://api.pearktrue.cn";
const HOT_ENDPOINT: &str = "/api/dailyhot/";

/// Hot lists served by a dailyhot-compatible API.
pub struct HttpHotSource {
    client: Client,
    endpoint: String,
    normalizer: Normalizer,
}

impl HttpHotSource {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("fastfish/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base = Url::parse(api_base.trim_end_matches('/'))?;
        let endpoint = format!("{}{}", base.as_str().trim_end_matches('/'), HOT_ENDPOINT);

        Ok(Self {
            client,
            endpoint,
            normalizer: Normalizer::new(),
        })
    }

    async fn get(&self, url: Url) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        response.error_for_status_ref()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl HotSource for HttpHotSource {
    async fn fetch_source(&self, source: &str) -> Result<Vec<FetchedHotItem>> {
        let url = Url::parse_with_params(&self.endpoint, &[("title", source)])?;
        let body = self.get(url).await?;
        self.normalizer.normalize_items(&body)
    }

    async fn list_platforms(&self) -> Result<Vec<String>> {
        let url = Url::parse(&self.endpoint)?;
        let body = self.get(url).await?;
        self.normalizer.normalize_platforms(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> HttpHotSource {
        HttpHotSource::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_source_sends_title_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dailyhot/"))
            .and(query_param("title", "微博"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": [
                    {"title": "热点一", "url": "https://weibo.com/1", "hot": 100},
                    {"title": "热点二", "url": "https://weibo.com/2"}
                ]
            })))
            .mount(&server)
            .await;

        let items = source(&server).fetch_source("微博").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "热点一");
        assert_eq!(items[1].rank, 2);
    }

    #[tokio::test]
    async fn test_fetch_source_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dailyhot/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(source(&server).fetch_source("zhihu").await.is_err());
    }

    #[tokio::test]
    async fn test_list_platforms() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dailyhot/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": {"platforms": ["微博", "知乎", "百度"]}
            })))
            .mount(&server)
            .await;

        let platforms = source(&server).list_platforms().await.unwrap();
        assert_eq!(platforms, vec!["微博", "知乎", "百度"]);
    }

    #[test]
    fn test_invalid_api_base() {
        assert!(HttpHotSource::new("not a url", Duration::from_secs(1)).is_err());
    }
}
