// Copyright 2024 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The introspection client: `query`/`get`/`invoke` against the JMX proxy
//! servlet's text endpoint.

use crate::config::HttpClientConfig;
use crate::error::TomcatError;
use crate::parser::{parse_get_results, parse_invoke_results, parse_search_results};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[async_trait]
pub trait IntrospectionClient: Send + Sync {
    async fn query(&self, pattern: &str) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError>;

    async fn get(&self, bean: &str, attribute: &str, key: Option<&str>) -> Result<Value, TomcatError>;

    async fn invoke(
        &self,
        bean: &str,
        operation: &str,
        params: &[String],
    ) -> Result<Option<Value>, TomcatError>;
}

pub struct JmxProxyClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl JmxProxyClient {
    pub fn new(
        base_url: String,
        user: String,
        password: String,
        config: &HttpClientConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: crate::http::new_reqwest_client(config)?,
            base_url,
            user,
            password,
        })
    }

    fn url(&self, query: &str) -> String {
        format!("{}/manager/jmxproxy/?{}", self.base_url.trim_end_matches('/'), query)
    }

    async fn do_get(&self, query: &str) -> Result<String, TomcatError> {
        let url = self.url(query);
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|source| TomcatError::Transport {
                url: url.clone(),
                source,
            })?;

        response.text().await.map_err(|source| TomcatError::Transport { url, source })
    }
}

#[async_trait]
impl IntrospectionClient for JmxProxyClient {
    async fn query(&self, pattern: &str) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError> {
        let query = format!("qry={}", urlencoding(pattern));
        let body = self.do_get(&query).await?;
        parse_search_results(&body)
    }

    async fn get(&self, bean: &str, attribute: &str, key: Option<&str>) -> Result<Value, TomcatError> {
        let mut query = format!(
            "get={}&att={}",
            urlencoding(bean),
            urlencoding(attribute)
        );
        if let Some(key) = key {
            query.push_str(&format!("&key={}", urlencoding(key)));
        }
        let body = self.do_get(&query).await?;
        parse_get_results(&body)
    }

    async fn invoke(
        &self,
        bean: &str,
        operation: &str,
        params: &[String],
    ) -> Result<Option<Value>, TomcatError> {
        let mut query = format!(
            "invoke={}&op={}",
            urlencoding(bean),
            urlencoding(operation)
        );
        if !params.is_empty() {
            query.push_str(&format!("&ps={}", urlencoding(&params.join(","))));
        }
        let body = self.do_get(&query).await?;
        parse_invoke_results(&body)
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeIntrospectionClient;

    #[tokio::test]
    async fn fake_client_filters_by_pattern() {
        let mut beans = BTreeMap::new();
        beans.insert(
            "Catalina:type=Manager,context=/foo".to_string(),
            BTreeMap::new(),
        );
        beans.insert(
            "Catalina:type=Connector,port=8080".to_string(),
            BTreeMap::new(),
        );
        let client = FakeIntrospectionClient::new(beans);
        let result = client.query("Catalina:type=Manager,*").await.unwrap();
        assert_eq!(result.len(), 1);
    }
}
