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

//! The management client: uploads and removes web archives through the
//! text management endpoint, reporting upload progress as it streams the
//! archive body.

use crate::config::HttpClientConfig;
use crate::error::TomcatError;
use crate::events::{emit, Event, EventSender};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream;
use std::path::Path;
use tokio::io::AsyncRead;

const UPLOAD_BLOCK_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn deploy(
        &self,
        filename: &Path,
        context: &str,
        vhost: &str,
        progress: Option<EventSender>,
    ) -> Result<(), TomcatError>;

    async fn undeploy(&self, context: &str, vhost: &str) -> Result<(), TomcatError>;
}

pub struct TextManagerClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    node_id: String,
}

impl TextManagerClient {
    pub fn new(
        base_url: String,
        user: String,
        password: String,
        node_id: String,
        config: &HttpClientConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: crate::http::new_reqwest_client(config)?,
            base_url,
            user,
            password,
            node_id,
        })
    }

    fn url(&self, path: &str, query: &str) -> String {
        format!(
            "{}/manager/text/{}?{}",
            self.base_url.trim_end_matches('/'),
            path,
            query
        )
    }

    async fn check_ok(url: &str, body: String) -> Result<(), TomcatError> {
        if body.starts_with("OK") {
            Ok(())
        } else {
            let _ = url;
            Err(TomcatError::Remote(body))
        }
    }
}

#[async_trait]
impl ManagementClient for TextManagerClient {
    async fn deploy(
        &self,
        filename: &Path,
        context: &str,
        vhost: &str,
        progress: Option<EventSender>,
    ) -> Result<(), TomcatError> {
        let url = self.url("deploy", &format!("path={}", url_encode(context)));

        let mut file = tokio::fs::File::open(filename).await.map_err(|e| {
            TomcatError::Remote(format!("could not open {}: {e}", filename.display()))
        })?;
        let total = file
            .metadata()
            .await
            .ok()
            .map(|m| m.len());

        let node = self.node_id.clone();
        let filename_str = filename.display().to_string();
        let url_for_events = url.clone();
        let mut position: u64 = 0;

        let body_stream = stream::poll_fn(move |cx| {
            let mut buf = BytesMut::zeroed(UPLOAD_BLOCK_SIZE);
            let mut read_buf = tokio::io::ReadBuf::new(&mut buf);
            match std::pin::Pin::new(&mut file).poll_read(cx, &mut read_buf) {
                std::task::Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        std::task::Poll::Ready(None)
                    } else {
                        position += n as u64;
                        emit(
                            progress.as_ref(),
                            Event::Upload {
                                node: node.clone(),
                                filename: filename_str.clone(),
                                url: url_for_events.clone(),
                                position,
                                total,
                                blocksize: n as u64,
                            },
                        );
                        let chunk: Bytes = buf.split_to(n).freeze();
                        std::task::Poll::Ready(Some(Ok::<Bytes, std::io::Error>(chunk)))
                    }
                }
                std::task::Poll::Ready(Err(e)) => std::task::Poll::Ready(Some(Err(e))),
                std::task::Poll::Pending => std::task::Poll::Pending,
            }
        });

        let response = self
            .http
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Host", vhost)
            .header("Content-Type", "application/binary")
            .body(reqwest::Body::wrap_stream(body_stream))
            .send()
            .await
            .map_err(|source| TomcatError::Transport {
                url: url.clone(),
                source,
            })?;

        let body = response
            .text()
            .await
            .map_err(|source| TomcatError::Transport { url: url.clone(), source })?;
        Self::check_ok(&url, body).await
    }

    async fn undeploy(&self, context: &str, vhost: &str) -> Result<(), TomcatError> {
        let url = self.url("undeploy", &format!("path={}", url_encode(context)));
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Host", vhost)
            .send()
            .await
            .map_err(|source| TomcatError::Transport {
                url: url.clone(),
                source,
            })?;
        let body = response
            .text()
            .await
            .map_err(|source| TomcatError::Transport { url: url.clone(), source })?;
        Self::check_ok(&url, body).await
    }
}

fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeManagementClient;

    #[tokio::test]
    async fn fake_client_records_deployments() {
        let client = FakeManagementClient::default();
        client
            .deploy(Path::new("/tmp/app.war"), "app", "localhost", None)
            .await
            .unwrap();
        assert_eq!(client.deployed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fake_client_can_be_made_to_fail_a_specific_context() {
        let client = FakeManagementClient::default();
        client.fail_deploy_for.lock().unwrap().push("app".to_string());
        let err = client
            .deploy(Path::new("/tmp/app.war"), "app", "localhost", None)
            .await
            .unwrap_err();
        assert!(matches!(err, TomcatError::Remote(_)));
    }
}
