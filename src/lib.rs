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

use clap_verbosity_flag::Verbosity;
use tracing_subscriber::FmtSubscriber;

pub mod cli;
pub mod cluster;
pub mod config;
pub mod deploy;
pub mod error;
pub mod error_display;
pub mod events;
pub mod glob;
pub mod http;
pub mod jmx;
pub mod log;
pub mod manager;
pub mod node;
pub mod parser;
pub mod value;
pub mod warfile;

pub mod test_support;

use crate::config::{ClusterCredentials, HttpClientConfig};
use crate::error::TomcatError;
use crate::jmx::JmxProxyClient;
use crate::manager::TextManagerClient;
use crate::node::Node;
use std::sync::Arc;

/// Builds a [`Node`] talking to `host:port` over plain HTTP, sharing the same
/// credentials and insecure-TLS setting as every other node in the cluster.
pub fn build_node(
    host: &str,
    port: u16,
    credentials: &ClusterCredentials,
    allow_insecure: bool,
) -> Result<Arc<Node>, TomcatError> {
    let base_url = format!("http://{host}:{port}");
    let call_config = HttpClientConfig::new_for_calls(allow_insecure);
    let upload_config = HttpClientConfig::new_for_upload(allow_insecure);

    let jmx = JmxProxyClient::new(
        base_url.clone(),
        credentials.user.clone(),
        credentials.password.clone(),
        &call_config,
    )
    .map_err(|e| TomcatError::Remote(format!("could not build client for {host}:{port}: {e}")))?;

    let mgr = TextManagerClient::new(
        base_url,
        credentials.user.clone(),
        credentials.password.clone(),
        format!("{host}:{port}"),
        &upload_config,
    )
    .map_err(|e| TomcatError::Remote(format!("could not build client for {host}:{port}: {e}")))?;

    Ok(Arc::new(Node::new(host.to_string(), port, Arc::new(jmx), Arc::new(mgr))))
}

/// Sets up the global tracing subscriber at the level selected by `-v`/`-q`
/// flags. A no-op if verbosity selects no logging at all.
pub fn init_tracing(verbosity: Verbosity) {
    if let Some(level) = verbosity.log_level() {
        let tracing_level = match level {
            ::log::Level::Error => tracing::Level::ERROR,
            ::log::Level::Warn => tracing::Level::WARN,
            ::log::Level::Info => tracing::Level::INFO,
            ::log::Level::Debug => tracing::Level::DEBUG,
            ::log::Level::Trace => tracing::Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(tracing_level)
            .with_writer(std::io::stderr)
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}
