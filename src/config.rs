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

//! Per-invocation configuration. There is no on-disk profile store: every
//! setting here is either a CLI flag default or an environment variable
//! override, read once at startup.

use std::time::Duration;

/// Credentials and network coordinates shared by every client talking to a
/// given node. Cloned cheaply into each `Node`.
#[derive(Debug, Clone)]
pub struct ClusterCredentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub allow_insecure: bool,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl HttpClientConfig {
    /// Used for ordinary introspection/management calls (query, get, invoke,
    /// undeploy).
    pub fn new_for_calls(allow_insecure: bool) -> Self {
        Self {
            allow_insecure,
            timeout: Some(Duration::from_secs(10)),
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(10)),
        }
        .with_env_overrides("TOMCAT_FLEET_HTTP")
    }

    /// Used for archive uploads, which can run for a long time on a large
    /// WAR over a slow link.
    pub fn new_for_upload(allow_insecure: bool) -> Self {
        Self {
            allow_insecure,
            timeout: Some(Duration::from_secs(900)),
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(900)),
        }
        .with_env_overrides("TOMCAT_FLEET_HTTP_UPLOAD")
    }

    fn with_env_overrides(mut self, prefix: &str) -> Self {
        fn env_duration_secs(name: &str) -> Option<Duration> {
            let raw = std::env::var(name).ok()?;
            raw.parse::<u64>().ok().map(Duration::from_secs)
        }

        let duration_fields: Vec<(&str, &mut Option<Duration>)> = vec![
            ("TIMEOUT_SECS", &mut self.timeout),
            ("CONNECT_TIMEOUT_SECS", &mut self.connect_timeout),
            ("READ_TIMEOUT_SECS", &mut self.read_timeout),
        ];

        for (suffix, field) in duration_fields {
            if let Some(duration) = env_duration_secs(&format!("{prefix}_{suffix}")) {
                *field = Some(duration);
            }
        }

        self
    }
}

/// Tunables for the deployment workflow (`src/deploy.rs`), exposed one
/// field per CLI flag.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub undeploy_on_error: bool,
    pub check_memory: bool,
    pub required_memory: u32,
    pub auto_gc: bool,
    pub auto_restart: bool,
    pub kill_sessions: bool,
    pub poll_interval: Duration,
    pub deploy_wait_time: Duration,
    pub gc_wait_time: Duration,
    pub restart_fraction: f64,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            undeploy_on_error: true,
            check_memory: true,
            required_memory: 50,
            auto_gc: true,
            auto_restart: false,
            kill_sessions: false,
            poll_interval: Duration::from_secs(5),
            deploy_wait_time: Duration::from_secs(30),
            gc_wait_time: Duration::from_secs(10),
            restart_fraction: 0.33,
        }
    }
}
