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

//! The node facade: one per cluster member, composing the introspection and
//! management clients into the higher-level operations the orchestrator and
//! deployment workflow actually call.

use crate::error::{RestartPhase, TomcatError};
use crate::events::EventSender;
use crate::jmx::IntrospectionClient;
use crate::manager::ManagementClient;
use crate::value::Value;
use crate::warfile::WebArchiveRef;
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const INVALID_MEMBER_IPS: [&str; 2] = ["0.0.0.0", "255.255.255.255"];
const EXCLUDED_MEMORY_POOLS: [&str; 3] = ["Par Eden Space", "Par Survivor Space", "Code Cache"];

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPool {
    pub used: i64,
    pub max: i64,
    pub init: i64,
    pub committed: i64,
}

impl MemoryPool {
    pub fn usage_percent(&self) -> u32 {
        if self.max <= 0 {
            0
        } else {
            ((100 * self.used) / self.max) as u32
        }
    }

    fn from_value(v: &Value) -> Option<Self> {
        let m = v.as_map()?;
        Some(MemoryPool {
            used: m.get("used")?.as_i64()?,
            max: m.get("max")?.as_i64()?,
            init: m.get("init").and_then(Value::as_i64).unwrap_or(0),
            committed: m.get("committed").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClusterMember {
    pub object_name: String,
    pub hostname: String,
    pub port: Option<u16>,
    pub ready: bool,
    pub failing: bool,
    pub suspect: bool,
}

#[derive(Debug, Clone)]
pub struct Webapp {
    pub base_name: String,
    pub path: Option<String>,
    pub state_name: String,
    pub webapp_version: Option<String>,
}

pub struct Node {
    pub host: String,
    pub port: u16,
    jmx: Arc<dyn IntrospectionClient>,
    mgr: Arc<dyn ManagementClient>,
}

impl Node {
    pub fn new(host: String, port: u16, jmx: Arc<dyn IntrospectionClient>, mgr: Arc<dyn ManagementClient>) -> Self {
        Self { host, port, jmx, mgr }
    }

    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn memory_info(&self) -> Result<BTreeMap<String, MemoryPool>, TomcatError> {
        let mut data = self.jmx.query("java.lang:type=Memory*,*").await?;
        let mut info = BTreeMap::new();

        if let Some(generic) = data.remove("java.lang:type=Memory") {
            for (src, dest) in [("NonHeapMemoryUsage", "NonHeapMemory"), ("HeapMemoryUsage", "HeapMemory")] {
                if let Some(pool) = generic.get(src).and_then(MemoryPool::from_value) {
                    info.insert(dest.to_string(), pool);
                }
            }
        }

        for (bean_id, props) in data {
            if let Some(name) = bean_id.strip_prefix("java.lang:type=MemoryPool,name=") {
                if let Some(pool) = props.get("Usage").and_then(MemoryPool::from_value) {
                    info.insert(name.to_string(), pool);
                }
            }
        }

        Ok(info)
    }

    pub async fn memory_usage(&self) -> Result<BTreeMap<String, u32>, TomcatError> {
        Ok(self
            .memory_info()
            .await?
            .into_iter()
            .map(|(name, pool)| (name, pool.usage_percent()))
            .collect())
    }

    /// Pools over `percentage`, worst offender first.
    pub async fn find_pools_over(&self, percentage: u32) -> Result<Vec<String>, TomcatError> {
        Ok(self
            .memory_usage()
            .await?
            .into_iter()
            .filter(|(name, usage)| *usage > percentage && !EXCLUDED_MEMORY_POOLS.contains(&name.as_str()))
            .sorted_by_key(|(_, usage)| Reverse(*usage))
            .map(|(name, _)| name)
            .collect())
    }

    pub async fn run_gc(&self) -> Result<(), TomcatError> {
        self.jmx.invoke("java.lang:type=Memory", "gc", &[]).await?;
        Ok(())
    }

    pub async fn dump_all_threads(&self) -> Result<Value, TomcatError> {
        let params = vec!["true".to_string(), "true".to_string()];
        self.jmx
            .invoke("java.lang:type=Threading", "dumpAllThreads", &params)
            .await?
            .ok_or_else(|| TomcatError::Parse("dumpAllThreads returned no value".into()))
    }

    pub async fn vhosts(&self) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError> {
        self.jmx.query("Catalina:type=Host,*").await
    }

    pub async fn deployers(&self) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError> {
        self.jmx.query("Catalina:type=Deployer,*").await
    }

    pub async fn has_cluster(&self) -> Result<bool, TomcatError> {
        Ok(!self.jmx.query("Catalina:type=Cluster").await?.is_empty())
    }

    pub async fn cluster_name(&self) -> Result<Option<String>, TomcatError> {
        let v = self.jmx.get("Catalina:type=Cluster", "clusterName", None).await?;
        Ok(v.as_str().map(|s| s.to_string()))
    }

    pub async fn server_status(&self) -> Result<String, TomcatError> {
        let v = self.jmx.get("Catalina:type=Server", "stateName", None).await?;
        v.as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| TomcatError::Parse("stateName was not a string".into()))
    }

    pub async fn cluster_members(&self) -> Result<BTreeMap<String, ClusterMember>, TomcatError> {
        let beans = self
            .jmx
            .query("Catalina:type=Cluster,component=Member,*")
            .await?;
        let mut members = BTreeMap::new();
        for (bean_id, props) in beans {
            let hostname = props
                .get("hostname")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if INVALID_MEMBER_IPS.contains(&hostname.as_str()) {
                continue;
            }
            let port = props
                .get("port")
                .and_then(Value::as_i64)
                .and_then(|p| u16::try_from(p).ok());
            members.insert(
                bean_id.clone(),
                ClusterMember {
                    object_name: bean_id,
                    hostname,
                    port,
                    ready: props.get("ready").and_then(Value::as_bool).unwrap_or(false),
                    failing: props.get("failing").and_then(Value::as_bool).unwrap_or(false),
                    suspect: props.get("suspect").and_then(Value::as_bool).unwrap_or(false),
                },
            );
        }
        Ok(members)
    }

    pub async fn active_members(&self) -> Result<BTreeMap<String, ClusterMember>, TomcatError> {
        Ok(self
            .cluster_members()
            .await?
            .into_iter()
            .filter(|(_, m)| m.ready && !m.failing && !m.suspect)
            .collect())
    }

    /// Rekeys the result by the bean's `name` property (substituting `/`
    /// when absent), not by `path` -- `path` is shared by every version of
    /// a context while `name` is the unique per-version context identifier.
    pub async fn list_webapps(&self, app: &str, vhost: &str) -> Result<BTreeMap<String, Webapp>, TomcatError> {
        let pattern = format!(
            "Catalina:j2eeType=WebModule,name=//{}/{},*",
            vhost,
            app.trim_start_matches('/')
        );
        let beans = self.jmx.query(&pattern).await?;
        let mut webapps = BTreeMap::new();
        for props in beans.into_values() {
            let path = props.get("path").and_then(Value::as_str).map(|s| s.to_string());
            let base_name = props.get("name").and_then(Value::as_str).map(|s| s.to_string());
            let key = base_name.clone().unwrap_or_else(|| "/".to_string());
            let state_name = props
                .get("stateName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let webapp_version = props
                .get("webappVersion")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            webapps.insert(
                key,
                Webapp {
                    base_name: base_name.unwrap_or_default(),
                    path,
                    state_name,
                    webapp_version,
                },
            );
        }
        Ok(webapps)
    }

    pub async fn find_managers(
        &self,
        app: &str,
        vhost: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError> {
        let pattern = format!("Catalina:type=Manager,context={app},host={vhost}");
        let beans = self.jmx.query(&pattern).await?;
        let mut by_context = BTreeMap::new();
        for (bean_id, props) in beans {
            let context = extract_manager_context(&bean_id).unwrap_or(bean_id);
            by_context.insert(context, props);
        }
        Ok(by_context)
    }

    async fn list_session_ids(&self, manager_object_name: &str) -> Result<Vec<String>, TomcatError> {
        let result = self.jmx.invoke(manager_object_name, "listSessionIds", &[]).await?;
        Ok(match result.and_then(|v| v.as_str().map(str::to_string)) {
            Some(s) if !s.trim().is_empty() => s.trim_end().split(' ').map(str::to_string).collect(),
            _ => Vec::new(),
        })
    }

    pub async fn list_sessions(
        &self,
        app: &str,
        vhost: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, TomcatError> {
        let managers = self.find_managers(app, vhost).await?;
        let mut sessions = BTreeMap::new();
        for (context, props) in managers {
            let active = props.get("activeSessions").and_then(Value::as_i64).unwrap_or(0);
            if active > 0 {
                if let Some(object_name) = props.get("objectName").and_then(Value::as_str) {
                    sessions.insert(context, self.list_session_ids(object_name).await?);
                    continue;
                }
            }
            sessions.insert(context, Vec::new());
        }
        Ok(sessions)
    }

    pub async fn undeploy_old_versions(&self, vhost: Option<&str>) -> Result<(), TomcatError> {
        let deployer_ids: Vec<String> = match vhost {
            Some(vhost) => vec![format!("Catalina:type=Deployer,host={vhost}")],
            None => self.deployers().await?.into_keys().collect(),
        };
        for deployer in deployer_ids {
            self.jmx.invoke(&deployer, "checkUndeploy", &[]).await?;
        }
        Ok(())
    }

    pub async fn find_connectors(&self) -> Result<Vec<String>, TomcatError> {
        let result = self
            .jmx
            .invoke("Catalina:type=Service", "findConnectors", &[])
            .await?;
        Ok(match result {
            Some(Value::List(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::Str(s)) => vec![s],
            _ => Vec::new(),
        })
    }

    pub async fn max_heap(&self) -> Result<i64, TomcatError> {
        let v = self
            .jmx
            .get("java.lang:type=Memory", "HeapMemoryUsage", Some("max"))
            .await?;
        v.as_i64().ok_or_else(|| TomcatError::Parse("max heap was not numeric".into()))
    }

    pub async fn max_nonheap(&self) -> Result<i64, TomcatError> {
        let v = self
            .jmx
            .get("java.lang:type=Memory", "NonHeapMemoryUsage", Some("max"))
            .await?;
        v.as_i64().ok_or_else(|| TomcatError::Parse("max nonheap was not numeric".into()))
    }

    pub async fn deploy(
        &self,
        filename: &Path,
        context: Option<&str>,
        vhost: &str,
        progress: Option<EventSender>,
    ) -> Result<(), TomcatError> {
        let reference = WebArchiveRef::parse(filename)?;
        let context = context.unwrap_or(&reference.context);
        self.mgr.deploy(filename, context, vhost, progress).await
    }

    pub async fn undeploy(&self, context: &str, vhost: &str) -> Result<(), TomcatError> {
        self.mgr.undeploy(context, vhost).await
    }

    pub async fn expire_session(&self, manager_object_name: &str, session_id: &str) -> Result<(), TomcatError> {
        self.jmx
            .invoke(manager_object_name, "expireSession", &[session_id.to_string()])
            .await?;
        Ok(())
    }

    pub async fn expire_sessions(&self, app: &str, vhost: &str) -> Result<(), TomcatError> {
        let sessions = self.list_sessions(app, vhost).await?;
        if sessions.is_empty() {
            return Err(TomcatError::NotFound {
                app: Some(app.to_string()),
                vhost: Some(vhost.to_string()),
            });
        }
        let managers = self.find_managers(app, vhost).await?;
        for (context, ids) in sessions {
            for id in ids {
                let object_name = managers
                    .get(&context)
                    .and_then(|props| props.get("objectName"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| TomcatError::NotFound {
                        app: Some(app.to_string()),
                        vhost: Some(vhost.to_string()),
                    })?;
                self.expire_session(object_name, &id).await?;
            }
        }
        Ok(())
    }

    async fn find_restarter(&self) -> Option<Restarter> {
        if let Ok(Value::Bool(true)) = self
            .jmx
            .get("org.tanukisoftware.wrapper:type=WrapperManager", "ControlledByNativeWrapper", None)
            .await
        {
            return Some(Restarter {
                bean: "org.tanukisoftware.wrapper:type=WrapperManager".to_string(),
            });
        }
        if let Ok(beans) = self.jmx.query("Wrapper:name=*").await {
            if let Some(bean) = beans.into_keys().next() {
                if let Ok(Value::Bool(true)) = self.jmx.get(&bean, "ControlledByWrapper", None).await {
                    return Some(Restarter { bean });
                }
            }
        }
        None
    }

    pub async fn can_restart(&self) -> bool {
        self.find_restarter().await.is_some()
    }

    /// Runs the down -> up -> apps-up restart state machine for this node.
    pub async fn restart(&self, timeout: Duration, poll_interval: Duration) -> Result<(), TomcatError> {
        let apps: Vec<String> = self
            .list_webapps("*", "*")
            .await?
            .into_values()
            .map(|w| w.base_name)
            .collect();

        let restarter = self
            .find_restarter()
            .await
            .ok_or_else(|| TomcatError::CannotRestart(self.id()))?;

        self.jmx.invoke(&restarter.bean, "restart", &[]).await?;

        wait_until(timeout, poll_interval, || async {
            !matches!(self.server_status().await, Ok(ref s) if s == "STARTED")
        })
        .await
        .then_some(())
        .ok_or(TomcatError::RestartTimeout(RestartPhase::Down))?;

        wait_until(timeout, poll_interval, || async {
            matches!(self.server_status().await, Ok(ref s) if s == "STARTED")
        })
        .await
        .then_some(())
        .ok_or(TomcatError::RestartTimeout(RestartPhase::Up))?;

        wait_until(timeout, poll_interval, || async {
            let current = match self.list_webapps("*", "*").await {
                Ok(current) => current,
                Err(_) => return false,
            };
            apps.iter().all(|app| {
                current
                    .values()
                    .any(|w| &w.base_name == app && w.state_name == "STARTED")
            })
        })
        .await
        .then_some(())
        .ok_or(TomcatError::RestartTimeout(RestartPhase::AppsUp))?;

        Ok(())
    }
}

struct Restarter {
    bean: String,
}

async fn wait_until<F, Fut>(timeout: Duration, poll_interval: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn extract_manager_context(bean_id: &str) -> Option<String> {
    let rest = bean_id.strip_prefix("Catalina:type=Manager,context=")?;
    let (context, _) = rest.split_once(",host=")?;
    Some(context.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeIntrospectionClient, FakeManagementClient};
    use std::collections::BTreeMap as Map;

    fn node_with(beans: Map<String, Map<String, Value>>) -> Node {
        Node::new(
            "n1".to_string(),
            8080,
            Arc::new(FakeIntrospectionClient::new(beans)),
            Arc::new(FakeManagementClient::default()),
        )
    }

    #[tokio::test]
    async fn memory_info_splits_generic_and_pool_beans() {
        let mut beans = Map::new();
        let mut generic = Map::new();
        let mut heap = Map::new();
        heap.insert("used".to_string(), Value::Int(100));
        heap.insert("max".to_string(), Value::Int(1000));
        generic.insert("HeapMemoryUsage".to_string(), Value::Map(heap));
        beans.insert("java.lang:type=Memory".to_string(), generic);

        let mut pool = Map::new();
        let mut usage = Map::new();
        usage.insert("used".to_string(), Value::Int(50));
        usage.insert("max".to_string(), Value::Int(200));
        pool.insert("Usage".to_string(), Value::Map(usage));
        beans.insert(
            "java.lang:type=MemoryPool,name=Par Eden Space".to_string(),
            pool,
        );

        let node = node_with(beans);
        let info = node.memory_info().await.unwrap();
        assert_eq!(info["HeapMemory"].used, 100);
        assert_eq!(info["Par Eden Space"].used, 50);
    }

    #[tokio::test]
    async fn find_pools_over_excludes_transient_pools() {
        let mut beans = Map::new();
        let mut pool = Map::new();
        let mut usage = Map::new();
        usage.insert("used".to_string(), Value::Int(95));
        usage.insert("max".to_string(), Value::Int(100));
        pool.insert("Usage".to_string(), Value::Map(usage));
        beans.insert(
            "java.lang:type=MemoryPool,name=Par Eden Space".to_string(),
            pool.clone(),
        );
        beans.insert(
            "java.lang:type=MemoryPool,name=Tenured Gen".to_string(),
            pool,
        );

        let node = node_with(beans);
        let over = node.find_pools_over(50).await.unwrap();
        assert_eq!(over, vec!["Tenured Gen".to_string()]);
    }

    #[tokio::test]
    async fn cluster_members_filters_invalid_addresses() {
        let mut beans = Map::new();
        for (id, hostname) in [
            ("Catalina:type=Cluster,component=Member,name=1", "10.0.0.1"),
            ("Catalina:type=Cluster,component=Member,name=2", "0.0.0.0"),
        ] {
            let mut props = Map::new();
            props.insert("hostname".to_string(), Value::Str(hostname.to_string()));
            props.insert("ready".to_string(), Value::Bool(true));
            props.insert("failing".to_string(), Value::Bool(false));
            props.insert("suspect".to_string(), Value::Bool(false));
            beans.insert(id.to_string(), props);
        }
        let node = node_with(beans);
        let members = node.cluster_members().await.unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn find_managers_extracts_context_from_bean_id() {
        let mut beans = Map::new();
        beans.insert(
            "Catalina:type=Manager,context=/foo,host=localhost".to_string(),
            Map::new(),
        );
        let node = node_with(beans);
        let managers = node.find_managers("*", "*").await.unwrap();
        assert!(managers.contains_key("/foo"));
    }

    #[tokio::test]
    async fn expire_sessions_fails_when_no_managers_found() {
        let node = node_with(Map::new());
        let err = node.expire_sessions("/app", "*").await.unwrap_err();
        assert!(matches!(err, TomcatError::NotFound { .. }));
    }
}
