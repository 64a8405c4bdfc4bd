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

//! The cluster orchestrator: discovers members starting from a seed node,
//! fans a command out across members with bounded concurrency, and
//! aggregates per-member results -- including the cross-member web
//! application status view used by the deployment workflow.

use crate::error::TomcatError;
use crate::events::{emit, Event, EventSender};
use crate::node::{ClusterMember, Node, Webapp};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const DEFAULT_MAX_THREADS: usize = 20;
const INTERESTING_KEYS: [&str; 3] = ["stateName", "path", "webappVersion"];

/// A fallible async operation applied to a single node, type-erased so the
/// orchestrator can dispatch it by name instead of by `getattr`.
pub type CommandFn<T> =
    Arc<dyn Fn(Arc<Node>) -> Pin<Box<dyn Future<Output = Result<T, TomcatError>> + Send>> + Send + Sync>;

pub fn command<T, F, Fut>(f: F) -> CommandFn<T>
where
    F: Fn(Arc<Node>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, TomcatError>> + Send + 'static,
{
    Arc::new(move |node| Box::pin(f(node)))
}

/// The split outcome of a fanned-out command: every member either succeeded
/// with a value or failed with an error, never both.
#[derive(Debug, Clone)]
pub struct ClusterCommandResults<T> {
    succeeded: BTreeMap<String, T>,
    failed: BTreeMap<String, String>,
}

impl<T> ClusterCommandResults<T> {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn results(&self) -> &BTreeMap<String, T> {
        &self.succeeded
    }

    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failed
    }
}

pub struct Cluster {
    members: BTreeMap<String, Arc<Node>>,
    active_only: bool,
    max_threads: usize,
    progress: Option<EventSender>,
}

impl Cluster {
    pub fn new(active_only: bool) -> Self {
        Self {
            members: BTreeMap::new(),
            active_only,
            max_threads: DEFAULT_MAX_THREADS,
            progress: None,
        }
    }

    pub fn set_progress(&mut self, sender: EventSender) {
        self.progress = Some(sender);
    }

    pub fn members(&self) -> &BTreeMap<String, Arc<Node>> {
        &self.members
    }

    pub fn add_member(&mut self, id: String, node: Arc<Node>) -> Result<(), TomcatError> {
        if self.members.contains_key(&id) {
            return Err(TomcatError::DuplicateNode(id));
        }
        self.members.insert(id, node);
        Ok(())
    }

    /// Walks the cluster membership graph breadth-first starting from
    /// `seed_id`, using `node_factory` to build a client pair for each
    /// newly discovered host/port. Iterative rather than recursive so a
    /// large or cyclic membership view can't grow the call stack.
    pub async fn discover<F>(&mut self, seed_id: String, seed: Arc<Node>, node_factory: F) -> Result<(), TomcatError>
    where
        F: Fn(String, u16) -> Result<Arc<Node>, TomcatError>,
    {
        let seed_port = seed.port;
        self.add_member(seed_id.clone(), seed)?;

        let mut queue = VecDeque::new();
        queue.push_back(seed_id);

        while let Some(id) = queue.pop_front() {
            let node = self.members[&id].clone();
            let discovered: BTreeMap<String, ClusterMember> = if self.active_only {
                node.active_members().await?
            } else {
                node.cluster_members().await?
            };

            for member in discovered.values() {
                let port = member.port.unwrap_or(seed_port);
                let member_id = format!("{}:{}", member.hostname, port);
                if self.members.contains_key(&member_id) {
                    continue;
                }
                let new_node = node_factory(member.hostname.clone(), port)?;
                self.members.insert(member_id.clone(), new_node);
                queue.push_back(member_id);
            }
        }

        Ok(())
    }

    /// Runs `f` against each of `hosts` (or every member, if `None`) with at
    /// most `threads` (or `max_threads`, if `None`) in flight at once. When
    /// `abort_on_error` is set, the first failure stops any command not yet
    /// started; commands already running are allowed to finish. `args` is
    /// carried along purely for progress reporting -- it plays no part in
    /// dispatch, which is `f` itself.
    pub async fn run_command<T>(
        &self,
        command_name: &str,
        args: &[String],
        hosts: Option<&[String]>,
        threads: Option<usize>,
        abort_on_error: bool,
        f: CommandFn<T>,
    ) -> Result<ClusterCommandResults<T>, TomcatError>
    where
        T: Send + 'static,
    {
        if self.members.is_empty() {
            return Err(TomcatError::EmptyCluster);
        }

        let hosts: Vec<String> = match hosts {
            Some(hosts) => hosts.to_vec(),
            None => self.members.keys().cloned().collect(),
        };

        let mut targets = Vec::with_capacity(hosts.len());
        for host in &hosts {
            let node = self
                .members
                .get(host)
                .cloned()
                .ok_or_else(|| TomcatError::UnknownNode(host.clone()))?;
            targets.push((host.clone(), node));
        }

        let max_threads = threads.unwrap_or(self.max_threads).max(1).min(targets.len().max(1));
        let semaphore = Arc::new(Semaphore::new(max_threads));
        let abort = Arc::new(AtomicBool::new(false));
        let mut join_set = JoinSet::new();

        for (host, node) in targets {
            let semaphore = semaphore.clone();
            let abort = abort.clone();
            let f = f.clone();
            let progress = self.progress.clone();
            let command_name = command_name.to_string();
            let args = args.to_vec();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");

                if abort.load(Ordering::SeqCst) {
                    return (host, Err(TomcatError::Aborted));
                }

                emit(
                    progress.as_ref(),
                    Event::CommandStart {
                        node: host.clone(),
                        command: command_name.clone(),
                        args: args.clone(),
                    },
                );

                let result = f(node).await;

                emit(
                    progress.as_ref(),
                    Event::CommandEnd {
                        node: host.clone(),
                        command: command_name,
                        args,
                        succeeded: result.is_ok(),
                    },
                );

                if result.is_err() && abort_on_error {
                    abort.store(true, Ordering::SeqCst);
                }

                (host, result)
            });
        }

        let mut succeeded = BTreeMap::new();
        let mut failed = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            let (host, result) = joined.map_err(|e| TomcatError::Remote(format!("command task panicked: {e}")))?;
            match result {
                Ok(value) => {
                    succeeded.insert(host, value);
                }
                Err(error) => {
                    failed.insert(host, error.to_string());
                }
            }
        }

        Ok(ClusterCommandResults { succeeded, failed })
    }

    /// Aggregates `list_webapps(app, vhost)` across every member into a
    /// per-context view: which members have it, whether its interesting
    /// attributes agree everywhere it's present, and (when `latest` is set)
    /// dropping every context whose version isn't the greatest observed.
    pub async fn webapp_status(&self, app: &str, vhost: &str, latest: bool) -> Result<BTreeMap<String, WebappStatus>, TomcatError> {
        let app = app.to_string();
        let vhost = vhost.to_string();
        let results = self
            .run_command(
                "list_webapps",
                &[],
                None,
                None,
                false,
                command(move |node| {
                    let app = app.clone();
                    let vhost = vhost.clone();
                    async move { node.list_webapps(&app, &vhost).await }
                }),
            )
            .await?;

        let per_host = results.results();
        let all_contexts: BTreeSet<String> = per_host.values().flat_map(|apps| apps.keys().cloned()).collect();

        let mut statuses = BTreeMap::new();
        for context in all_contexts {
            let mut present_on = Vec::new();
            let mut cluster_details: BTreeMap<String, BTreeMap<String, Value>> =
                INTERESTING_KEYS.iter().map(|k| (k.to_string(), BTreeMap::new())).collect();

            for (host, apps) in per_host {
                if let Some(webapp) = apps.get(&context) {
                    present_on.push(host.clone());
                    insert_if_some(&mut cluster_details, "stateName", host, Some(webapp.state_name.clone()));
                    insert_if_some(&mut cluster_details, "path", host, webapp.path.clone());
                    insert_if_some(&mut cluster_details, "webappVersion", host, webapp.webapp_version.clone());
                }
            }

            let mut coherent = present_on.len() == self.members.len();
            let state_name = consolidate(&cluster_details["stateName"], &mut coherent);
            let consolidated_path = consolidate(&cluster_details["path"], &mut coherent);
            let webapp_version = consolidate(&cluster_details["webappVersion"], &mut coherent);

            statuses.insert(
                context,
                WebappStatus {
                    coherent,
                    present_on,
                    state_name,
                    path: consolidated_path,
                    webapp_version,
                    cluster_details,
                },
            );
        }

        if latest {
            remove_old_versions(&mut statuses);
        }

        Ok(statuses)
    }
}

/// One cluster-wide view of a single context (a specific version of a
/// deployed path, per `src/node.rs::Node::list_webapps`'s keying). `path` is
/// shared by every context deployed to the same context path; grouping by
/// `path` is how callers (precondition checks, rollback) find the other
/// versions of the same app.
#[derive(Debug, Clone)]
pub struct WebappStatus {
    pub coherent: bool,
    pub present_on: Vec<String>,
    pub state_name: Option<String>,
    pub path: Option<String>,
    pub webapp_version: Option<String>,
    pub cluster_details: BTreeMap<String, BTreeMap<String, Value>>,
}

fn insert_if_some(
    details: &mut BTreeMap<String, BTreeMap<String, Value>>,
    key: &str,
    host: &str,
    value: Option<String>,
) {
    if let Some(value) = value {
        details.get_mut(key).unwrap().insert(host.to_string(), Value::Str(value));
    }
}

/// Collapses a per-host value map to a single scalar if every host agrees;
/// otherwise marks `coherent` false and returns `None`.
fn consolidate(per_host: &BTreeMap<String, Value>, coherent: &mut bool) -> Option<String> {
    let distinct: BTreeSet<&str> = per_host.values().filter_map(Value::as_str).collect();
    match distinct.len() {
        0 => None,
        1 => distinct.into_iter().next().map(str::to_string),
        _ => {
            *coherent = false;
            None
        }
    }
}

/// Drops every context whose consolidated version isn't the
/// lexicographically greatest version observed anywhere in the result.
fn remove_old_versions(statuses: &mut BTreeMap<String, WebappStatus>) {
    let Some(max_version) = statuses
        .values()
        .filter_map(|s| s.webapp_version.as_deref())
        .max()
        .map(str::to_string)
    else {
        return;
    };

    statuses.retain(|_, status| status.webapp_version.as_deref() == Some(max_version.as_str()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeIntrospectionClient, FakeManagementClient};
    use std::collections::BTreeMap as Map;

    fn node(id: &str, beans: Map<String, Map<String, Value>>) -> Arc<Node> {
        let _ = id;
        Arc::new(Node::new(
            "host".to_string(),
            8080,
            Arc::new(FakeIntrospectionClient::new(beans)),
            Arc::new(FakeManagementClient::default()),
        ))
    }

    #[tokio::test]
    async fn run_command_rejects_unknown_host() {
        let mut cluster = Cluster::new(false);
        cluster.add_member("a".to_string(), node("a", Map::new())).unwrap();
        let err = cluster
            .run_command(
                "server_status",
                &[],
                Some(&["b".to_string()]),
                None,
                false,
                command(|n: Arc<Node>| async move { n.server_status().await }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TomcatError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn run_command_on_empty_cluster_fails() {
        let cluster = Cluster::new(false);
        let err = cluster
            .run_command("server_status", &[], None, None, false, command(|n: Arc<Node>| async move { n.server_status().await }))
            .await
            .unwrap_err();
        assert!(matches!(err, TomcatError::EmptyCluster));
    }

    #[tokio::test]
    async fn run_command_splits_successes_and_failures() {
        let mut ok_beans = Map::new();
        let mut server = Map::new();
        server.insert("stateName".to_string(), Value::Str("STARTED".to_string()));
        ok_beans.insert("Catalina:type=Server".to_string(), server);

        let mut cluster = Cluster::new(false);
        cluster.add_member("good".to_string(), node("good", ok_beans)).unwrap();
        cluster.add_member("bad".to_string(), node("bad", Map::new())).unwrap();

        let results = cluster
            .run_command("server_status", &[], None, None, false, command(|n: Arc<Node>| async move { n.server_status().await }))
            .await
            .unwrap();

        assert!(results.has_failures());
        assert_eq!(results.results().get("good").map(String::as_str), Some("STARTED"));
        assert!(results.failures().contains_key("bad"));
    }

    #[tokio::test]
    async fn add_member_rejects_duplicates() {
        let mut cluster = Cluster::new(false);
        cluster.add_member("a".to_string(), node("a", Map::new())).unwrap();
        let err = cluster.add_member("a".to_string(), node("a", Map::new())).unwrap_err();
        assert!(matches!(err, TomcatError::DuplicateNode(_)));
    }

    #[test]
    fn consolidate_detects_incoherence() {
        let mut coherent = true;
        let mut per_host = BTreeMap::new();
        per_host.insert("h1".to_string(), Value::Str("STARTED".to_string()));
        per_host.insert("h2".to_string(), Value::Str("STOPPED".to_string()));
        let result = consolidate(&per_host, &mut coherent);
        assert_eq!(result, None);
        assert!(!coherent);
    }

    #[test]
    fn consolidate_agrees_when_all_hosts_match() {
        let mut coherent = true;
        let mut per_host = BTreeMap::new();
        per_host.insert("h1".to_string(), Value::Str("STARTED".to_string()));
        per_host.insert("h2".to_string(), Value::Str("STARTED".to_string()));
        let result = consolidate(&per_host, &mut coherent);
        assert_eq!(result, Some("STARTED".to_string()));
        assert!(coherent);
    }
}
