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

//! The deployment workflow: everything between "here is a batch of WAR
//! files" and "the whole cluster is serving all of them", including the
//! preflight checks, memory remediation, upload fan-out, readiness polling
//! and failure rollback of the whole batch.

use crate::cluster::{command, Cluster, WebappStatus};
use crate::config::DeployOptions;
use crate::error::TomcatError;
use crate::events::EventSender;
use crate::node::Node;
use crate::warfile::WebArchiveRef;
use humansize::{format_size, BINARY};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const RESTART_TIMEOUT: Duration = Duration::from_secs(600);
const RESTART_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct DeploymentWorkflow<'a> {
    cluster: &'a Cluster,
    options: DeployOptions,
    progress: Option<EventSender>,
}

impl<'a> DeploymentWorkflow<'a> {
    pub fn new(cluster: &'a Cluster, options: DeployOptions) -> Self {
        Self {
            cluster,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sender: EventSender) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Runs the full deploy sequence over a batch of archives: preconditions,
    /// old-version reconciliation, memory preflight, upload, readiness wait
    /// and (on failure, if configured) undeploy of every context in the
    /// batch.
    pub async fn deploy(&self, filenames: &[PathBuf], vhost: &str) -> Result<(), TomcatError> {
        let batch: Vec<(PathBuf, WebArchiveRef)> = filenames
            .iter()
            .map(|f| WebArchiveRef::parse(f).map(|reference| (f.clone(), reference)))
            .collect::<Result<_, _>>()?;

        let old_siblings = self.check_preconditions(&batch, vhost).await?;
        let target_paths: Vec<String> = batch.iter().map(|(_, r)| r.path.clone()).collect();
        self.reconcile_old_versions(&old_siblings, &target_paths, vhost).await?;

        if self.options.check_memory {
            self.ensure_memory().await?;
        }

        let contexts: Vec<String> = batch.iter().map(|(_, r)| r.context.clone()).collect();

        if let Err(e) = self.upload(&batch, vhost).await {
            self.undeploy_batch_on_error(&contexts, vhost).await;
            return Err(e);
        }

        if let Err(e) = self.wait_until_ready(&contexts, vhost).await {
            self.undeploy_batch_on_error(&contexts, vhost).await;
            return Err(e);
        }

        Ok(())
    }

    /// Direct cluster-wide undeploy of named contexts, independent of
    /// rollback's version-history semantics.
    pub async fn undeploy(&self, contexts: &[String], vhost: &str) -> Result<(), TomcatError> {
        for context in contexts {
            self.undeploy_context(context, vhost).await?;
        }
        Ok(())
    }

    async fn undeploy_context(&self, context: &str, vhost: &str) -> Result<(), TomcatError> {
        let context_owned = context.to_string();
        let vhost_owned = vhost.to_string();

        let results = self
            .cluster
            .run_command(
                "undeploy",
                &[context.to_string()],
                None,
                None,
                false,
                command(move |node: Arc<Node>| {
                    let context = context_owned.clone();
                    let vhost = vhost_owned.clone();
                    async move { node.undeploy(&context, &vhost).await }
                }),
            )
            .await?;

        if results.has_failures() {
            return Err(TomcatError::DeployFailed(results.failures().keys().cloned().collect()));
        }

        Ok(())
    }

    async fn undeploy_batch_on_error(&self, contexts: &[String], vhost: &str) {
        if !self.options.undeploy_on_error {
            return;
        }
        if let Err(e) = self.undeploy(contexts, vhost).await {
            tracing::warn!(contexts = ?contexts, error = %e, "undeploy of the failed batch also failed");
        }
    }

    /// For each `path`, sorts every context currently serving it by
    /// `webappVersion` descending and undeploys the newest one -- but only
    /// if a second version is present; otherwise reports `CannotRollback`.
    pub async fn rollback(&self, paths: &[String], vhost: &str) -> Result<(), TomcatError> {
        let status = self.cluster.webapp_status("*", vhost, false).await?;

        for path in paths {
            let mut versions: Vec<(&String, &WebappStatus)> = status
                .iter()
                .filter(|(_, s)| s.path.as_deref() == Some(path.as_str()))
                .collect();

            if versions.len() < 2 {
                return Err(TomcatError::CannotRollback(path.clone()));
            }

            versions.sort_by(|a, b| b.1.webapp_version.cmp(&a.1.webapp_version));
            let (newest_context, _) = versions[0];

            self.undeploy_context(newest_context, vhost).await?;
        }

        Ok(())
    }

    /// For each new `(context, path, version)`, checks there is no
    /// conflict with what's already served, and collects the siblings
    /// (`paths[path] \ {newest}`) that should be reconciled away once the
    /// new context is up.
    async fn check_preconditions(
        &self,
        batch: &[(PathBuf, WebArchiveRef)],
        vhost: &str,
    ) -> Result<Vec<String>, TomcatError> {
        let status = self.cluster.webapp_status("*", vhost, false).await?;
        let cluster_size = self.cluster.members().len();

        let mut old_siblings = Vec::new();

        for (_, reference) in batch {
            if status.contains_key(&reference.context) {
                return Err(TomcatError::ContextExists(reference.context.clone()));
            }

            let siblings: Vec<(&String, &WebappStatus)> = status
                .iter()
                .filter(|(_, s)| s.path.as_deref() == Some(reference.path.as_str()))
                .collect();

            if siblings.is_empty() {
                continue;
            }

            if reference.version.is_none() {
                return Err(TomcatError::PathOccupied(reference.path.clone()));
            }

            if !siblings.iter().all(|(_, s)| s.present_on.len() == cluster_size) {
                return Err(TomcatError::PartialDeployment(reference.path.clone()));
            }

            let mut existing: Vec<String> = siblings.iter().map(|(ctx, _)| (*ctx).clone()).collect();
            existing.sort();

            let mut with_new = existing.clone();
            with_new.push(reference.context.clone());
            with_new.sort();
            if with_new.last() != Some(&reference.context) {
                return Err(TomcatError::NewerVersionExists(reference.path.clone()));
            }

            // `existing` sorted ascending; the last entry is the newest
            // version currently live, the rest are the siblings to retire.
            existing.pop();
            old_siblings.extend(existing);
        }

        Ok(old_siblings)
    }

    /// Optionally force-expires sessions on `old_siblings` (when
    /// `kill_sessions`), fans out `undeploy_old_versions` cluster-wide, then
    /// re-checks that none of `target_paths` is still served by more than
    /// one version.
    async fn reconcile_old_versions(
        &self,
        old_siblings: &[String],
        target_paths: &[String],
        vhost: &str,
    ) -> Result<(), TomcatError> {
        if self.options.kill_sessions {
            for context in old_siblings {
                let context_owned = context.clone();
                let vhost_owned = vhost.to_string();
                let result = self
                    .cluster
                    .run_command(
                        "expire_sessions",
                        &[context.clone()],
                        None,
                        None,
                        false,
                        command(move |node: Arc<Node>| {
                            let context = context_owned.clone();
                            let vhost = vhost_owned.clone();
                            async move {
                                match node.expire_sessions(&context, &vhost).await {
                                    Err(TomcatError::NotFound { .. }) => Ok(()),
                                    other => other,
                                }
                            }
                        }),
                    )
                    .await;

                if let Ok(results) = &result {
                    if results.has_failures() {
                        tracing::warn!(context = %context, failures = ?results.failures(), "session expiry failed on some nodes");
                    }
                }
            }
        }

        let vhost_owned = vhost.to_string();
        let result = self
            .cluster
            .run_command(
                "undeploy_old_versions",
                &[],
                None,
                None,
                false,
                command(move |node: Arc<Node>| {
                    let vhost = vhost_owned.clone();
                    async move { node.undeploy_old_versions(Some(&vhost)).await }
                }),
            )
            .await;

        match &result {
            Ok(results) if results.has_failures() => {
                tracing::warn!(failures = ?results.failures(), "old-version reconciliation failed on some nodes");
            }
            Err(e) => tracing::warn!(error = %e, "old-version reconciliation could not run"),
            _ => {}
        }

        let status = self.cluster.webapp_status("*", vhost, false).await?;
        for path in target_paths {
            let count = status.values().filter(|s| s.path.as_deref() == Some(path.as_str())).count();
            if count > 1 {
                return Err(TomcatError::StillMultiVersion(path.clone()));
            }
        }

        Ok(())
    }

    async fn ensure_memory(&self) -> Result<(), TomcatError> {
        let required = self.options.required_memory;

        let mut low = self.find_low_memory_hosts(required).await?;
        if low.is_empty() {
            return Ok(());
        }

        if self.options.auto_gc {
            self.cluster
                .run_command(
                    "run_gc",
                    &[],
                    Some(&low),
                    None,
                    false,
                    command(|node: Arc<Node>| async move { node.run_gc().await }),
                )
                .await?;

            tokio::time::sleep(self.options.gc_wait_time).await;
            low = self.find_low_memory_hosts(required).await?;
        }

        if low.is_empty() {
            return Ok(());
        }

        if self.options.auto_restart {
            self.rolling_restart(&low).await?;
            low = self.find_low_memory_hosts(required).await?;
            if low.is_empty() {
                return Ok(());
            }
        }

        self.log_memory_pressure(&low).await;
        Err(TomcatError::LowMemory(low))
    }

    /// Logs the worst memory pool on each host that is still over threshold
    /// after remediation, so the `LowMemory` error isn't the only clue an
    /// operator has to go on.
    async fn log_memory_pressure(&self, hosts: &[String]) {
        for host in hosts {
            let Some(node) = self.cluster.members().get(host) else {
                continue;
            };
            let Ok(info) = node.memory_info().await else {
                continue;
            };
            if let Some((name, pool)) = info.iter().max_by_key(|(_, pool)| pool.usage_percent()) {
                tracing::warn!(
                    host = %host,
                    pool = %name,
                    used = %format_size(pool.used.max(0) as u64, BINARY),
                    max = %format_size(pool.max.max(0) as u64, BINARY),
                    usage_percent = pool.usage_percent(),
                    "memory pool over threshold after remediation",
                );
            }
        }
    }

    async fn find_low_memory_hosts(&self, required: u32) -> Result<Vec<String>, TomcatError> {
        let results = self
            .cluster
            .run_command(
                "find_pools_over",
                &[],
                None,
                None,
                false,
                command(move |node: Arc<Node>| async move { node.find_pools_over(required).await }),
            )
            .await?;

        Ok(results
            .results()
            .iter()
            .filter(|(_, pools)| !pools.is_empty())
            .map(|(host, _)| host.clone())
            .collect())
    }

    /// Restarts `hosts` as a single fan-out bounded to
    /// `round(member_count * restart_fraction)` concurrent restarts, rather
    /// than all at once, so the remediation doesn't itself take the cluster
    /// down. Exposed directly for a standalone restart operation, not only
    /// as memory-preflight remediation.
    pub async fn rolling_restart_all(&self, hosts: &[String]) -> Result<(), TomcatError> {
        self.rolling_restart(hosts).await
    }

    async fn rolling_restart(&self, hosts: &[String]) -> Result<(), TomcatError> {
        if hosts.is_empty() {
            return Ok(());
        }

        let cluster_size = self.cluster.members().len().max(1);
        let threads = ((cluster_size as f64) * self.options.restart_fraction).round() as usize;
        if threads < 1 {
            return Err(TomcatError::RestartFractionTooSmall);
        }

        let results = self
            .cluster
            .run_command(
                "restart",
                &[],
                Some(hosts),
                Some(threads),
                true,
                command(|node: Arc<Node>| async move { node.restart(RESTART_TIMEOUT, RESTART_POLL_INTERVAL).await }),
            )
            .await?;

        if results.has_failures() {
            return Err(TomcatError::DeployFailed(results.failures().keys().cloned().collect()));
        }

        Ok(())
    }

    /// Uploads every file in the batch, trying all of them even once one
    /// has failed, and only then reports which archives didn't make it to
    /// every member.
    async fn upload(&self, batch: &[(PathBuf, WebArchiveRef)], vhost: &str) -> Result<(), TomcatError> {
        let mut failed = Vec::new();

        for (filename, reference) in batch {
            let filename = filename.clone();
            let context = reference.context.clone();
            let vhost_owned = vhost.to_string();
            let progress = self.progress.clone();

            let results = self
                .cluster
                .run_command(
                    "deploy",
                    &[context.clone()],
                    None,
                    None,
                    false,
                    command(move |node: Arc<Node>| {
                        let filename = filename.clone();
                        let context = context.clone();
                        let vhost = vhost_owned.clone();
                        let progress = progress.clone();
                        async move { node.deploy(&filename, Some(&context), &vhost, progress).await }
                    }),
                )
                .await?;

            if results.has_failures() {
                tracing::error!(context = %context, failures = ?results.failures(), "failed to deploy to some members");
                failed.push(context);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(TomcatError::DeployFailed(failed))
        }
    }

    async fn wait_until_ready(&self, contexts: &[String], vhost: &str) -> Result<(), TomcatError> {
        let deadline = tokio::time::Instant::now() + self.options.deploy_wait_time;

        loop {
            let status = self.cluster.webapp_status("*", vhost, false).await?;
            let failed: Vec<String> = contexts
                .iter()
                .filter(|ctx| {
                    !matches!(
                        status.get(*ctx),
                        Some(entry) if entry.coherent && entry.state_name.as_deref() == Some("STARTED")
                    )
                })
                .cloned()
                .collect();

            if failed.is_empty() {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(TomcatError::DeployFailed(failed));
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}
