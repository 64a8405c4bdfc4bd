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

use std::fmt;

/// The one error type shared by every client, facade and orchestrator layer.
/// CLI-level code wraps this in `anyhow::Error` with additional context;
/// deeper layers never reach for `anyhow` themselves so that callers can
/// still match on the underlying kind (e.g. to decide whether a fan-out
/// failure should trip `abort_on_error`).
#[derive(Debug, thiserror::Error)]
pub enum TomcatError {
    #[error("could not reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node returned a non-OK response: {0}")]
    Remote(String),

    #[error("could not parse response: {0}")]
    Parse(String),

    #[error("'{0}' is not a valid web archive filename")]
    InvalidArchive(String),

    #[error("context '{0}' already exists in the cluster")]
    ContextExists(String),

    #[error("path '{0}' is already served by an unversioned app")]
    PathOccupied(String),

    #[error("path '{0}' is only partially deployed across the cluster")]
    PartialDeployment(String),

    #[error("a newer version of path '{0}' already exists in the cluster")]
    NewerVersionExists(String),

    #[error("insufficient free memory on: {}", .0.join(", "))]
    LowMemory(Vec<String>),

    #[error("deployment failed for: {}", .0.join(", "))]
    DeployFailed(Vec<String>),

    #[error("cannot roll back '{0}': only one version is deployed")]
    CannotRollback(String),

    #[error("path '{0}' is still served by more than one version after reconciliation")]
    StillMultiVersion(String),

    #[error("restart timed out while waiting for phase {0}")]
    RestartTimeout(RestartPhase),

    #[error("restart_fraction too small: at least one node must be selected")]
    RestartFractionTooSmall,

    #[error("node {0} does not support controlled restart")]
    CannotRestart(String),

    #[error("operation aborted after an earlier node failed")]
    Aborted,

    #[error("the cluster has no members")]
    EmptyCluster,

    #[error("no session managers found for app={app:?} vhost={vhost:?}")]
    NotFound {
        app: Option<String>,
        vhost: Option<String>,
    },

    #[error("node '{0}' is not a member of this cluster")]
    UnknownNode(String),

    #[error("node '{0}' is already a member of this cluster")]
    DuplicateNode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Down,
    Up,
    AppsUp,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RestartPhase::Down => "down",
            RestartPhase::Up => "up",
            RestartPhase::AppsUp => "apps-up",
        };
        write!(f, "{s}")
    }
}

pub type TomcatResult<T> = Result<T, TomcatError>;
