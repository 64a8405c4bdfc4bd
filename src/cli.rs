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

//! Command-line surface. One subcommand per cluster-wide operation; the
//! global flags describe the seed node and credentials needed to reach it.

use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tomcat-fleet", version, about = "Cluster management and deployment for application-server nodes")]
pub struct Cli {
    /// Hostname of any node in the cluster, used as the discovery seed.
    #[arg(long, global = true, default_value = "localhost")]
    pub host: String,

    /// Management port on the seed node.
    #[arg(long, global = true, default_value_t = 8080)]
    pub port: u16,

    /// Management user.
    #[arg(long, global = true, env = "TOMCAT_FLEET_USER")]
    pub user: String,

    /// Management password.
    #[arg(long, global = true, env = "TOMCAT_FLEET_PASSWORD")]
    pub password: String,

    /// Skip TLS certificate verification.
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Restrict discovery and command fan-out to members reporting ready.
    #[arg(long, global = true)]
    pub active_only: bool,

    #[command(flatten)]
    pub verbosity: Verbosity,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List discovered cluster members and the web applications on each.
    List {
        /// Application path to filter by (`*` for all).
        #[arg(long, default_value = "*")]
        app: String,

        /// Virtual host to filter by (`*` for all).
        #[arg(long, default_value = "*")]
        vhost: String,

        /// Only show the newest version of each path.
        #[arg(long)]
        latest: bool,
    },

    /// Deploy one or more web archives to every cluster member as a single
    /// batch: all preconditions are checked up front and a failure of any
    /// file undeploys the whole batch.
    Deploy {
        /// Paths to the `.war` files to deploy.
        #[arg(required = true)]
        filenames: Vec<PathBuf>,

        /// Virtual host to deploy under.
        #[arg(long, default_value = "localhost")]
        vhost: String,

        /// Skip undeploying partially-deployed copies if the deploy fails.
        #[arg(long)]
        no_undeploy_on_error: bool,

        /// Skip the pre-deploy memory check.
        #[arg(long)]
        no_check_memory: bool,

        /// Minimum free memory percentage required before deploying.
        #[arg(long, default_value_t = 50)]
        required_memory: u32,

        /// Expire sessions on the previous version once the new one is up.
        #[arg(long)]
        kill_sessions: bool,

        /// Allow a low-memory node to be restarted automatically.
        #[arg(long)]
        auto_restart: bool,
    },

    /// Undeploy one or more contexts from every cluster member that has
    /// them, regardless of how many versions are live.
    Undeploy {
        /// Contexts to remove.
        #[arg(required = true)]
        contexts: Vec<String>,

        /// Virtual host the application is served under.
        #[arg(long, default_value = "localhost")]
        vhost: String,
    },

    /// Restart every cluster member, a fraction at a time.
    Restart {
        /// Fraction of the cluster to restart concurrently (0.0, 1.0].
        #[arg(long, default_value_t = 0.33)]
        restart_fraction: f64,
    },
}
