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

use clap::Parser;
use std::process::ExitCode;
use tomcat_fleet::cli::{Cli, Command};
use tomcat_fleet::cluster::{Cluster, WebappStatus};
use tomcat_fleet::config::{ClusterCredentials, DeployOptions};
use tomcat_fleet::deploy::DeploymentWorkflow;
use tomcat_fleet::error_display::format_error;
use tomcat_fleet::events::{self, Event};
use tomcat_fleet::log::{log_action, logln};
use tomcat_fleet::{build_node, init_tracing};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbosity.clone());

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime")
        .block_on(run(cli));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", format_error(&error));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let credentials = ClusterCredentials {
        user: cli.user.clone(),
        password: cli.password.clone(),
    };

    let seed = build_node(&cli.host, cli.port, &credentials, cli.insecure)?;
    let seed_id = seed.id();

    let mut cluster = Cluster::new(cli.active_only);
    let credentials_for_discovery = credentials.clone();
    let insecure = cli.insecure;
    cluster
        .discover(seed_id, seed, move |host, port| {
            build_node(&host, port, &credentials_for_discovery, insecure)
        })
        .await?;

    log_action("Discovered", format!("{} cluster member(s)", cluster.members().len()));

    match cli.command {
        Command::List { app, vhost, latest } => list(&cluster, &app, &vhost, latest).await,
        Command::Deploy {
            filenames,
            vhost,
            no_undeploy_on_error,
            no_check_memory,
            required_memory,
            kill_sessions,
            auto_restart,
        } => {
            let mut options = DeployOptions::default();
            options.undeploy_on_error = !no_undeploy_on_error;
            options.check_memory = !no_check_memory;
            options.required_memory = required_memory;
            options.kill_sessions = kill_sessions;
            options.auto_restart = auto_restart;

            let (sender, receiver) = events::channel();
            let printer = tokio::spawn(print_events(receiver));

            let workflow = DeploymentWorkflow::new(&cluster, options).with_progress(sender);
            let result = workflow.deploy(&filenames, &vhost).await;
            drop(workflow);
            let _ = printer.await;

            result?;
            let names: Vec<String> = filenames.iter().map(|f| f.display().to_string()).collect();
            log_action("Deployed", names.join(", "));
            Ok(())
        }
        Command::Undeploy { contexts, vhost } => {
            let workflow = DeploymentWorkflow::new(&cluster, DeployOptions::default());
            workflow.undeploy(&contexts, &vhost).await?;
            log_action("Undeployed", contexts.join(", "));
            Ok(())
        }
        Command::Restart { restart_fraction } => {
            let mut options = DeployOptions::default();
            options.restart_fraction = restart_fraction;
            let hosts: Vec<String> = cluster.members().keys().cloned().collect();
            let workflow = DeploymentWorkflow::new(&cluster, options);
            workflow.rolling_restart_all(&hosts).await?;
            log_action("Restarted", format!("{} node(s)", hosts.len()));
            Ok(())
        }
    }
}

async fn list(cluster: &Cluster, app: &str, vhost: &str, latest: bool) -> anyhow::Result<()> {
    let status = cluster.webapp_status(app, vhost, latest).await?;
    for (path, entry) in status {
        print_status(&path, &entry);
    }
    Ok(())
}

/// Drains progress events as they arrive and turns them into one-line
/// status updates, until every sender clone (the workflow's and each
/// in-flight node command's) is dropped and the stream ends on its own.
async fn print_events(receiver: events::EventReceiver) {
    let mut events = UnboundedReceiverStream::new(receiver);
    while let Some(event) = events.next().await {
        match event {
            Event::Upload { node, filename, position, total, .. } => match total {
                Some(total) => logln(format!("  [{node}] uploading {filename}: {position}/{total} bytes")),
                None => logln(format!("  [{node}] uploading {filename}: {position} bytes")),
            },
            Event::CommandStart { node, command, args } => {
                let suffix = if args.is_empty() { String::new() } else { format!(" {}", args.join(" ")) };
                logln(format!("  [{node}] {command}{suffix} started"));
            }
            Event::CommandEnd { node, command, args, succeeded } => {
                let suffix = if args.is_empty() { String::new() } else { format!(" {}", args.join(" ")) };
                let outcome = if succeeded { "ok" } else { "failed" };
                logln(format!("  [{node}] {command}{suffix} {outcome}"));
            }
        }
    }
}

fn print_status(path: &str, entry: &WebappStatus) {
    let state = entry.state_name.as_deref().unwrap_or("<incoherent>");
    let version = entry.webapp_version.as_deref().unwrap_or("-");
    logln(format!(
        "{path:<30} state={state:<12} version={version:<8} present_on={} coherent={}",
        entry.present_on.len(),
        entry.coherent
    ));
}
