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

//! End-to-end exercises of the cluster orchestrator and deployment workflow
//! against the in-process fakes, since none of this can run against a live
//! node in this environment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tomcat_fleet::cluster::Cluster;
use tomcat_fleet::config::DeployOptions;
use tomcat_fleet::deploy::DeploymentWorkflow;
use tomcat_fleet::error::TomcatError;
use tomcat_fleet::node::Node;
use tomcat_fleet::test_support::{FakeIntrospectionClient, FakeManagementClient};
use tomcat_fleet::value::Value;

fn webmodule_bean(path: &str, version: Option<&str>, state: &str) -> (String, BTreeMap<String, Value>) {
    let object_name_context = match version {
        Some(v) => format!("{path}##{v}"),
        None => path.to_string(),
    };
    let context = format!("/{object_name_context}");
    let mut props = BTreeMap::new();
    props.insert("path".to_string(), Value::Str(format!("/{path}")));
    props.insert("stateName".to_string(), Value::Str(state.to_string()));
    props.insert("name".to_string(), Value::Str(context));
    if let Some(v) = version {
        props.insert("webappVersion".to_string(), Value::Str(v.to_string()));
    }
    (
        format!("Catalina:j2eeType=WebModule,name=//localhost/{object_name_context},J2EEApplication=none,J2EEServer=none"),
        props,
    )
}

fn single_node_cluster(beans: BTreeMap<String, BTreeMap<String, Value>>) -> Cluster {
    let mut cluster = Cluster::new(false);
    let node = Node::new(
        "n1".to_string(),
        8080,
        Arc::new(FakeIntrospectionClient::new(beans)),
        Arc::new(FakeManagementClient::default()),
    );
    cluster.add_member("n1:8080".to_string(), Arc::new(node)).unwrap();
    cluster
}

fn quick_options() -> DeployOptions {
    let mut options = DeployOptions::default();
    options.check_memory = false;
    options.deploy_wait_time = Duration::from_millis(80);
    options.poll_interval = Duration::from_millis(5);
    options
}

#[tokio::test]
async fn deploy_succeeds_once_every_member_reports_the_app_started() {
    let jmx = Arc::new(FakeIntrospectionClient::default());
    let mgr = Arc::new(FakeManagementClient::linked_to(jmx.clone()));
    let node = Node::new("n1".to_string(), 8080, jmx, mgr);
    let mut cluster = Cluster::new(false);
    cluster.add_member("n1:8080".to_string(), Arc::new(node)).unwrap();

    let workflow = DeploymentWorkflow::new(&cluster, quick_options());

    workflow
        .deploy(&[PathBuf::from("/tmp/app.war")], "localhost")
        .await
        .unwrap();
}

#[tokio::test]
async fn deploy_rejects_redeploying_the_same_version() {
    let (id, props) = webmodule_bean("app", Some("2"), "STARTED");
    let mut beans = BTreeMap::new();
    beans.insert(id, props);

    let cluster = single_node_cluster(beans);
    let workflow = DeploymentWorkflow::new(&cluster, quick_options());

    let err = workflow
        .deploy(&[PathBuf::from("/tmp/app##2.war")], "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, TomcatError::ContextExists(_)));
}

#[tokio::test]
async fn deploy_rejects_an_older_version_than_what_is_live() {
    let (id, props) = webmodule_bean("app", Some("5"), "STARTED");
    let mut beans = BTreeMap::new();
    beans.insert(id, props);

    let cluster = single_node_cluster(beans);
    let workflow = DeploymentWorkflow::new(&cluster, quick_options());

    let err = workflow
        .deploy(&[PathBuf::from("/tmp/app##3.war")], "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, TomcatError::NewerVersionExists(_)));
}

#[tokio::test]
async fn deploy_times_out_waiting_for_an_app_that_never_starts() {
    let cluster = single_node_cluster(BTreeMap::new());
    let workflow = DeploymentWorkflow::new(&cluster, quick_options());

    let err = workflow
        .deploy(&[PathBuf::from("/tmp/app.war")], "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, TomcatError::DeployFailed(_)));
}

#[tokio::test]
async fn deploy_reports_failure_when_one_member_rejects_the_upload() {
    let mut cluster = Cluster::new(false);

    let good_node = Node::new(
        "good".to_string(),
        8080,
        Arc::new(FakeIntrospectionClient::default()),
        Arc::new(FakeManagementClient::default()),
    );
    cluster.add_member("good:8080".to_string(), Arc::new(good_node)).unwrap();

    let failing_mgr = FakeManagementClient::default();
    failing_mgr.fail_deploy_for.lock().unwrap().push("/app".to_string());
    let bad_node = Node::new(
        "bad".to_string(),
        8080,
        Arc::new(FakeIntrospectionClient::default()),
        Arc::new(failing_mgr),
    );
    cluster.add_member("bad:8080".to_string(), Arc::new(bad_node)).unwrap();

    let workflow = DeploymentWorkflow::new(&cluster, quick_options());
    let err = workflow
        .deploy(&[PathBuf::from("/tmp/app.war")], "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, TomcatError::DeployFailed(contexts) if contexts == vec!["/app".to_string()]));
}

#[tokio::test]
async fn cluster_discovery_walks_the_membership_graph_iteratively() {
    let mut seed_beans = BTreeMap::new();
    let mut member = BTreeMap::new();
    member.insert("hostname".to_string(), Value::Str("peer".to_string()));
    member.insert("port".to_string(), Value::Int(8080));
    member.insert("ready".to_string(), Value::Bool(true));
    member.insert("failing".to_string(), Value::Bool(false));
    member.insert("suspect".to_string(), Value::Bool(false));
    seed_beans.insert(
        "Catalina:type=Cluster,component=Member,name=peer".to_string(),
        member,
    );

    let seed = Arc::new(Node::new(
        "seed".to_string(),
        8080,
        Arc::new(FakeIntrospectionClient::new(seed_beans)),
        Arc::new(FakeManagementClient::default()),
    ));

    let mut cluster = Cluster::new(false);
    cluster
        .discover("seed:8080".to_string(), seed, |host, port| {
            Ok(Arc::new(Node::new(
                host,
                port,
                Arc::new(FakeIntrospectionClient::default()),
                Arc::new(FakeManagementClient::default()),
            )))
        })
        .await
        .unwrap();

    assert_eq!(cluster.members().len(), 2);
    assert!(cluster.members().contains_key("peer:8080"));
}

#[tokio::test]
async fn restart_times_out_when_the_server_never_reports_down() {
    let mut beans = BTreeMap::new();
    let mut server = BTreeMap::new();
    server.insert("stateName".to_string(), Value::Str("STARTED".to_string()));
    beans.insert("Catalina:type=Server".to_string(), server);
    let mut wrapper = BTreeMap::new();
    wrapper.insert("ControlledByNativeWrapper".to_string(), Value::Bool(true));
    beans.insert(
        "org.tanukisoftware.wrapper:type=WrapperManager".to_string(),
        wrapper,
    );

    let node = Node::new(
        "n1".to_string(),
        8080,
        Arc::new(FakeIntrospectionClient::new(beans)),
        Arc::new(FakeManagementClient::default()),
    );

    let err = node
        .restart(Duration::from_millis(20), Duration::from_millis(5))
        .await
        .unwrap_err();
    assert!(matches!(err, TomcatError::RestartTimeout(_)));
}

#[tokio::test]
async fn undeploy_removes_the_named_context_from_every_member_that_has_it() {
    let (id, props) = webmodule_bean("app", None, "STARTED");
    let mut beans = BTreeMap::new();
    beans.insert(id, props);

    let mgr = Arc::new(FakeManagementClient::default());
    let node = Node::new("n1".to_string(), 8080, Arc::new(FakeIntrospectionClient::new(beans)), mgr.clone());

    let mut cluster = Cluster::new(false);
    cluster.add_member("n1:8080".to_string(), Arc::new(node)).unwrap();

    let workflow = DeploymentWorkflow::new(&cluster, DeployOptions::default());
    workflow.undeploy(&["/app".to_string()], "localhost").await.unwrap();

    assert_eq!(mgr.undeployed.lock().unwrap().as_slice(), ["/app".to_string()]);
}

#[tokio::test]
async fn rollback_refuses_when_only_one_version_is_live() {
    let (id, props) = webmodule_bean("app", Some("2"), "STARTED");
    let mut beans = BTreeMap::new();
    beans.insert(id, props);

    let cluster = single_node_cluster(beans);
    let workflow = DeploymentWorkflow::new(&cluster, DeployOptions::default());

    let err = workflow
        .rollback(&["/app".to_string()], "localhost")
        .await
        .unwrap_err();
    assert!(matches!(err, TomcatError::CannotRollback(_)));
}

#[tokio::test]
async fn rollback_undeploys_only_the_newest_of_two_live_versions() {
    let mut beans = BTreeMap::new();
    let (id2, props2) = webmodule_bean("app", Some("2"), "STARTED");
    let (id5, props5) = webmodule_bean("app", Some("5"), "STARTED");
    beans.insert(id2, props2);
    beans.insert(id5, props5);

    let mgr = Arc::new(FakeManagementClient::default());
    let node = Node::new("n1".to_string(), 8080, Arc::new(FakeIntrospectionClient::new(beans)), mgr.clone());

    let mut cluster = Cluster::new(false);
    cluster.add_member("n1:8080".to_string(), Arc::new(node)).unwrap();

    let workflow = DeploymentWorkflow::new(&cluster, DeployOptions::default());
    workflow.rollback(&["/app".to_string()], "localhost").await.unwrap();

    assert_eq!(mgr.undeployed.lock().unwrap().as_slice(), ["/app##5".to_string()]);
}
