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

//! In-process fakes of the two client traits, shared by unit tests across
//! the facade, orchestrator and deployment-workflow modules so none of them
//! need a live node to exercise their logic.

use crate::error::TomcatError;
use crate::events::{Event, EventSender};
use crate::glob::pattern_to_regex;
use crate::jmx::IntrospectionClient;
use crate::manager::ManagementClient;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeIntrospectionClient {
    pub beans: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl FakeIntrospectionClient {
    pub fn new(beans: BTreeMap<String, BTreeMap<String, Value>>) -> Self {
        Self {
            beans: Mutex::new(beans),
        }
    }

    pub fn set_attribute(&self, bean: &str, attribute: &str, value: Value) {
        self.beans
            .lock()
            .unwrap()
            .entry(bean.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
    }
}

#[async_trait]
impl IntrospectionClient for FakeIntrospectionClient {
    async fn query(
        &self,
        pattern: &str,
    ) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError> {
        let re = pattern_to_regex(pattern);
        Ok(self
            .beans
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| re.is_match(id))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn get(&self, bean: &str, attribute: &str, _key: Option<&str>) -> Result<Value, TomcatError> {
        self.beans
            .lock()
            .unwrap()
            .get(bean)
            .and_then(|props| props.get(attribute))
            .cloned()
            .ok_or_else(|| TomcatError::Remote(format!("no such attribute {attribute} on {bean}")))
    }

    async fn invoke(
        &self,
        bean: &str,
        operation: &str,
        _params: &[String],
    ) -> Result<Option<Value>, TomcatError> {
        match operation {
            "gc" => Ok(None),
            "checkUndeploy" => Ok(None),
            _ => {
                let mut beans = self.beans.lock().unwrap();
                if let Some(props) = beans.get_mut(bean) {
                    props.insert("lastInvoked".to_string(), Value::Str(operation.to_string()));
                }
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
pub struct FakeManagementClient {
    pub deployed: Mutex<Vec<(String, String)>>,
    pub undeployed: Mutex<Vec<String>>,
    pub fail_deploy_for: Mutex<Vec<String>>,
    /// When set, a successful `deploy()` also registers a STARTED WebModule
    /// bean on this introspection fake, so a test can observe the same
    /// readiness poll a real node would eventually report.
    pub link: Mutex<Option<Arc<FakeIntrospectionClient>>>,
}

impl FakeManagementClient {
    pub fn linked_to(jmx: Arc<FakeIntrospectionClient>) -> Self {
        Self {
            link: Mutex::new(Some(jmx)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ManagementClient for FakeManagementClient {
    async fn deploy(
        &self,
        _filename: &Path,
        context: &str,
        vhost: &str,
        _progress: Option<EventSender>,
    ) -> Result<(), TomcatError> {
        if self
            .fail_deploy_for
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == context)
        {
            return Err(TomcatError::Remote(format!("deploy of {context} rejected")));
        }
        self.deployed
            .lock()
            .unwrap()
            .push((context.to_string(), vhost.to_string()));

        if let Some(jmx) = self.link.lock().unwrap().as_ref() {
            let object_name_context = context.trim_start_matches('/');
            let bean_id = format!(
                "Catalina:j2eeType=WebModule,name=//{vhost}/{object_name_context},J2EEApplication=none,J2EEServer=none"
            );
            let (path, version) = match context.split_once("##") {
                Some((path, version)) => (path.to_string(), Some(version.to_string())),
                None => (context.to_string(), None),
            };
            jmx.set_attribute(&bean_id, "name", Value::Str(context.to_string()));
            jmx.set_attribute(&bean_id, "path", Value::Str(path));
            jmx.set_attribute(&bean_id, "stateName", Value::Str("STARTED".to_string()));
            if let Some(v) = version {
                jmx.set_attribute(&bean_id, "webappVersion", Value::Str(v));
            }
        }

        Ok(())
    }

    async fn undeploy(&self, context: &str, _vhost: &str) -> Result<(), TomcatError> {
        self.undeployed.lock().unwrap().push(context.to_string());
        Ok(())
    }
}

pub fn drain_events(mut receiver: tokio::sync::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
