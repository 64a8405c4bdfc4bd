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

//! Progress reporting. The orchestrator and the management client report
//! progress by sending [`Event`]s over an unbounded channel rather than
//! through a callback, so that a CLI front-end, a test, or nothing at all
//! can consume them without the producer caring who's listening.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum Event {
    Upload {
        node: String,
        filename: String,
        url: String,
        position: u64,
        total: Option<u64>,
        blocksize: u64,
    },
    CommandStart {
        node: String,
        command: String,
        args: Vec<String>,
    },
    CommandEnd {
        node: String,
        command: String,
        args: Vec<String>,
        succeeded: bool,
    },
}

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Sends the event, swallowing and logging (rather than propagating) a
/// dropped-receiver error -- matching the original's progress callback,
/// whose failures are logged and never allowed to abort the operation they
/// were reporting on.
pub fn emit(sender: Option<&EventSender>, event: Event) {
    if let Some(sender) = sender {
        if sender.send(event).is_err() {
            tracing::debug!("progress event dropped: receiver closed");
        }
    }
}
