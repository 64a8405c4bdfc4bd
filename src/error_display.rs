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

use anyhow::Error;
use std::fmt::Write;

pub trait HumanReadableError {
    fn to_human_readable(&self) -> String;
}

impl HumanReadableError for Error {
    fn to_human_readable(&self) -> String {
        let chain: Vec<String> = self.chain().map(|e| e.to_string()).collect();
        let root_cause = chain.last().unwrap_or(&self.to_string()).clone();

        let mut message = String::new();

        if root_cause.contains("Connection refused") || root_cause.contains("error sending request") {
            let _ = writeln!(message, "Error: could not reach the node.\n");
            let _ = writeln!(message, "  • Check that the node's host and port are correct.");
            let _ = writeln!(message, "  • Check that the node's manager application is running.");
            let _ = writeln!(message, "  • Ensure network connectivity between this host and the node.");
        } else if root_cause.contains("401") {
            let _ = writeln!(message, "Error: authentication failed.\n");
            let _ = writeln!(message, "  • Check the --user/--password credentials.");
            let _ = writeln!(message, "  • Check that the manager role is granted to that user on the node.");
        } else if root_cause.contains("403") {
            let _ = writeln!(message, "Error: permission denied.\n");
            let _ = writeln!(message, "  • The user lacks the manager-script or manager-jmx role on this node.");
        } else if root_cause.contains("404") {
            let _ = writeln!(message, "Error: resource not found.\n");
            let _ = writeln!(message, "  • Check the context path and virtual host.");
        } else {
            let _ = writeln!(message, "Error: {self}");
            if chain.len() > 1 {
                let _ = writeln!(message, "\nCaused by:");
                for (i, cause) in chain.iter().skip(1).enumerate() {
                    let _ = writeln!(message, "  {}: {}", i + 1, cause);
                }
            }
        }

        message
    }
}

pub fn format_error(error: &Error) -> String {
    error.to_human_readable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_connection_refused() {
        let err = anyhow::anyhow!("Connection refused").context("failed to connect");
        let msg = format_error(&err);
        assert!(msg.contains("could not reach the node"));
        assert!(msg.contains("host and port"));
    }

    #[test]
    fn test_unauthorized() {
        let err = anyhow::anyhow!("request failed with 401 Unauthorized").context("query failed");
        let msg = format_error(&err);
        assert!(msg.contains("authentication failed"));
        assert!(msg.contains("--user/--password"));
    }

    #[test]
    fn test_generic_chain() {
        let err = anyhow::anyhow!("low level io error")
            .context("config parsing failed")
            .context("application start failed");

        let msg = format_error(&err);
        assert!(msg.contains("Error: application start failed"));
        assert!(msg.contains("Caused by:"));
        assert!(msg.contains("1: config parsing failed"));
        assert!(msg.contains("2: low level io error"));
    }
}
