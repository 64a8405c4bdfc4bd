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

//! Turns an object-name query pattern (using `*` as the only wildcard, the
//! way JMX object-name patterns do) into a regular expression. Used only by
//! the in-process fake introspection client in tests, since real pattern
//! matching happens on the node itself.

use regex::Regex;

pub fn pattern_to_regex(pattern: &str) -> Regex {
    let mut re = String::from("^");
    for part in pattern.split('*') {
        re.push_str(&regex::escape(part));
        re.push_str(".*");
    }
    re.truncate(re.len() - 2);
    re.push('$');
    Regex::new(&re).unwrap_or_else(|_| Regex::new("$^").unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_trailing_wildcard() {
        let re = pattern_to_regex("Catalina:type=Manager,*");
        assert!(re.is_match("Catalina:type=Manager,context=/foo"));
        assert!(!re.is_match("Catalina:type=Connector,port=8080"));
    }

    #[test]
    fn matches_exact_pattern_without_wildcard() {
        let re = pattern_to_regex("Catalina:type=Server");
        assert!(re.is_match("Catalina:type=Server"));
        assert!(!re.is_match("Catalina:type=Server2"));
    }
}
