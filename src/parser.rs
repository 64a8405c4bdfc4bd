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

//! A recursive-descent parser for the text grammar returned by the
//! introspection endpoint (`search`/`get`/`invoke` responses). One function
//! per production, named after the grammar rule it implements, so the
//! structure stays auditable rule by rule.

use crate::error::TomcatError;
use crate::value::Value;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static SEARCH_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^OK - [^\n]*\n+").unwrap());
static GET_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^OK - Attribute .*? = ").unwrap());
static INVOKE_NO_VALUE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^OK - Operation .*? without return value\n").unwrap());
static INVOKE_VALUE_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^OK - Operation .*? returned:\n").unwrap());
static ARRAY_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Array\[.+?\] of length [0-9]+\n").unwrap());
static COMPOSITE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^javax\.management\.openmbean\.CompositeDataSupport\(compositeType=.+?,contents=\{")
        .unwrap()
});

/// A cursor over the remaining, unconsumed input. All productions below
/// borrow it mutably and advance `pos` as they consume tokens.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

fn parse_error(msg: impl Into<String>) -> TomcatError {
    TomcatError::Parse(msg.into())
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn scan_regex(&mut self, re: &Regex, what: &str) -> Result<&'a str, TomcatError> {
        let m = re
            .find(self.rest())
            .ok_or_else(|| parse_error(format!("expected {what} at: {:.40}", self.rest())))?;
        if m.start() != 0 {
            return Err(parse_error(format!("expected {what} at: {:.40}", self.rest())));
        }
        let matched = &self.rest()[..m.end()];
        self.pos += m.end();
        Ok(matched)
    }

    fn scan_literal(&mut self, literal: &str) -> Result<(), TomcatError> {
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(parse_error(format!(
                "expected '{literal}' at: {:.40}",
                self.rest()
            )))
        }
    }

    fn scan_line(&mut self) -> Result<&'a str, TomcatError> {
        let rest = self.rest();
        let end = rest.find('\n').unwrap_or(rest.len());
        let line = &rest[..end];
        self.pos += end;
        Ok(line)
    }

    fn peek_starts_with(&self, literal: &str) -> bool {
        self.rest().starts_with(literal)
    }
}

/// Parses a `search` response into `{bean_id -> {property -> value}}`,
/// injecting `objectName = bean_id` into any bean that did not report one.
pub fn parse_search_results(body: &str) -> Result<BTreeMap<String, BTreeMap<String, Value>>, TomcatError> {
    if !body.starts_with("OK") {
        return Err(TomcatError::Remote(body.to_string()));
    }

    let mut cur = Cursor::new(body);
    cur.scan_regex(&SEARCH_HEADER, "search result header")?;

    let mut result = BTreeMap::new();
    while cur.peek_starts_with("Name: ") {
        let (bean_id, props) = parse_bean(&mut cur)?;
        result.insert(bean_id, props);
    }

    if !cur.is_at_end() {
        return Err(parse_error(format!(
            "trailing content after search results: {:.40}",
            cur.rest()
        )));
    }

    for (bean_id, props) in result.iter_mut() {
        props
            .entry("objectName".to_string())
            .or_insert_with(|| Value::Str(bean_id.clone()));
    }

    Ok(result)
}

fn parse_bean(cur: &mut Cursor) -> Result<(String, BTreeMap<String, Value>), TomcatError> {
    cur.scan_literal("Name: ")?;
    let bean_id = cur.scan_line()?.to_string();
    cur.scan_literal("\n")?;

    let mut props = BTreeMap::new();
    while !cur.peek_starts_with("\n") && !cur.is_at_end() {
        let (key, value) = parse_property(cur)?;
        props.insert(key, value);
    }
    cur.scan_literal("\n")?;
    Ok((bean_id, props))
}

fn parse_property(cur: &mut Cursor) -> Result<(String, Value), TomcatError> {
    let id = scan_id(cur)?;
    cur.scan_literal(": ")?;
    let value = parse_propval(cur)?;
    Ok((id, value))
}

fn scan_id(cur: &mut Cursor) -> Result<String, TomcatError> {
    let rest = cur.rest();
    let end = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        return Err(parse_error(format!("expected identifier at: {:.40}", rest)));
    }
    let id = rest[..end].to_string();
    cur.pos += end;
    Ok(id)
}

fn parse_propval(cur: &mut Cursor) -> Result<Value, TomcatError> {
    if ARRAY_HEADER.is_match(cur.rest()) {
        parse_array(cur)
    } else {
        let value = parse_value(cur)?;
        cur.scan_literal("\n")?;
        Ok(value)
    }
}

fn parse_value(cur: &mut Cursor) -> Result<Value, TomcatError> {
    if cur.peek_starts_with("\n") {
        Ok(Value::Null)
    } else if COMPOSITE_HEADER.is_match(cur.rest()) {
        parse_composite(cur)
    } else {
        let literal = parse_literal(cur, |c| c.starts_with('\n'))?;
        Ok(Value::coerce_scalar(&literal))
    }
}

fn parse_literal(cur: &mut Cursor, is_terminator: impl Fn(&str) -> bool) -> Result<String, TomcatError> {
    let mut s = String::new();
    loop {
        if cur.is_at_end() {
            return Err(parse_error("unexpected end of input while reading a value"));
        }
        if is_terminator(cur.rest()) {
            break;
        }
        let ch = cur.rest().chars().next().unwrap();
        s.push(ch);
        cur.pos += ch.len_utf8();
        if is_terminator(cur.rest()) {
            break;
        }
    }
    if s.is_empty() {
        return Err(parse_error("expected at least one character literal"));
    }
    Ok(s)
}

fn parse_array(cur: &mut Cursor) -> Result<Value, TomcatError> {
    cur.scan_regex(&ARRAY_HEADER, "array header")?;
    let mut items = Vec::new();
    while cur.peek_starts_with("\t") {
        cur.scan_literal("\t")?;
        let value = parse_value(cur)?;
        cur.scan_literal("\n")?;
        items.push(value);
    }
    Ok(Value::List(items))
}

fn parse_composite(cur: &mut Cursor) -> Result<Value, TomcatError> {
    cur.scan_regex(&COMPOSITE_HEADER, "composite header")?;
    let mut map = BTreeMap::new();
    let (k, v) = parse_keyvalue(cur)?;
    map.insert(k, v);
    while cur.peek_starts_with(", ") {
        cur.scan_literal(", ")?;
        let (k, v) = parse_keyvalue(cur)?;
        map.insert(k, v);
    }
    cur.scan_literal("})")?;
    Ok(Value::Map(map))
}

fn parse_keyvalue(cur: &mut Cursor) -> Result<(String, Value), TomcatError> {
    let id = scan_id(cur)?;
    cur.scan_literal("=")?;
    let value = parse_kvvalue(cur)?;
    Ok((id, value))
}

fn parse_kvvalue(cur: &mut Cursor) -> Result<Value, TomcatError> {
    if cur.peek_starts_with(", ") || cur.peek_starts_with("})") {
        Ok(Value::Null)
    } else if COMPOSITE_HEADER.is_match(cur.rest()) {
        parse_composite(cur)
    } else {
        let literal = parse_literal(cur, |r| r.starts_with(", ") || r.starts_with("})"))?;
        Ok(Value::coerce_scalar(&literal))
    }
}

/// Parses a `get` response into its single value (a scalar, composite, null
/// or array).
pub fn parse_get_results(body: &str) -> Result<Value, TomcatError> {
    if !body.starts_with("OK") {
        return Err(TomcatError::Remote(body.to_string()));
    }

    let mut cur = Cursor::new(body);
    cur.scan_regex(&GET_HEADER, "get result header")?;
    let value = parse_propval(&mut cur)?;
    if !cur.is_at_end() {
        return Err(parse_error(format!(
            "trailing content after get result: {:.40}",
            cur.rest()
        )));
    }
    Ok(value)
}

/// Parses an `invoke` response. `None` means the operation returned no
/// value; `Some` carries a scalar, composite or list result.
pub fn parse_invoke_results(body: &str) -> Result<Option<Value>, TomcatError> {
    if !body.starts_with("OK") {
        return Err(TomcatError::Remote(body.to_string()));
    }

    let mut cur = Cursor::new(body);
    if INVOKE_NO_VALUE_HEADER.is_match(cur.rest()) {
        cur.scan_regex(&INVOKE_NO_VALUE_HEADER, "invoke-without-value header")?;
        if !cur.is_at_end() {
            return Err(parse_error("trailing content after invoke-without-value result"));
        }
        return Ok(None);
    }

    if INVOKE_VALUE_HEADER.is_match(cur.rest()) {
        cur.scan_regex(&INVOKE_VALUE_HEADER, "invoke-with-value header")?;
        let value = parse_nvk_val(&mut cur)?;
        if !cur.is_at_end() {
            return Err(parse_error("trailing content after invoke result"));
        }
        return Ok(Some(value));
    }

    Err(parse_error(format!(
        "unrecognized invoke response: {:.60}",
        body
    )))
}

fn parse_nvk_val(cur: &mut Cursor) -> Result<Value, TomcatError> {
    if cur.peek_starts_with("  ") {
        parse_nvk_arr(cur)
    } else {
        let value = parse_value(cur)?;
        cur.scan_literal("\n")?;
        Ok(value)
    }
}

fn parse_nvk_arr(cur: &mut Cursor) -> Result<Value, TomcatError> {
    let mut items = Vec::new();
    loop {
        cur.scan_literal("  ")?;
        let value = parse_value(cur)?;
        cur.scan_literal("\n")?;
        items.push(value);
        if !cur.peek_starts_with("  ") {
            break;
        }
    }
    Ok(Value::List(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a_single_bean_with_scalar_properties() {
        let body = "OK - Find All Beans\n\nName: Catalina:type=Server\nserverInfo: Apache Tomcat/7.0.35\nport: 8080\n\n";
        let beans = parse_search_results(body).unwrap();
        let props = &beans["Catalina:type=Server"];
        assert_eq!(props["serverInfo"], Value::Str("Apache Tomcat/7.0.35".into()));
        assert_eq!(props["port"], Value::Int(8080));
        assert_eq!(props["objectName"], Value::Str("Catalina:type=Server".into()));
    }

    #[test]
    fn does_not_overwrite_an_explicit_object_name() {
        let body = "OK - Find All Beans\n\nName: Catalina:type=Server\nobjectName: Catalina:type=Server\n\n";
        let beans = parse_search_results(body).unwrap();
        let props = &beans["Catalina:type=Server"];
        assert_eq!(
            props["objectName"],
            Value::Str("Catalina:type=Server".into())
        );
    }

    #[test]
    fn parses_arrays() {
        let body = "OK - Find All Beans\n\nName: Catalina:type=X\nnames: Array[java.lang.String] of length 2\n\tfoo\n\tbar\n\n";
        let beans = parse_search_results(body).unwrap();
        let arr = &beans["Catalina:type=X"]["names"];
        assert_eq!(
            arr,
            &Value::List(vec![Value::Str("foo".into()), Value::Str("bar".into())])
        );
    }

    #[test]
    fn parses_composites() {
        let body = "OK - Find All Beans\n\nName: Catalina:type=X\nusage: javax.management.openmbean.CompositeDataSupport(compositeType=whatever,contents={committed=10, init=0, max=100, used=5})\n\n";
        let beans = parse_search_results(body).unwrap();
        let usage = &beans["Catalina:type=X"]["usage"];
        let map = usage.as_map().unwrap();
        assert_eq!(map["used"], Value::Int(5));
        assert_eq!(map["max"], Value::Int(100));
    }

    #[test]
    fn parses_null_properties() {
        let body = "OK - Find All Beans\n\nName: Catalina:type=X\nparent: \n\n";
        let beans = parse_search_results(body).unwrap();
        assert_eq!(beans["Catalina:type=X"]["parent"], Value::Null);
    }

    #[test]
    fn non_ok_body_is_a_remote_error() {
        let err = parse_search_results("FAIL - no such bean\n").unwrap_err();
        assert!(matches!(err, TomcatError::Remote(_)));
    }

    #[test]
    fn parses_get_scalar() {
        let v = parse_get_results("OK - Attribute get 'stateName' = STARTED\n").unwrap();
        assert_eq!(v, Value::Str("STARTED".into()));
    }

    #[test]
    fn parses_get_array() {
        let body = "OK - Attribute get 'x' = Array[java.lang.String] of length 1\n\tfoo\n";
        let v = parse_get_results(body).unwrap();
        assert_eq!(v, Value::List(vec![Value::Str("foo".into())]));
    }

    #[test]
    fn parses_invoke_without_value() {
        let r = parse_invoke_results("OK - Operation gc invoked without return value\n").unwrap();
        assert_eq!(r, None);
    }

    #[test]
    fn parses_invoke_with_scalar_value() {
        let body = "OK - Operation listSessionIds invoked returned:\nabc123 def456\n";
        let r = parse_invoke_results(body).unwrap();
        assert_eq!(r, Some(Value::Str("abc123 def456".into())));
    }

    #[test]
    fn parses_invoke_with_array_value() {
        let body = "OK - Operation someOp invoked returned:\n  foo\n  bar\n";
        let r = parse_invoke_results(body).unwrap();
        assert_eq!(
            r,
            Some(Value::List(vec![Value::Str("foo".into()), Value::Str("bar".into())]))
        );
    }
}
