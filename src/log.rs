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

//! Human-facing progress output: short `Action subject` lines, wrapped to
//! the terminal width and indentable so that per-node output can be nested
//! under a cluster-wide step. Distinct from `tracing`, which carries the
//! structured diagnostic log.

use colored::{ColoredString, Colorize};
use std::borrow::Cow;
use std::sync::{LazyLock, OnceLock, RwLock};
use terminal_size::terminal_size;
use textwrap::WordSplitter;

static LOG_STATE: LazyLock<RwLock<LogState>> = LazyLock::new(RwLock::default);
static TERMINAL_WIDTH: OnceLock<Option<usize>> = OnceLock::new();
static WRAP_PADDING: usize = 2;

fn terminal_width() -> Option<usize> {
    *TERMINAL_WIDTH.get_or_init(|| terminal_size().map(|(width, _)| width.0 as usize))
}

struct LogState {
    indents: Vec<Option<String>>,
    calculated_indent: String,
    max_width: Option<usize>,
}

impl LogState {
    fn new() -> Self {
        Self {
            indents: Vec::new(),
            calculated_indent: String::new(),
            max_width: terminal_width().map(|w| w.saturating_sub(WRAP_PADDING)),
        }
    }

    fn inc_indent(&mut self, custom_prefix: Option<&str>) {
        self.indents.push(custom_prefix.map(|p| p.to_string()));
        self.regen_indent_prefix();
    }

    fn dec_indent(&mut self) {
        self.indents.pop();
        self.regen_indent_prefix()
    }

    fn regen_indent_prefix(&mut self) {
        self.calculated_indent = String::with_capacity(self.indents.len() * 2);
        for indent in &self.indents {
            self.calculated_indent
                .push_str(indent.as_deref().unwrap_or("  "))
        }
        self.max_width = terminal_width()
            .map(|w| w.saturating_sub(WRAP_PADDING + self.calculated_indent.len()));
    }
}

impl Default for LogState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LogIndent;

impl LogIndent {
    pub fn new() -> Self {
        LOG_STATE.write().unwrap().inc_indent(None);
        Self
    }

    pub fn prefix<S: AsRef<str>>(prefix: S) -> Self {
        LOG_STATE.write().unwrap().inc_indent(Some(prefix.as_ref()));
        Self
    }
}

impl Default for LogIndent {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LogIndent {
    fn drop(&mut self) {
        LOG_STATE.write().unwrap().dec_indent();
    }
}

pub fn log_action<T: AsRef<str>>(action: &str, subject: T) {
    logln_internal(&format!(
        "{} {}",
        action.log_color_action(),
        subject.as_ref()
    ));
}

pub fn log_warn_action<T: AsRef<str>>(action: &str, subject: T) {
    logln_internal(&format!("{} {}", action.log_color_warn(), subject.as_ref()));
}

pub fn log_error_action<T: AsRef<str>>(action: &str, subject: T) {
    logln_internal(&format!("{} {}", action.log_color_error(), subject.as_ref()));
}

pub fn logln<T: AsRef<str>>(message: T) {
    logln_internal(message.as_ref());
}

fn logln_internal(message: &str) {
    let state = LOG_STATE.read().unwrap();

    let lines = match state.max_width {
        Some(width) if width > 0 && width <= message.len() && !message.contains('\n') => {
            textwrap::wrap(
                message,
                textwrap::Options::new(width)
                    .subsequent_indent("     ")
                    .word_splitter(WordSplitter::NoHyphenation),
            )
        }
        _ => vec![Cow::from(message)],
    };

    for line in lines {
        println!("{}{}", state.calculated_indent, line);
    }
}

pub trait LogColorize {
    fn as_str(&self) -> impl Colorize;

    fn log_color_action(&self) -> ColoredString {
        self.as_str().green()
    }

    fn log_color_warn(&self) -> ColoredString {
        self.as_str().yellow().bold()
    }

    fn log_color_error(&self) -> ColoredString {
        self.as_str().red().bold()
    }

    fn log_color_highlight(&self) -> ColoredString {
        self.as_str().bold()
    }

    fn log_color_ok_highlight(&self) -> ColoredString {
        self.as_str().bold().green()
    }
}

impl LogColorize for &str {
    fn as_str(&self) -> impl Colorize {
        *self
    }
}

impl LogColorize for String {
    fn as_str(&self) -> impl Colorize {
        self.as_str()
    }
}
