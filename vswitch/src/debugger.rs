// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-packet trace accumulator.
//!
//! A packet selected for tracing collects one indented line per event while it walks the
//! graph. The text is logged once the packet reaches a terminal state.

use std::fmt::{Display, Write};

const INDENT: &str = "  ";

#[derive(Debug, Clone, Default)]
pub struct TraceDebugger {
    on: bool,
    indent: usize,
    text: String,
}

impl TraceDebugger {
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn set_on(&mut self, on: bool) {
        self.on = on;
    }

    pub fn reset_indent(&mut self) {
        self.indent = 0;
    }

    pub fn inc_indent(&mut self) {
        self.indent += 1;
    }

    pub fn dec_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Append a line. Does nothing unless tracing is on.
    pub fn line(&mut self, what: impl Display) {
        if !self.on {
            return;
        }
        for _ in 0..self.indent {
            self.text.push_str(INDENT);
        }
        let _ = writeln!(self.text, "{what}");
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drain the accumulated text.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }

    /// A fresh debugger for a copy of the packet: same switch, empty text.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            on: self.on,
            indent: 0,
            text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn lines_are_indented() {
        let mut d = TraceDebugger::default();
        d.line("ignored");
        d.set_on(true);
        d.line("node: ethernet-input");
        d.inc_indent();
        d.inc_indent();
        d.line("record mac");
        d.dec_indent();
        d.line("result: Pick");
        assert_eq!(
            d.text(),
            "node: ethernet-input\n    record mac\n  result: Pick\n"
        );
        assert!(d.fork().text().is_empty());
        assert!(d.fork().is_on());
    }
}
