// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Line console driving a local DSM node
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests below

use std::io::{self, BufRead, Write};
use std::time::Duration;

use crate::node::{Node, Outcome};
use crate::PageNum;

const DEFAULT_WAIT: Duration = Duration::from_millis(2000);

/// Usage text.
pub fn help() -> &'static str {
    concat!(
        "commands:\n  read <page>\n  write <page> <content...>\n  pages\n",
        "  wait [ms]\n  help\n  exit | quit",
    )
}

/// Runs one command line against `node` and returns the text to print.
///
/// `write` takes everything after the single separator that follows the page
/// number verbatim, so `write 1  World` appends `" World"`.
pub fn execute(node: &Node, line: &str) -> String {
    let (command, rest) = next_word(line);
    let mut words = rest.split_whitespace();
    match command {
        "" => String::new(),
        "read" => match parse_page(words.next()) {
            Ok(page) => report(page, node.read(page)),
            Err(msg) => msg,
        },
        "write" => {
            let (page, content) = next_word(rest);
            let page = match parse_page(Some(page)) {
                Ok(page) => page,
                Err(msg) => return msg,
            };
            let content = content.strip_prefix(char::is_whitespace).unwrap_or(content);
            if content.is_empty() {
                return "usage: write <page> <content...>".to_string();
            }
            report(page, node.write(page, content))
        }
        "pages" => {
            let pages = node.pages();
            if pages.is_empty() {
                return "no cached pages".to_string();
            }
            pages
                .iter()
                .map(|view| format!("page {} [{}] {}", view.page, view.access, view.content))
                .collect::<Vec<_>>()
                .join("\n")
        }
        "wait" => {
            let timeout = match words.next().map(str::parse::<u64>) {
                None => DEFAULT_WAIT,
                Some(Ok(ms)) => Duration::from_millis(ms),
                Some(Err(_)) => return "usage: wait [ms]".to_string(),
            };
            match node.wait_settled(timeout) {
                Ok(()) => "settled".to_string(),
                Err(err) => format!("error: {err}"),
            }
        }
        "help" => help().to_string(),
        other => format!("unknown command '{other}'\n{}", help()),
    }
}

/// Splits off the first word, returning it and the text right after it.
fn next_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    text.split_at(end)
}

fn parse_page(word: Option<&str>) -> Result<PageNum, String> {
    word.and_then(|word| word.parse().ok())
        .map(PageNum)
        .ok_or_else(|| "expected a page number".to_string())
}

fn report(page: PageNum, outcome: crate::Result<Outcome>) -> String {
    match outcome {
        Ok(Outcome::Local(content)) => format!("page {page}: {content}"),
        Ok(Outcome::Requested) => format!("page {page}: requested from manager"),
        Err(err) => format!("error: {err}"),
    }
}

/// Reads commands from `input` until `exit` or end of input.
pub fn run<R: BufRead, W: Write>(node: &Node, input: R, mut output: W) -> io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        let text = execute(node, &line);
        if !text.is_empty() {
            writeln!(output, "{text}")?;
        }
        output.flush()?;
    }
    Ok(())
}
