//! `etymology lookup`: stream a lookup from a running server to the terminal.

use std::io::Write;

use anyhow::{bail, Result};
use serde_json::Value;

use etymology_explainer::client::{ClientSession, EtymologyClient, SessionState};

/// Top-level fields in the order the model emits them.
const FIELD_ORDER: [&str; 8] = [
    "word",
    "phonetic",
    "originLanguage",
    "meaning",
    "history",
    "funFact",
    "relatedWords",
    "timeCapsule",
];

pub(crate) async fn cmd_lookup(url: &str, word: &str, era: &str, json: bool) -> Result<()> {
    let client = EtymologyClient::new(url)?;
    let mut session = ClientSession::new();
    session.set_word(word);
    session.set_era(era);
    if word.trim().is_empty() {
        bail!("A word is required");
    }

    let mut printer = FieldPrinter::default();
    let result = client
        .lookup(&mut session, |s| {
            if !json {
                if let Some(current) = s.current() {
                    printer.print_settled(current);
                }
            }
        })
        .await;

    match session.state() {
        SessionState::Complete => {
            if json {
                println!("{}", serde_json::to_string_pretty(&session.result())?);
            } else {
                if let Some(current) = session.current() {
                    printer.print_rest(current);
                }
                if let Some(status) = session.cache_status() {
                    eprintln!("\n(cache: {})", status.as_str());
                }
            }
            Ok(())
        }
        SessionState::Error(message) => bail!("{}", message),
        _ => {
            result?;
            bail!("Lookup did not complete")
        }
    }
}

/// Prints each top-level field once it can no longer change.
///
/// A field is settled when a later field has started streaming.
#[derive(Debug, Default)]
struct FieldPrinter {
    printed: usize,
}

impl FieldPrinter {
    fn print_settled(&mut self, current: &Value) {
        let last_present = FIELD_ORDER
            .iter()
            .rposition(|field| current.get(*field).is_some());
        if let Some(last) = last_present {
            self.print_until(current, last);
        }
    }

    fn print_rest(&mut self, current: &Value) {
        self.print_until(current, FIELD_ORDER.len());
    }

    fn print_until(&mut self, current: &Value, end: usize) {
        let mut out = std::io::stdout().lock();
        while self.printed < end {
            let field = FIELD_ORDER[self.printed];
            if let Some(value) = current.get(field) {
                let _ = writeln!(out, "{}", render_field(field, value));
            }
            self.printed += 1;
        }
        let _ = out.flush();
    }
}

fn text(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

fn render_field(field: &str, value: &Value) -> String {
    match field {
        "word" => format!("\n{}", text(value).to_uppercase()),
        "phonetic" => format!("  {}", text(value)),
        "originLanguage" => format!("\nOrigin: {}", text(value)),
        "meaning" => format!("Meaning: {}", text(value)),
        "history" => {
            let mut lines = vec!["\nHistory:".to_string()];
            for entry in value.as_array().into_iter().flatten() {
                lines.push(format!(
                    "  - {}: {}",
                    text(&entry["period"]),
                    text(&entry["description"])
                ));
            }
            lines.join("\n")
        }
        "funFact" => format!("\nFun fact: {}", text(value)),
        "relatedWords" => {
            let words: Vec<&str> = value
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect();
            format!("Related: {}", words.join(", "))
        }
        "timeCapsule" => format!(
            "\nTime Capsule ({}):\n  \"{}\"\n  {}",
            text(&value["era"]),
            text(&value["usageExample"]),
            text(&value["contextExplanation"])
        ),
        _ => String::new(),
    }
}
