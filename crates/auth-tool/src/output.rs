//! Printing of the exchanges the operator inspects. Everything here goes to
//! stdout; logs go to stderr.

use auth_tool_core::TokenOutcome;
use serde::Serialize;

pub fn json<T: Serialize + ?Sized>(label: &str, value: &T) -> anyhow::Result<()> {
    println!("── {} ──", label);
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn token_outcome(label: &str, outcome: &TokenOutcome) -> anyhow::Result<()> {
    json(&format!("{} (HTTP {})", label, outcome.status), &outcome.body)?;
    if !outcome.is_usable() {
        println!("Token endpoint did not answer 200; no tokens are usable.");
    }
    Ok(())
}
