//! Context-rot mitigation.
//!
//! Accumulated node outputs are passed forward as `"[AgentName]:\n{output}"`
//! entries. The last entry stays verbatim (it is what the next agent reacts
//! to); older entries are compressed line-by-line down to decision-bearing
//! lines. The compressor is line-oriented, not token-aware.

use crate::config::{COMPRESSED_OUTPUT_SIZE, CONTEXT_BUDGET};

/// Lines containing any of these survive compression.
const SIGNAL_MARKERS: [&str; 16] = [
    "decision",
    "choix",
    "stack",
    "conclusion",
    "recommand",
    "action",
    "verdict",
    "valide",
    "approve",
    "reject",
    "veto",
    "[pr]",
    "architecture",
    "technologie",
    "priorit",
    "conclusion",
];

const LIST_MARKERS: [&str; 6] = ["- ", "* ", "1.", "2.", "3.", "#"];

/// Compress one agent output to its key points.
///
/// Keeps the first non-empty line, then every line carrying a decision
/// marker, list marker, or heading, until `max_chars` is reached.
#[must_use]
pub fn compress_output(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_owned();
    }

    let mut lines = text.lines();
    let mut kept: Vec<&str> = Vec::new();
    let mut char_count = 0;

    // First non-empty line always survives.
    for line in lines.by_ref() {
        if !line.trim().is_empty() {
            kept.push(line);
            char_count += line.len();
            break;
        }
    }

    for line in lines {
        let stripped = line.trim().to_lowercase();
        if stripped.is_empty() {
            continue;
        }
        let is_signal = SIGNAL_MARKERS.iter().any(|m| stripped.contains(m))
            || LIST_MARKERS.iter().any(|m| stripped.starts_with(m));
        if is_signal {
            kept.push(line);
            char_count += line.len();
            if char_count >= max_chars {
                break;
            }
        }
    }

    let result = kept.join("\n");
    if result.len() > max_chars {
        crate::util::truncate_ellipsis(&result, max_chars)
    } else {
        result
    }
}

/// Build the context string passed to the next node.
///
/// A single entry passes verbatim up to `budget`. With multiple entries,
/// half the budget is reserved for the last entry verbatim; the rest is
/// shared equally across older entries, each compressed.
#[must_use]
pub fn build_compressed_context(accumulated: &[String], budget: usize) -> String {
    match accumulated {
        [] => String::new(),
        [single] => crate::util::truncate(single, budget),
        [older @ .., last] => {
            let last_budget = budget / 2;
            let older_budget = budget - last_budget;
            let per_agent = (older_budget / older.len()).max(200);

            let compressed: Vec<String> = older
                .iter()
                .map(|entry| {
                    // Entry format: "[AgentName]:\n{output}"
                    match entry.split_once('\n') {
                        Some((header, body)) => {
                            format!("{header}\n{}", compress_output(body, per_agent))
                        }
                        None => compress_output(entry, per_agent),
                    }
                })
                .collect();

            format!(
                "{}\n\n---\n\n{}",
                compressed.join("\n\n---\n\n"),
                crate::util::truncate(last, last_budget)
            )
        }
    }
}

/// [`build_compressed_context`] with the default budget.
#[must_use]
pub fn build_context(accumulated: &[String]) -> String {
    build_compressed_context(accumulated, CONTEXT_BUDGET)
}

/// Format one accumulated entry.
#[must_use]
pub fn entry(agent_name: &str, output: &str) -> String {
    format!("[{agent_name}]:\n{output}")
}

/// Compress with the default per-output size.
#[must_use]
pub fn compress_default(text: &str) -> String {
    compress_output(text, COMPRESSED_OUTPUT_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_entry_passes_verbatim_to_budget() {
        let output = "o".repeat(10_000);
        let ctx = build_compressed_context(std::slice::from_ref(&output), CONTEXT_BUDGET);
        assert_eq!(ctx.len(), CONTEXT_BUDGET);
        assert!(output.starts_with(&ctx));
    }

    #[test]
    fn last_entry_survives_to_half_budget() {
        let a = entry("Alice", &"filler line without markers\n".repeat(200));
        let b = entry("Bob", &"b".repeat(4000));
        let ctx = build_compressed_context(&[a.clone(), b.clone()], CONTEXT_BUDGET);
        // Bob's entry is kept verbatim up to budget/2.
        let last_segment = ctx.rsplit("\n\n---\n\n").next().unwrap();
        assert_eq!(last_segment, crate::util::truncate(&b, CONTEXT_BUDGET / 2));
        assert!(last_segment.ends_with('b'));
    }

    #[test]
    fn decision_lines_survive_compression() {
        let mut text = String::from("Intro paragraph about the work.\n");
        for i in 0..100 {
            text.push_str(&format!("verbose analysis sentence number {i} with no markers\n"));
        }
        text.push_str("Decision: use PostgreSQL for persistence\n");
        text.push_str("- action: migrate the session table\n");

        let compressed = compress_output(&text, 400);
        assert!(compressed.contains("Intro paragraph"));
        assert!(compressed.contains("Decision: use PostgreSQL"));
        assert!(compressed.contains("action: migrate"));
        assert!(!compressed.contains("sentence number 50"));
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(compress_output("short", 100), "short");
    }

    #[test]
    fn empty_accumulation_yields_empty() {
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn headers_are_preserved_per_entry() {
        let a = entry("Alice", &format!("First line.\n{}", "noise\n".repeat(300)));
        let b = entry("Bob", "Short reply.");
        let ctx = build_compressed_context(&[a, b], 2000);
        assert!(ctx.contains("[Alice]:"));
        assert!(ctx.contains("[Bob]:"));
        assert!(ctx.contains("First line."));
    }
}
