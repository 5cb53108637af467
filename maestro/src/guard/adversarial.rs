//! Adversarial guard — slop, mock, hallucination, and lie detection.
//!
//! Two-layer model applied to agent output before it enters session
//! history:
//!
//! - **L0** — deterministic regex families with weighted penalties; a
//!   total score ≥ 5 rejects the output. Costs nothing.
//! - **L1** — optional semantic evaluation by a *different* model than
//!   the producer, returning a JSON verdict. Only runs on execution
//!   patterns when L0 passed.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::llm::{ChatOptions, LlmClient, LlmMessage};
use crate::message::ToolCallRecord;
use crate::model::RoleBucket;

/// Result of an adversarial check.
#[derive(Debug, Clone)]
pub struct GuardVerdict {
    /// Whether the output is accepted.
    pub passed: bool,
    /// Accumulated penalty (L0) or model score (L1). 0 = clean.
    pub score: u32,
    /// Detected issues, most significant first.
    pub issues: Vec<String>,
    /// `"L0"` or `"L1"`.
    pub level: &'static str,
}

impl GuardVerdict {
    /// One-line summary for logs and system messages.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.passed {
            return "APPROVED".to_owned();
        }
        let issues = self
            .issues
            .iter()
            .take(5)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        format!("REJECTED (score={}): {issues}", self.score)
    }
}

/// L0 rejection threshold.
const L0_THRESHOLD: u32 = 5;

/// L1 rejection score.
const L1_REJECT_SCORE: u32 = 6;

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid guard pattern {pattern}: {e}"))
}

static SLOP: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (ci(r"\blorem ipsum\b"), "Lorem ipsum placeholder text"),
        (ci(r"\bfoo\s*bar\s*baz\b"), "Placeholder foo/bar/baz"),
        (ci(r"(?:https?://)?example\.com"), "example.com placeholder URL"),
        (ci(r"\bplaceholder\b.*\btext\b"), "Placeholder text"),
        (ci(r"\bTBD\b"), "TBD marker, incomplete work"),
        (ci(r"\bXXX\b"), "XXX marker, needs attention"),
    ]
});

static MOCK: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (ci(r"#\s*TODO\s*:?\s*implement"), "TODO implement marker"),
        (ci(r"//\s*TODO\s*:?\s*implement"), "TODO implement marker"),
        (ci(r"pass\s*#\s*(?:todo|fixme|implement)"), "pass with TODO comment"),
        (
            ci(r"return\s+(?:None|null|undefined)\s*#\s*(?:todo|stub|mock)"),
            "Stub return with TODO",
        ),
        (
            ci(r"(?:fake|mock|dummy|hardcoded)\s+(?:data|response|result|value)"),
            "Fake/mock data",
        ),
        (ci(r"console\.log\s*\(\s*['\x22]test"), "console.log('test') debug leftover"),
    ]
});

static HALLUCINATION: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            ci(r"j'ai\s+(?:deploye|déployé|lancé|exécuté|testé|vérifié|créé le fichier|commit)"),
            "Claims action without tool evidence",
        ),
        (
            ci(r"i(?:'ve| have)\s+(?:deployed|tested|created|committed|executed|verified)"),
            "Claims action without tool evidence",
        ),
        (
            ci(r"le\s+(?:build|test|deploy)\s+(?:a|est)\s+(?:réussi|passé|ok)"),
            "Claims success without evidence",
        ),
        (ci(r"voici\s+(?:le|les)\s+résultat"), "Claims to show results"),
    ]
});

static LIE: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            ci(r"(?:fichier|file)\s+(?:créé|created|saved)\s*:\s*\S+"),
            "Claims file creation, no write tool ran",
        ),
        (
            ci(r"(?:http|https)://(?:staging|prod|api)\.\S+(?:\.local|\.internal)"),
            "Invented internal URL",
        ),
    ]
});

/// Minimum content length by role bucket for non-decision outputs.
const fn min_length(role: RoleBucket) -> usize {
    match role {
        RoleBucket::Dev | RoleBucket::Architecture => 200,
        RoleBucket::Qa | RoleBucket::Devops => 150,
        _ => 80,
    }
}

const WRITE_TOOLS: [&str; 5] = ["code_write", "code_edit", "git_commit", "deploy", "docker_build"];

/// L0: fast deterministic checks. Returns immediately.
#[must_use]
pub fn check_l0(content: &str, role: RoleBucket, tool_calls: &[ToolCallRecord]) -> GuardVerdict {
    if content.trim().is_empty() {
        return GuardVerdict {
            passed: false,
            score: 10,
            issues: vec!["Empty output".to_owned()],
            level: "L0",
        };
    }

    let mut issues = Vec::new();
    let mut score: u32 = 0;
    let has_write_tool = tool_calls
        .iter()
        .any(|tc| WRITE_TOOLS.contains(&tc.name.as_str()));

    for (pattern, desc) in SLOP.iter() {
        if pattern.is_match(content) {
            issues.push(format!("SLOP: {desc}"));
            score += 3;
        }
    }
    for (pattern, desc) in MOCK.iter() {
        if pattern.is_match(content) {
            issues.push(format!("MOCK: {desc}"));
            score += 4;
        }
    }
    // NotImplementedError counts unless the line carries a pragma marker.
    static NOT_IMPL: LazyLock<Regex> =
        LazyLock::new(|| ci(r"raise\s+NotImplementedError\b[^\n]*"));
    if NOT_IMPL
        .find_iter(content)
        .any(|m| !m.as_str().contains("pragma"))
    {
        issues.push("MOCK: NotImplementedError without pragma".to_owned());
        score += 4;
    }

    // Action claims only count against the agent when no write tool backs them.
    if !has_write_tool {
        for (pattern, desc) in HALLUCINATION.iter() {
            if pattern.is_match(content) {
                issues.push(format!("HALLUCINATION: {desc}"));
                score += 5;
            }
        }
        for (pattern, desc) in LIE.iter() {
            if pattern.is_match(content) {
                issues.push(format!("LIE: {desc}"));
                score += 5;
            }
        }
    }

    // Length floor: waived for decision outputs and for turns that wrote code.
    let lower = content.to_lowercase();
    let is_decision = ["[approve]", "[veto]", "go/nogo"]
        .iter()
        .any(|m| lower.contains(m));
    if !has_write_tool && !is_decision {
        let min = min_length(role);
        let len = content.trim().len();
        if len < min {
            issues.push(format!(
                "TOO_SHORT: {len} chars (min {min} for {})",
                role.as_str()
            ));
            score += 2;
        }
    }

    // Echo: output dominated by quoted task lines.
    let lines: Vec<&str> = content.lines().collect();
    let quote_lines = lines.iter().filter(|l| l.trim_start().starts_with('>')).count();
    if lines.len() > 5 && quote_lines * 10 > lines.len() * 7 {
        issues.push("ECHO: output mostly quotes the task back".to_owned());
        score += 4;
    }

    // Repetition: the same long line appearing more than twice.
    let long_lines: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.len() > 20)
        .collect();
    if long_lines.len() > 5 {
        let mut counts = std::collections::HashMap::new();
        for line in &long_lines {
            *counts.entry(*line).or_insert(0u32) += 1;
        }
        let repeated = counts.values().filter(|&&c| c > 2).count();
        if repeated > 3 {
            issues.push(format!("REPETITION: {repeated} lines repeated >2 times"));
            score += 3;
        }
    }

    GuardVerdict {
        passed: score < L0_THRESHOLD,
        score,
        issues,
        level: "L0",
    }
}

#[derive(Debug, Deserialize)]
struct L1Verdict {
    #[serde(default)]
    score: u32,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    verdict: String,
}

/// L1: semantic evaluation by a reviewer model.
///
/// The reviewer receives the task, the output, and a tool-call evidence
/// summary, and must answer with JSON `{score, issues, verdict}`. An
/// unparseable reviewer answer passes (the reviewer is advisory).
pub async fn check_l1(
    llm: &LlmClient,
    content: &str,
    task: &str,
    agent_name: &str,
    tool_calls: &[ToolCallRecord],
) -> Result<GuardVerdict> {
    let evidence = if tool_calls.is_empty() {
        "No tools used.".to_owned()
    } else {
        tool_calls
            .iter()
            .take(10)
            .map(|tc| format!("- {}: {}", tc.name, crate::util::truncate(&tc.result_snippet, 200)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let prompt = format!(
        "You are a strict reviewer evaluating another AI agent's work.\n\
         Agent: {agent_name}\n\
         Task:\n{task}\n\n\
         Output:\n{content}\n\n\
         Tool evidence:\n{evidence}\n\n\
         Evaluate for completeness, factual accuracy, genuine work (no \
         slop/mock/stub), and honesty (claims match tool evidence).\n\
         Answer ONLY with JSON: {{\"score\": 0-10, \"issues\": [..], \
         \"verdict\": \"APPROVE\"|\"REJECT\"}} where score 0 is clean.",
        task = crate::util::truncate(task, 1500),
        content = crate::util::truncate(content, 4000),
    );

    let options = ChatOptions {
        temperature: Some(0.1),
        max_tokens: Some(400),
        ..ChatOptions::default()
    };
    let response = llm.chat(&[LlmMessage::user(prompt)], &options).await?;

    let Some(parsed) = extract_json::<L1Verdict>(&response.content) else {
        debug!(agent_name, "L1 verdict unparseable, passing");
        return Ok(GuardVerdict {
            passed: true,
            score: 0,
            issues: vec![],
            level: "L1",
        });
    };

    let rejected = parsed.verdict.eq_ignore_ascii_case("REJECT") || parsed.score >= L1_REJECT_SCORE;
    Ok(GuardVerdict {
        passed: !rejected,
        score: parsed.score,
        issues: parsed.issues,
        level: "L1",
    })
}

/// Pull the first JSON object out of a possibly chatty model answer.
fn extract_json<T: for<'de> Deserialize<'de>>(text: &str) -> Option<T> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn no_tools() -> Vec<ToolCallRecord> {
        Vec::new()
    }

    fn write_tool() -> Vec<ToolCallRecord> {
        vec![ToolCallRecord {
            name: "code_write".into(),
            args: Value::Null,
            result_snippet: "wrote src/main.rs".into(),
        }]
    }

    #[test]
    fn empty_output_scores_ten() {
        let v = check_l0("", RoleBucket::Dev, &no_tools());
        assert!(!v.passed);
        assert_eq!(v.score, 10);
        assert_eq!(v.issues, vec!["Empty output"]);
    }

    #[test]
    fn slop_and_mock_accumulate() {
        let content = "Here is lorem ipsum filler.\n// TODO: implement the rest\n".repeat(10);
        let v = check_l0(&content, RoleBucket::Dev, &no_tools());
        assert!(!v.passed, "score={} issues={:?}", v.score, v.issues);
        assert!(v.issues.iter().any(|i| i.starts_with("SLOP")));
        assert!(v.issues.iter().any(|i| i.starts_with("MOCK")));
    }

    #[test]
    fn action_claims_need_tool_evidence() {
        let content = format!(
            "I have deployed the service to production and verified it works. {}",
            "All endpoints respond correctly with the expected payloads. ".repeat(5)
        );
        let without = check_l0(&content, RoleBucket::Devops, &no_tools());
        assert!(without.issues.iter().any(|i| i.starts_with("HALLUCINATION")));

        let with = check_l0(&content, RoleBucket::Devops, &write_tool());
        assert!(!with.issues.iter().any(|i| i.starts_with("HALLUCINATION")));
    }

    #[test]
    fn length_floor_waived_for_decisions() {
        let v = check_l0("[APPROVE] looks good", RoleBucket::Qa, &no_tools());
        assert!(!v.issues.iter().any(|i| i.starts_with("TOO_SHORT")));

        let v = check_l0("ok", RoleBucket::Qa, &no_tools());
        assert!(v.issues.iter().any(|i| i.starts_with("TOO_SHORT")));
    }

    #[test]
    fn echo_detection() {
        let quoted: String = (0..10).map(|i| format!("> task line {i}\n")).collect();
        let v = check_l0(&quoted, RoleBucket::Dev, &no_tools());
        assert!(v.issues.iter().any(|i| i.starts_with("ECHO")));
    }

    #[test]
    fn clean_output_passes() {
        let content = "Reviewed the auth module. The token refresh flow now uses \
                       the rotating key store, and the session middleware validates \
                       expiry before the cache lookup. Next step is wiring the \
                       logout endpoint into the revocation list.";
        let v = check_l0(content, RoleBucket::Dev, &no_tools());
        assert!(v.passed, "issues: {:?}", v.issues);
    }

    #[test]
    fn json_extraction_tolerates_prose() {
        let text = "Sure! Here is my verdict:\n{\"score\": 7, \"issues\": [\"stub\"], \"verdict\": \"REJECT\"}\nDone.";
        let v: L1Verdict = extract_json(text).unwrap();
        assert_eq!(v.score, 7);
        assert_eq!(v.verdict, "REJECT");
    }
}
