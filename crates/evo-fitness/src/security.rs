//! Static scan for dangerous operations in candidate code.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Disallowed operations as `(rule name, pattern)`
const RULES: &[(&str, &str)] = &[
    ("eval", r"\beval\s*\("),
    ("exec", r"\bexec\s*\("),
    ("os.system", r"\bos\.system\s*\("),
    ("os.popen", r"\bos\.popen\s*\("),
    ("os.spawn/exec", r"\bos\.(?:spawn|exec)\w*\s*\("),
    ("subprocess", r"\bsubprocess\."),
    ("__import__", r"\b__import__\s*\("),
    ("pty.spawn", r"\bpty\.spawn\s*\("),
    ("child_process", r#"require\(\s*['"]child_process['"]\s*\)"#),
];

static COMPILED: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    RULES
        .iter()
        .filter_map(|(name, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((*name, re)),
            Err(e) => {
                tracing::error!(rule = *name, error = %e, "security rule failed to compile");
                None
            }
        })
        .collect()
});

/// One matched rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityFinding {
    pub rule: &'static str,
    /// 1-based line of the first match
    pub line: usize,
}

/// Pattern scanner over source text
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityScanner;

impl SecurityScanner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Every rule that matches, with the line of its first occurrence
    #[must_use]
    pub fn scan(&self, code: &str) -> Vec<SecurityFinding> {
        COMPILED
            .iter()
            .filter_map(|(rule, re)| {
                re.find(code).map(|m| SecurityFinding {
                    rule: *rule,
                    line: code[..m.start()].matches('\n').count() + 1,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn is_safe(&self, code: &str) -> bool {
        COMPILED.iter().all(|(_, re)| !re.is_match(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rule_compiles() {
        assert_eq!(COMPILED.len(), RULES.len());
    }

    #[test]
    fn flags_dangerous_calls() {
        let scanner = SecurityScanner::new();
        for code in [
            "eval('1+1')",
            "exec (payload)",
            "import os\nos.system('rm -rf /')",
            "subprocess.run(['ls'])",
            "m = __import__('os')",
            "const cp = require('child_process')",
        ] {
            assert!(!scanner.is_safe(code), "not flagged: {code}");
        }
    }

    #[test]
    fn ignores_lookalikes() {
        let scanner = SecurityScanner::new();
        for code in [
            "def evaluate(x): return x",
            "executor.submit(job)",
            "retrieval(x)",
            "exit 0",
        ] {
            assert!(scanner.is_safe(code), "false positive: {code}");
        }
    }

    #[test]
    fn finding_reports_line() {
        let findings = SecurityScanner::new().scan("x = 1\ny = 2\nz = eval(y)\n");
        assert_eq!(findings, vec![SecurityFinding { rule: "eval", line: 3 }]);
    }
}
