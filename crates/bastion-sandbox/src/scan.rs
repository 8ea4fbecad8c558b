//! Static pre-execution scan.
//!
//! Rejects source text containing call shapes that could reach outside
//! the script namespace. Runs before any isolate is involved, so a
//! rejected request costs nothing but the regex pass.

use regex::Regex;

use crate::config::Restrictions;
use crate::error::Result;
use crate::types::{SandboxViolation, SandboxViolationKind};

/// Always denied.
const BASE_RULES: &[(&str, &str)] = &[
    (r"\brequire\s*\(", "module loading via require()"),
    (r"\bimport\b", "module import"),
    (r"\bchild_process\b", "child_process reference"),
    (r"\bprocess\b", "process object reference"),
    (r"\bglobal(?:This)?\b", "global object reference"),
    (r"\bwindow\b", "window object reference"),
    (r"\b(?:Deno|Bun)\b", "host runtime reference"),
    (r"__proto__", "prototype mutation via __proto__"),
    (r"\bconstructor\b", "constructor-based escape"),
    (r"\bprototype\b", "prototype access"),
];

/// Denied while `eval_disabled`.
const EVAL_RULES: &[(&str, &str)] = &[
    (r"\beval\s*\(", "dynamic evaluation via eval()"),
    (
        r#"\bset(?:Timeout|Interval|Immediate)\s*\(\s*['"`]"#,
        "string-bodied timer",
    ),
];

/// Denied while `dynamic_construction_disabled`.
const CONSTRUCTION_RULES: &[(&str, &str)] = &[(
    r"\bFunction\s*\(",
    "dynamic function construction",
)];

/// Compiled deny-list for one restriction set.
#[derive(Debug, Clone)]
pub struct CodeScanner {
    rules: Vec<(Regex, &'static str)>,
}

impl CodeScanner {
    pub fn new(restrictions: &Restrictions) -> Result<Self> {
        let mut tables = vec![BASE_RULES];
        if restrictions.eval_disabled {
            tables.push(EVAL_RULES);
        }
        if restrictions.dynamic_construction_disabled {
            tables.push(CONSTRUCTION_RULES);
        }
        let rules = tables
            .into_iter()
            .flatten()
            .map(|(pattern, description)| Ok((Regex::new(pattern)?, *description)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// One [`SandboxViolationKind::DeniedPattern`] per matching rule.
    pub fn scan(&self, code: &str) -> Vec<SandboxViolation> {
        self.rules
            .iter()
            .filter(|(re, _)| re.is_match(code))
            .map(|(_, description)| {
                SandboxViolation::new(
                    SandboxViolationKind::DeniedPattern,
                    format!("denied pattern: {}", description),
                )
            })
            .collect()
    }
}
