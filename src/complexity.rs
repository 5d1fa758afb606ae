//! Task classification feeding the Routing Context's `taskKind` and
//! `complexity` fields.
//!
//! Regex-based pattern classification, generalized from the teacher's
//! activation-signal classifier to full task-kind/complexity inference.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// The kind of task a request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Code,
    Analysis,
    Security,
    Refactor,
    General,
    Simple,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Code => "code",
            Self::Analysis => "analysis",
            Self::Security => "security",
            Self::Refactor => "refactor",
            Self::General => "general",
            Self::Simple => "simple",
        };
        write!(f, "{s}")
    }
}

/// Coarse estimate of how hard a request is to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Whether a request touches a single file or spans multiple files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePattern {
    Single,
    Multi,
}

struct ClassifierPatterns {
    security: Regex,
    refactor: Regex,
    code: Regex,
    analysis: Regex,
    multi_file: Regex,
    exhaustive: Regex,
    simple: Regex,
}

static PATTERNS: LazyLock<ClassifierPatterns> = LazyLock::new(|| ClassifierPatterns {
    security: Regex::new(r"(?i)(security|vulnerab|exploit|injection|auth(entication|orization)?|cve|sanitiz|xss|csrf)").unwrap(),
    refactor: Regex::new(r"(?i)(refactor|restructure|clean\s*up|reorganiz|extract\s+(method|function|module))").unwrap(),
    code: Regex::new(r"(?i)(implement|write\s+(a\s+)?function|add\s+a\s+method|fix\s+(the\s+)?bug|generate\s+code)").unwrap(),
    analysis: Regex::new(r"(?i)(analy[sz]e|explain|what\s+does|how\s+does|review\s+this|understand)").unwrap(),
    multi_file: Regex::new(r"(?i)(across\s+(the\s+)?(files|codebase|project)|multiple\s+files|every\s+file|all\s+files)").unwrap(),
    exhaustive: Regex::new(r"(?i)(exhaustive|comprehensive|thorough|deep\s+dive|entire\s+codebase|architecture)").unwrap(),
    simple: Regex::new(r"(?i)^(what\s+is|define|list|show\s+me)\b").unwrap(),
});

/// Classifies a request's `taskKind`, `complexity`, and `filePattern` from
/// its prompt text and the number of files in context.
pub struct TaskClassifier;

impl TaskClassifier {
    /// Classify task kind. Rules are evaluated in order, first match wins,
    /// falling back to `General`.
    pub fn classify_kind(prompt: &str) -> TaskKind {
        if PATTERNS.simple.is_match(prompt) && prompt.len() < 120 {
            TaskKind::Simple
        } else if PATTERNS.security.is_match(prompt) {
            TaskKind::Security
        } else if PATTERNS.refactor.is_match(prompt) {
            TaskKind::Refactor
        } else if PATTERNS.code.is_match(prompt) {
            TaskKind::Code
        } else if PATTERNS.analysis.is_match(prompt) {
            TaskKind::Analysis
        } else {
            TaskKind::General
        }
    }

    /// Classify complexity from prompt content and input size.
    pub fn classify_complexity(prompt: &str, input_chars: usize) -> Complexity {
        if PATTERNS.exhaustive.is_match(prompt) || input_chars > 50_000 {
            Complexity::High
        } else if PATTERNS.multi_file.is_match(prompt) || input_chars > 8_000 {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }

    /// Classify file pattern from the number of files referenced in context.
    pub fn classify_file_pattern(file_count: usize) -> FilePattern {
        if file_count > 1 {
            FilePattern::Multi
        } else {
            FilePattern::Single
        }
    }
}
