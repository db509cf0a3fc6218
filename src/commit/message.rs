//! Commit message candidates: parsing model output, formatting, and lint.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::debug;

use crate::error::ParseError;

/// Unindented `1. Subject` or `2) Subject`, capturing the number and the rest of the line.
static NUMBERED_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\*\*)?(\d{1,2})[.)](?:\*\*)?(?:\s+(.*))?$")
        .expect("numbered item pattern is valid")
});

static CONVENTIONAL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(feat|fix|docs|style|refactor|perf|test|build|ci|chore|revert)(\([^)]+\))?!?: \S")
        .expect("conventional prefix pattern is valid")
});

const SUBJECT_LABELS: &[&str] = &["subject:", "summary:", "commit message:", "title:"];

const COMMON_VERBS: &[&str] = &[
    "add", "allow", "avoid", "bump", "change", "clean", "document", "drop", "enable", "disable",
    "ensure", "extract", "fix", "handle", "implement", "improve", "introduce", "make", "merge",
    "move", "optimize", "prevent", "refactor", "release", "remove", "rename", "replace", "revert",
    "simplify", "support", "test", "update", "upgrade", "use",
];

/// Wrap limit for body lines.
pub const BODY_LINE_LIMIT: usize = 72;

/// A proposed commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub subject: String,
    pub body: Option<String>,
    /// Position the model gave this message; lower is better.
    pub rank: usize,
}

impl Candidate {
    /// Format the candidate as a git commit message.
    ///
    /// Produces:
    /// ```text
    /// Subject line
    ///
    /// Body text.
    /// ```
    pub fn format(&self) -> String {
        match &self.body {
            Some(body) if !body.trim().is_empty() => format!("{}\n\n{}", self.subject, body.trim()),
            _ => self.subject.clone(),
        }
    }

    /// Format with a `Co-authored-by` trailer for `email`.
    pub fn format_with_co_author(&self, email: &str) -> String {
        let name = email.split('@').next().filter(|n| !n.is_empty()).unwrap_or(email);
        format!("{}\n\nCo-authored-by: {name} <{email}>", self.format())
    }
}

/// Splits raw model output into validated, ranked [`Candidate`]s.
#[derive(Debug, Clone)]
pub struct CandidateParser {
    max_subject_length: usize,
}

impl CandidateParser {
    pub fn new(max_subject_length: usize) -> Self {
        Self { max_subject_length }
    }

    /// Parse the model response.
    ///
    /// Recognizes numbered lists and `---`-separated blocks; any other text
    /// is one candidate. Never returns an empty list.
    pub fn parse(&self, raw: &str) -> Result<Vec<Candidate>, ParseError> {
        let text = strip_code_fences(raw);
        let items = split_items(&text);
        let total = items.len();

        let mut candidates: Vec<Candidate> = items
            .into_iter()
            .filter_map(|(rank, item)| self.validate(rank, &item))
            .collect();

        let dropped = total - candidates.len();
        if dropped > 0 {
            debug!(dropped, kept = candidates.len(), "Dropped unusable candidates");
        }

        if candidates.is_empty() {
            return Err(ParseError::EmptyGeneration { dropped });
        }

        candidates.sort_by_key(|c| c.rank);
        Ok(candidates)
    }

    fn validate(&self, rank: usize, item: &str) -> Option<Candidate> {
        let mut lines = item.lines().skip_while(|l| l.trim().is_empty());
        let subject = clean_subject(lines.next()?);
        if subject.is_empty() {
            return None;
        }

        let subject = truncate_at_word(&subject, self.max_subject_length)?;
        let rest: Vec<&str> = lines.collect();
        let body = dedent(&rest);

        Some(Candidate {
            subject,
            body: (!body.is_empty()).then_some(body),
            rank,
        })
    }
}

/// Remove markdown fence lines, keeping their content.
fn strip_code_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split text into `(rank, item)` pairs.
fn split_items(text: &str) -> Vec<(usize, String)> {
    let lines: Vec<&str> = text.lines().collect();

    if let Some(start) = numbered_list_start(&lines) {
        let mut items: Vec<(usize, String)> = Vec::new();
        for line in &lines[start..] {
            if let Some(caps) = NUMBERED_ITEM.captures(line) {
                let rank = caps[1].parse().unwrap_or(usize::MAX);
                let first = caps.get(2).map_or("", |m| m.as_str());
                items.push((rank, first.to_string()));
            } else if let Some((_, current)) = items.last_mut() {
                current.push('\n');
                current.push_str(line);
            }
        }
        return items;
    }

    if text.lines().any(|l| l.trim() == "---") {
        let mut blocks = vec![String::new()];
        for line in text.lines() {
            if line.trim() == "---" {
                blocks.push(String::new());
            } else if let Some(current) = blocks.last_mut() {
                current.push_str(line);
                current.push('\n');
            }
        }
        return blocks
            .into_iter()
            .filter(|b| !b.trim().is_empty())
            .enumerate()
            .map(|(idx, b)| (idx + 1, b))
            .collect();
    }

    vec![(1, text.to_string())]
}

/// Index of the line opening a list of alternatives, if the reply is one.
///
/// The list must start at item 1, preceded by nothing or by a single
/// introduction line ending in `:` ("Here are three options:"). Anything
/// else means the numbers belong to the body of a single message.
fn numbered_list_start(lines: &[&str]) -> Option<usize> {
    let start = lines.iter().position(|l| NUMBERED_ITEM.is_match(l))?;
    let caps = NUMBERED_ITEM.captures(lines[start])?;
    if &caps[1] != "1" {
        return None;
    }

    let mut preamble = lines[..start].iter().map(|l| l.trim()).filter(|l| !l.is_empty());
    match (preamble.next(), preamble.next()) {
        (None, _) => Some(start),
        (Some(intro), None) if intro.ends_with(':') => Some(start),
        _ => None,
    }
}

fn clean_subject(line: &str) -> String {
    let mut subject = line.trim();

    for label in SUBJECT_LABELS {
        if subject
            .get(..label.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(label))
        {
            subject = subject[label.len()..].trim_start();
            break;
        }
    }

    for wrapper in ["**", "`", "\"", "'"] {
        if subject.len() >= 2 * wrapper.len()
            && subject.starts_with(wrapper)
            && subject.ends_with(wrapper)
        {
            subject = subject[wrapper.len()..subject.len() - wrapper.len()].trim();
        }
    }

    subject.to_string()
}

/// Cut `subject` to at most `max` characters at a word boundary.
///
/// Returns `None` when the first word alone is longer than `max`.
fn truncate_at_word(subject: &str, max: usize) -> Option<String> {
    if subject.chars().count() <= max {
        return Some(subject.to_string());
    }

    let cut = subject
        .char_indices()
        .nth(max)
        .map_or(subject.len(), |(idx, _)| idx);
    let (head, tail) = subject.split_at(cut);

    let kept = if tail.starts_with(char::is_whitespace) {
        head
    } else {
        &head[..head.rfind(char::is_whitespace)?]
    };

    let kept = kept.trim_end();
    (!kept.is_empty()).then(|| kept.to_string())
}

/// Trim the body block and remove the indentation shared by its lines.
fn dedent(lines: &[&str]) -> String {
    // Counted in chars: indentation may mix ASCII and Unicode spaces.
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let body: Vec<&str> = lines
        .iter()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                let cut = l.char_indices().nth(indent).map_or(l.len(), |(idx, _)| idx);
                l[cut..].trim_end()
            }
        })
        .collect();

    body.join("\n").trim().to_string()
}

/// A formatting problem in a commit message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintIssue {
    SubjectTooLong { length: usize, max: usize },
    NotImperative { first_word: String },
    MissingBlankLine,
    BodyLineTooLong { line: usize, length: usize },
    BulletWithoutSpace { line: usize },
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintIssue::SubjectTooLong { length, max } => {
                write!(f, "summary line is {length} characters (max {max})")
            }
            LintIssue::NotImperative { first_word } => {
                write!(f, "summary should start with an imperative verb, not '{first_word}'")
            }
            LintIssue::MissingBlankLine => write!(f, "summary must be followed by a blank line"),
            LintIssue::BodyLineTooLong { line, length } => write!(
                f,
                "line {line} is {length} characters (wrap at {BODY_LINE_LIMIT})"
            ),
            LintIssue::BulletWithoutSpace { line } => {
                write!(f, "line {line}: bullet points need a space after '-'")
            }
        }
    }
}

/// Check a formatted commit message against the usual git conventions.
///
/// Advisory only; merge commits skip the body checks.
pub fn lint(message: &str, max_subject_length: usize) -> Vec<LintIssue> {
    let mut issues = Vec::new();
    let lines: Vec<&str> = message.lines().collect();
    let Some(summary) = lines.first().map(|l| l.trim()) else {
        return issues;
    };

    let length = summary.chars().count();
    if length > max_subject_length {
        issues.push(LintIssue::SubjectTooLong {
            length,
            max: max_subject_length,
        });
    }

    let first_word = summary
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    let imperative = CONVENTIONAL_PREFIX.is_match(summary)
        || COMMON_VERBS.iter().any(|verb| first_word.starts_with(verb));
    if !imperative {
        issues.push(LintIssue::NotImperative { first_word });
    }

    if summary.to_lowercase().starts_with("merge") {
        return issues;
    }

    if lines.len() > 1 && !lines[1].trim().is_empty() {
        issues.push(LintIssue::MissingBlankLine);
    }

    for (idx, line) in lines.iter().enumerate().skip(2) {
        let line = line.trim();
        let length = line.chars().count();
        if length > BODY_LINE_LIMIT {
            issues.push(LintIssue::BodyLineTooLong {
                line: idx + 1,
                length,
            });
        }
        if line.starts_with('-') && !line.starts_with("- ") && line != "-" {
            issues.push(LintIssue::BulletWithoutSpace { line: idx + 1 });
        }
    }

    issues
}
