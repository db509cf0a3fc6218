//! Prompt construction for AI-generated commit messages.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::commit::diff::{ChangeHunk, DiffBundle};
use crate::error::PromptError;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid")
});

const TRUNCATION_NOTE: &str =
    "Note: some file diffs were truncated due to size. Focus on the visible changes.\n\n";

/// Voice of the generated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tone {
    #[default]
    Neutral,
    /// Summary line only, or a very short body.
    Concise,
    /// Full explanatory body.
    Detailed,
}

/// Style hints rendered into the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOptions {
    pub max_subject_length: usize,
    pub target_language: String,
    /// How many alternative messages to ask for.
    pub candidate_count: usize,
    pub tone: Tone,
    /// Ask for Conventional Commits prefixes (`feat:`, `fix:` ...).
    pub conventional: bool,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            max_subject_length: 72,
            target_language: "English".to_string(),
            candidate_count: 3,
            tone: Tone::default(),
            conventional: false,
        }
    }
}

/// A rendered prompt and the style that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSpec {
    pub text: String,
    pub style: StyleOptions,
    /// Files whose diff made it into the prompt.
    pub files_included: usize,
    /// Files dropped to respect the character budget.
    pub files_omitted: usize,
}

/// Renders a [`DiffBundle`] into a [`PromptSpec`] within a character budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_prompt_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_prompt_chars: usize) -> Self {
        Self { max_prompt_chars }
    }

    /// Build the prompt.
    ///
    /// The instruction and style text is always kept whole; file diffs are
    /// added in bundle order until the next one would overflow the budget,
    /// and that file plus every later one is dropped.
    pub fn build(
        &self,
        bundle: &DiffBundle,
        style: &StyleOptions,
    ) -> Result<PromptSpec, PromptError> {
        let header = render_header(bundle, style);
        let footer = render_footer(style);
        let fixed = char_len(&header) + char_len(&footer);

        if fixed > self.max_prompt_chars {
            return Err(PromptError::BudgetTooSmall {
                required: fixed,
                budget: self.max_prompt_chars,
            });
        }

        let available = self.max_prompt_chars - fixed;
        let (content, files_included) = render_changes(bundle, available);

        let text = format!("{header}{content}{footer}");
        debug_assert!(char_len(&text) <= self.max_prompt_chars);

        Ok(PromptSpec {
            text,
            style: style.clone(),
            files_included,
            files_omitted: bundle.file_count() - files_included,
        })
    }
}

fn render_header(bundle: &DiffBundle, style: &StyleOptions) -> String {
    let conventional_rule = if style.conventional {
        "- Prefix the summary with a Conventional Commits type: feat, fix, docs, style, refactor, perf, test, build, ci or chore (e.g. `fix: handle empty input`)\n"
    } else {
        ""
    };
    let tone_rule = match style.tone {
        Tone::Neutral => "",
        Tone::Concise => "- Keep it short: a summary line and at most two bullet points\n",
        Tone::Detailed => "- Be thorough: explain the motivation and every notable change in the body\n",
    };

    format!(
        r#"Given the following code changes, generate a Git commit message following these guidelines:

1. Start with a short ({max} chars or less) summary line in imperative mood ("Add", "Fix", "Update")
2. Leave one blank line after the summary
3. Use bullet points (with "- ") for listing multiple changes, wrapped at 72 characters
{conventional_rule}{tone_rule}
Reference format:
```
Add CPU arch filter scheduler support

- Implement new filtering mechanism for CPU architectures
- Add configuration options for arch-based scheduling
- Update documentation with new filter details
```

## Changes ({files} files, {additions} additions, {deletions} deletions)

"#,
        max = style.max_subject_length,
        files = bundle.file_count(),
        additions = bundle.additions(),
        deletions = bundle.deletions(),
    )
}

fn render_footer(style: &StyleOptions) -> String {
    let count = style.candidate_count.max(1);
    let output_rule = if count == 1 {
        "Respond with exactly one commit message as item \"1.\" of a numbered list.".to_string()
    } else {
        format!(
            "Respond with {count} alternative commit messages as a numbered list (\"1.\", \"2.\", ...), best first."
        )
    };

    format!(
        "## Output\n\
         {output_rule}\n\
         Each item starts with its summary line; put the body on the following lines.\n\
         Write the messages in {language}.\n\
         Do not add any text before the first item or after the last one.\n",
        language = style.target_language,
    )
}

/// Render file sections into at most `available` characters.
///
/// Returns the rendered text and the number of files it contains.
fn render_changes(bundle: &DiffBundle, available: usize) -> (String, usize) {
    let mut budget = available;
    let mut out = String::new();

    if bundle.truncated && char_len(TRUNCATION_NOTE) <= budget {
        out.push_str(TRUNCATION_NOTE);
        budget -= char_len(TRUNCATION_NOTE);
    }

    let mut sections: Vec<String> = Vec::new();
    let mut used = 0;
    for hunk in &bundle.hunks {
        let section = render_hunk(hunk);
        let len = char_len(&section);
        if used + len > budget {
            break;
        }
        used += len;
        sections.push(section);
    }

    let total = bundle.hunks.len();

    // Never send an empty diff: fall back to the head of the first file.
    if sections.is_empty()
        && let Some(first) = bundle.hunks.first()
    {
        let note_len = match total - 1 {
            0 => 0,
            rest => char_len(&omission_note(rest)),
        };
        if let Some(partial) = budget
            .checked_sub(note_len)
            .and_then(|room| render_partial_hunk(first, room))
        {
            used += char_len(&partial);
            sections.push(partial);
        }
    }

    let mut omission = String::new();
    while sections.len() < total {
        omission = omission_note(total - sections.len());
        if used + char_len(&omission) <= budget {
            break;
        }
        match sections.pop() {
            Some(dropped) => used -= char_len(&dropped),
            None => {
                omission.clear();
                break;
            }
        }
    }

    let included = sections.len();
    for section in sections {
        out.push_str(&section);
    }
    out.push_str(&omission);

    (out, included)
}

fn render_hunk(hunk: &ChangeHunk) -> String {
    if hunk.binary {
        let mut section = section_title(hunk);
        section.push_str(", binary file, content omitted)\n\n");
        return section;
    }

    let mut body = sanitize_diff(&hunk.body);
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }
    fenced_section(hunk, hunk.truncated, &body)
}

/// Render the leading complete lines of `hunk` that fit in `max_chars`.
///
/// Returns `None` when not even one line fits.
fn render_partial_hunk(hunk: &ChangeHunk, max_chars: usize) -> Option<String> {
    if hunk.binary {
        let section = render_hunk(hunk);
        return (char_len(&section) <= max_chars).then_some(section);
    }

    let room = max_chars.checked_sub(char_len(&fenced_section(hunk, true, "")))?;
    let body = sanitize_diff(&hunk.body);

    let mut kept = String::new();
    let mut kept_chars = 0;
    for line in body.split_inclusive('\n') {
        let len = char_len(line) + usize::from(!line.ends_with('\n'));
        if kept_chars + len > room {
            break;
        }
        kept.push_str(line);
        if !line.ends_with('\n') {
            kept.push('\n');
        }
        kept_chars += len;
    }

    (!kept.is_empty()).then(|| fenced_section(hunk, true, &kept))
}

/// `### path (Kind[ from old]`, without the closing parenthesis.
fn section_title(hunk: &ChangeHunk) -> String {
    let mut title = String::new();
    let _ = write!(title, "### {} ({}", hunk.path, hunk.kind);
    if let Some(old) = &hunk.old_path {
        let _ = write!(title, " from {old}");
    }
    title
}

fn fenced_section(hunk: &ChangeHunk, truncated: bool, body: &str) -> String {
    let mut section = section_title(hunk);
    if truncated {
        section.push_str(", truncated");
    }
    section.push_str(")\n```diff\n");
    section.push_str(body);
    section.push_str("```\n\n");
    section
}

fn omission_note(count: usize) -> String {
    format!("({count} more file(s) omitted to fit the prompt size limit)\n\n")
}

/// Sanitize diff text for inclusion in an LLM prompt.
///
/// Removes ANSI escape sequences and control characters other than
/// newlines and tabs.
pub fn sanitize_diff(text: &str) -> String {
    let without_ansi = ANSI_ESCAPE.replace_all(text, "");
    without_ansi
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::diff::{ChangeKind, Scope};

    fn hunk(path: &str, kind: ChangeKind, body: &str) -> ChangeHunk {
        ChangeHunk {
            path: path.to_string(),
            old_path: None,
            kind,
            body: body.to_string(),
            binary: false,
            truncated: false,
            additions: 1,
            deletions: 0,
        }
    }

    fn bundle(hunks: Vec<ChangeHunk>) -> DiffBundle {
        DiffBundle::from_hunks(Scope::All, hunks, usize::MAX)
    }

    #[test]
    fn test_build_includes_files_and_diff() {
        let diff = bundle(vec![
            hunk("src/auth/login.rs", ChangeKind::Modified, "+new line\n-old line\n"),
            hunk("src/auth/session.rs", ChangeKind::Added, "+pub fn new_function() {}\n"),
        ]);

        let prompt = PromptBuilder::new(40_000)
            .build(&diff, &StyleOptions::default())
            .unwrap();

        assert!(prompt.text.contains("### src/auth/login.rs (Modified)"));
        assert!(prompt.text.contains("### src/auth/session.rs (Added)"));
        assert!(prompt.text.contains("pub fn new_function()"));
        assert_eq!(prompt.files_included, 2);
        assert_eq!(prompt.files_omitted, 0);
    }

    #[test]
    fn test_build_renders_style_hints() {
        let diff = bundle(vec![hunk("f.rs", ChangeKind::Added, "+code\n")]);
        let style = StyleOptions {
            max_subject_length: 50,
            target_language: "German".to_string(),
            candidate_count: 4,
            tone: Tone::Concise,
            conventional: true,
        };

        let prompt = PromptBuilder::new(40_000).build(&diff, &style).unwrap();

        assert!(prompt.text.contains("(50 chars or less)"));
        assert!(prompt.text.contains("imperative mood"));
        assert!(prompt.text.contains("in German"));
        assert!(prompt.text.contains("4 alternative commit messages"));
        assert!(prompt.text.contains("Conventional Commits"));
        assert!(prompt.text.contains("Keep it short"));
        assert_eq!(prompt.style, style);
    }

    #[test]
    fn test_build_binary_file_has_no_body() {
        let mut image = hunk("logo.png", ChangeKind::Added, "");
        image.binary = true;
        let diff = bundle(vec![image]);

        let prompt = PromptBuilder::new(40_000)
            .build(&diff, &StyleOptions::default())
            .unwrap();
        assert!(prompt.text.contains("### logo.png (Added, binary file, content omitted)"));
        assert!(!prompt.text.contains("```diff"));
    }

    #[test]
    fn test_build_rename_mentions_old_path() {
        let mut renamed = hunk("src/new.rs", ChangeKind::Renamed, "");
        renamed.old_path = Some("src/old.rs".to_string());
        let prompt = PromptBuilder::new(40_000)
            .build(&bundle(vec![renamed]), &StyleOptions::default())
            .unwrap();
        assert!(prompt.text.contains("### src/new.rs (Renamed from src/old.rs)"));
    }

    #[test]
    fn test_build_truncation_note() {
        let diff = DiffBundle::from_hunks(
            Scope::All,
            vec![hunk("big.rs", ChangeKind::Modified, &"+x\n".repeat(100))],
            30,
        );
        assert!(diff.truncated);

        let prompt = PromptBuilder::new(40_000)
            .build(&diff, &StyleOptions::default())
            .unwrap();
        assert!(prompt.text.contains("truncated due to size"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let diff = bundle(vec![
            hunk("a.rs", ChangeKind::Modified, &"+a\n".repeat(50)),
            hunk("b.rs", ChangeKind::Deleted, &"-b\n".repeat(50)),
        ]);
        let builder = PromptBuilder::new(2_000);
        let style = StyleOptions::default();

        let first = builder.build(&diff, &style).unwrap();
        let second = builder.build(&diff, &style).unwrap();
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn test_build_drops_whole_files_from_tail() {
        let diff = bundle(vec![
            hunk("first.rs", ChangeKind::Modified, &"+first\n".repeat(20)),
            hunk("second.rs", ChangeKind::Modified, &"+second\n".repeat(400)),
            hunk("third.rs", ChangeKind::Modified, &"+third\n".repeat(2)),
        ]);

        let prompt = PromptBuilder::new(2_000)
            .build(&diff, &StyleOptions::default())
            .unwrap();

        assert!(prompt.text.chars().count() <= 2_000);
        assert!(prompt.text.contains("### first.rs"));
        assert!(!prompt.text.contains("### second.rs"));
        // Files after the first dropped one are dropped too.
        assert!(!prompt.text.contains("### third.rs"));
        assert!(prompt.text.contains("2 more file(s) omitted"));
        assert_eq!(prompt.files_included, 1);
        assert_eq!(prompt.files_omitted, 2);
    }

    #[test]
    fn test_build_keeps_head_of_oversized_first_file() {
        let diff = bundle(vec![
            hunk("big.rs", ChangeKind::Modified, &"+big line of code\n".repeat(400)),
            hunk("small.rs", ChangeKind::Modified, "+small\n"),
        ]);

        let prompt = PromptBuilder::new(2_000)
            .build(&diff, &StyleOptions::default())
            .unwrap();

        assert!(prompt.text.chars().count() <= 2_000);
        assert!(prompt.text.contains("### big.rs (Modified, truncated)"));
        assert!(prompt.text.contains("+big line of code\n"));
        assert!(!prompt.text.contains("### small.rs"));
        assert!(prompt.text.contains("1 more file(s) omitted"));
        assert_eq!(prompt.files_included, 1);
        assert_eq!(prompt.files_omitted, 1);

        // The kept part ends on a complete line before the closing fence.
        let diff_start = prompt.text.find("```diff\n").unwrap() + "```diff\n".len();
        let diff_end = diff_start + prompt.text[diff_start..].find("```").unwrap();
        assert!(
            prompt.text[diff_start..diff_end]
                .lines()
                .all(|l| l == "+big line of code")
        );
    }

    #[test]
    fn test_build_single_oversized_file_is_not_dropped() {
        let diff = bundle(vec![hunk(
            "only.rs",
            ChangeKind::Added,
            &"+fn generated() {}\n".repeat(400),
        )]);

        let prompt = PromptBuilder::new(2_000)
            .build(&diff, &StyleOptions::default())
            .unwrap();

        assert!(prompt.text.chars().count() <= 2_000);
        assert!(prompt.text.contains("+fn generated() {}"));
        assert!(!prompt.text.contains("omitted to fit"));
        assert_eq!(prompt.files_included, 1);
        assert_eq!(prompt.files_omitted, 0);
    }

    #[test]
    fn test_build_never_exceeds_budget() {
        for lines in [0, 1, 10, 100, 1_000, 5_000] {
            let diff = bundle(vec![
                hunk("a.rs", ChangeKind::Modified, &"+ünïcødé line\n".repeat(lines)),
                hunk("b.rs", ChangeKind::Added, &"+plain\n".repeat(lines / 2)),
            ]);
            for budget in [1_500, 3_000, 10_000] {
                let prompt = PromptBuilder::new(budget)
                    .build(&diff, &StyleOptions::default())
                    .unwrap();
                assert!(
                    prompt.text.chars().count() <= budget,
                    "{lines} lines, budget {budget}"
                );
                // Instructions are never trimmed.
                assert!(prompt.text.contains("## Output"));
            }
        }
    }

    #[test]
    fn test_build_budget_too_small() {
        let diff = bundle(vec![hunk("f.rs", ChangeKind::Added, "+code\n")]);
        let result = PromptBuilder::new(100).build(&diff, &StyleOptions::default());
        assert!(matches!(
            result,
            Err(PromptError::BudgetTooSmall { budget: 100, .. })
        ));
    }

    #[test]
    fn test_sanitize_diff_removes_ansi() {
        let text = "\x1b[31m-old line\x1b[0m\n\x1b[32m+new line\x1b[0m\n";
        let sanitized = sanitize_diff(text);
        assert!(!sanitized.contains('\x1b'));
        assert!(sanitized.contains("-old line"));
        assert!(sanitized.contains("+new line"));
    }

    #[test]
    fn test_sanitize_diff_keeps_tabs_and_newlines() {
        let text = "+\tindented\u{0007}\n";
        assert_eq!(sanitize_diff(text), "+\tindented\n");
    }
}
