use crate::vault::record::PLAIN_LANGUAGE;
use crate::vault::util::truncate_with_ellipsis;
use regex::{CaptureMatches, Regex};
use std::ops::Range;
use std::sync::LazyLock;

const MAX_CONTEXT_CHARS: usize = 280;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+#-]*)[^\n`]*\n(.*?)```").expect("valid fence regex")
});

/// A fenced code region found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Byte span of the whole fence, delimiters included.
    pub span: Range<usize>,
    pub language: String,
    /// Trimmed fence body.
    pub payload: String,
    pub context: String,
}

/// Lazy scan over the fences of one document, in source order.
pub struct Fragments<'a> {
    content: &'a str,
    matches: CaptureMatches<'static, 'a>,
    context_lines: usize,
}

pub fn fragments(content: &str, context_lines: usize) -> Fragments<'_> {
    Fragments {
        content,
        matches: CODE_FENCE.captures_iter(content),
        context_lines,
    }
}

impl<'a> Iterator for Fragments<'a> {
    type Item = Fragment;

    fn next(&mut self) -> Option<Self::Item> {
        let caps = self.matches.next()?;
        let whole = caps.get(0)?;
        let language = caps
            .get(1)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(PLAIN_LANGUAGE)
            .to_string();
        let payload = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        Some(Fragment {
            span: whole.range(),
            language,
            payload,
            context: leading_context(self.content, whole.start(), self.context_lines),
        })
    }
}

fn leading_context(content: &str, start: usize, max_lines: usize) -> String {
    if max_lines == 0 {
        return String::new();
    }
    let before = &content[..start];
    let mut lines: Vec<&str> = before
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(max_lines)
        .collect();
    lines.reverse();
    truncate_with_ellipsis(&lines.join("\n"), MAX_CONTEXT_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_fences_in_source_order() {
        let doc = "# Title\nSome setup:\n```python\nprint(1)\n```\n\nThen:\n```\nls\n```\n";
        let found: Vec<Fragment> = fragments(doc, 3).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].language, "python");
        assert_eq!(found[0].payload, "print(1)");
        assert_eq!(found[0].context, "# Title\nSome setup:");
        assert_eq!(&doc[found[0].span.clone()], "```python\nprint(1)\n```");
        assert_eq!(found[1].language, "plain");
        assert_eq!(found[1].payload, "ls");
        assert!(found[0].span.end <= found[1].span.start);
    }

    #[test]
    fn info_string_after_language_is_ignored() {
        let doc = "```rust title=\"main.rs\"\nfn main() {}\n```";
        let found: Vec<Fragment> = fragments(doc, 3).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].language, "rust");
        assert_eq!(found[0].payload, "fn main() {}");
    }

    #[test]
    fn whitespace_only_fence_has_empty_payload() {
        let doc = "```bash\n   \n```";
        let found: Vec<Fragment> = fragments(doc, 3).collect();
        assert_eq!(found.len(), 1);
        assert!(found[0].payload.is_empty());
    }

    #[test]
    fn document_without_fences_yields_nothing() {
        assert_eq!(fragments("plain text\n`inline` only", 3).count(), 0);
    }
}
