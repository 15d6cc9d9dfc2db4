//! Text utilities shared by providers.

/// One paragraph of source text. `indent + content + separator` over all
/// paragraphs reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphSplit<'a> {
    pub indent: String,
    pub content: &'a str,
    pub separator: &'a str,
}

/// Splits text into paragraphs, one per non-blank line.
///
/// Leading blank lines fold into the first paragraph's indent. Trailing
/// whitespace of a line, its newline and any blank lines after it form the
/// separator. Whitespace-only input yields no paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<ParagraphSplit<'_>> {
    let mut paragraphs: Vec<ParagraphSplit<'_>> = Vec::new();
    let mut leading = String::new();
    // Byte offset where the current separator starts, if a paragraph is open.
    let mut separator_start: Option<usize> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        if line.trim().is_empty() {
            if separator_start.is_none() {
                leading.push_str(line);
            }
            continue;
        }

        if let (Some(start), Some(last)) = (separator_start, paragraphs.last_mut()) {
            last.separator = &text[start..line_start];
        }

        let body_start = line.len() - line.trim_start().len();
        let body_end = line.trim_end().len();
        let mut indent = std::mem::take(&mut leading);
        indent.push_str(&line[..body_start]);
        paragraphs.push(ParagraphSplit {
            indent,
            content: &line[body_start..body_end],
            separator: "",
        });
        separator_start = Some(line_start + body_end);
    }

    if let (Some(start), Some(last)) = (separator_start, paragraphs.last_mut()) {
        last.separator = &text[start..];
    }
    paragraphs
}

/// CJK unified ideographs, extensions A through I.
pub fn is_cjk_ideograph(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2CEAF
        | 0x2CEB0..=0x2EBEF
        | 0x30000..=0x323AF)
}

/// Segments without any CJK ideograph get no pinyin or gloss.
pub fn should_skip_segment(segment: &str) -> bool {
    !segment.chars().any(is_cjk_ideograph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(parts: &[ParagraphSplit<'_>]) -> String {
        parts
            .iter()
            .map(|p| format!("{}{}{}", p.indent, p.content, p.separator))
            .collect()
    }

    #[test]
    fn test_single_line() {
        let parts = split_paragraphs("你好，世界。");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content, "你好，世界。");
        assert_eq!(parts[0].indent, "");
        assert_eq!(parts[0].separator, "");
    }

    #[test]
    fn test_indent_and_separators() {
        let text = "\n\n\u{3000}\u{3000}第一段。  \n\n \n  第二段。\n";
        let parts = split_paragraphs(text);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].indent, "\n\n\u{3000}\u{3000}");
        assert_eq!(parts[0].content, "第一段。");
        assert_eq!(parts[0].separator, "  \n\n \n");
        assert_eq!(parts[1].indent, "  ");
        assert_eq!(parts[1].separator, "\n");
        assert_eq!(rebuild(&parts), text);
    }

    #[test]
    fn test_crlf_is_preserved() {
        let text = "一\r\n二\r\n";
        let parts = split_paragraphs(text);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].separator, "\r\n");
        assert_eq!(rebuild(&parts), text);
    }

    #[test]
    fn test_blank_input() {
        assert!(split_paragraphs("").is_empty());
        assert!(split_paragraphs(" \n\t\n").is_empty());
    }

    #[test]
    fn test_should_skip_segment() {
        assert!(should_skip_segment("，。"));
        assert!(should_skip_segment("2024 OK"));
        assert!(!should_skip_segment("，世界。"));
        assert!(!should_skip_segment("\u{20000}"));
    }
}
