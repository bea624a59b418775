/// Terminal columns taken by a single character. East Asian wide ranges and
/// emoji take two; everything else one.
fn char_width(c: char) -> usize {
    match c {
        '\u{1100}'..='\u{115F}'
        | '\u{2E80}'..='\u{303E}'
        | '\u{3041}'..='\u{33FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{A000}'..='\u{A4CF}'
        | '\u{AC00}'..='\u{D7A3}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{FE30}'..='\u{FE4F}'
        | '\u{FF00}'..='\u{FF60}'
        | '\u{FFE0}'..='\u{FFE6}'
        | '\u{1F300}'..='\u{1F64F}'
        | '\u{1F900}'..='\u{1F9FF}'
        | '\u{20000}'..='\u{2FFFD}' => 2,
        _ => 1,
    }
}

pub fn display_width(s: &str) -> usize {
    s.chars().map(char_width).sum()
}

/// First `max_chars` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Wraps each line of `text` to `max_width` columns, breaking at the last
/// space that fits and hard-breaking words longer than a line.
pub fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut lines = Vec::new();

    for source_line in text.lines() {
        let mut remaining = source_line;
        if remaining.is_empty() {
            lines.push(String::new());
            continue;
        }

        while display_width(remaining) > max_width {
            let mut width = 0;
            let mut last_space = None;
            let mut hard_end = 0;
            for (pos, ch) in remaining.char_indices() {
                let w = char_width(ch);
                if width + w > max_width {
                    break;
                }
                if ch == ' ' {
                    last_space = Some(pos);
                }
                width += w;
                hard_end = pos + ch.len_utf8();
            }

            match last_space {
                Some(pos) if pos > 0 => {
                    lines.push(remaining[..pos].to_string());
                    remaining = remaining[pos + 1..].trim_start();
                }
                _ => {
                    let end = hard_end.max(remaining.chars().next().map_or(0, char::len_utf8));
                    lines.push(remaining[..end].to_string());
                    remaining = &remaining[end..];
                }
            }
        }

        if !remaining.is_empty() {
            lines.push(remaining.to_string());
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_characters_count_double() {
        assert_eq!(display_width("abc"), 3);
        assert_eq!(display_width("日本"), 4);
        assert_eq!(display_width("ñandú"), 5);
    }

    #[test]
    fn truncate_respects_code_points() {
        assert_eq!(truncate_chars("¿Qué pasó?", 4), "¿Qué");
        assert_eq!(truncate_chars("📷 foto", 1), "📷");
        assert_eq!(truncate_chars("short", 35), "short");
    }

    #[test]
    fn wrap_breaks_at_spaces() {
        assert_eq!(
            wrap_text("the mirror reflects you", 10),
            vec!["the mirror", "reflects", "you"]
        );
    }

    #[test]
    fn wrap_keeps_blank_lines_and_hard_breaks_long_words() {
        assert_eq!(wrap_text("a\n\nb", 10), vec!["a", "", "b"]);
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }
}
