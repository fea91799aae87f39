/// Canonicalizes extracted text: typographic punctuation is mapped to
/// plain equivalents, control characters are stripped (newlines survive),
/// horizontal whitespace runs collapse to one space, and runs of three or
/// more newlines collapse to two.
pub fn normalize_text(input: &str) -> String {
    let mapped = map_punctuation(input);
    collapse_whitespace(&mapped).trim().to_string()
}

fn map_punctuation(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2015}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            // Bullets, including the private-use glyphs some PDF fonts emit.
            '\u{2022}' | '\u{25CF}' | '\u{25AA}' | '\u{F0B7}' | '\u{F0A7}' => out.push('*'),
            '\u{00A0}' | '\u{2002}' | '\u{2003}' | '\u{2009}' | '\u{200A}' | '\t' => {
                out.push(' ');
            }
            '\n' => out.push('\n'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn collapse_whitespace(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut newlines = 0usize;
    let mut space_pending = false;

    for c in input.chars() {
        if c == '\n' {
            newlines += 1;
            space_pending = false;
        } else if c == ' ' {
            space_pending = true;
        } else {
            if newlines > 0 {
                for _ in 0..newlines.min(2) {
                    result.push('\n');
                }
                newlines = 0;
                space_pending = false;
            } else if space_pending {
                result.push(' ');
                space_pending = false;
            }
            result.push(c);
        }
    }

    result
}
