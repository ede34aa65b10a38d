use unicode_width::UnicodeWidthStr;

/// Display width of a string, accounting for CJK double-width, emoji, etc.
pub(crate) fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncate a string to fit within `width` display columns, adding ".." if truncated.
pub(crate) fn truncate_display(s: &str, width: usize) -> String {
    if display_width(s) <= width {
        return s.to_string();
    }
    if width < 3 {
        return s
            .chars()
            .next()
            .filter(|ch| unicode_width::UnicodeWidthChar::width(*ch).unwrap_or(0) <= width)
            .map(String::from)
            .unwrap_or_default();
    }

    let budget = width - 2;
    let mut used = 0;
    let mut out = String::new();
    for ch in s.chars() {
        let cw = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + cw > budget {
            break;
        }
        used += cw;
        out.push(ch);
    }
    out.push_str("..");
    out
}

/// Pad or truncate to exactly `width` columns, text on the left.
pub(crate) fn pad_right(s: &str, width: usize) -> String {
    let sw = display_width(s);
    if sw > width {
        truncate_display(s, width)
    } else {
        format!("{}{}", s, " ".repeat(width - sw))
    }
}

/// Pad or truncate to exactly `width` columns, text on the right (numbers).
pub(crate) fn pad_left(s: &str, width: usize) -> String {
    let sw = display_width(s);
    if sw > width {
        truncate_display(s, width)
    } else {
        format!("{}{}", " ".repeat(width - sw), s)
    }
}

/// Plain-text table: first column left-aligned, the rest right-aligned.
/// Column widths fit the widest cell, capped at `max_width`.
pub(crate) fn render_table(headers: &[String], rows: &[Vec<String>], max_width: usize) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(display_width(cell));
            }
        }
    }
    for w in &mut widths {
        *w = (*w).min(max_width);
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, w))| if i == 0 { pad_right(cell, *w) } else { pad_left(cell, *w) })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers);
    out.push('\n');
    out.push_str(&widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out
}
