use terminal_size::{terminal_size, Height, Width};

use crate::cli::ResultTable;

/// Rendered cell for SQL NULL.
const NULL_CELL: &str = "NULL";

// Render a result as an ASCII table sized to the terminal.
// Returns false when JSON output is forced (ACEQL_OUTPUT=json) or there are no rows.
pub fn print_result_table(table: &ResultTable) -> bool {
    if json_output_forced() || table.rows.is_empty() {
        return false;
    }
    let termw = get_terminal_width();
    crate::tprintln!("[cli.outputformatter] detected terminal width={} columns", termw);
    for line in render_table(table, termw) {
        println!("{}", line);
    }
    true
}

pub fn json_output_forced() -> bool {
    std::env::var("ACEQL_OUTPUT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false)
}

/// Table lines (separator, header, rows, summary), each fitted to `termw` visible columns.
pub fn render_table(table: &ResultTable, termw: usize) -> Vec<String> {
    let cells: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|r| r.iter().map(|c| c.clone().unwrap_or_else(|| NULL_CELL.to_string())).collect())
        .collect();

    let mut widths: Vec<usize> = table.columns.iter().map(|s| visible_len(s).min(termw)).collect();
    for r in &cells {
        for (i, cell) in r.iter().enumerate().take(widths.len()) {
            let w = visible_len(cell);
            if w > widths[i] { widths[i] = w.min(termw); }
        }
    }

    let mut out = Vec::with_capacity(cells.len() + 5);
    let sep = build_separator(&widths);
    out.push(fit_line_to_width(&sep, termw));
    out.push(fit_line_to_width(&build_row_header_colored(&table.columns, &widths), termw));
    out.push(fit_line_to_width(&sep, termw));
    for r in &cells {
        out.push(fit_line_to_width(&build_row(r, &widths), termw));
    }
    out.push(fit_line_to_width(&sep, termw));

    let mut summary = format!("rows: {}, cols: {}", table.rows.len(), table.columns.len());
    if let Some(ms) = table.elapsed_ms {
        summary.push_str(&format!(", elapsed_ms: {}", ms));
    }
    out.push(fit_line_to_width(&summary, termw));
    out
}

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or_default();
        let text = truncate(cell, *w);
        let pad = " ".repeat(w.saturating_sub(visible_len(&text)));
        s.push(' ');
        if is_numeric_like(cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

// Header cells in green; padding is computed on visible width.
fn build_row_header_colored(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let text = truncate(cells.get(i).map(String::as_str).unwrap_or_default(), *w);
        let pad = " ".repeat(w.saturating_sub(visible_len(&text)));
        s.push_str(&format!(" \x1b[32m{}\x1b[0m{} |", text, pad));
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    let mut has_digit = false;
    for ch in st.chars() {
        if ch.is_ascii_digit() { has_digit = true; continue; }
        if ".-+eE".contains(ch) { continue; }
        return false;
    }
    has_digit
}

fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), Height(_))) if w > 4 => (w - 4) as usize,
        _ => 80,
    }
}

fn fit_line_to_width(s: &str, maxw: usize) -> String {
    if visible_len(s) <= maxw { return s.to_string(); }
    elide_middle_preserving_ansi(s, maxw)
}

/// Length in chars, skipping ANSI CSI sequences.
fn visible_len(s: &str) -> usize {
    split_ansi(s).iter().filter(|(ansi, _)| !ansi).map(|(_, t)| t.chars().count()).sum()
}

// (is_ansi, text) runs
fn split_ansi(s: &str) -> Vec<(bool, &str)> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        if bytes[i] == 0x1B {
            i += 1;
            if i < bytes.len() && bytes[i] == b'[' {
                i += 1;
                while i < bytes.len() {
                    let b = bytes[i];
                    i += 1;
                    if b.is_ascii_alphabetic() { break; }
                }
            }
            out.push((true, &s[start..i]));
        } else {
            while i < bytes.len() && bytes[i] != 0x1B { i += 1; }
            out.push((false, &s[start..i]));
        }
    }
    out
}

fn elide_middle_preserving_ansi(s: &str, maxw: usize) -> String {
    if maxw <= 3 { return "…".repeat(maxw.min(1)); }
    let budget = maxw - 3;
    let front_keep = budget / 2;
    let back_keep = budget - front_keep;
    let runs = split_ansi(s);

    let mut front = String::new();
    let mut taken = 0usize;
    for (ansi, text) in &runs {
        if *ansi { front.push_str(text); continue; }
        let n = text.chars().count();
        if taken + n <= front_keep {
            front.push_str(text);
            taken += n;
        } else {
            front.extend(text.chars().take(front_keep - taken));
            break;
        }
    }

    let mut back_parts: Vec<String> = Vec::new();
    let mut taken = 0usize;
    for (ansi, text) in runs.iter().rev() {
        if *ansi { back_parts.push(text.to_string()); continue; }
        let n = text.chars().count();
        if taken + n <= back_keep {
            back_parts.push(text.to_string());
            taken += n;
        } else {
            back_parts.push(text.chars().skip(n - (back_keep - taken)).collect());
            break;
        }
    }
    back_parts.reverse();

    // reset colour in case an escape sequence was cut
    format!("{}...{}\x1b[0m", front, back_parts.concat())
}
