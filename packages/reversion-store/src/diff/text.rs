//! Token-level text diff
//!
//! 1. Tokenize into words, whitespace runs and single punctuation marks
//! 2. Myers bisection over tokens in linear space (common prefix/suffix
//!    trimmed first); past a fixed step budget the rest is a plain
//!    deletion plus insertion
//! 3. Semantic cleanup: equalities no longer than the edits on both sides
//!    are folded into those edits, repeated until nothing changes
//! 4. Render inline `<del>` / `<ins>` markup

use serde::{Deserialize, Serialize};

/// Edit operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    Equal,
    Delete,
    Insert,
}

/// One run of text with its operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub op: EditOp,
    pub text: String,
}

impl TextEdit {
    fn new(op: EditOp, text: impl Into<String>) -> Self {
        Self {
            op,
            text: text.into(),
        }
    }

    fn len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TokenClass {
    Word,
    Space,
    Other,
}

fn classify(c: char) -> TokenClass {
    if c.is_alphanumeric() || c == '_' {
        TokenClass::Word
    } else if c.is_whitespace() {
        TokenClass::Space
    } else {
        TokenClass::Other
    }
}

/// Split into word runs, whitespace runs and single other characters
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut current: Option<TokenClass> = None;

    for (idx, c) in text.char_indices() {
        let class = classify(c);
        match current {
            Some(prev) if prev == class && class != TokenClass::Other => {}
            Some(_) => {
                tokens.push(&text[start..idx]);
                start = idx;
            }
            None => {}
        }
        current = Some(class);
    }
    if start < text.len() {
        tokens.push(&text[start..]);
    }
    tokens
}

/// Bisection steps allowed for one text diff; past it the remaining
/// middle is reported as one deletion plus one insertion
const DIFF_BUDGET: usize = 1 << 20;

/// Diff two strings into cleaned-up edits
pub fn diff_text(old: &str, new: &str) -> Vec<TextEdit> {
    let a = tokenize(old);
    let b = tokenize(new);
    let mut edits = Vec::new();
    let mut budget = DIFF_BUDGET;
    diff_tokens(&a, &b, &mut budget, &mut edits);
    cleanup_semantic(normalize(edits))
}

fn push_all(edits: &mut Vec<TextEdit>, op: EditOp, tokens: &[&str]) {
    edits.extend(tokens.iter().map(|t| TextEdit::new(op, *t)));
}

fn diff_tokens(a: &[&str], b: &[&str], budget: &mut usize, edits: &mut Vec<TextEdit>) {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    push_all(edits, EditOp::Equal, &a[..prefix]);
    if a_mid.is_empty() {
        push_all(edits, EditOp::Insert, b_mid);
    } else if b_mid.is_empty() {
        push_all(edits, EditOp::Delete, a_mid);
    } else {
        bisect(a_mid, b_mid, budget, edits);
    }
    push_all(edits, EditOp::Equal, &a[a.len() - suffix..]);
}

fn same(a: &[&str], b: &[&str], i: isize, j: isize) -> bool {
    i >= 0 && j >= 0 && a.get(i as usize).is_some_and(|x| b.get(j as usize) == Some(x))
}

/// Myers' middle snake in linear space
///
/// Walks forward from the start and backward from the end until the two
/// frontiers overlap, then diffs both halves around the overlap.
fn bisect(a: &[&str], b: &[&str], budget: &mut usize, edits: &mut Vec<TextEdit>) {
    let (n, m) = (a.len() as isize, b.len() as isize);
    let max_d = (n + m + 1) / 2;
    let offset = max_d;
    let width = (2 * max_d + 2) as usize;
    let mut forward = vec![-1isize; width];
    let mut backward = vec![-1isize; width];
    forward[(offset + 1) as usize] = 0;
    backward[(offset + 1) as usize] = 0;
    let delta = n - m;
    // Odd delta: overlap is detected on the forward pass.
    let front = delta % 2 != 0;
    let (mut k1_start, mut k1_end, mut k2_start, mut k2_end) = (0isize, 0isize, 0isize, 0isize);

    for d in 0..max_d {
        let cost = 2 * (d as usize + 1);
        if *budget < cost {
            break;
        }
        *budget -= cost;

        let mut k1 = -d + k1_start;
        while k1 <= d - k1_end {
            let k1_offset = (offset + k1) as usize;
            let mut x1 = if k1 == -d
                || (k1 != d && forward[k1_offset - 1] < forward[k1_offset + 1])
            {
                forward[k1_offset + 1]
            } else {
                forward[k1_offset - 1] + 1
            };
            let mut y1 = x1 - k1;
            while x1 < n && y1 < m && same(a, b, x1, y1) {
                x1 += 1;
                y1 += 1;
            }
            forward[k1_offset] = x1;
            if x1 > n {
                k1_end += 2;
            } else if y1 > m {
                k1_start += 2;
            } else if front {
                let k2_offset = offset + delta - k1;
                if k2_offset >= 0
                    && (k2_offset as usize) < width
                    && backward[k2_offset as usize] != -1
                    && x1 >= n - backward[k2_offset as usize]
                {
                    return split(a, b, x1, y1, budget, edits);
                }
            }
            k1 += 2;
        }

        let mut k2 = -d + k2_start;
        while k2 <= d - k2_end {
            let k2_offset = (offset + k2) as usize;
            let mut x2 = if k2 == -d
                || (k2 != d && backward[k2_offset - 1] < backward[k2_offset + 1])
            {
                backward[k2_offset + 1]
            } else {
                backward[k2_offset - 1] + 1
            };
            let mut y2 = x2 - k2;
            while x2 < n && y2 < m && same(a, b, n - x2 - 1, m - y2 - 1) {
                x2 += 1;
                y2 += 1;
            }
            backward[k2_offset] = x2;
            if x2 > n {
                k2_end += 2;
            } else if y2 > m {
                k2_start += 2;
            } else if !front {
                let k1_offset = offset + delta - k2;
                if k1_offset >= 0
                    && (k1_offset as usize) < width
                    && forward[k1_offset as usize] != -1
                {
                    let x1 = forward[k1_offset as usize];
                    let y1 = offset + x1 - k1_offset;
                    if x1 >= n - x2 {
                        return split(a, b, x1, y1, budget, edits);
                    }
                }
            }
            k2 += 2;
        }
    }

    push_all(edits, EditOp::Delete, a);
    push_all(edits, EditOp::Insert, b);
}

fn split(
    a: &[&str],
    b: &[&str],
    x: isize,
    y: isize,
    budget: &mut usize,
    edits: &mut Vec<TextEdit>,
) {
    let x = x.clamp(0, a.len() as isize) as usize;
    let y = y.clamp(0, b.len() as isize) as usize;
    if (x == 0 && y == 0) || (x == a.len() && y == b.len()) {
        push_all(edits, EditOp::Delete, a);
        push_all(edits, EditOp::Insert, b);
        return;
    }
    diff_tokens(&a[..x], &b[..y], budget, edits);
    diff_tokens(&a[x..], &b[y..], budget, edits);
}

/// Merge runs: consecutive equalities join, and each run of changes
/// collapses to one deletion followed by one insertion.
fn normalize(edits: Vec<TextEdit>) -> Vec<TextEdit> {
    let mut result: Vec<TextEdit> = Vec::new();
    let mut deleted = String::new();
    let mut inserted = String::new();

    let flush = |result: &mut Vec<TextEdit>, deleted: &mut String, inserted: &mut String| {
        if !deleted.is_empty() {
            result.push(TextEdit::new(EditOp::Delete, std::mem::take(deleted)));
        }
        if !inserted.is_empty() {
            result.push(TextEdit::new(EditOp::Insert, std::mem::take(inserted)));
        }
    };

    for edit in edits {
        match edit.op {
            EditOp::Delete => deleted.push_str(&edit.text),
            EditOp::Insert => inserted.push_str(&edit.text),
            EditOp::Equal => {
                if edit.text.is_empty() {
                    continue;
                }
                flush(&mut result, &mut deleted, &mut inserted);
                let extends_last = matches!(result.last(), Some(last) if last.op == EditOp::Equal);
                if !extends_last {
                    result.push(edit);
                } else if let Some(last) = result.last_mut() {
                    last.text.push_str(&edit.text);
                }
            }
        }
    }
    flush(&mut result, &mut deleted, &mut inserted);
    result
}

/// Size of the change run next to equality `idx` (after it when `forward`),
/// as (deleted chars, inserted chars).
fn change_size(edits: &[TextEdit], idx: usize, forward: bool) -> (usize, usize) {
    let run: Vec<&TextEdit> = if forward {
        edits[idx + 1..]
            .iter()
            .take_while(|e| e.op != EditOp::Equal)
            .collect()
    } else {
        edits[..idx]
            .iter()
            .rev()
            .take_while(|e| e.op != EditOp::Equal)
            .collect()
    };
    run.iter()
        .fold((0, 0), |(deleted, inserted), edit| match edit.op {
            EditOp::Delete => (deleted + edit.len(), inserted),
            EditOp::Insert => (deleted, inserted + edit.len()),
            EditOp::Equal => (deleted, inserted),
        })
}

/// Fold short equalities into the changes around them
///
/// After a fold the scan resumes at the previous equality, whose
/// neighbouring change just grew.
fn cleanup_semantic(mut edits: Vec<TextEdit>) -> Vec<TextEdit> {
    let mut idx = 1;
    while idx + 1 < edits.len() {
        if edits[idx].op != EditOp::Equal {
            idx += 1;
            continue;
        }
        let (del_before, ins_before) = change_size(&edits, idx, false);
        let (del_after, ins_after) = change_size(&edits, idx, true);
        let len = edits[idx].len();
        let foldable = del_before + ins_before > 0
            && del_after + ins_after > 0
            && len <= del_before.max(ins_before)
            && len <= del_after.max(ins_after);
        if !foldable {
            idx += 1;
            continue;
        }

        let start = idx - edits[..idx]
            .iter()
            .rev()
            .take_while(|e| e.op != EditOp::Equal)
            .count();
        let end = idx
            + 1
            + edits[idx + 1..]
                .iter()
                .take_while(|e| e.op != EditOp::Equal)
                .count();

        let mut deleted = String::new();
        let mut inserted = String::new();
        for edit in &edits[start..end] {
            match edit.op {
                EditOp::Delete => deleted.push_str(&edit.text),
                EditOp::Insert => inserted.push_str(&edit.text),
                EditOp::Equal => {
                    deleted.push_str(&edit.text);
                    inserted.push_str(&edit.text);
                }
            }
        }
        edits.splice(
            start..end,
            [
                TextEdit::new(EditOp::Delete, deleted),
                TextEdit::new(EditOp::Insert, inserted),
            ],
        );
        idx = start.saturating_sub(1).max(1);
    }
    edits
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '\n' => escaped.push_str("<br>"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Inline markup: `<span>` for kept text, `<del>` / `<ins>` for changes
pub fn render_html(edits: &[TextEdit]) -> String {
    edits
        .iter()
        .map(|edit| {
            let text = escape_html(&edit.text);
            match edit.op {
                EditOp::Equal => format!("<span>{}</span>", text),
                EditOp::Delete => format!("<del>{}</del>", text),
                EditOp::Insert => format!("<ins>{}</ins>", text),
            }
        })
        .collect()
}
