//! Pulling an executable code body out of free-form model output
//!
//! This is a best-effort textual transform. Whatever it returns is validated
//! by actually running it, so a bad guess surfaces as an execution failure.

/// Fence tags that mark a block as Python source
const PYTHON_TAGS: &[&str] = &["python", "python3", "py"];

/// Case-insensitive markers of narrative lines dropped by the fallback
const NARRATIVE_MARKERS: &[&str] = &["here", "this code"];

/// Extract the code body from a model response.
///
/// Takes the first ```` ```python ```` block, otherwise the first untagged
/// fenced block, returning its trimmed interior. With no fenced block at
/// all, narrative and blank lines are dropped and the rest is rejoined.
/// An empty string means the model produced no code.
pub fn extract_code(response: &str) -> String {
    let normalized = response.replace("\r\n", "\n");
    let blocks = fenced_blocks(&normalized);

    let tagged = blocks
        .iter()
        .find(|block| PYTHON_TAGS.contains(&block.tag.to_ascii_lowercase().as_str()));
    let untagged = blocks.iter().find(|block| block.tag.is_empty());

    match tagged.or(untagged) {
        Some(block) => block.body.trim().to_string(),
        None => strip_narrative(&normalized),
    }
}

#[derive(Debug)]
struct FencedBlock<'a> {
    tag: &'a str,
    body: String,
}

/// Collect every closed fenced block, in order of appearance
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    let mut blocks = Vec::new();
    let mut open: Option<(&str, Vec<&str>)> = None;

    for line in text.lines() {
        match open.take() {
            None => open = opening_fence(line).map(|tag| (tag, Vec::new())),
            Some((tag, body)) if line.trim_start().starts_with("```") => blocks.push(FencedBlock {
                tag,
                body: body.join("\n"),
            }),
            Some((tag, mut body)) => {
                body.push(line);
                open = Some((tag, body));
            }
        }
    }

    blocks
}

/// Tag of a fence opening on this line, either at its start or after prose
/// (`Sure, here it is: ```python`). A mid-line fence only counts when the
/// rest of the line is a bare tag.
fn opening_fence(line: &str) -> Option<&str> {
    if let Some(tag) = line.trim_start().strip_prefix("```") {
        return Some(tag.trim());
    }
    let (_, rest) = line.split_once("```")?;
    let tag = rest.trim();
    if tag.contains(|c: char| c.is_whitespace() || c == '`') {
        None
    } else {
        Some(tag)
    }
}

fn strip_narrative(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| {
            let lowered = line.to_lowercase();
            !NARRATIVE_MARKERS.iter().any(|marker| lowered.contains(marker))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
