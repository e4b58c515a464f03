/// Hard prompt length enforced by the generation backend.
pub const BACKEND_PROMPT_LIMIT: usize = 2000;

/// Sanitised prompts are cut to this many characters, leaving headroom
/// below [`BACKEND_PROMPT_LIMIT`].
pub const MAX_PROMPT_CHARS: usize = 1900;

/// Keep printable ASCII only, collapse every whitespace run (newlines
/// included) to one space, trim, then truncate to [`MAX_PROMPT_CHARS`].
pub fn sanitize_prompt(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_PROMPT_CHARS));
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if !ch.is_ascii() || ch.is_ascii_control() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    if out.len() > MAX_PROMPT_CHARS {
        out.truncate(MAX_PROMPT_CHARS);
        out.truncate(out.trim_end().len());
    }
    out
}
