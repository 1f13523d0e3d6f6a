/// Capabilities of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
}

/// Split `text` into chunks of at most `limit` bytes, preferring line breaks.
///
/// Lines longer than `limit` are cut on char boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(16);
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();

    for line in text.split_inclusive('\n') {
        if chunk.len() + line.len() <= limit {
            chunk.push_str(line);
            continue;
        }
        if !chunk.is_empty() {
            out.push(std::mem::take(&mut chunk));
        }

        let mut rest = line;
        while rest.len() > limit {
            let (head, tail) = split_utf8_prefix(rest, limit);
            out.push(head.to_string());
            rest = tail;
        }
        chunk.push_str(rest);
    }

    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

fn split_utf8_prefix(s: &str, max_bytes: usize) -> (&str, &str) {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.split_at(end)
}
