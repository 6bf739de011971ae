use crate::models::chat::{ ChatMessage, Role };

pub const SYSTEM_PREAMBLE: &str =
    "You are a helpful assistant. You do not respond as 'User' or pretend to be 'User'. You only respond once as 'Assistant'.";

const SEGMENT_SEPARATOR: &str = "\n\n";

fn push_segment(prompt: &mut String, role: Role, content: &str) {
    prompt.push_str(role.label());
    prompt.push_str(": ");
    prompt.push_str(content);
    prompt.push_str(SEGMENT_SEPARATOR);
}

/// Serializes the history plus the newest user utterance into a single
/// completion prompt, ending on a bare `Assistant:` cue.
///
/// `history` must not already contain `utterance`. Content is copied
/// verbatim; the model only ever sees unstructured text.
pub fn assemble_prompt(history: &[ChatMessage], utterance: &str) -> String {
    let body_len: usize = history
        .iter()
        .map(|m| m.content().len() + 16)
        .sum();
    let mut prompt = String::with_capacity(
        SYSTEM_PREAMBLE.len() + body_len + utterance.len() + 32
    );

    prompt.push_str(SYSTEM_PREAMBLE);
    prompt.push_str(SEGMENT_SEPARATOR);
    for message in history {
        push_segment(&mut prompt, message.role(), message.content());
    }
    push_segment(&mut prompt, Role::User, utterance);
    prompt.push_str(Role::Assistant.label());
    prompt.push(':');
    prompt
}
