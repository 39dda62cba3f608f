/// Builds the prompt for a follow-up turn.
///
/// Recent questions give the assistant conversational context without
/// feeding its own previous answers back to it; a user's first message goes
/// through untouched.
pub fn build_prompt(previous_questions: &[String], message: &str) -> String {
    if previous_questions.is_empty() {
        return message.to_string();
    }

    let mut prompt =
        String::from("Earlier questions from this user in this conversation, oldest first:\n");
    for question in previous_questions {
        prompt.push_str("- ");
        prompt.push_str(question);
        prompt.push('\n');
    }
    prompt.push_str("\nCurrent message:\n");
    prompt.push_str(message);
    prompt
}
