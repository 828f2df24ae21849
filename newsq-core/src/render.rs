use crate::citation::{Segment, Sentiment, cited_sources, tokenize};
use crate::model::{ArticleSource, Chat, ChatListItem, MessageRole, StructuredAnswer};

pub fn thread_uri(thread_id: &str) -> String {
    format!("newsq://{thread_id}")
}

pub fn render_chat_markdown(chat: &Chat) -> String {
    let mut output = String::new();
    output.push_str("# Chat\n\n");
    output.push_str(&format!("- Thread: `{}`\n", thread_uri(&chat.thread_id)));
    output.push_str(&format!("- Title: {}\n", chat.title));
    output.push_str(&format!("- Updated: {}\n\n", chat.updated_at.to_rfc3339()));

    if chat.messages.is_empty() {
        output.push_str("_No messages yet._\n");
        return output;
    }

    for (idx, message) in chat.messages.iter().enumerate() {
        let title = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        output.push_str(&format!("## {}. {}\n\n", idx + 1, title));

        match (&message.answer, message.role) {
            (Some(answer), _) => output.push_str(&render_answer_markdown(answer)),
            (None, MessageRole::Assistant) if message.content.trim().is_empty() => {
                output.push_str("_No answer received._\n\n");
            }
            (None, _) => {
                output.push_str(&render_annotated(message.content.trim()));
                output.push_str("\n\n");
            }
        }
    }

    output
}

pub fn render_answer_markdown(answer: &StructuredAnswer) -> String {
    let mut output = String::new();
    if !answer.tldr.trim().is_empty() {
        output.push_str(&format!("**TL;DR:** {}\n\n", render_annotated(answer.tldr.trim())));
    }
    if !answer.details.content.trim().is_empty() {
        output.push_str(&render_annotated(answer.details.content.trim()));
        output.push_str("\n\n");
    }
    output.push_str(&format!("_Confidence: {}%_\n\n", answer.confidence));

    let sources = cited_sources(answer);
    if !sources.is_empty() {
        output.push_str(&render_sources_markdown(&sources));
        output.push('\n');
    }
    output
}

pub fn render_sources_markdown(sources: &[&ArticleSource]) -> String {
    let mut output = String::from("### Sources\n\n");
    for source in sources {
        output.push_str(&format!(
            "[{}] [{}]({}) - {}",
            source.number, source.title, source.url, source.source
        ));
        if let Some(published_at) = source.published_at.as_deref() {
            output.push_str(&format!(", {published_at}"));
        }
        output.push_str(&format!(" (relevance {}%)\n", source.relevance));
    }
    output
}

pub fn render_chat_list(items: &[ChatListItem]) -> String {
    if items.is_empty() {
        return "_No chats yet._\n".to_string();
    }

    let mut output = String::from("# Chats\n\n");
    for item in items {
        output.push_str(&format!(
            "- `{}` {} ({})\n",
            thread_uri(&item.thread_id),
            item.title,
            item.updated_at.to_rfc3339()
        ));
        if let Some(preview) = item.preview.as_deref() {
            output.push_str(&format!("  > {preview}\n"));
        }
    }
    output
}

fn render_annotated(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for segment in tokenize(text) {
        match segment {
            Segment::Text(text) => output.push_str(text),
            Segment::Citation(number) => output.push_str(&format!("[{number}]")),
            Segment::Sentiment(Sentiment::Bullish) => output.push_str("**Bullish**"),
            Segment::Sentiment(Sentiment::Bearish) => output.push_str("**Bearish**"),
        }
    }
    output
}
