//! Two-host conversation script generation via the local Ollama endpoint.
//!
//! The digest HTML is flattened to plain text, handed to a locally
//! selected model with a dialogue prompt, and the reply is parsed into
//! labeled segments ready for synthesis.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::OllamaConfig;
use crate::error::{Error, Result};
use crate::podcast::models::LocalModelSelector;

const CHAT_MAX_ATTEMPTS: u32 = 3;
const CHAT_RETRY_DELAY_SECS: u64 = 30;
const FULL_TEXT_BUDGET: usize = 40_000;
const TEST_TEXT_BUDGET: usize = 4_000;

/// One of the two podcast hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    Alex,
    Sam,
}

impl Speaker {
    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "alex" => Some(Speaker::Alex),
            "sam" => Some(Speaker::Sam),
            _ => None,
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Alex => write!(f, "Alex"),
            Speaker::Sam => write!(f, "Sam"),
        }
    }
}

/// A single turn of dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSegment {
    pub speaker: Speaker,
    pub text: String,
}

/// Flatten digest HTML to readable plain text.
///
/// Script and style subtrees are dropped, block text is joined with
/// newlines and runs of blank lines collapse to one.
pub fn extract_text(html: &str, test_mode: bool) -> String {
    let document = scraper::Html::parse_document(html);
    let mut pieces = Vec::new();
    collect_text(document.root_element(), &mut pieces);

    let mut lines = Vec::new();
    let mut blank_pending = false;
    for piece in &pieces {
        for line in piece.lines() {
            let line = line.trim();
            if line.is_empty() {
                blank_pending = !lines.is_empty();
            } else {
                if blank_pending {
                    lines.push(String::new());
                    blank_pending = false;
                }
                lines.push(line.to_string());
            }
        }
    }
    let text = lines.join("\n");

    let budget = if test_mode { TEST_TEXT_BUDGET } else { FULL_TEXT_BUDGET };
    crate::feeds::truncate_chars(&text, budget)
}

fn collect_text(el: scraper::ElementRef, out: &mut Vec<String>) {
    for child in el.children() {
        match child.value() {
            scraper::Node::Text(t) => out.push(t.to_string()),
            scraper::Node::Element(e) => {
                let name = e.name();
                if name == "script" || name == "style" {
                    continue;
                }
                if let Some(child_el) = scraper::ElementRef::wrap(child) {
                    // Block elements get their own line in the output.
                    if matches!(name, "p" | "div" | "li" | "h1" | "h2" | "h3" | "h4" | "br" | "ul" | "ol") {
                        out.push("\n".to_string());
                    }
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

/// Pull up to five headline strings out of the digest's top-priority
/// section, for use in the delivery email.
///
/// Looks for an `h2` whose text mentions "top" or "priority" and reads
/// the links from its following list. Falls back to the first few
/// substantial link texts anywhere in the document.
pub fn extract_top_topics(html: &str) -> Vec<String> {
    let document = scraper::Html::parse_document(html);
    let h2_sel = match scraper::Selector::parse("h2") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let link_sel = any_link_selector();

    for heading in document.select(&h2_sel) {
        let title = heading.text().collect::<String>().to_lowercase();
        if !(title.contains("top") || title.contains("priority")) {
            continue;
        }
        // The headline list follows the heading as its next element sibling.
        let mut sibling = heading.next_sibling();
        while let Some(node) = sibling {
            if let Some(el) = scraper::ElementRef::wrap(node) {
                let topics: Vec<String> = el
                    .select(&link_sel)
                    .map(|a| a.text().collect::<String>().trim().to_string())
                    .filter(|t| !t.is_empty())
                    .take(5)
                    .collect();
                if !topics.is_empty() {
                    return dedup_preserving_order(topics);
                }
            }
            sibling = node.next_sibling();
        }
    }

    // Fallback: first substantial link texts in document order.
    let topics: Vec<String> = document
        .select(&link_sel)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .filter(|t| t.chars().count() > 10)
        .take(5)
        .collect();
    dedup_preserving_order(topics)
}

fn any_link_selector() -> scraper::Selector {
    // The selector literal is static and always valid.
    scraper::Selector::parse("a").expect("static selector")
}

fn dedup_preserving_order(topics: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    topics
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .take(5)
        .collect()
}

/// Parse the model's reply into speaker-labeled segments.
///
/// Lines starting with `Alex:` or `Sam:` (any case) open a new segment;
/// unlabeled lines continue the current one and text before the first
/// label is ignored. No segments at all is an error.
pub fn parse_script(script: &str) -> Result<Vec<ScriptSegment>> {
    let mut segments: Vec<ScriptSegment> = Vec::new();
    for raw in script.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((label, rest)) = line.split_once(':') {
            if let Some(speaker) = Speaker::from_label(label.trim().trim_matches('*')) {
                let text = rest.trim();
                if !text.is_empty() {
                    segments.push(ScriptSegment {
                        speaker,
                        text: text.to_string(),
                    });
                }
                continue;
            }
        }
        if let Some(last) = segments.last_mut() {
            last.text.push(' ');
            last.text.push_str(line);
        }
    }
    if segments.is_empty() {
        return Err(Error::ScriptParse(
            "no speaker-labeled lines found in generated script".into(),
        ));
    }
    Ok(segments)
}

fn dialogue_prompt(digest_text: &str, test_mode: bool) -> (String, String) {
    let length_hint = if test_mode {
        "Keep it very short: about 6 exchanges total."
    } else {
        "Aim for a natural 8-12 minute conversation covering every story."
    };
    let system = format!(
        "You write scripts for a two-host daily news podcast. \
         The hosts are Alex (curious, asks good questions) and Sam \
         (knowledgeable, explains context). Produce ONLY dialogue lines, \
         each starting with 'Alex:' or 'Sam:'. No stage directions, no \
         markdown, no intro text before the first line. Alternate \
         naturally, keep the tone conversational but informative. \
         {length_hint}"
    );
    let user = format!(
        "Here is today's news digest. Turn it into the podcast script:\n\n{digest_text}"
    );
    (system, user)
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Generates the dialogue script with the locally selected model.
pub struct ScriptGenerator {
    config: OllamaConfig,
    client: Client,
}

impl ScriptGenerator {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Generate the script, choosing the model through `selector`.
    ///
    /// If the chosen model turns out to be missing on the endpoint,
    /// selection reruns once against a fresh inventory before giving up.
    /// Returns the raw script plus any model-drift notices to forward
    /// through the notification channel.
    pub async fn generate(
        &self,
        selector: &LocalModelSelector,
        digest_text: &str,
        test_mode: bool,
    ) -> Result<(String, Vec<String>)> {
        generate_with_reselection(
            || selector.select(),
            |model| async move { self.chat_with_retry(&model, digest_text, test_mode).await },
        )
        .await
    }

    async fn chat_with_retry(
        &self,
        model: &str,
        digest_text: &str,
        test_mode: bool,
    ) -> Result<String> {
        let mut last_err = None;
        for attempt in 1..=CHAT_MAX_ATTEMPTS {
            match self.chat(model, digest_text, test_mode).await {
                Ok(script) => return Ok(script),
                Err(e) if e.is_transient() && attempt < CHAT_MAX_ATTEMPTS => {
                    warn!(
                        model,
                        attempt,
                        error = %e,
                        "local chat request failed, retrying in {CHAT_RETRY_DELAY_SECS}s"
                    );
                    tokio::time::sleep(Duration::from_secs(CHAT_RETRY_DELAY_SECS)).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Malformed("chat retry loop exhausted".into())))
    }

    async fn chat(&self, model: &str, digest_text: &str, test_mode: bool) -> Result<String> {
        let (system, user) = dialogue_prompt(digest_text, test_mode);
        let num_predict = if test_mode { 1024 } else { 4096 };
        debug!(model, "requesting podcast script");
        let resp = self
            .client
            .post(format!("{}/api/chat", self.config.host))
            .json(&json!({
                "model": model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "stream": false,
                "options": {"temperature": 0.8, "num_predict": num_predict},
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(Error::ModelMissing(model.to_string()));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                provider: "ollama",
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = resp.json().await?;
        let script = strip_think_blocks(&body.message.content);
        info!(model, chars = script.len(), "podcast script generated");
        Ok(script)
    }
}

/// Run `chat` with a selected model, re-running selection once when the
/// model has vanished from the endpoint mid-run.
///
/// A second selection that lands on the same identifier means the
/// inventory really has changed underneath us; the original error is
/// surfaced rather than retrying a model known to be gone. Drift notices
/// from every selection are accumulated for the caller.
async fn generate_with_reselection<T, S, SFut, C, CFut>(
    mut select: S,
    mut chat: C,
) -> Result<(T, Vec<String>)>
where
    S: FnMut() -> SFut,
    SFut: std::future::Future<Output = Result<crate::podcast::models::Selection>>,
    C: FnMut(String) -> CFut,
    CFut: std::future::Future<Output = Result<T>>,
{
    let mut notices = Vec::new();
    let selection = select().await?;
    notices.extend(selection.drift.clone());

    match chat(selection.model.clone()).await {
        Ok(value) => Ok((value, notices)),
        Err(e) if e.is_model_missing() => {
            warn!(model = %selection.model, "model vanished from endpoint, re-running selection");
            let retry = select().await?;
            notices.extend(retry.drift.clone());
            if retry.model == selection.model {
                return Err(e);
            }
            let value = chat(retry.model).await?;
            Ok((value, notices))
        }
        Err(e) => Err(e),
    }
}

/// Remove `<think>...</think>` reasoning blocks some local models emit
/// before the actual reply.
fn strip_think_blocks(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labeled_lines() {
        let script = "Alex: Welcome to the show.\nSam: Thanks Alex, big day today.\nAlex: Let's dive in.";
        let segments = parse_script(script).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].speaker, Speaker::Alex);
        assert_eq!(segments[1].speaker, Speaker::Sam);
        assert_eq!(segments[1].text, "Thanks Alex, big day today.");
    }

    #[test]
    fn labels_are_case_insensitive() {
        let segments = parse_script("ALEX: hi\nsam: hello").unwrap();
        assert_eq!(segments[0].speaker, Speaker::Alex);
        assert_eq!(segments[1].speaker, Speaker::Sam);
    }

    #[test]
    fn continuation_lines_join_previous_segment() {
        let script = "Alex: First part\nand the continuation.\nSam: Reply.";
        let segments = parse_script(script).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "First part and the continuation.");
    }

    #[test]
    fn preamble_before_first_label_is_dropped() {
        let script = "Here is your script:\nAlex: The real start.";
        let segments = parse_script(script).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "The real start.");
    }

    #[test]
    fn unlabeled_script_is_an_error() {
        let err = parse_script("Just a paragraph with no speakers at all.").unwrap_err();
        assert!(matches!(err, Error::ScriptParse(_)));
    }

    #[test]
    fn strips_think_blocks() {
        let raw = "<think>planning the episode...</think>Alex: Hello!";
        assert_eq!(strip_think_blocks(raw), "Alex: Hello!");
    }

    #[test]
    fn extract_text_drops_markup_and_style() {
        let html = "<html><head><style>body { color: red; }</style></head>\
                    <body><h2>Top Stories</h2><p>First story.</p><p>Second story.</p></body></html>";
        let text = extract_text(html, false);
        assert!(text.contains("Top Stories"));
        assert!(text.contains("First story."));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn extract_text_honors_test_budget() {
        let html = format!("<p>{}</p>", "x".repeat(10_000));
        let text = extract_text(&html, true);
        assert!(text.chars().count() <= 4_000);
    }

    #[test]
    fn top_topics_read_priority_section() {
        let html = "<h2>🔥 Top Priority</h2>\
                    <ul><li><a href='#'>Big merger announced</a></li>\
                    <li><a href='#'>Rates held steady</a></li></ul>\
                    <h2>Other</h2><ul><li><a href='#'>Minor item</a></li></ul>";
        let topics = extract_top_topics(html);
        assert_eq!(topics, vec!["Big merger announced", "Rates held steady"]);
    }

    use crate::podcast::models::Selection;
    use std::sync::{Arc, Mutex};

    fn selection(model: &str) -> Selection {
        Selection {
            model: model.to_string(),
            drift: None,
        }
    }

    #[tokio::test]
    async fn vanished_model_triggers_one_reselection() {
        let selections = Arc::new(Mutex::new(vec![selection("qwen3:14b"), selection("qwen3:8b")]));
        let chats: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let result = generate_with_reselection(
            || {
                let selections = selections.clone();
                async move { Ok(selections.lock().unwrap().remove(0)) }
            },
            |model| {
                let chats = chats.clone();
                async move {
                    chats.lock().unwrap().push(model.clone());
                    if model == "qwen3:14b" {
                        Err(Error::ModelMissing(model))
                    } else {
                        Ok("Alex: hi".to_string())
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap().0, "Alex: hi");
        // First pick vanished, fresh selection supplied a different model.
        assert_eq!(chats.lock().unwrap().as_slice(), ["qwen3:14b", "qwen3:8b"]);
    }

    #[tokio::test]
    async fn reselection_returning_same_model_gives_up() {
        let chats: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let result: Result<(String, Vec<String>)> = generate_with_reselection(
            || async { Ok(selection("qwen3:14b")) },
            |model| {
                let chats = chats.clone();
                async move {
                    chats.lock().unwrap().push(model.clone());
                    Err(Error::ModelMissing(model))
                }
            },
        )
        .await;

        assert!(matches!(result, Err(Error::ModelMissing(_))));
        // No second chat attempt against a model known to be gone.
        assert_eq!(chats.lock().unwrap().as_slice(), ["qwen3:14b"]);
    }

    #[tokio::test]
    async fn non_model_errors_skip_reselection() {
        let select_calls = Arc::new(Mutex::new(0u32));

        let result: Result<(String, Vec<String>)> = generate_with_reselection(
            || {
                let select_calls = select_calls.clone();
                async move {
                    *select_calls.lock().unwrap() += 1;
                    Ok(selection("qwen3:14b"))
                }
            },
            |_| async { Err(Error::ScriptParse("bad output".into())) },
        )
        .await;

        assert!(matches!(result, Err(Error::ScriptParse(_))));
        assert_eq!(*select_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn drift_notices_accumulate_across_selections() {
        let selections = Arc::new(Mutex::new(vec![
            Selection {
                model: "qwen3:14b".to_string(),
                drift: Some("first notice".to_string()),
            },
            Selection {
                model: "qwen3:8b".to_string(),
                drift: Some("second notice".to_string()),
            },
        ]));

        let (_, notices) = generate_with_reselection(
            || {
                let selections = selections.clone();
                async move { Ok(selections.lock().unwrap().remove(0)) }
            },
            |model| async move {
                if model == "qwen3:14b" {
                    Err(Error::ModelMissing(model))
                } else {
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(notices, vec!["first notice", "second notice"]);
    }

    #[test]
    fn top_topics_fall_back_to_long_links() {
        let html = "<p><a href='#'>ok</a><a href='#'>A sufficiently long headline</a></p>";
        let topics = extract_top_topics(html);
        assert_eq!(topics, vec!["A sufficiently long headline"]);
    }
}
