//! Prompt construction and parsing for the story outline and illustrations.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::app::model::{Character, DEFAULT_TITLE, GenerateBookRequest};
use crate::json_repair::{extract_outer_braces, repair_json};

pub const STORY_SYSTEM_PROMPT: &str = "You are a creative children's book author. \
Always respond with valid JSON only, no additional text.";

/// Upper bound on a single image prompt, in characters.
pub const IMAGE_PROMPT_BUDGET: usize = 2800;
/// Page text used as a visual description when the model gave none.
pub const PAGE_TEXT_FALLBACK_CHARS: usize = 200;
const MAX_SUPPORTING_CHARACTERS: usize = 3;

pub fn age_complexity(age_range: &str) -> &'static str {
    match age_range.trim().to_ascii_lowercase().as_str() {
        "kindergarten" => "very simple, with short sentences and basic words",
        "1st" => "simple, with short sentences and easy words",
        "3rd" => "moderate, with varied sentence structure and expanding vocabulary",
        "4th" => "more complex, with descriptive language and varied vocabulary",
        "5th" => "complex, with rich vocabulary and sophisticated sentence structure",
        _ => "moderate, with clear sentences and age-appropriate vocabulary",
    }
}

pub fn build_story_prompt(request: &GenerateBookRequest) -> String {
    let idea = request.story_idea.trim();
    let age = request.age_range.trim();
    let style = request.illustration_style.trim();
    let pages = request.page_count();
    let complexity = age_complexity(age);

    let character_line = match &request.character {
        Some(character) => format!("- The main character is {}\n", describe_character(character)),
        None => String::new(),
    };

    format!(
        "Create a children's book story based on this idea: \"{idea}\"\n\
\n\
Requirements:\n\
- Age range: {age} grade ({complexity})\n\
- The story should be appropriate for this age group\n\
- Create a story with exactly {pages} pages\n\
- Each page should have 2-4 sentences\n\
- Make it engaging, educational, and fun\n\
- Include a clear beginning, middle, and end\n\
{character_line}\
\n\
Output:\n\
- Output ONLY a single JSON object (no markdown fences, no commentary).\n\
- Describe each character's look once in `characters` so illustrations stay consistent.\n\
- Schema:\n\
  {{\"title\":\"Story Title\",\"characters\":{{\"main\":\"appearance of the main character\",\"others\":[\"appearance of another character\"]}},\"pages\":[{{\"pageNumber\":1,\"text\":\"Page text here...\",\"imageDescription\":\"Detailed description of the illustration for this page, in {style} style\"}}]}}\n"
    )
}

fn describe_character(character: &Character) -> String {
    let mut out = format!("{}, a {}", character.name.trim(), character.kind.trim());
    let traits: Vec<&str> = character
        .traits
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !traits.is_empty() {
        out.push_str(" who is ");
        out.push_str(&traits.join(", "));
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoryOutline {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub characters: Option<StoryCharacters>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pages: Vec<OutlinePage>,
}

/// Character descriptions as the model wrote them; either plain strings or
/// small objects, both are flattened to text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoryCharacters {
    #[serde(default)]
    pub main: Option<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub others: Vec<Value>,
}

/// One page as the model wrote it. Any `pageNumber` it sent is ignored;
/// pages are numbered by position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlinePage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(default)]
    pub image_description: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl StoryOutline {
    pub fn title_or_default(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_owned()
    }
}

/// Parses the raw story text: repaired JSON first, then the naive outer
/// brace slice of the untouched text.
pub fn parse_story_outline(raw: &str) -> Result<StoryOutline, String> {
    let repaired = repair_json(raw);
    let value = match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => value,
        Err(first_err) => extract_outer_braces(raw)
            .and_then(|slice| serde_json::from_str::<Value>(slice).ok())
            .ok_or_else(|| format!("story response is not valid JSON: {first_err}"))?,
    };
    let outline: StoryOutline = serde_json::from_value(value)
        .map_err(|err| format!("story response does not match the story schema: {err}"))?;

    if outline.pages.is_empty() {
        return Err("story response contains no pages".to_owned());
    }
    Ok(outline)
}

/// Sentence describing the recurring cast, prepended to every page prompt.
pub fn character_preamble(
    outline: Option<&StoryCharacters>,
    requested: Option<&Character>,
) -> Option<String> {
    let main = outline
        .and_then(|c| c.main.as_ref())
        .map(value_text)
        .filter(|t| !t.is_empty())
        .or_else(|| requested.map(describe_character));
    let others: Vec<String> = outline
        .map(|c| {
            c.others
                .iter()
                .map(value_text)
                .filter(|t| !t.is_empty())
                .take(MAX_SUPPORTING_CHARACTERS)
                .collect()
        })
        .unwrap_or_default();

    if main.is_none() && others.is_empty() {
        return None;
    }

    let mut out = String::from("Keep characters identical on every page.");
    if let Some(main) = main {
        out.push_str(&format!(" Main character: {main}."));
    }
    if !others.is_empty() {
        out.push_str(&format!(" Other characters: {}.", others.join("; ")));
    }
    Some(out)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_owned(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, v)| match v {
                Value::String(s) if !s.trim().is_empty() => Some(format!("{key}: {}", s.trim())),
                Value::Null => None,
                Value::String(_) => None,
                other => Some(format!("{key}: {other}")),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn page_visual(page: &OutlinePage) -> String {
    match page
        .image_description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        Some(description) => description.to_owned(),
        None => truncate_chars(page.text.trim(), PAGE_TEXT_FALLBACK_CHARS).to_owned(),
    }
}

fn style_suffix(style: &str) -> String {
    format!(
        "{} style, children's book illustration, colorful, whimsical, high quality",
        style.trim()
    )
}

/// Page prompt: character preamble, page visual, style. Stays within
/// [`IMAGE_PROMPT_BUDGET`]; the preamble is cut first.
pub fn build_page_image_prompt(preamble: Option<&str>, page: &OutlinePage, style: &str) -> String {
    let body = format!("{}, {}", page_visual(page), style_suffix(style));
    fit_prompt(preamble, &body)
}

pub fn build_cover_prompt(title: &str, first_page: Option<&OutlinePage>, style: &str) -> String {
    let scene = first_page
        .map(page_visual)
        .filter(|v| !v.is_empty())
        .map(|v| format!(", featuring {v}"))
        .unwrap_or_default();
    let body = format!(
        "Book cover illustration for \"{}\"{scene}, {}",
        title.trim(),
        style_suffix(style)
    );
    fit_prompt(None, &body)
}

fn fit_prompt(preamble: Option<&str>, body: &str) -> String {
    let body_chars = body.chars().count();
    if body_chars >= IMAGE_PROMPT_BUDGET {
        return truncate_chars(body, IMAGE_PROMPT_BUDGET).to_owned();
    }

    let Some(preamble) = preamble.map(str::trim).filter(|p| !p.is_empty()) else {
        return body.to_owned();
    };
    // One char for the separating space.
    let room = IMAGE_PROMPT_BUDGET - body_chars - 1;
    if room == 0 {
        return body.to_owned();
    }
    format!("{} {body}", truncate_chars(preamble, room).trim_end())
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str, description: Option<&str>) -> OutlinePage {
        OutlinePage {
            text: text.to_owned(),
            image_description: description.map(str::to_owned),
        }
    }

    #[test]
    fn unknown_age_uses_second_grade_complexity() {
        assert_eq!(age_complexity("2nd"), age_complexity("graduate school"));
        assert_ne!(age_complexity("kindergarten"), age_complexity("5th"));
    }

    #[test]
    fn story_prompt_encodes_request() {
        let request = GenerateBookRequest {
            story_idea: "a shy robot".to_owned(),
            age_range: "kindergarten".to_owned(),
            illustration_style: "watercolor".to_owned(),
            page_count_hint: Some(6),
            character: Some(Character {
                name: "Bolt".to_owned(),
                kind: "robot".to_owned(),
                traits: vec!["shy".to_owned(), "kind".to_owned()],
            }),
            narrator_voice: None,
        };
        let prompt = build_story_prompt(&request);
        assert!(prompt.contains("\"a shy robot\""));
        assert!(prompt.contains("exactly 6 pages"));
        assert!(prompt.contains("very simple, with short sentences"));
        assert!(prompt.contains("Bolt, a robot who is shy, kind"));
        assert!(prompt.contains("in watercolor style"));
        assert!(prompt.contains("\"imageDescription\""));
    }

    #[test]
    fn outline_parses_through_fences_and_falls_back() {
        let raw = "```json\n{\"title\":\"Bolt\",\"pages\":[{\"pageNumber\":1,\"text\":\"Hi\",\"imageDescription\":\"A robot\"},]}\n```";
        let outline = parse_story_outline(raw).unwrap();
        assert_eq!(outline.title_or_default(), "Bolt");
        assert_eq!(outline.pages.len(), 1);

        let err = parse_story_outline("I cannot write that story.").unwrap_err();
        assert!(err.contains("not valid JSON"));

        let err = parse_story_outline("{\"title\":\"Empty\",\"pages\":[]}").unwrap_err();
        assert!(err.contains("no pages"));
    }

    #[test]
    fn loosely_typed_fields_are_accepted() {
        let outline = parse_story_outline(
            r#"{"title":"T","characters":{"main":"a fox","others":null},"pages":[
                {"pageNumber":"1","text":"Hello","imageDescription":"a den"},
                {"pageNumber":null,"text":null,"imageDescription":null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(outline.pages.len(), 2);
        assert_eq!(outline.pages[0].text, "Hello");
        assert_eq!(outline.pages[1].text, "");
        assert_eq!(outline.pages[1].image_description, None);
        assert!(outline.characters.unwrap().others.is_empty());

        let err = parse_story_outline(r#"{"title":"T","pages":null}"#).unwrap_err();
        assert!(err.contains("no pages"));
    }

    #[test]
    fn schema_mismatch_is_reported_apart_from_invalid_json() {
        let err = parse_story_outline(r#"{"title":"T","pages":"one page"}"#).unwrap_err();
        assert!(err.contains("does not match the story schema"), "{err}");
        assert!(!err.contains("not valid JSON"), "{err}");

        let err = parse_story_outline(r#"{"title": "T", "pages": [oops]}"#).unwrap_err();
        assert!(err.contains("not valid JSON"), "{err}");
    }

    #[test]
    fn missing_title_uses_placeholder() {
        let outline = parse_story_outline("{\"title\":\"  \",\"pages\":[{\"text\":\"a\"}]}").unwrap();
        assert_eq!(outline.title_or_default(), DEFAULT_TITLE);
    }

    #[test]
    fn preamble_takes_main_and_at_most_three_others() {
        let characters = StoryCharacters {
            main: Some(Value::String("a small silver robot".to_owned())),
            others: ["a cat", "a dog", "an owl", "a fox"]
                .iter()
                .map(|s| Value::String((*s).to_owned()))
                .collect(),
        };
        let preamble = character_preamble(Some(&characters), None).unwrap();
        assert!(preamble.contains("Main character: a small silver robot."));
        assert!(preamble.contains("a cat; a dog; an owl"));
        assert!(!preamble.contains("a fox"));
    }

    #[test]
    fn preamble_flattens_objects_and_uses_requested_character() {
        let characters = StoryCharacters {
            main: Some(serde_json::json!({"name": "Bolt", "look": "silver"})),
            others: Vec::new(),
        };
        let preamble = character_preamble(Some(&characters), None).unwrap();
        assert!(preamble.contains("name: Bolt"));
        assert!(preamble.contains("look: silver"));

        let requested = Character {
            name: "Pip".to_owned(),
            kind: "mouse".to_owned(),
            traits: Vec::new(),
        };
        let preamble = character_preamble(None, Some(&requested)).unwrap();
        assert!(preamble.contains("Main character: Pip, a mouse."));
        assert_eq!(character_preamble(None, None), None);
    }

    #[test]
    fn page_prompt_falls_back_to_truncated_text() {
        let long_text = "word ".repeat(100);
        let prompt = build_page_image_prompt(None, &page(&long_text, None), "watercolor");
        let visual = page_visual(&page(&long_text, None));
        assert_eq!(visual.chars().count(), PAGE_TEXT_FALLBACK_CHARS);
        assert!(prompt.starts_with(&visual));
        assert!(prompt.ends_with("watercolor style, children's book illustration, colorful, whimsical, high quality"));
    }

    #[test]
    fn page_prompt_stays_within_budget_by_trimming_preamble() {
        let preamble = "Keep characters identical. ".repeat(200);
        let description = "A robot waves at a cat";
        let prompt = build_page_image_prompt(
            Some(&preamble),
            &page("text", Some(description)),
            "pastel",
        );
        assert!(prompt.chars().count() <= IMAGE_PROMPT_BUDGET);
        assert!(prompt.contains(description));
        assert!(prompt.starts_with("Keep characters identical."));

        let huge = "x".repeat(IMAGE_PROMPT_BUDGET * 2);
        let prompt = build_page_image_prompt(Some("pre"), &page("t", Some(&huge)), "ink");
        assert_eq!(prompt.chars().count(), IMAGE_PROMPT_BUDGET);
    }

    #[test]
    fn cover_prompt_mentions_title_and_first_scene() {
        let first = page("Once upon a time", Some("A robot under a tree"));
        let prompt = build_cover_prompt("Bolt's Big Day", Some(&first), "watercolor");
        assert!(prompt.starts_with("Book cover illustration for \"Bolt's Big Day\""));
        assert!(prompt.contains("featuring A robot under a tree"));
        assert!(prompt.contains("watercolor style"));
    }
}
