//! Cheap pre-flight screening of questions before they reach the model.

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// Attempt to override instructions or change the assistant's role.
    Jailbreak,
    /// Question about something other than the lab.
    OffTopic,
}

impl Refusal {
    pub fn reason(self) -> &'static str {
        match self {
            Refusal::Jailbreak => "Detected jailbreak attempt pattern",
            Refusal::OffTopic => "Topic outside infrastructure scope",
        }
    }
}

/// A pattern plus an optional exception checked against the text right
/// after the match ("act as a network engineer" is fine).
struct Rule {
    pattern: Regex,
    unless_followed_by: Option<Regex>,
}

impl Rule {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: Regex::new(pattern).unwrap(),
            unless_followed_by: None,
        }
    }

    fn unless(mut self, follow: &str) -> Self {
        self.unless_followed_by = Some(Regex::new(follow).unwrap());
        self
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.find_iter(text).any(|m| match &self.unless_followed_by {
            Some(follow) => !follow.is_match(&text[m.end()..]),
            None => true,
        })
    }
}

lazy_static! {
    static ref JAILBREAK_RULES: Vec<Rule> = vec![
        Rule::new(r"(?i)ignore (previous|all|prior) (instructions|prompts|rules)"),
        Rule::new(r"(?i)forget (everything|all|previous|your)"),
        Rule::new(r"(?i)\b(act|behave|pretend|roleplay) (as|like) (an? )?")
            .unless(r"(?i)^(infrastructure|network)"),
        Rule::new(r"(?i)you are now"),
        Rule::new(r"(?i)disregard (your|the) (rules|instructions|guidelines)"),
        Rule::new(r"(?i)override (your|the) (rules|instructions|system)"),
        Rule::new(r"(?i)new (instructions|rules|prompt)"),
        Rule::new(r"(?i)(write|generate|create) (a|an) (story|essay|poem|song)")
            .unless(r"(?i)^ about infrastructure"),
        Rule::new(r"(?i)what (would|could) you do if"),
        Rule::new(r"(?i)hypothetically speaking").unless(r"(?i)^ about"),
        Rule::new(r"(?i)let's play a game"),
        Rule::new(r"(?i)from now on"),
        Rule::new(r"(?i)system prompt"),
        Rule::new(r"(?i)your (original|initial) (prompt|instructions)"),
        Rule::new(r"(?i)\b(DAN|jailbreak|exploit)\b"),
    ];
    static ref OFF_TOPIC_RULES: Vec<Rule> = vec![
        Rule::new(r"(?i)\b(politic|election|president|government|democrat|republican)\w*"),
        Rule::new(r"(?i)\b(religion|god|bible|quran|buddhis|christian|muslim)\w*"),
        Rule::new(r"(?i)\b(write|compose|generate) .{0,30}(poem|song|story|novel|essay)"),
        Rule::new(r"(?i)\b(medical|health) advice"),
        Rule::new(r"(?i)\b(legal|lawyer|court) advice"),
        Rule::new(r"(?i)\b(financial|investment|crypto|stock) advice"),
        Rule::new(r"(?i)\b(joke|chiste|humor)").unless(r"(?i)^ about infrastructure"),
        Rule::new(r"(?i)\b(recipe|receta|cooking)"),
        Rule::new(r"(?i)\b(movie|film|music|book) recommendation"),
    ];
}

/// `Some` when the question should be refused without asking the model.
pub fn detect_jailbreak(query: &str) -> Option<Refusal> {
    if JAILBREAK_RULES.iter().any(|r| r.matches(query)) {
        return Some(Refusal::Jailbreak);
    }
    if OFF_TOPIC_RULES.iter().any(|r| r.matches(query)) {
        return Some(Refusal::OffTopic);
    }
    None
}
