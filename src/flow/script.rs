//! The canonical Sphinx script: node factories, recognizers and handlers.
//!
//! Greeting → name → challenge (consider, select, confirm, describe in
//! depth, confirm emotions) → empowered state (identify, confirm) →
//! goodbye.

use std::sync::Arc;

use async_trait::async_trait;

use super::handler::{HandlerContext, IntentArgs, IntentHandler, IntentResult};
use super::node::{ConversationNode, Intent, NodeId, ParamKind, Transition, UiHint};
use super::registry::{NodeRegistry, ScriptContext};
use super::state::{SessionState, StateUpdate};
use crate::config::FlowConfig;
use crate::error::{Result, SphinxError};

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// A challenge state on the installation poster.
#[derive(Debug)]
pub struct Challenge {
    pub label: &'static str,
    /// Word prefixes or phrases that select this challenge.
    keywords: &'static [&'static str],
    /// Empowered states offered once this challenge is chosen.
    pub empowered_states: &'static [&'static str],
}

pub const CHALLENGES: &[Challenge] = &[
    Challenge {
        label: "Fearful / Anxious",
        keywords: &["fear", "afraid", "scared", "anxious", "anxiety", "worried", "nervous"],
        empowered_states: &["Confident", "Experimental / Risking", "Courageous", "Leadership"],
    },
    Challenge {
        label: "Stagnant / Ruminating",
        keywords: &["stagna", "stuck", "ruminat", "overthink", "going in circles"],
        empowered_states: &["Experimental / Risking", "Spontaneous / Decisive", "Enthusiastic"],
    },
    Challenge {
        label: "Disassociated / Numb",
        keywords: &["disassociat", "dissociat", "numb", "detached", "disconnected"],
        empowered_states: &["Engaged", "Curious", "Feeling / Empathetic"],
    },
    Challenge {
        label: "Unhealthy",
        keywords: &["unhealthy", "sick", "unwell"],
        empowered_states: &["Full Capacity", "Energetic", "Honoring Body"],
    },
    Challenge {
        label: "Scarcity",
        keywords: &["scarcity", "scarce", "not enough", "poor"],
        empowered_states: &[
            "Generous / Giving",
            "Indulging in Pleasure",
            "Investing",
            "Experimental / Risking",
        ],
    },
    Challenge {
        label: "Excluded",
        keywords: &["exclud", "left out", "lonely", "isolated"],
        empowered_states: &[
            "Respected",
            "Trusting Others",
            "Leadership",
            "Receiving",
            "Communing with a group",
        ],
    },
    Challenge {
        label: "Lack of Control/Agency",
        keywords: &["control", "agency", "powerless", "helpless"],
        empowered_states: &[
            "Experimental / Risking",
            "Accepting Change",
            "Trusting Others",
            "Leadership",
            "Relaxed",
        ],
    },
    Challenge {
        label: "Disembodied / Ungrounded",
        keywords: &["disembodied", "ungrounded", "out of my body", "floating"],
        empowered_states: &[
            "Honoring Body",
            "Joyful physical expression",
            "Focused Clarity",
            "Enthusiastic",
        ],
    },
    Challenge {
        label: "Obsessed",
        keywords: &["obsess", "fixated", "compuls"],
        empowered_states: &["Relaxed", "Accepting Change", "Experimental"],
    },
    Challenge {
        label: "Silenced / Unheard",
        keywords: &["silenced", "unheard", "ignored", "not heard", "voiceless"],
        empowered_states: &["Leadership", "Confident", "Receiving"],
    },
    Challenge {
        label: "Lack of Purpose / Unmotivated",
        keywords: &["purpose", "unmotivated", "motivation", "aimless", "meaningless"],
        empowered_states: &["Enthusiastic", "Leadership", "Focused Clarity"],
    },
    Challenge {
        label: "Shameful",
        keywords: &["shame", "ashamed", "embarrass", "guilt"],
        empowered_states: &[
            "Self-Love / Pride",
            "Leadership",
            "Confident",
            "Honoring Body",
            "Receiving",
        ],
    },
];

const AFFIRMATIVE: &[&str] = &[
    "yes", "yeah", "yep", "yup", "correct", "true", "absolutely", "right", "sure", "exactly",
    "accurate", "definitely", "ok", "okay",
];
const NEGATIVE: &[&str] = &[
    "no", "nope", "nah", "not", "wrong", "incorrect", "false", "never", "isn", "don", "doesn",
];
const READY: &[&str] = &[
    "ready", "proceed", "continue", "yes", "yeah", "yep", "begin", "start", "go", "true", "sure",
    "ok", "okay",
];
const NAME_PREFIXES: &[&str] = &[
    "my name is ",
    "my name's ",
    "call me ",
    "this is ",
    "i am ",
    "i'm ",
    "it's ",
    "it is ",
];
const STOP_WORDS: &[&str] = &["a", "an", "of", "in", "with", "the", "to", "and"];

// ---------------------------------------------------------------------------
// Recognizers
// ---------------------------------------------------------------------------

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

fn stem(word: &str) -> String {
    word.chars().take(5).collect()
}

/// `Some(true)` for yes, `Some(false)` for no, `None` if neither.
/// Negation wins: "not right" is a no.
pub fn classify_affirmation(text: &str) -> Option<bool> {
    let tokens = words(text);
    if tokens.iter().any(|t| NEGATIVE.contains(&t.as_str())) {
        Some(false)
    } else if tokens.iter().any(|t| AFFIRMATIVE.contains(&t.as_str())) {
        Some(true)
    } else {
        None
    }
}

pub fn is_ready(text: &str) -> bool {
    let tokens = words(text);
    !tokens.iter().any(|t| NEGATIVE.contains(&t.as_str()))
        && tokens.iter().any(|t| READY.contains(&t.as_str()))
}

/// Map free-form input to a canonical challenge label.
pub fn match_challenge(text: &str) -> Option<&'static Challenge> {
    let tokens = words(text);
    let joined = format!(" {} ", tokens.join(" "));
    CHALLENGES.iter().find(|c| {
        c.label.eq_ignore_ascii_case(text.trim())
            || c.keywords.iter().any(|k| {
                if k.contains(' ') {
                    joined.contains(&format!(" {k} "))
                } else {
                    tokens.iter().any(|t| t.starts_with(k))
                }
            })
    })
}

/// Empowered states offered for `challenge`.
pub fn empowered_states_for(challenge: &str) -> &'static [&'static str] {
    CHALLENGES
        .iter()
        .find(|c| c.label == challenge)
        .map(|c| c.empowered_states)
        .unwrap_or(&[])
}

/// All distinct empowered states, in table order.
pub fn all_empowered_states() -> Vec<&'static str> {
    let mut all: Vec<&'static str> = Vec::new();
    for state in CHALLENGES.iter().flat_map(|c| c.empowered_states.iter()) {
        if !all.contains(state) {
            all.push(state);
        }
    }
    all
}

/// Pick the option the input describes. An option like
/// "Experimental / Risking" matches if any of its parts matches; a part
/// matches when every significant word appears (by 5-letter stem).
pub fn match_option<'a>(text: &str, options: &[&'a str]) -> Option<&'a str> {
    let input: Vec<String> = words(text).iter().map(|w| stem(w)).collect();
    options.iter().copied().find(|option| {
        option.eq_ignore_ascii_case(text.trim())
            || option.split('/').any(|part| {
                let significant: Vec<String> = words(part)
                    .into_iter()
                    .filter(|w| !STOP_WORDS.contains(&w.as_str()))
                    .collect();
                !significant.is_empty()
                    && significant.iter().all(|w| input.contains(&stem(w)))
            })
    })
}

/// Strip lead-ins such as "my name is" and surrounding punctuation.
pub fn extract_name(text: &str) -> Option<String> {
    let trimmed = text
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ','));
    let lower = trimmed.to_lowercase();
    let rest = NAME_PREFIXES
        .iter()
        .find(|p| lower.starts_with(*p))
        .and_then(|p| trimmed.get(p.len()..))
        .unwrap_or(trimmed);
    let name = rest.trim().trim_matches(|c: char| !c.is_alphanumeric());
    (!name.is_empty()).then(|| name.to_owned())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn required_text(args: &IntentArgs, param: &str) -> std::result::Result<String, IntentResult> {
    match args.text(param) {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(IntentResult::error(format!("missing `{param}`"))),
    }
}

/// Waits for the participant to signal readiness.
pub struct ReadyHandler {
    pub param: &'static str,
}

#[async_trait]
impl IntentHandler for ReadyHandler {
    async fn handle(&self, args: &IntentArgs, _ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let ready = args.flag(self.param).unwrap_or(false)
            || args.text(self.param).is_some_and(|t| is_ready(&t));
        Ok(if ready {
            IntentResult::success().with_field("user_ready", true)
        } else {
            IntentResult::error("participant has not indicated readiness")
        })
    }
}

pub struct CollectNameHandler;

#[async_trait]
impl IntentHandler for CollectNameHandler {
    async fn handle(&self, args: &IntentArgs, _ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let text = match required_text(args, "user_name") {
            Ok(text) => text,
            Err(result) => return Ok(result),
        };
        Ok(match extract_name(&text) {
            Some(name) => IntentResult::success()
                .with_field("user_name", name.clone())
                .with_update(StateUpdate::UserName(name)),
            None => IntentResult::error("no name recognized"),
        })
    }
}

pub struct SelectChallengeHandler;

#[async_trait]
impl IntentHandler for SelectChallengeHandler {
    async fn handle(&self, args: &IntentArgs, _ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let text = match required_text(args, "challenge") {
            Ok(text) => text,
            Err(result) => return Ok(result),
        };
        Ok(match match_challenge(&text) {
            Some(challenge) => IntentResult::success()
                .with_field("challenge", challenge.label)
                .with_update(StateUpdate::Challenge(challenge.label.to_owned())),
            None => IntentResult::error(format!("`{text}` does not match a listed challenge")),
        })
    }
}

/// Yes / no confirmation; the result carries `confirmed`.
pub struct ConfirmHandler {
    pub param: &'static str,
}

#[async_trait]
impl IntentHandler for ConfirmHandler {
    async fn handle(&self, args: &IntentArgs, _ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let answer = args
            .flag(self.param)
            .or_else(|| args.text(self.param).and_then(|t| classify_affirmation(&t)));
        Ok(match answer {
            Some(confirmed) => IntentResult::success().with_field("confirmed", confirmed),
            None => IntentResult::error("answer was neither a yes nor a no"),
        })
    }
}

/// Records the in-depth description, then waits (capped) until the
/// utterance's emotions are fully processed.
pub struct RecordChallengeInDepthHandler;

#[async_trait]
impl IntentHandler for RecordChallengeInDepthHandler {
    async fn handle(&self, args: &IntentArgs, ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let text = match required_text(args, "user_challenge_in_depth") {
            Ok(text) => text,
            Err(result) => return Ok(result),
        };

        let mut gate = ctx.emotions.clone();
        let outcome = gate
            .wait_fully_processed(ctx.config.emotion_wait_cap())
            .await;
        if outcome.timed_out {
            tracing::warn!(
                summary = %outcome.snapshot.summary,
                "emotions not fully processed within cap; using partial summary"
            );
        }

        let challenge = ctx.state.challenge.clone().unwrap_or_default();
        Ok(IntentResult::success()
            .with_field("emotions_fully_processed", outcome.snapshot.fully_processed)
            .with_field("emotions_summary", outcome.snapshot.summary.clone())
            .with_field("challenge", challenge)
            .with_field("timed_out", outcome.timed_out)
            .with_update(StateUpdate::ChallengeInDepth(text.trim().to_owned()))
            .with_update(StateUpdate::Emotions(outcome.snapshot)))
    }
}

pub struct SelectEmpoweredStateHandler;

#[async_trait]
impl IntentHandler for SelectEmpoweredStateHandler {
    async fn handle(&self, args: &IntentArgs, ctx: &HandlerContext<'_>) -> Result<IntentResult> {
        let text = match required_text(args, "empowered_state") {
            Ok(text) => text,
            Err(result) => return Ok(result),
        };
        let options = offered_empowered_states(ctx.state);
        Ok(match match_option(&text, &options) {
            Some(state) => IntentResult::success()
                .with_field("empowered_state", state)
                .with_update(StateUpdate::EmpoweredState(state.to_owned())),
            None => IntentResult::error(format!(
                "`{text}` does not match any of: {}",
                options.join(", ")
            )),
        })
    }
}

/// Empowered states for the recorded challenge, or all of them if none
/// was recorded.
fn offered_empowered_states(state: &SessionState) -> Vec<&'static str> {
    match state.challenge.as_deref().map(empowered_states_for) {
        Some(options) if !options.is_empty() => options.to_vec(),
        _ => {
            let err = SphinxError::StateInvariant(
                "empowered states requested without a challenge".into(),
            );
            tracing::warn!(error = %err, "offering every empowered state");
            all_empowered_states()
        }
    }
}

// ---------------------------------------------------------------------------
// Node factories
// ---------------------------------------------------------------------------

fn role(ctx: &ScriptContext) -> String {
    format!(
        "You are {}, a wise, helpful and friendly voice assistant. Keep your responses \
         concise and conversational. Speak slowly and calmly. Always call the provided \
         functions, never skip.",
        ctx.assistant_name
    )
}

fn yes_no(prompt: &str) -> UiHint {
    UiHint::List {
        prompt: prompt.to_owned(),
        options: vec!["Yes".into(), "No".into()],
    }
}

fn ready_intent(description: &str) -> Intent {
    Intent::new(
        "check_for_ready",
        description,
        Arc::new(ReadyHandler { param: "user_ready" }),
    )
    .param("user_ready", ParamKind::String, "Is the user ready?")
}

fn confirm_intent(name: &str, description: &str) -> Intent {
    Intent::new(name, description, Arc::new(ConfirmHandler { param: "user_input" })).param(
        "user_input",
        ParamKind::String,
        "The user's confirmation: yes or no, or a word of affirmation or denial",
    )
}

fn greeting(_: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    ConversationNode::new(
        NodeId::Greeting,
        role(ctx),
        "Greet the user with a message very similar to this: 'Welcome Seeker! To begin your \
         quest, we invite you to ground and center with a few deep breaths. When you are ready \
         to proceed let me know.'",
    )
    .with_intent(
        ready_intent(
            "Wait for the user to be ready to proceed, then move on to collecting their name.",
        )
        .transition(Transition::To(NodeId::CollectName)),
    )
    .with_ui_hint(UiHint::Button {
        prompt: "Is participant ready?".into(),
        action_text: "I am ready".into(),
    })
}

fn collect_name(_: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    ConversationNode::new(NodeId::CollectName, role(ctx), "Ask the user for their name.")
        .with_intent(
            Intent::new("collect_name", "Record the user's name.", Arc::new(CollectNameHandler))
                .param("user_name", ParamKind::String, "The user's name")
                .transition(Transition::To(NodeId::ConsiderChallenge)),
        )
        .with_ui_hint(UiHint::TextInput {
            prompt: "What is the participant's name?".into(),
            placeholder: "Name".into(),
            submit_text: "Submit".into(),
        })
}

fn consider_challenge(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let name = state.user_name.as_deref().unwrap_or("Seeker");
    ConversationNode::new(
        NodeId::ConsiderChallenge,
        role(ctx),
        format!(
            "Address {name} by name. Invite them to consider a difficult thought and a specific \
             challenge associated with it, which they will match to the challenges printed on the \
             poster in front of them. Use language very similar to this: 'Consider your thoughts. \
             Is there one you wish you could avoid, one that calls for attention but makes you \
             feel stuck, disconnected, or out of balance? When you have it in mind, let me know \
             you are ready.'"
        ),
    )
    .with_intent(
        ready_intent("Wait for the user to be ready to proceed")
            .transition(Transition::To(NodeId::SelectChallenge)),
    )
    .with_ui_hint(UiHint::Button {
        prompt: "Is participant ready?".into(),
        action_text: "I am ready".into(),
    })
}

fn select_challenge(_: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    ConversationNode::new(
        NodeId::SelectChallenge,
        role(ctx),
        "Prompt the user: Which challenge listed is most alive for you right now?",
    )
    .with_intent(
        Intent::new(
            "select_challenge",
            "Record the user's selected challenge",
            Arc::new(SelectChallengeHandler),
        )
        .param("challenge", ParamKind::String, "The user's selected challenge")
        .transition(Transition::To(NodeId::ConfirmChallenge)),
    )
    .with_ui_hint(UiHint::List {
        prompt: "Which challenge listed is most alive for you right now?".into(),
        options: CHALLENGES.iter().map(|c| c.label.to_owned()).collect(),
    })
}

fn confirm_challenge(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let challenge = state.challenge.as_deref().unwrap_or("the selected challenge");
    ConversationNode::new(
        NodeId::ConfirmChallenge,
        role(ctx),
        format!(
            "Confirm with the user the previously selected challenge. Example: 'You have \
             selected {challenge}. Is this correct?'"
        ),
    )
    .with_intent(
        confirm_intent(
            "confirm_challenge",
            "Record the user's confirmation that we have selected the correct challenge",
        )
        .transition(Transition::Dynamic(|_, result| {
            if result.field_bool("confirmed") {
                NodeId::RecordChallengeInDepth
            } else {
                NodeId::SelectChallenge
            }
        })),
    )
    .with_ui_hint(yes_no("Is participant confirming?"))
}

fn record_challenge_in_depth(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let challenge = state
        .challenge
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_else(|| "this way".into());
    ConversationNode::new(
        NodeId::RecordChallengeInDepth,
        role(ctx),
        format!(
            "Explore the user's challenge in depth. Example: 'I see you're feeling {challenge}. \
             What is it like to be going through it?' Give them ample time to respond while \
             their emotions are processed."
        ),
    )
    .with_intent(
        Intent::new(
            "record_challenge_in_depth",
            "Record the user's challenge in depth. Once recorded, wait for emotions to be \
             processed.",
            Arc::new(RecordChallengeInDepthHandler),
        )
        .param(
            "user_challenge_in_depth",
            ParamKind::String,
            "The user's own description of their challenge in depth",
        )
        .transition(Transition::To(NodeId::ConfirmEmotions)),
    )
}

fn confirm_emotions(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let challenge = state.challenge.as_deref().unwrap_or("this challenge");
    let prompt = if state.emotions_summary.is_empty() {
        format!(
            "No clear emotions were detected. Reflect back what the user shared about \
             {challenge} and ask whether it captures how they feel."
        )
    } else {
        let summary = &state.emotions_summary;
        format!(
            "Emotions detected: {summary}. Confirm with the user the emotions detected while \
             they were speaking about the challenge in depth. For example: 'It sounds like \
             you're feeling {summary} from experiencing {challenge}. Is that true?'"
        )
    };
    ConversationNode::new(NodeId::ConfirmEmotions, role(ctx), prompt)
        .with_intent(
            confirm_intent(
                "confirm_emotions",
                "Record the user's confirmation of detected emotions",
            )
            .transition(Transition::Dynamic(|_, result| {
                if result.field_bool("confirmed") {
                    NodeId::IdentifyEmpoweredState
                } else {
                    NodeId::RecordChallengeInDepth
                }
            })),
        )
        .with_ui_hint(yes_no("Are these emotions accurate?"))
}

fn identify_empowered_state(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let options = offered_empowered_states(state);
    ConversationNode::new(
        NodeId::IdentifyEmpoweredState,
        role(ctx),
        format!(
            "Guide the participant in envisioning their desired future state: 'What if your \
             challenges are just the beginning of a quest? When you have passed through this \
             challenge, what will you be like? How will you feel?' Match their answer to one of: \
             {}.",
            options.join(", ")
        ),
    )
    .with_intent(
        Intent::new(
            "select_empowered_state",
            "Record the empowered state the user envisions",
            Arc::new(SelectEmpoweredStateHandler),
        )
        .param("empowered_state", ParamKind::String, "The user's envisioned empowered state")
        .transition(Transition::To(NodeId::ConfirmEmpoweredState)),
    )
    .with_ui_hint(UiHint::List {
        prompt: "Which empowered state does the participant envision?".into(),
        options: options.iter().map(|s| (*s).to_owned()).collect(),
    })
}

fn confirm_empowered_state(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let empowered = state.empowered_state.as_deref().unwrap_or("empowered");
    ConversationNode::new(
        NodeId::ConfirmEmpoweredState,
        role(ctx),
        format!(
            "Confirm with the user: 'It sounds like you will feel {empowered}. Is this correct?'"
        ),
    )
    .with_intent(
        confirm_intent(
            "confirm_empowered_state",
            "Record the user's confirmation of their empowered state",
        )
        .transition(Transition::Dynamic(|_, result| {
            if result.field_bool("confirmed") {
                NodeId::Goodbye
            } else {
                NodeId::IdentifyEmpoweredState
            }
        })),
    )
    .with_ui_hint(yes_no("Is participant confirming?"))
}

fn goodbye(state: &SessionState, ctx: &ScriptContext) -> ConversationNode {
    let name = state.user_name.as_deref().unwrap_or("Seeker");
    ConversationNode::new(
        NodeId::Goodbye,
        role(ctx),
        format!(
            "Say goodbye to {name} by name: 'Thank you for sharing and taking the time to explore \
             your inner landscape! Now please let your guide know you are ready to view your \
             destiny.'"
        ),
    )
}

/// Registry holding every node of the script, starting at the greeting.
pub fn sphinx_registry(config: &FlowConfig) -> NodeRegistry {
    let mut registry = NodeRegistry::new(NodeId::Greeting, ScriptContext::from_config(config));
    registry.register(NodeId::Greeting, greeting);
    registry.register(NodeId::CollectName, collect_name);
    registry.register(NodeId::ConsiderChallenge, consider_challenge);
    registry.register(NodeId::SelectChallenge, select_challenge);
    registry.register(NodeId::ConfirmChallenge, confirm_challenge);
    registry.register(NodeId::RecordChallengeInDepth, record_challenge_in_depth);
    registry.register(NodeId::ConfirmEmotions, confirm_emotions);
    registry.register(NodeId::IdentifyEmpoweredState, identify_empowered_state);
    registry.register(NodeId::ConfirmEmpoweredState, confirm_empowered_state);
    registry.register(NodeId::Goodbye, goodbye);
    registry
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::time::Duration;

    use super::*;
    use crate::emotion::{EmotionGate, EmotionScore, EmotionSnapshot};

    // ── recognizers ──

    #[test]
    fn affirmation_classification() {
        assert_eq!(classify_affirmation("Yes, that's right"), Some(true));
        assert_eq!(classify_affirmation("absolutely"), Some(true));
        assert_eq!(classify_affirmation("No"), Some(false));
        assert_eq!(classify_affirmation("that's not right"), Some(false));
        assert_eq!(classify_affirmation("I don't think so"), Some(false));
        assert_eq!(classify_affirmation("purple"), None);
        // "know" must not read as "no".
        assert_eq!(classify_affirmation("I know"), None);
    }

    #[test]
    fn readiness() {
        assert!(is_ready("I am ready"));
        assert!(is_ready("Let's go"));
        assert!(!is_ready("I'm not ready yet"));
        assert!(!is_ready("hmm"));
    }

    #[test]
    fn challenge_keywords_map_to_labels() {
        assert_eq!(match_challenge("I'm so anxious").map(|c| c.label), Some("Fearful / Anxious"));
        assert_eq!(
            match_challenge("I feel stuck").map(|c| c.label),
            Some("Stagnant / Ruminating")
        );
        assert_eq!(
            match_challenge("Lack of Agency").map(|c| c.label),
            Some("Lack of Control/Agency")
        );
        assert_eq!(match_challenge("I always feel left out").map(|c| c.label), Some("Excluded"));
        assert_eq!(match_challenge("shameful").map(|c| c.label), Some("Shameful"));
        assert!(match_challenge("pizza").is_none());
    }

    #[test]
    fn every_challenge_label_matches_itself() {
        for challenge in CHALLENGES {
            assert_eq!(match_challenge(challenge.label).map(|c| c.label), Some(challenge.label));
        }
    }

    #[test]
    fn empowered_state_matching() {
        let options = empowered_states_for("Excluded");
        assert_eq!(match_option("I want to trust others", options), Some("Trusting Others"));
        assert_eq!(match_option("respected", options), Some("Respected"));
        assert_eq!(
            match_option("communing with my group", options),
            Some("Communing with a group")
        );
        assert_eq!(match_option("a dragon", options), None);

        let fearful = empowered_states_for("Fearful / Anxious");
        assert_eq!(match_option("more risking", fearful), Some("Experimental / Risking"));
    }

    #[test]
    fn unknown_challenge_has_no_states() {
        assert!(empowered_states_for("Bored").is_empty());
        let all = all_empowered_states();
        assert!(all.contains(&"Self-Love / Pride"));
        assert_eq!(all.iter().filter(|s| **s == "Leadership").count(), 1);
    }

    #[test]
    fn name_extraction() {
        assert_eq!(extract_name("My name is Ada.").as_deref(), Some("Ada"));
        assert_eq!(extract_name("i'm Grace Hopper").as_deref(), Some("Grace Hopper"));
        assert_eq!(extract_name("Linus").as_deref(), Some("Linus"));
        assert_eq!(extract_name("  ...  "), None);
    }

    // ── handlers ──

    fn ctx<'a>(
        state: &'a SessionState,
        gate: &'a EmotionGate,
        config: &'a FlowConfig,
    ) -> HandlerContext<'a> {
        HandlerContext {
            state,
            emotions: gate,
            config,
        }
    }

    #[tokio::test]
    async fn ready_accepts_flag_or_words() {
        let (state, gate, config) = (
            SessionState::new(),
            EmotionGate::ready(),
            FlowConfig::default(),
        );
        let handler = ReadyHandler { param: "user_ready" };
        let c = ctx(&state, &gate, &config);

        let yes = IntentArgs::new().with("user_ready", true);
        assert!(handler.handle(&yes, &c).await.unwrap().is_success());
        let words = IntentArgs::new().with("user_ready", "I am ready");
        assert!(handler.handle(&words, &c).await.unwrap().is_success());
        let other = IntentArgs::new().with("user_ready", "what is this place?");
        assert!(!handler.handle(&other, &c).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn name_handler_emits_update() {
        let (state, gate, config) = (
            SessionState::new(),
            EmotionGate::ready(),
            FlowConfig::default(),
        );
        let result = CollectNameHandler
            .handle(
                &IntentArgs::new().with("user_name", "my name is Ada"),
                &ctx(&state, &gate, &config),
            )
            .await
            .unwrap();
        assert_eq!(result.updates, vec![StateUpdate::UserName("Ada".into())]);

        let blank = CollectNameHandler
            .handle(&IntentArgs::new().with("user_name", " "), &ctx(&state, &gate, &config))
            .await
            .unwrap();
        assert!(!blank.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn in_depth_waits_for_processed_emotions() {
        let (tx, rx) = tokio::sync::watch::channel(EmotionSnapshot::started(1));
        let gate = EmotionGate::new(rx);
        let mut state = SessionState::new();
        state.challenge = Some("Scarcity".into());
        let config = FlowConfig::default();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = tx.send(EmotionSnapshot {
                utterance: 1,
                combined: Some(vec![EmotionScore::new("Doubt", 0.5)]),
                summary: "Doubt".into(),
                fully_processed: true,
                ..EmotionSnapshot::default()
            });
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let result = RecordChallengeInDepthHandler
            .handle(
                &IntentArgs::new().with("user_challenge_in_depth", "Money is always tight"),
                &ctx(&state, &gate, &config),
            )
            .await
            .unwrap();
        assert!(result.field_bool("emotions_fully_processed"));
        assert!(!result.field_bool("timed_out"));
        assert_eq!(result.fields["emotions_summary"], "Doubt");
        assert_eq!(result.fields["challenge"], "Scarcity");
    }

    #[tokio::test(start_paused = true)]
    async fn in_depth_proceeds_after_cap() {
        let (_tx, rx) = tokio::sync::watch::channel(EmotionSnapshot::started(1));
        let gate = EmotionGate::new(rx);
        let state = SessionState::new();
        let config = FlowConfig {
            emotion_wait_cap_secs: 2,
            ..FlowConfig::default()
        };

        let started = tokio::time::Instant::now();
        let result = RecordChallengeInDepthHandler
            .handle(
                &IntentArgs::new().with("user_challenge_in_depth", "It is hard"),
                &ctx(&state, &gate, &config),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(result.field_bool("timed_out"));
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn empowered_state_uses_challenge_table() {
        let mut state = SessionState::new();
        state.challenge = Some("Obsessed".into());
        let (gate, config) = (EmotionGate::ready(), FlowConfig::default());

        let ok = SelectEmpoweredStateHandler
            .handle(
                &IntentArgs::new().with("empowered_state", "relaxed"),
                &ctx(&state, &gate, &config),
            )
            .await
            .unwrap();
        assert_eq!(ok.updates, vec![StateUpdate::EmpoweredState("Relaxed".into())]);

        let miss = SelectEmpoweredStateHandler
            .handle(
                &IntentArgs::new().with("empowered_state", "Leadership"),
                &ctx(&state, &gate, &config),
            )
            .await
            .unwrap();
        assert!(!miss.is_success());
    }

    // ── script graph ──

    #[test]
    fn every_reachable_node_is_registered() {
        let registry = sphinx_registry(&FlowConfig::default());
        let state = SessionState::new();
        for id in [
            NodeId::Greeting,
            NodeId::CollectName,
            NodeId::ConsiderChallenge,
            NodeId::SelectChallenge,
            NodeId::ConfirmChallenge,
            NodeId::RecordChallengeInDepth,
            NodeId::ConfirmEmotions,
            NodeId::IdentifyEmpoweredState,
            NodeId::ConfirmEmpoweredState,
            NodeId::Goodbye,
        ] {
            let node = registry.build(id, &state).unwrap();
            assert_eq!(node.id, id);
            for intent in &node.intents {
                if let Transition::To(next) = intent.transition {
                    assert!(registry.contains(next), "{id} -> {next}");
                }
            }
        }
        assert!(registry.build(NodeId::Goodbye, &state).unwrap().is_terminal());
    }

    #[test]
    fn prompts_interpolate_state() {
        let registry = sphinx_registry(&FlowConfig::default());
        let mut state = SessionState::new();
        state.challenge = Some("Scarcity".into());
        state.emotions_summary = "Joy, Calm and Fear".into();
        state.user_name = Some("Ada".into());

        let confirm = registry.build(NodeId::ConfirmEmotions, &state).unwrap();
        assert!(confirm.prompt.contains("Joy, Calm and Fear"));
        assert!(confirm.prompt.contains("Scarcity"));
        assert!(registry.build(NodeId::Goodbye, &state).unwrap().prompt.contains("Ada"));
        assert!(confirm.role_prompt.starts_with("You are Sphinx"));
    }
}
