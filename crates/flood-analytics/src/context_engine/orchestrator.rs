//! Per-turn pipeline: extract, merge, resolve, persist, render.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::context_db::schema::{ConversationTurn, NewTurn};
use crate::context_engine::entity_extractor::{EntityExtractor, ExtractedEntities, ExtractorConfig};
use crate::context_engine::merge_policy::{LocationPolicy, MergePolicy};
use crate::context_engine::query_resolver::{Answer, QueryResolver, ResultPayload};
use crate::context_engine::slots::{ContextDelta, ContextSlots, SlotKey};
use crate::dataset::Dataset;
use crate::memory::ContextStore;
use crate::utils::TextUtils;

const GREETINGS: &[&str] = &["hello", "hi", "hey", "greetings", "good morning", "good afternoon", "good evening"];

const HELP_PHRASES: &[&str] = &[
    "help",
    "what can you do",
    "what can i ask",
    "what questions can you answer",
    "sample questions",
    "show me examples",
    "capabilities",
];

const GREETING_REPLY: &str = "Hi! I can answer questions about flood control projects: how many there are, \
their total or average approved budget, the largest ones, and the details of a specific project ID. \
Ask \"help\" to see example questions.";

const HELP_REPLY: &str = "Here are some questions you can ask:\n\
- How many projects are in Quezon City?\n\
- What is the total budget? (I remember the place you asked about)\n\
- Average budget in Region III from 2018 to 2020\n\
- Top 10 projects by budget in Pampanga\n\
- 5 cheapest projects in Manila\n\
- Which contractor has the most projects in Cebu?\n\
- Top contractors by total budget in Region III\n\
- Budget trend by year in Bulacan\n\
- Show projects by Legacy Construction\n\
- more, or 10 more (next page of a list or ranking)\n\
- Tell me about project P00123456LZ\n\
- start over (forget the current filters)";

const RESET_REPLY: &str = "Okay, I've cleared the current filters. What would you like to know?";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub page_size: usize,
    pub default_top_n: usize,
    pub location_policy: LocationPolicy,
    pub history_limit: usize,
    pub extractor: ExtractorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            page_size: 5,
            default_top_n: 5,
            location_policy: LocationPolicy::Stack,
            history_limit: 10,
            extractor: ExtractorConfig::default(),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.page_size,
            default_top_n: config.default_top_n,
            location_policy: config.location_policy,
            history_limit: config.history_limit,
            extractor: ExtractorConfig {
                fuzzy_threshold: config.fuzzy_threshold,
                min_year: config.min_project_year,
                max_year: config.max_project_year,
                ..ExtractorConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub context_summary: String,
    /// `None` for greeting, help and reset turns
    pub payload: Option<ResultPayload>,
    /// False when any store write for this turn failed
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmallTalk {
    Greeting,
    Help,
}

impl SmallTalk {
    fn detect(question: &str) -> Option<Self> {
        let text = TextUtils::normalize(question);
        let words = text.split(' ').filter(|w| !w.is_empty()).count();
        let greeting = GREETINGS
            .iter()
            .any(|g| text == *g || (text.starts_with(&format!("{} ", g)) && words <= 4));
        if greeting {
            return Some(SmallTalk::Greeting);
        }
        if HELP_PHRASES.iter().any(|p| TextUtils::contains_phrase(&text, p)) {
            return Some(SmallTalk::Help);
        }
        None
    }

    fn reply(self) -> &'static str {
        match self {
            SmallTalk::Greeting => GREETING_REPLY,
            SmallTalk::Help => HELP_REPLY,
        }
    }
}

/// Entry point of the conversation layer. Owns nothing durable: all session state lives in
/// the injected [`ContextStore`].
pub struct QueryOrchestrator {
    store: Arc<dyn ContextStore>,
    extractor: EntityExtractor,
    merge_policy: MergePolicy,
    resolver: QueryResolver,
    config: OrchestratorConfig,
    /// Serializes turns of one session; different sessions proceed in parallel
    session_gates: DashMap<String, Arc<Mutex<()>>>,
}

impl QueryOrchestrator {
    pub fn new(store: Arc<dyn ContextStore>, dataset: Arc<Dataset>, config: OrchestratorConfig) -> Self {
        let reference = dataset.reference_values();
        let extractor = EntityExtractor::new(&reference, config.extractor.clone());
        let resolver = QueryResolver::new(dataset.clone(), config.page_size, config.default_top_n);

        info!(
            "Query orchestrator initialized: {} rows, {} municipalities, {} provinces, {} regions, {} contractors",
            dataset.len(),
            reference.municipalities.len(),
            reference.provinces.len(),
            reference.regions.len(),
            reference.contractors.len()
        );

        Self {
            store,
            extractor,
            merge_policy: MergePolicy::new(config.location_policy),
            resolver,
            config,
            session_gates: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// Answer text and a one-line summary of the context now in effect.
    pub fn answer(&self, question: &str, session_id: &str) -> (String, String) {
        let reply = self.respond(question, session_id, None);
        (reply.text, reply.context_summary)
    }

    /// Full turn. Without an explicit `prior_answer` the last stored answer of the session is
    /// used for back-references.
    pub fn respond(&self, question: &str, session_id: &str, prior_answer: Option<&str>) -> Reply {
        let gate = self.gate(session_id);
        let _guard = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut persisted = true;
        let mut note = |what: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!("Failed to {} for session {}: {}", what, session_id, e);
                persisted = false;
            }
        };

        let stored = match self.store.get_context(session_id) {
            Ok(slots) => slots,
            Err(e) => {
                warn!("Failed to load context for session {}: {}", session_id, e);
                ContextSlots::default()
            }
        };

        if let Some(talk) = SmallTalk::detect(question) {
            debug!("Small talk {:?} in session {}", talk, session_id);
            let text = talk.reply().to_string();
            note("record turn", self.record_turn(session_id, question, &text, serde_json::Value::Null));
            return Reply { text, context_summary: stored.summary(), payload: None, persisted };
        }

        let prior = match prior_answer {
            Some(p) => Some(p.to_string()),
            None => self.last_answer(session_id),
        };
        let extracted = self.extractor.extract(question, prior.as_deref(), stored.last_action.is_some());
        let entities_json = serde_json::to_value(&extracted).unwrap_or(serde_json::Value::Null);

        if Self::is_bare_reset(&extracted) {
            info!("Clearing context for session {}", session_id);
            note("clear context", self.store.clear_context(session_id, None));
            let text = RESET_REPLY.to_string();
            note("record turn", self.record_turn(session_id, question, &text, entities_json));
            let summary = ContextSlots::default().summary();
            return Reply { text, context_summary: summary, payload: None, persisted };
        }

        let outcome = self.merge_policy.merge(&extracted, &stored);
        let cursor = if extracted.signals.more {
            self.store.get_cursor(session_id).unwrap_or_else(|e| {
                warn!("Failed to load pagination cursor for session {}: {}", session_id, e);
                None
            })
        } else {
            None
        };

        let resolution = self.resolver.resolve(&extracted, &outcome.merged, cursor.as_ref());
        let final_slots = match resolution.payload.answer {
            // Nothing usable was asked, so nothing is remembered
            Answer::Clarification | Answer::NothingToContinue => stored.clone(),
            _ => resolution.payload.context.clone(),
        };

        let delta = ContextDelta::between(&stored, &final_slots);
        if !delta.is_empty() {
            note("save context", self.store.apply_delta(session_id, &delta));
        }
        if let Some(next) = &resolution.cursor {
            note("save pagination cursor", self.store.set_cursor(session_id, next));
        }

        let text = resolution.payload.render(self.resolver.page_size());
        note("record turn", self.record_turn(session_id, question, &text, entities_json));

        info!(
            "Session {} answered action={} new_topic={} persisted={}",
            session_id, resolution.payload.action, outcome.new_topic, persisted
        );

        Reply {
            text,
            context_summary: final_slots.summary(),
            payload: Some(resolution.payload),
            persisted,
        }
    }

    /// A clearing phrase with nothing else to act on.
    fn is_bare_reset(extracted: &ExtractedEntities) -> bool {
        extracted.signals.clear
            && !extracted.signals.keyword_matched
            && !extracted.signals.more
            && extracted.entities.is_empty()
    }

    fn gate(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_gates
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn last_answer(&self, session_id: &str) -> Option<String> {
        match self.store.get_history(session_id, 1) {
            Ok(turns) => turns.into_iter().last().map(|t| t.answer),
            Err(e) => {
                warn!("Failed to load history for session {}: {}", session_id, e);
                None
            }
        }
    }

    fn record_turn(&self, session_id: &str, question: &str, answer: &str, entities: serde_json::Value) -> Result<()> {
        self.store
            .append_turn(NewTurn {
                session_id: session_id.to_string(),
                question: question.to_string(),
                answer: answer.to_string(),
                entities,
            })
            .map(|_| ())
    }

    // Administrative operations

    /// Start a fresh session with a generated id.
    pub fn new_session(&self) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.store.ensure_session(&id)?;
        info!("Created session {}", id);
        Ok(id)
    }

    pub fn get_context(&self, session_id: &str) -> Result<ContextSlots> {
        self.store.get_context(session_id)
    }

    pub fn update_context(&self, session_id: &str, partial: &ContextSlots) -> Result<()> {
        let gate = self.gate(session_id);
        let _guard = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.store.update_context(session_id, partial)
    }

    /// Clear the given slots, or everything (including the pagination cursor) for `None`.
    pub fn clear_context(&self, session_id: &str, keys: Option<&[SlotKey]>) -> Result<()> {
        let gate = self.gate(session_id);
        let _guard = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.store.clear_context(session_id, keys)
    }

    /// Most recent turns, oldest first. `None` uses the configured history limit.
    pub fn get_history(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<ConversationTurn>> {
        self.store.get_history(session_id, limit.unwrap_or(self.config.history_limit))
    }

    pub fn prune_history(&self, session_id: &str, keep: usize) -> Result<usize> {
        let removed = self.store.prune_history(session_id, keep)?;
        if removed > 0 {
            info!("Pruned {} turns from session {}", removed, session_id);
        }
        Ok(removed)
    }

    pub fn cleanup_old_sessions(&self, older_than_days: i64) -> Result<usize> {
        let removed = self.store.cleanup_old_sessions(older_than_days)?;
        info!("Removed {} sessions idle for more than {} days", removed, older_than_days);
        // Gates of removed sessions are recreated on demand
        self.session_gates.retain(|_, gate| Arc::strong_count(gate) > 1);
        Ok(removed)
    }
}
