use std::collections::VecDeque;
use std::fmt;

use anyhow::Result;
use tracing::{debug, info};

use crate::error::StudioError;
use crate::llm::{GenerationRequest, ModelConfig};
use crate::models::{ChatMessage, GenerationResult, ImageAttachment};
use crate::project::{Project, Workspace};
use crate::prompts::PromptsConfig;

/// Replies that confirm a plan step waiting for approval.
pub const APPROVAL_WORDS: [&str; 5] = ["yes", "ha", "proceed", "y", "correct"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderPhase {
    Empty,
    PromptSent,
    Questioning,
    Building,
    PreviewReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    UserPrompt,
    Answered { has_questions: bool, has_files: bool },
    FilesApplied,
}

impl BuilderPhase {
    /// The transition table. Events that do not apply leave the phase as is.
    pub fn on(self, event: PhaseEvent) -> BuilderPhase {
        use BuilderPhase::*;
        match (self, event) {
            (Empty, PhaseEvent::UserPrompt) => PromptSent,
            (_, PhaseEvent::Answered { has_questions: true, .. }) => Questioning,
            (_, PhaseEvent::Answered { has_files: true, .. }) => Building,
            (Building | PromptSent, PhaseEvent::FilesApplied) => PreviewReady,
            (phase, _) => phase,
        }
    }

    /// Phase a reopened project starts in.
    pub fn for_project(project: &Project) -> BuilderPhase {
        if !project.files.is_empty() {
            BuilderPhase::PreviewReady
        } else if !project.messages.is_empty() {
            BuilderPhase::PromptSent
        } else {
            BuilderPhase::Empty
        }
    }
}

impl fmt::Display for BuilderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuilderPhase::Empty => "empty",
            BuilderPhase::PromptSent => "prompt-sent",
            BuilderPhase::Questioning => "questioning",
            BuilderPhase::Building => "building",
            BuilderPhase::PreviewReady => "preview-ready",
        };
        f.write_str(name)
    }
}

/// One request/response cycle that has started but not finished.
#[derive(Debug)]
pub struct Exchange {
    pub prompt: String,
    pub auto: bool,
    pub image: Option<ImageAttachment>,
    pub model: String,
    /// Committed to the history only when the exchange completes.
    user_messages: Vec<ChatMessage>,
    phase_before: BuilderPhase,
}

/// What a completed exchange changed and what should happen next.
#[derive(Debug, Default, PartialEq)]
pub struct ExchangeOutcome {
    pub changed_files: Vec<String>,
    /// Set when files changed; the message for the history snapshot.
    pub snapshot_message: Option<String>,
    /// Prompt for the next plan step, to be sent as an auto exchange.
    pub next_prompt: Option<String>,
    pub awaiting_approval: bool,
}

/// Chat state for the open project.
pub struct Session {
    pub project: Project,
    pub workspace: Workspace,
    prompts: PromptsConfig,
    auto_continue: bool,
    phase: BuilderPhase,
    plan: Vec<String>,
    queue: VecDeque<String>,
    in_flight: bool,
    awaiting_approval: bool,
}

impl Session {
    pub fn new(project: Project, prompts: PromptsConfig, auto_continue: bool) -> Self {
        let phase = BuilderPhase::for_project(&project);
        Self {
            project,
            workspace: Workspace::App,
            prompts,
            auto_continue,
            phase,
            plan: Vec::new(),
            queue: VecDeque::new(),
            in_flight: false,
            awaiting_approval: false,
        }
    }

    pub fn phase(&self) -> BuilderPhase {
        self.phase
    }

    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    pub fn queued_steps(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn is_awaiting_approval(&self) -> bool {
        self.awaiting_approval
    }

    /// Starts an exchange. Returns `None` when there is nothing to send.
    pub fn begin_exchange(
        &mut self,
        input: &str,
        image: Option<ImageAttachment>,
        auto: bool,
    ) -> Result<Option<Exchange>> {
        if self.in_flight && !auto {
            return Err(StudioError::Busy.into());
        }

        let text = input.trim();
        if text.is_empty() && image.is_none() {
            return Ok(None);
        }

        let phase_before = self.phase;
        let model = self.project.config.model().to_string();

        if self.awaiting_approval && !auto && APPROVAL_WORDS.contains(&text.to_lowercase().as_str()) {
            if let Some(step) = self.queue.pop_front() {
                info!("Plan step approved: {}", step);
                self.awaiting_approval = false;
                self.in_flight = true;
                return Ok(Some(Exchange {
                    prompt: self.prompts.get_approval_prompt(&step),
                    auto: true,
                    image: None,
                    model,
                    user_messages: vec![ChatMessage::user("Yes, proceed.")],
                    phase_before,
                }));
            }
        }

        if !auto {
            self.phase = self.phase.on(PhaseEvent::UserPrompt);
            // anything other than an approval drops the pending step
            self.awaiting_approval = false;
        }

        let user_messages = if auto {
            Vec::new()
        } else {
            let mut message = ChatMessage::user(text);
            message.image = image.as_ref().map(|i| format!("data:{};base64,{}", i.mime_type, i.data));
            vec![message]
        };

        self.in_flight = true;
        debug!("Exchange started (auto: {}, phase: {})", auto, self.phase);
        Ok(Some(Exchange {
            prompt: text.to_string(),
            auto,
            image,
            model,
            user_messages,
            phase_before,
        }))
    }

    /// Request for an exchange, scoped to the active workspace.
    pub fn request_for(&self, exchange: &Exchange) -> GenerationRequest {
        GenerationRequest {
            prompt: exchange.prompt.clone(),
            files: self.project.files.clone(),
            history: self.project.messages.clone(),
            image: exchange.image.clone(),
            scope: Some(self.workspace),
            model: ModelConfig::new(&exchange.model),
        }
    }

    /// Applies a finished reply: files, plan, history and phase.
    pub fn complete_exchange(&mut self, exchange: Exchange, result: GenerationResult) -> ExchangeOutcome {
        let mut outcome = ExchangeOutcome::default();
        let has_files = result.has_files();

        if !exchange.auto {
            self.phase = self.phase.on(PhaseEvent::Answered {
                has_questions: !result.questions.is_empty(),
                has_files,
            });
        }

        if let Some(files) = result.files.as_ref().filter(|_| has_files) {
            outcome.changed_files = self.project.files.merge(files);
            outcome.snapshot_message = Some(result.answer.chars().take(100).collect());
            self.phase = self.phase.on(PhaseEvent::FilesApplied);
        }

        let planned = !exchange.auto && !result.plan.is_empty();
        if planned {
            self.plan = result.plan.clone();
            self.queue = result.plan.iter().skip(1).cloned().collect();
        }

        let mut message = ChatMessage::assistant(result.answer.clone());
        message.plan = if exchange.auto {
            self.plan.clone()
        } else {
            result.plan.clone()
        };
        message.questions = result.valid_questions();
        message.files = result.files.clone();
        message.thought = result.thought.clone();
        message.model = Some(exchange.model.clone());

        self.project.messages.extend(exchange.user_messages);
        self.project.messages.push(message);

        let next_step = if exchange.auto || result.plan.len() > 1 {
            self.queue.pop_front()
        } else {
            None
        };

        if let Some(step) = next_step {
            if self.auto_continue {
                outcome.next_prompt = Some(self.prompts.get_auto_continue_prompt(&step));
            } else {
                self.queue.push_front(step);
                self.awaiting_approval = true;
                outcome.awaiting_approval = true;
            }
        }

        self.in_flight = false;
        debug!(
            "Exchange completed: {} files changed, phase {}",
            outcome.changed_files.len(),
            self.phase
        );
        outcome
    }

    /// Drops an exchange that was cancelled or failed. Nothing it produced is kept.
    pub fn cancel_exchange(&mut self, exchange: Exchange) {
        debug!("Exchange discarded (auto: {})", exchange.auto);
        self.phase = exchange.phase_before;
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Question, QuestionOption};
    use std::collections::BTreeMap;

    fn session(auto_continue: bool) -> Session {
        Session::new(Project::new("Shop"), PromptsConfig::default(), auto_continue)
    }

    fn reply(answer: &str, files: &[(&str, &str)], plan: &[&str]) -> GenerationResult {
        GenerationResult {
            thought: Some("thinking".to_string()),
            answer: answer.to_string(),
            files: (!files.is_empty()).then(|| {
                files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect::<BTreeMap<_, _>>()
            }),
            plan: plan.iter().map(|s| s.to_string()).collect(),
            questions: Vec::new(),
        }
    }

    #[test]
    fn test_phase_transitions() {
        use BuilderPhase::*;
        assert_eq!(Empty.on(PhaseEvent::UserPrompt), PromptSent);
        assert_eq!(PreviewReady.on(PhaseEvent::UserPrompt), PreviewReady);
        let questions = PhaseEvent::Answered { has_questions: true, has_files: true };
        assert_eq!(PromptSent.on(questions), Questioning);
        let files = PhaseEvent::Answered { has_questions: false, has_files: true };
        assert_eq!(PromptSent.on(files), Building);
        let neither = PhaseEvent::Answered { has_questions: false, has_files: false };
        assert_eq!(PromptSent.on(neither), PromptSent);
        assert_eq!(Building.on(PhaseEvent::FilesApplied), PreviewReady);
        assert_eq!(Questioning.on(PhaseEvent::FilesApplied), Questioning);
    }

    #[test]
    fn test_first_build_reaches_preview() {
        let mut session = session(true);
        let exchange = session.begin_exchange("Build a shop", None, false).unwrap().unwrap();
        assert_eq!(session.phase(), BuilderPhase::PromptSent);

        let outcome = session.complete_exchange(
            exchange,
            reply("Built a shop with a cart and checkout flow.", &[("app/index.html", "<div></div>")], &[]),
        );

        assert_eq!(session.phase(), BuilderPhase::PreviewReady);
        assert_eq!(outcome.changed_files, vec!["app/index.html".to_string()]);
        assert_eq!(outcome.snapshot_message.as_deref(), Some("Built a shop with a cart and checkout flow."));
        assert_eq!(outcome.next_prompt, None);
        assert_eq!(session.project.messages.len(), 2);
        assert!(!session.is_in_flight());
    }

    #[test]
    fn test_busy_rejects_second_exchange() {
        let mut session = session(true);
        let _first = session.begin_exchange("one", None, false).unwrap().unwrap();
        let err = session.begin_exchange("two", None, false).unwrap_err();
        assert!(matches!(err.downcast_ref::<StudioError>(), Some(StudioError::Busy)));
        assert!(session.begin_exchange("step", None, true).unwrap().is_some());
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let mut session = session(true);
        assert!(session.begin_exchange("   ", None, false).unwrap().is_none());
        assert_eq!(session.phase(), BuilderPhase::Empty);
    }

    #[test]
    fn test_plan_auto_continues_one_step_at_a_time() {
        let mut session = session(true);
        let exchange = session.begin_exchange("Build a blog", None, false).unwrap().unwrap();
        let outcome = session.complete_exchange(
            exchange,
            reply("Step one done", &[("app/index.html", "1")], &["layout", "posts", "comments"]),
        );
        assert_eq!(
            outcome.next_prompt.as_deref(),
            Some("AUTONOMOUS EXECUTION: Proceeding with next step: posts")
        );
        assert_eq!(session.queued_steps().collect::<Vec<_>>(), vec!["comments"]);

        let auto = session.begin_exchange(&outcome.next_prompt.unwrap(), None, true).unwrap().unwrap();
        let outcome = session.complete_exchange(auto, reply("Posts done", &[], &["ignored", "plan"]));
        assert_eq!(
            outcome.next_prompt.as_deref(),
            Some("AUTONOMOUS EXECUTION: Proceeding with next step: comments")
        );
        assert_eq!(session.plan(), ["layout", "posts", "comments"]);
        // auto exchanges add no user message
        assert_eq!(session.project.messages.len(), 3);
        assert_eq!(session.project.messages[2].plan.len(), 3);

        let auto = session.begin_exchange(&outcome.next_prompt.unwrap(), None, true).unwrap().unwrap();
        let outcome = session.complete_exchange(auto, reply("All done", &[], &[]));
        assert_eq!(outcome.next_prompt, None);
    }

    #[test]
    fn test_plan_waits_for_approval() {
        let mut session = session(false);
        let exchange = session.begin_exchange("Build a gym app", None, false).unwrap().unwrap();
        let outcome = session.complete_exchange(exchange, reply("Done", &[], &["ui", "booking"]));
        assert!(outcome.awaiting_approval);
        assert!(session.is_awaiting_approval());

        let approved = session.begin_exchange("Proceed", None, false).unwrap().unwrap();
        assert!(approved.auto);
        assert_eq!(approved.prompt, "DECISION: User confirmed. Execute the plan: booking");
        session.complete_exchange(approved, reply("Booking done", &[], &[]));

        let last_two: Vec<_> = session.project.messages.iter().rev().take(2).map(|m| m.content.as_str()).collect();
        assert_eq!(last_two, vec!["Booking done", "Yes, proceed."]);
        assert!(!session.is_awaiting_approval());
    }

    #[test]
    fn test_other_reply_drops_pending_approval() {
        let mut session = session(false);
        let exchange = session.begin_exchange("Build", None, false).unwrap().unwrap();
        session.complete_exchange(exchange, reply("Done", &[], &["a", "b"]));

        let exchange = session.begin_exchange("make it blue", None, false).unwrap().unwrap();
        assert!(!exchange.auto);
        assert!(!session.is_awaiting_approval());
    }

    #[test]
    fn test_questions_filtered_and_phase_questioning() {
        let mut session = session(true);
        let exchange = session.begin_exchange("Build a CRM", None, false).unwrap().unwrap();
        let mut result = reply("A few questions first", &[], &[]);
        result.questions = vec![
            Question {
                id: "q1".to_string(),
                text: "Need an admin panel?".to_string(),
                kind: Default::default(),
                options: vec![QuestionOption {
                    id: "yes".to_string(),
                    label: "Yes".to_string(),
                    sub_label: None,
                }],
                allow_other: None,
            },
            Question {
                id: "q2".to_string(),
                text: "Broken".to_string(),
                kind: Default::default(),
                options: Vec::new(),
                allow_other: None,
            },
        ];

        session.complete_exchange(exchange, result);
        assert_eq!(session.phase(), BuilderPhase::Questioning);
        assert_eq!(session.project.messages.last().unwrap().questions.len(), 1);
    }

    #[test]
    fn test_cancel_leaves_no_trace() {
        let mut session = session(true);
        session.project.files.set_content("app/index.html", "<div></div>");
        let before = session.project.files.clone();
        let phase = session.phase();

        let exchange = session.begin_exchange("Rewrite everything", None, false).unwrap().unwrap();
        session.cancel_exchange(exchange);

        assert_eq!(session.project.files, before);
        assert!(session.project.messages.is_empty());
        assert_eq!(session.phase(), phase);
        assert!(!session.is_in_flight());
        assert!(session.begin_exchange("again", None, false).unwrap().is_some());
    }

    #[test]
    fn test_request_is_scoped_to_workspace() {
        let mut session = session(true);
        session.workspace = Workspace::Admin;
        session.project.config.selected_model = Some("qwen-coder".to_string());
        let exchange = session.begin_exchange("Add charts", None, false).unwrap().unwrap();
        let request = session.request_for(&exchange);
        assert_eq!(request.scope, Some(Workspace::Admin));
        assert_eq!(request.model.model, "qwen-coder");
        assert!(request.history.is_empty());
    }
}
