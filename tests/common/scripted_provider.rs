//! In-process completion provider with scripted behaviour and call recording

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use completion_core::provider::{
    CompletionProvider, ProviderError, ProviderResult, Role, RunHandle, RunStatus, SessionSpec,
    ThreadMessage,
};

pub const CANNED_ANSWER: &str = "30 days.";

#[derive(Debug, Default)]
struct Script {
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, VecDeque<ProviderError>>,
    /// Status returned by `trigger_run`
    initial_run_status: Option<RunStatus>,
    /// Statuses returned by successive `poll_run` calls; the last one repeats
    poll_statuses: VecDeque<RunStatus>,
    answer: String,
    answer_missing: bool,
    posted: Vec<(String, String)>,
    sessions: Vec<SessionSpec>,
    deleted_threads: Vec<String>,
    deleted_sessions: Vec<String>,
    next_id: usize,
}

/// Scripted [`CompletionProvider`]. Runs complete immediately and answer
/// with [`CANNED_ANSWER`] unless told otherwise.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        let script = Script {
            answer: CANNED_ANSWER.to_string(),
            ..Script::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    pub fn shared(&self) -> Arc<dyn CompletionProvider> {
        Arc::new(self.clone())
    }

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: ProviderError) {
        self.script
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    pub fn fail_times(&self, operation: &'static str, times: usize, error: ProviderError) {
        for _ in 0..times {
            self.fail_next(operation, error.clone());
        }
    }

    pub fn with_run_statuses(&self, initial: RunStatus, polls: &[RunStatus]) {
        let mut script = self.script.lock();
        script.initial_run_status = Some(initial);
        script.poll_statuses = polls.iter().copied().collect();
    }

    pub fn set_answer(&self, answer: &str) {
        self.script.lock().answer = answer.to_string();
    }

    /// Newest thread message will be the user's question instead of an answer
    pub fn withhold_answer(&self) {
        self.script.lock().answer_missing = true;
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.script.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn posted_messages(&self) -> Vec<(String, String)> {
        self.script.lock().posted.clone()
    }

    pub fn created_sessions(&self) -> Vec<SessionSpec> {
        self.script.lock().sessions.clone()
    }

    pub fn deleted_threads(&self) -> Vec<String> {
        self.script.lock().deleted_threads.clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.script.lock().deleted_sessions.clone()
    }

    fn enter(&self, operation: &'static str) -> ProviderResult<()> {
        let mut script = self.script.lock();
        *script.calls.entry(operation).or_default() += 1;
        match script.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut script = self.script.lock();
        script.next_id += 1;
        format!("{prefix}_{}", script.next_id)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn create_session(&self, spec: &SessionSpec) -> ProviderResult<String> {
        self.enter("create_session")?;
        self.script.lock().sessions.push(spec.clone());
        Ok(self.next_id("asst"))
    }

    async fn create_thread(&self) -> ProviderResult<String> {
        self.enter("create_thread")?;
        Ok(self.next_id("thread"))
    }

    async fn post_message(
        &self,
        thread_id: &str,
        _role: Role,
        content: &str,
    ) -> ProviderResult<String> {
        self.enter("post_message")?;
        self.script
            .lock()
            .posted
            .push((thread_id.to_string(), content.to_string()));
        Ok(self.next_id("msg"))
    }

    async fn trigger_run(&self, _thread_id: &str, _session_id: &str) -> ProviderResult<RunHandle> {
        self.enter("trigger_run")?;
        let status = self
            .script
            .lock()
            .initial_run_status
            .unwrap_or(RunStatus::Completed);
        Ok(RunHandle {
            run_id: self.next_id("run"),
            status,
        })
    }

    async fn poll_run(&self, _thread_id: &str, _run_id: &str) -> ProviderResult<RunStatus> {
        self.enter("poll_run")?;
        let mut script = self.script.lock();
        let status = if script.poll_statuses.len() > 1 {
            script.poll_statuses.pop_front()
        } else {
            script.poll_statuses.front().copied()
        };
        Ok(status.unwrap_or(RunStatus::Completed))
    }

    async fn list_messages(&self, _thread_id: &str) -> ProviderResult<Vec<ThreadMessage>> {
        self.enter("list_messages")?;
        let (answer, missing, question) = {
            let script = self.script.lock();
            let question = script
                .posted
                .last()
                .map(|(_, content)| content.clone())
                .unwrap_or_default();
            (script.answer.clone(), script.answer_missing, question)
        };

        let asked = ThreadMessage {
            id: self.next_id("msg"),
            role: Role::User,
            content: question,
        };
        if missing {
            return Ok(vec![asked]);
        }
        Ok(vec![
            ThreadMessage {
                id: self.next_id("msg"),
                role: Role::Assistant,
                content: answer,
            },
            asked,
        ])
    }

    async fn delete_session(&self, session_id: &str) -> ProviderResult<()> {
        self.enter("delete_session")?;
        self.script
            .lock()
            .deleted_sessions
            .push(session_id.to_string());
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> ProviderResult<()> {
        self.enter("delete_thread")?;
        self.script.lock().deleted_threads.push(thread_id.to_string());
        Ok(())
    }
}
