// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Interactive prompting.
//!
//! Credential collection needs answers from the operator. The [`Prompter`]
//! trait is the seam between the validation loop in
//! [`credentials`](crate::credentials) and whatever supplies the answers,
//! which is a terminal in practice, and a canned script under test.

use inquire::{Password, PasswordDisplayMode, Text};
use std::collections::VecDeque;

/// Source of operator answers.
pub trait Prompter {
    /// Ask for visible text, offering a default shown to the operator.
    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String>;

    /// Ask for a secret. Input is masked.
    fn secret(&mut self, message: &str) -> Result<String>;
}

/// Terminal prompter through inquire.
///
/// Confirmation of secrets is left to the caller, so inquire's own
/// confirmation prompt is disabled.
#[derive(Debug, Default, Clone)]
pub struct InquirePrompter;

impl InquirePrompter {
    /// Construct new terminal prompter.
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for InquirePrompter {
    fn text(&mut self, message: &str, default: Option<&str>) -> Result<String> {
        let mut prompt = Text::new(message);
        if let Some(default) = default {
            prompt = prompt.with_placeholder(default);
        }

        Ok(prompt.prompt()?)
    }

    fn secret(&mut self, message: &str) -> Result<String> {
        Ok(Password::new(message)
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()?)
    }
}

/// Prompter that replays a fixed list of answers.
///
/// Answers are handed out in order regardless of whether text or a secret
/// was asked for.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    /// Construct new scripted prompter.
    pub fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    /// Every message asked so far, in order.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    /// Number of answers not yet consumed.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }

    fn next(&mut self, message: &str) -> Result<String> {
        self.asked.push(message.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| PromptError::Exhausted(message.to_string()))
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&mut self, message: &str, _default: Option<&str>) -> Result<String> {
        self.next(message)
    }

    fn secret(&mut self, message: &str) -> Result<String> {
        self.next(message)
    }
}

/// Prompting error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Terminal prompt failed or was cancelled by operator.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),

    /// Scripted prompter ran out of answers.
    #[error("no answer left for prompt {0:?}")]
    Exhausted(String),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
