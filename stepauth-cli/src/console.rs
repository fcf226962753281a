// File: stepauth-cli/src/console.rs
//
// Turns challenge events into terminal prompts and feeds the answers back
// through the orchestrator.

use std::collections::HashMap;
use std::io::{stdout, Write};
use std::sync::Arc;
use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stepauth_common::models::{
    ChallengeInput, ChallengeKind, CustomChallengeInput, DeliveryMedium, MultiFactorInput,
    NewPasswordRequiredInput, PasswordChallengeInput, SignInOutcome,
};
use stepauth_core::backend::{DirectoryUser, UserDirectory, CUSTOM_ANSWER_KEY};
use stepauth_core::challenge::ChallengeEvent;
use stepauth_core::{BackendError, ChallengeOrchestrator, Error};

/// Typed at the MFA prompt to have the code prompt delivered again.
const RESEND_COMMAND: &str = "resend";

pub fn demo_directory() -> UserDirectory {
    let mut question = HashMap::new();
    question.insert("question".to_string(), "What is 6 x 7?".to_string());

    UserDirectory::from_users(vec![
        DirectoryUser::new("alice", "password1").with_mfa(DeliveryMedium::Sms, "+*******1234", "123456"),
        DirectoryUser::new("bob", "password1").requiring_new_password(vec!["email".into()]),
        DirectoryUser::new("carol", "password1").with_custom_challenge(question, "42"),
    ])
}

struct Console<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> Console<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }

    async fn prompt(&mut self, label: &str) -> anyhow::Result<String> {
        print!("{}: ", label);
        stdout().flush()?;
        match self.lines.next_line().await.context("reading from stdin")? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(anyhow!("input closed while waiting for {}", label)),
        }
    }

    async fn answer_password(
        &mut self,
        orchestrator: &ChallengeOrchestrator,
        input: PasswordChallengeInput,
    ) -> anyhow::Result<()> {
        let username = match input.username {
            Some(username) => {
                println!("Signing in as {}.", username);
                username
            }
            None => self.prompt("Username").await?,
        };
        let password = self.prompt("Password").await?;
        report(ChallengeKind::Password, orchestrator.resolve_password(username, password));
        Ok(())
    }

    async fn answer_new_password(
        &mut self,
        orchestrator: &ChallengeOrchestrator,
        input: NewPasswordRequiredInput,
    ) -> anyhow::Result<()> {
        println!("A new password is required.");
        let proposed = self.prompt("New password").await?;
        let mut attributes = HashMap::new();
        for attr in &input.required_attributes {
            let current = input.user_attributes.get(attr).cloned().unwrap_or_default();
            let value = self.prompt(&format!("{} [{}]", attr, current)).await?;
            attributes.insert(attr.clone(), if value.is_empty() { current } else { value });
        }
        report(
            ChallengeKind::NewPasswordRequired,
            orchestrator.resolve_new_password(proposed, attributes),
        );
        Ok(())
    }

    async fn answer_custom_challenge(
        &mut self,
        orchestrator: &ChallengeOrchestrator,
        input: CustomChallengeInput,
    ) -> anyhow::Result<()> {
        let parameters = serde_json::to_string_pretty(&input.challenge_parameters)?;
        println!("Additional challenge:\n{}", parameters);
        let answer = self.prompt("Answer").await?;
        let mut responses = HashMap::new();
        responses.insert(CUSTOM_ANSWER_KEY.to_string(), answer);
        report(
            ChallengeKind::CustomChallenge,
            orchestrator.resolve_custom_challenge(responses),
        );
        Ok(())
    }

    async fn answer_mfa(
        &mut self,
        orchestrator: &ChallengeOrchestrator,
        input: MultiFactorInput,
    ) -> anyhow::Result<()> {
        println!("A code was sent by {} to {}.", input.delivery_medium, input.destination);
        let code = self
            .prompt(&format!("Code (or '{}')", RESEND_COMMAND))
            .await?;
        if code.eq_ignore_ascii_case(RESEND_COMMAND) {
            report(ChallengeKind::MultiFactorCode, orchestrator.redeliver_mfa_prompt());
        } else {
            report(ChallengeKind::MultiFactorCode, orchestrator.resolve_mfa_code(code));
        }
        Ok(())
    }

    async fn handle(
        &mut self,
        orchestrator: &ChallengeOrchestrator,
        event: ChallengeEvent,
    ) -> anyhow::Result<()> {
        debug!(?event, "challenge event");
        match event {
            ChallengeEvent::Requested { input, .. } => match input {
                ChallengeInput::Password(input) => self.answer_password(orchestrator, input).await,
                ChallengeInput::NewPasswordRequired(input) => {
                    self.answer_new_password(orchestrator, input).await
                }
                ChallengeInput::CustomChallenge(input) => {
                    self.answer_custom_challenge(orchestrator, input).await
                }
                ChallengeInput::MultiFactorCode(input) => self.answer_mfa(orchestrator, input).await,
            },
            ChallengeEvent::Completed { kind, error } => {
                print_completion(kind, error.as_ref());
                Ok(())
            }
        }
    }
}

fn print_completion(kind: ChallengeKind, error: Option<&BackendError>) {
    match error {
        None => println!("✔ {} step accepted.", kind),
        Some(e) => println!("✘ {} step failed: {}", kind, e),
    }
}

fn report(kind: ChallengeKind, result: Result<(), Error>) {
    if let Err(e) = result {
        warn!(%kind, error = %e, "answer was not delivered");
        println!("Could not answer the {} challenge: {}", kind, e);
    }
}

/// Answers challenges from stdin until the flow task finishes.
pub async fn drive(
    orchestrator: &Arc<ChallengeOrchestrator>,
    events: mpsc::Receiver<ChallengeEvent>,
    flow: JoinHandle<Result<SignInOutcome, Error>>,
) -> anyhow::Result<SignInOutcome> {
    drive_with(BufReader::new(tokio::io::stdin()), orchestrator, events, flow).await
}

/// A flow that ends while a prompt is open abandons the prompt.
async fn drive_with<R: AsyncBufRead + Unpin>(
    reader: R,
    orchestrator: &Arc<ChallengeOrchestrator>,
    mut events: mpsc::Receiver<ChallengeEvent>,
    mut flow: JoinHandle<Result<SignInOutcome, Error>>,
) -> anyhow::Result<SignInOutcome> {
    let mut console = Console::new(reader);
    let joined = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => {
                tokio::select! {
                    handled = console.handle(orchestrator, event) => handled?,
                    joined = &mut flow => {
                        println!();
                        break joined;
                    }
                }
            }
            joined = &mut flow => break joined,
        }
    };

    // Completions that raced the flow's end. Requests are stale by now.
    while let Ok(event) = events.try_recv() {
        if let ChallengeEvent::Completed { kind, error } = event {
            print_completion(kind, error.as_ref());
        }
    }
    Ok(joined.context("sign-in task did not finish")??)
}
