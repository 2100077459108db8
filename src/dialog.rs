//! The administrator's multi-step configuration dialog.
//!
//! A strict linear state machine keyed to the single administrator identity.
//! Consuming an input yields a [`DialogEffect`] that the handler layer
//! executes (send a prompt, commit a rule, launch a broadcast), keeping the
//! machine itself free of transport and storage concerns.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;
use tokio::sync::Mutex;

use crate::config::{setting, DIALOG_TIMEOUT_SECS};
use crate::storage::{
    BannedPattern, PatternKind, RestrictionDuration, Store, StoreResult, UpsertOutcome,
};

/// The rule tables an admin can edit through the dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleTarget {
    #[serde(rename = "bw")]
    BannedWord,
    #[serde(rename = "bl")]
    BannedLink,
    #[serde(rename = "wl")]
    WhitelistPrefix,
    #[serde(rename = "ar")]
    AutoReply,
}

impl RuleTarget {
    /// Panel label, also used in list headers.
    pub fn label(&self) -> &'static str {
        match self {
            RuleTarget::BannedWord => "banned words",
            RuleTarget::BannedLink => "banned links",
            RuleTarget::WhitelistPrefix => "whitelisted link prefixes",
            RuleTarget::AutoReply => "auto-replies",
        }
    }

    fn value_prompt(&self) -> &'static str {
        match self {
            RuleTarget::BannedWord => "Send the word to ban.",
            RuleTarget::BannedLink => "Send the link substring to ban.",
            RuleTarget::WhitelistPrefix => "Send the allowed link prefix (e.g. https://example.org/).",
            RuleTarget::AutoReply => "Send the keyword that should trigger the auto-reply.",
        }
    }
}

/// Settings editable through the dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingTarget {
    #[serde(rename = "welcome")]
    Welcome,
    #[serde(rename = "warning")]
    Warning,
}

impl SettingTarget {
    pub fn key(&self) -> &'static str {
        match self {
            SettingTarget::Welcome => setting::WELCOME_MESSAGE,
            SettingTarget::Warning => setting::WARNING_MESSAGE,
        }
    }

    fn value_prompt(&self) -> &'static str {
        match self {
            SettingTarget::Welcome => "Send the new welcome message.",
            SettingTarget::Warning => {
                "Send the new warning message ({user} expands to the sender's name)."
            }
        }
    }
}

/// Entry points that open (or overwrite) a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogEntry {
    AddRule(RuleTarget),
    EditSetting(SettingTarget),
    Broadcast,
    SupportReply(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DialogStage {
    AwaitingValue(RuleTarget),
    AwaitingSetting(SettingTarget),
    AwaitingDuration { target: RuleTarget, value: String },
    AwaitingCustomDays { target: RuleTarget, value: String },
    AwaitingReplyText { keyword: String },
    AwaitingBroadcast,
    AwaitingSupportReply { user: UserId },
}

#[derive(Debug)]
struct DialogState {
    stage: DialogStage,
    last_activity: DateTime<Utc>,
}

/// A committed dialog result, applied to the store by the handler layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitSpec {
    BannedPattern(BannedPattern),
    WhitelistPrefix(String),
    AutoReply { keyword: String, response: String },
    Setting { key: &'static str, value: String },
}

impl CommitSpec {
    pub async fn apply(&self, store: &dyn Store) -> StoreResult<UpsertOutcome> {
        match self {
            CommitSpec::BannedPattern(pattern) => store.upsert_banned_pattern(pattern).await,
            CommitSpec::WhitelistPrefix(prefix) => store.upsert_whitelist_prefix(prefix).await,
            CommitSpec::AutoReply { keyword, response } => {
                store.upsert_auto_reply(keyword, response).await
            }
            CommitSpec::Setting { key, value } => {
                store.set_setting(key, value).await?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    /// Feedback line shown to the admin after the commit.
    pub fn confirmation(&self, outcome: UpsertOutcome) -> String {
        let verb = match outcome {
            UpsertOutcome::Created => "saved",
            UpsertOutcome::Updated => "updated",
        };
        match self {
            CommitSpec::BannedPattern(pattern) => format!(
                "Rule {verb}: {:?} ({}).",
                pattern.value,
                pattern.duration.label()
            ),
            CommitSpec::WhitelistPrefix(prefix) => {
                format!("Whitelist prefix {verb}: {prefix:?}.")
            }
            CommitSpec::AutoReply { keyword, .. } => {
                format!("Auto-reply {verb} for keyword {keyword:?}.")
            }
            CommitSpec::Setting { key, .. } => format!("Setting {verb}: {key}."),
        }
    }
}

/// What the handler layer must do after feeding the dialog one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEffect {
    /// Input was not for this dialog (wrong sender, or no dialog open).
    None,
    /// Ask the admin for the next piece of input.
    Prompt(String),
    /// Show the restriction-duration keyboard for the collected value.
    AskDuration { target: RuleTarget, value: String },
    /// Persist the collected rule and confirm.
    Commit(CommitSpec),
    /// Launch a broadcast with the collected payload.
    Broadcast(String),
    /// Deliver the admin's reply to a support-ticket user.
    SupportReply { user: UserId, text: String },
}

/// The per-administrator dialog. Exactly one session exists; starting a new
/// entry point mid-dialog overwrites the previous uncommitted state.
pub struct AdminConfigSession {
    admin: UserId,
    timeout: Duration,
    state: Mutex<Option<DialogState>>,
}

impl AdminConfigSession {
    pub fn new(admin: UserId) -> Self {
        Self::with_timeout(admin, Duration::seconds(DIALOG_TIMEOUT_SECS))
    }

    pub fn with_timeout(admin: UserId, timeout: Duration) -> Self {
        AdminConfigSession {
            admin,
            timeout,
            state: Mutex::new(None),
        }
    }

    /// Open a dialog at the given entry point, overwriting any previous
    /// state, and return the first prompt. `None` for non-admin senders.
    pub async fn begin(
        &self,
        sender: UserId,
        entry: DialogEntry,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if sender != self.admin {
            return None;
        }
        let (stage, prompt) = match entry {
            DialogEntry::AddRule(target) => (
                DialogStage::AwaitingValue(target),
                target.value_prompt().to_string(),
            ),
            DialogEntry::EditSetting(target) => (
                DialogStage::AwaitingSetting(target),
                target.value_prompt().to_string(),
            ),
            DialogEntry::Broadcast => (
                DialogStage::AwaitingBroadcast,
                "Send the broadcast text. It will go to every active user.".to_string(),
            ),
            DialogEntry::SupportReply(user) => (
                DialogStage::AwaitingSupportReply { user },
                format!("Send your reply to user {}.", user.0),
            ),
        };
        *self.state.lock().await = Some(DialogState {
            stage,
            last_activity: now,
        });
        Some(prompt)
    }

    /// Explicit cancel. Returns whether a dialog was open.
    pub async fn cancel(&self, sender: UserId, _now: DateTime<Utc>) -> bool {
        if sender != self.admin {
            return false;
        }
        self.state.lock().await.take().is_some()
    }

    /// Whether a live (non-expired) dialog is open for `sender`.
    pub async fn is_active(&self, sender: UserId, now: DateTime<Utc>) -> bool {
        if sender != self.admin {
            return false;
        }
        let mut state = self.state.lock().await;
        self.expire_if_idle(&mut state, now);
        state.is_some()
    }

    /// Feed a text input to the dialog.
    pub async fn on_text(&self, sender: UserId, text: &str, now: DateTime<Utc>) -> DialogEffect {
        if sender != self.admin {
            return DialogEffect::None;
        }
        let mut state = self.state.lock().await;
        self.expire_if_idle(&mut state, now);
        let Some(current) = state.take() else {
            return DialogEffect::None;
        };

        let text = text.trim();
        if text.is_empty() {
            // Nothing usable; keep waiting in the same stage.
            *state = Some(refreshed(current.stage, now));
            return DialogEffect::Prompt("Send a non-empty text.".to_string());
        }

        match current.stage {
            DialogStage::AwaitingValue(target) => match target {
                RuleTarget::BannedWord | RuleTarget::BannedLink => {
                    let value = text.to_string();
                    *state = Some(refreshed(
                        DialogStage::AwaitingDuration {
                            target,
                            value: value.clone(),
                        },
                        now,
                    ));
                    DialogEffect::AskDuration { target, value }
                }
                RuleTarget::WhitelistPrefix => {
                    DialogEffect::Commit(CommitSpec::WhitelistPrefix(text.to_string()))
                }
                RuleTarget::AutoReply => {
                    let keyword = text.to_lowercase();
                    let prompt = format!("Now send the reply text for {keyword:?}.");
                    *state = Some(refreshed(DialogStage::AwaitingReplyText { keyword }, now));
                    DialogEffect::Prompt(prompt)
                }
            },
            DialogStage::AwaitingSetting(target) => DialogEffect::Commit(CommitSpec::Setting {
                key: target.key(),
                value: text.to_string(),
            }),
            DialogStage::AwaitingDuration { target, value } => {
                // A duration is picked from the keyboard, not typed.
                *state = Some(refreshed(
                    DialogStage::AwaitingDuration { target, value },
                    now,
                ));
                DialogEffect::Prompt("Pick a restriction duration with the buttons.".to_string())
            }
            DialogStage::AwaitingCustomDays { target, value } => match text.parse::<u32>() {
                Ok(days) if days > 0 => DialogEffect::Commit(CommitSpec::BannedPattern(
                    banned_pattern(target, value, RestrictionDuration::CustomDays(days)),
                )),
                _ => {
                    *state = Some(refreshed(
                        DialogStage::AwaitingCustomDays { target, value },
                        now,
                    ));
                    DialogEffect::Prompt("Send the number of days as a positive integer.".to_string())
                }
            },
            DialogStage::AwaitingReplyText { keyword } => {
                DialogEffect::Commit(CommitSpec::AutoReply {
                    keyword,
                    response: text.to_string(),
                })
            }
            DialogStage::AwaitingBroadcast => DialogEffect::Broadcast(text.to_string()),
            DialogStage::AwaitingSupportReply { user } => DialogEffect::SupportReply {
                user,
                text: text.to_string(),
            },
        }
    }

    /// Feed a duration selection (keyboard tap) to the dialog.
    pub async fn on_duration(
        &self,
        sender: UserId,
        duration: RestrictionDuration,
        now: DateTime<Utc>,
    ) -> DialogEffect {
        if sender != self.admin {
            return DialogEffect::None;
        }
        let mut state = self.state.lock().await;
        self.expire_if_idle(&mut state, now);
        let Some(current) = state.take() else {
            return DialogEffect::None;
        };
        match current.stage {
            DialogStage::AwaitingDuration { target, value } => DialogEffect::Commit(
                CommitSpec::BannedPattern(banned_pattern(target, value, duration)),
            ),
            stage => {
                *state = Some(refreshed(stage, now));
                DialogEffect::None
            }
        }
    }

    /// The admin asked for a custom duration; switch to collecting a number
    /// of days as text.
    pub async fn request_custom_days(&self, sender: UserId, now: DateTime<Utc>) -> DialogEffect {
        if sender != self.admin {
            return DialogEffect::None;
        }
        let mut state = self.state.lock().await;
        self.expire_if_idle(&mut state, now);
        let Some(current) = state.take() else {
            return DialogEffect::None;
        };
        match current.stage {
            DialogStage::AwaitingDuration { target, value } => {
                *state = Some(refreshed(
                    DialogStage::AwaitingCustomDays { target, value },
                    now,
                ));
                DialogEffect::Prompt("How many days should the restriction last?".to_string())
            }
            stage => {
                *state = Some(refreshed(stage, now));
                DialogEffect::None
            }
        }
    }

    /// Inactivity beyond the timeout silently resets the dialog to idle.
    fn expire_if_idle(&self, state: &mut Option<DialogState>, now: DateTime<Utc>) {
        if let Some(current) = state.as_ref() {
            if now - current.last_activity > self.timeout {
                log::debug!("admin dialog timed out in stage {:?}", current.stage);
                *state = None;
            }
        }
    }
}

fn refreshed(stage: DialogStage, now: DateTime<Utc>) -> DialogState {
    DialogState {
        stage,
        last_activity: now,
    }
}

fn banned_pattern(target: RuleTarget, value: String, duration: RestrictionDuration) -> BannedPattern {
    let kind = match target {
        RuleTarget::BannedLink => PatternKind::LinkSubstring,
        // Only word/link targets ever reach a duration stage.
        _ => PatternKind::Word,
    };
    BannedPattern {
        value,
        kind,
        duration,
    }
}
