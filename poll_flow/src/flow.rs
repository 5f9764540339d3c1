//! The voting state machine.
//!
//! A session is either idle or holding a selection that waits for
//! confirmation. The confirmation dialog's two buttons are the `Confirm`
//! and `Cancel` inputs. Only a confirmed selection reaches the store.

use std::error::Error;
use std::fmt::Display;

use log::{debug, info, warn};

use crate::config::*;
use crate::cooldown;
use crate::store::{StoreError, VoteStore};

/// Where a session stands in the flow.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum FlowState<'a> {
    Idle,
    /// An option was picked and the confirmation dialog is open.
    Selecting(&'a str),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum FlowInput {
    /// An option button was pressed.
    Activate(String),
    Confirm,
    Cancel,
}

/// What a transition did, for the presentation layer to acknowledge.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Outcome {
    /// The option is now awaiting confirmation.
    Selected(String),
    /// The session is cooling down. Nothing changed.
    Blocked { remaining_seconds: i64 },
    /// The vote was recorded.
    Voted(VoteRecord),
    /// The selection was dropped without voting.
    Cancelled,
    /// Confirm or cancel arrived with no open selection. Nothing changed.
    NothingSelected,
}

/// A transition that could not complete. The session state is unchanged.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum TransitionError {
    Invalid(FlowErrors),
    /// The store failed; the selection is kept so the vote can be retried.
    Store(StoreError),
}

impl From<FlowErrors> for TransitionError {
    fn from(e: FlowErrors) -> Self {
        TransitionError::Invalid(e)
    }
}

impl From<StoreError> for TransitionError {
    fn from(e: StoreError) -> Self {
        TransitionError::Store(e)
    }
}

impl Error for TransitionError {}

impl Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::Invalid(e) => write!(f, "{}", e),
            TransitionError::Store(e) => write!(f, "{}", e),
        }
    }
}

/// The mutable state of one user session.
#[derive(PartialEq, Debug, Clone)]
pub struct SessionState {
    selected_option: Option<String>,
    last_action_time: Timestamp,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::new()
    }
}

impl SessionState {
    pub fn new() -> SessionState {
        SessionState {
            selected_option: None,
            last_action_time: Timestamp::EPOCH,
        }
    }

    pub fn selected_option(&self) -> Option<&str> {
        self.selected_option.as_deref()
    }

    /// Time of the last successful vote, or [`Timestamp::EPOCH`].
    pub fn last_action_time(&self) -> Timestamp {
        self.last_action_time
    }

    pub fn state(&self) -> FlowState<'_> {
        match self.selected_option.as_deref() {
            Some(option) => FlowState::Selecting(option),
            None => FlowState::Idle,
        }
    }

    pub fn is_blocked(&self, poll: &Poll, now: Timestamp) -> bool {
        cooldown::is_blocked(now, self.last_action_time, poll.rules.cooldown_seconds)
    }

    pub fn remaining_seconds(&self, poll: &Poll, now: Timestamp) -> i64 {
        cooldown::remaining_seconds(now, self.last_action_time, poll.rules.cooldown_seconds)
    }

    /// Applies one input.
    pub fn handle(
        &mut self,
        poll: &Poll,
        store: &dyn VoteStore,
        input: FlowInput,
        now: Timestamp,
    ) -> Result<Outcome, TransitionError> {
        match input {
            FlowInput::Activate(option) => self.activate(poll, &option, now),
            FlowInput::Confirm => self.confirm(poll, store, now),
            FlowInput::Cancel => Ok(self.cancel()),
        }
    }

    /// An option button was pressed.
    ///
    /// Pressing another option while the dialog is open replaces the
    /// selection.
    pub fn activate(
        &mut self,
        poll: &Poll,
        option: &str,
        now: Timestamp,
    ) -> Result<Outcome, TransitionError> {
        if poll.option(option).is_none() {
            return Err(FlowErrors::UnknownOption(option.to_string()).into());
        }
        if self.is_blocked(poll, now) {
            debug!("activate: {:?} ignored, session cooling down", option);
            return Ok(Outcome::Blocked {
                remaining_seconds: self.remaining_seconds(poll, now),
            });
        }
        debug!("activate: selected {:?}", option);
        self.selected_option = Some(option.to_string());
        Ok(Outcome::Selected(option.to_string()))
    }

    /// Records the selected option.
    ///
    /// On a store failure the selection is kept and the cooldown is not
    /// started.
    pub fn confirm(
        &mut self,
        poll: &Poll,
        store: &dyn VoteStore,
        now: Timestamp,
    ) -> Result<Outcome, TransitionError> {
        let option = match self.selected_option.as_deref() {
            Some(option) => option,
            None => return Ok(Outcome::NothingSelected),
        };
        // The same session may hold the dialog open in two places.
        if self.is_blocked(poll, now) {
            return Ok(Outcome::Blocked {
                remaining_seconds: self.remaining_seconds(poll, now),
            });
        }
        let record = VoteRecord::new(now, option)?;
        if let Err(e) = store.append(&record) {
            warn!("confirm: could not record vote for {:?}: {}", option, e);
            return Err(e.into());
        }
        info!("confirm: vote recorded for {:?} at {}", option, record.timestamp);
        self.last_action_time = now;
        self.selected_option = None;
        Ok(Outcome::Voted(record))
    }

    /// The user backed out of the dialog.
    pub fn cancel(&mut self) -> Outcome {
        match self.selected_option.take() {
            Some(option) => {
                debug!("cancel: dropped {:?}", option);
                Outcome::Cancelled
            }
            None => Outcome::NothingSelected,
        }
    }
}
