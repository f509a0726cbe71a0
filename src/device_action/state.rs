//! Device action state model

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Coarse status of a device action, mirrors the state tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceActionStatus {
    NotStarted,
    Pending,
    Stopped,
    Completed,
    Error,
}

/// Current point in a long-running device operation
///
/// `O` is the final output, `E` the typed error of the action and `I` the
/// intermediate value carried by pending states.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceActionState<O, E, I> {
    NotStarted,
    Pending { intermediate: I },
    Stopped,
    Completed { output: O },
    Error { error: E },
}

impl<O, E, I> DeviceActionState<O, E, I> {
    pub fn status(&self) -> DeviceActionStatus {
        match self {
            DeviceActionState::NotStarted => DeviceActionStatus::NotStarted,
            DeviceActionState::Pending { .. } => DeviceActionStatus::Pending,
            DeviceActionState::Stopped => DeviceActionStatus::Stopped,
            DeviceActionState::Completed { .. } => DeviceActionStatus::Completed,
            DeviceActionState::Error { .. } => DeviceActionStatus::Error,
        }
    }

    /// Terminal states end the action; at most one is ever emitted
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceActionState::Completed { .. } | DeviceActionState::Error { .. }
        )
    }
}

/// Interaction the user must perform on the device for the action to progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserInteractionRequired {
    None,
    UnlockDevice,
    VerifyAddress,
    SignPersonalMessage,
    SignTransaction,
    SignTypedData,
}

/// Step reached by an Ethereum signer action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignerStep {
    OpenApp,
    GetAddress,
    BuildContext,
    ProvideContext,
    SignMessage,
    SignTransaction,
    SignTypedData,
}

/// Intermediate value of every Ethereum signer action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerIntermediateValue {
    pub required_user_interaction: UserInteractionRequired,
    pub step: SignerStep,
}

impl SignerIntermediateValue {
    pub fn new(step: SignerStep, required_user_interaction: UserInteractionRequired) -> Self {
        Self {
            required_user_interaction,
            step,
        }
    }
}

pub type GetAddressIntermediateValue = SignerIntermediateValue;
pub type SignPersonalMessageIntermediateValue = SignerIntermediateValue;
pub type SignTransactionIntermediateValue = SignerIntermediateValue;
pub type SignTypedDataIntermediateValue = SignerIntermediateValue;

/// Stream of states produced by a device action
pub type DeviceActionStream<O, E, I> = BoxStream<'static, DeviceActionState<O, E, I>>;

/// Handle that aborts an in-flight action
pub type CancelHandle = Box<dyn FnOnce() + Send + 'static>;

/// What a device action initiator hands back: the progress stream plus an
/// optional cancellation handle
pub struct ExecuteDeviceAction<S> {
    pub observable: S,
    pub cancel: Option<CancelHandle>,
}

impl<S> ExecuteDeviceAction<S> {
    pub fn new(observable: S) -> Self {
        Self {
            observable,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: impl FnOnce() + Send + 'static) -> Self {
        self.cancel = Some(Box::new(cancel));
        self
    }
}

impl<S> std::fmt::Debug for ExecuteDeviceAction<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteDeviceAction")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}
