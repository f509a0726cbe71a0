//! Device Action Bridge
//!
//! Adapts the push-style progress stream of a device action into a future
//! that settles once. The subscription is dropped on the first terminal
//! state, which is how a stream subscription is released in Rust.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use super::error::DeviceActionFailure;
use super::state::{DeviceActionState, ExecuteDeviceAction};

/// Callback fired when a progress stream ends on its own
pub type OnComplete = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    AwaitingTerminal,
    Settled,
}

/// Future returned by [`run_device_action_once`]
///
/// Resolves with the output of the first `Completed` state or the error of
/// the first `Error` state. If the stream ends before either, the optional
/// callback runs and the future never settles.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct DeviceActionOnce<S> {
    subscription: Option<S>,
    on_complete: Option<OnComplete>,
    state: BridgeState,
}

impl<S> DeviceActionOnce<S> {
    fn settle(&mut self) {
        self.subscription = None;
        self.state = BridgeState::Settled;
    }
}

impl<S, O, E, I> Future for DeviceActionOnce<S>
where
    S: Stream<Item = DeviceActionState<O, E, I>> + Unpin,
{
    type Output = Result<O, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.state == BridgeState::Settled {
            tracing::warn!("device action polled after it settled, ignoring");
            return Poll::Pending;
        }

        loop {
            let Some(subscription) = this.subscription.as_mut() else {
                return Poll::Pending;
            };

            match subscription.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(DeviceActionState::Completed { output })) => {
                    this.settle();
                    return Poll::Ready(Ok(output));
                }
                Poll::Ready(Some(DeviceActionState::Error { error })) => {
                    this.settle();
                    return Poll::Ready(Err(error));
                }
                Poll::Ready(Some(state)) => {
                    tracing::trace!(status = ?state.status(), "device action progress");
                }
                Poll::Ready(None) => {
                    // Ended without a result: nothing will ever wake this future again.
                    this.subscription = None;
                    if let Some(on_complete) = this.on_complete.take() {
                        on_complete();
                    }
                    tracing::warn!("device action stream ended without a completed state");
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Start a device action and wait for its single result
///
/// `start` is invoked exactly once. The cancellation handle it returns is
/// not used.
pub fn run_device_action_once<F, S, O, E, I>(
    start: F,
    on_complete: Option<OnComplete>,
) -> DeviceActionOnce<S>
where
    F: FnOnce() -> ExecuteDeviceAction<S>,
    S: Stream<Item = DeviceActionState<O, E, I>> + Unpin,
{
    let ExecuteDeviceAction { observable, .. } = start();

    DeviceActionOnce {
        subscription: Some(observable),
        on_complete,
        state: BridgeState::AwaitingTerminal,
    }
}

/// Like [`run_device_action_once`], but a stream that ends or stops without
/// a result resolves to an error instead of hanging
pub async fn try_run_device_action_once<F, S, O, E, I>(
    start: F,
    on_complete: Option<OnComplete>,
) -> Result<O, DeviceActionFailure<E>>
where
    F: FnOnce() -> ExecuteDeviceAction<S>,
    S: Stream<Item = DeviceActionState<O, E, I>> + Unpin,
{
    let ExecuteDeviceAction {
        observable: mut subscription,
        ..
    } = start();

    while let Some(state) = subscription.next().await {
        match state {
            DeviceActionState::Completed { output } => return Ok(output),
            DeviceActionState::Error { error } => return Err(DeviceActionFailure::Action(error)),
            DeviceActionState::Stopped => return Err(DeviceActionFailure::Stopped),
            other => tracing::trace!(status = ?other.status(), "device action progress"),
        }
    }

    if let Some(on_complete) = on_complete {
        on_complete();
    }
    Err(DeviceActionFailure::StreamEnded)
}
