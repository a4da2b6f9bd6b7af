//! Single task owning the timer; calls and alarm firings are handled one
//! at a time so no write can clobber another.

use crate::state::VisibilityScope;
use crate::store::KeyValueStore;
use crate::timer::{Tick, TimerCore};
use floating_clock_ipc::{Reply, Request, RpcError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

const MAILBOX_SIZE: usize = 64;

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Result<Reply, RpcError>>,
}

enum Event {
    Call(Envelope),
    Tick,
    Closed,
}

/// Cloneable handle used by connections to reach the timer
#[derive(Clone)]
pub struct TimerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl TimerHandle {
    pub async fn call(&self, request: Request) -> Result<Reply, RpcError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| RpcError::Unavailable)?;
        rx.await.map_err(|_| RpcError::Unavailable)?
    }
}

/// Starts the timer task. It runs until every handle is dropped.
///
/// Store reads and writes run inline on this task. The storage document is
/// a few hundred bytes, so they finish well inside one tick.
pub fn spawn<S>(mut core: TimerCore<S>) -> (TimerHandle, JoinHandle<()>)
where
    S: KeyValueStore + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(MAILBOX_SIZE);
    core.resume();

    let task = tokio::spawn(async move {
        info!(
            "Timer service started, alarm period {:?}",
            core.alarm().period()
        );
        loop {
            let event = tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(envelope) => Event::Call(envelope),
                    None => Event::Closed,
                },
                _ = core.alarm_mut().fired() => Event::Tick,
            };

            match event {
                Event::Call(Envelope { request, reply }) => {
                    let result = dispatch(&mut core, request);
                    // The caller may have gone away; nothing to do then
                    let _ = reply.send(result);
                }
                Event::Tick => match core.tick() {
                    Ok(Tick::Advanced(seconds)) => trace!("Tick: {}s remaining", seconds),
                    Ok(Tick::Skipped) => {}
                    Err(e) => error!("Failed to store tick: {}", e),
                },
                Event::Closed => break,
            }
        }
        info!("Timer service stopped");
    });

    (TimerHandle { tx }, task)
}

fn dispatch<S: KeyValueStore>(
    core: &mut TimerCore<S>,
    request: Request,
) -> Result<Reply, RpcError> {
    let reply = match request {
        Request::SwitchTimer => core.toggle_run().map(|_| Reply::Done),
        Request::IsRunning => Ok(Reply::Flag(core.is_running())),
        Request::ChangeTime { time } => core.set_time(time).map(|_| Reply::Done),
        Request::ResetTime => core.reset_clock().map(|_| Reply::Done),
        Request::GetTime => Ok(Reply::Seconds(core.get_time())),
        Request::IsVisible { site } => {
            Ok(Reply::Flag(core.get_visibility(&VisibilityScope::from(site))))
        }
        Request::SetVisibility { is_visible, site } => core
            .set_visibility(is_visible, &VisibilityScope::from(site))
            .map(|_| Reply::Done),
        Request::IsSuspended => Ok(Reply::Flag(core.is_suspended())),
        Request::SetSuspended { is_suspended } => {
            core.set_suspended(is_suspended).map(|_| Reply::Done)
        }
    };
    reply.map_err(|e| {
        error!("Storage failure: {}", e);
        RpcError::Storage(e.to_string())
    })
}
