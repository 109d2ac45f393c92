//! A `Session` is the gateway's view of one connected client: the
//! outbound write queue, auth state, and heartbeat bookkeeping that the
//! connection task and the router both need to see.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use gw_common::{PlayerId, SessionId};
use gw_rpc::LogoutReason;
use gw_wire::Frame;
use tokio::sync::Notify;

/// A message queued for a session's writer task. `Critical` messages
/// are never dropped under backpressure; `Broadcast` ones are the first
/// to go when the outbound queue is full. `Close` carries the reason the
/// connection task should report on the game node's `Logout` call once
/// it has flushed this frame and torn the connection down.
#[derive(Debug, Clone)]
pub enum Outbound {
    Critical(Frame),
    Broadcast(Frame),
    Close(Frame, LogoutReason),
}

impl Outbound {
    pub fn frame(&self) -> &Frame {
        match self {
            Outbound::Critical(f) | Outbound::Broadcast(f) => f,
            Outbound::Close(f, _) => f,
        }
    }

    pub fn close_reason(&self) -> Option<LogoutReason> {
        match self {
            Outbound::Close(_, reason) => Some(*reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AuthState {
    Anonymous,
    Authenticated(PlayerId),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionLifecycle {
    Active,
    Slow,
    Closing,
}

impl SessionLifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionLifecycle::Slow,
            2 => SessionLifecycle::Closing,
            _ => SessionLifecycle::Active,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            SessionLifecycle::Active => 0,
            SessionLifecycle::Slow => 1,
            SessionLifecycle::Closing => 2,
        }
    }
}

/// What happened to a message handed to [`OutboundQueue::push`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PushOutcome {
    Delivered,
    /// A non-critical broadcast was dropped because the queue was full.
    Dropped,
    /// A critical message found the queue full with nothing droppable
    /// left to evict; the session must be force-closed.
    Escalate,
}

/// The session's outbound write queue, implementing the back-pressure
/// policy directly (mark-slow, drop-oldest-broadcast, force-close on a
/// full critical send) rather than leaning on a plain bounded channel,
/// which can only ever fail the newest send and can't single out
/// broadcasts for eviction.
pub struct OutboundQueue {
    queue: Mutex<VecDeque<Outbound>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    lifecycle: AtomicU8,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            lifecycle: AtomicU8::new(SessionLifecycle::Active.as_u8()),
        }
    }

    pub fn lifecycle(&self) -> SessionLifecycle {
        SessionLifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, lifecycle: SessionLifecycle) {
        self.lifecycle.store(lifecycle.as_u8(), Ordering::Release);
    }

    /// Enqueue `message` per the back-pressure policy. A `Close` always
    /// gets through regardless of capacity -- it's how the connection
    /// task is told to stop, so refusing it would strand the session.
    pub fn push(&self, message: Outbound) -> PushOutcome {
        if self.closed.load(Ordering::Acquire) {
            return PushOutcome::Dropped;
        }

        let mut queue = self.queue.lock().unwrap();

        if matches!(message, Outbound::Close(..)) {
            self.set_lifecycle(SessionLifecycle::Closing);
            queue.push_back(message);
            drop(queue);
            self.notify.notify_one();
            return PushOutcome::Delivered;
        }

        if queue.len() >= self.capacity {
            if let Some(pos) = queue.iter().position(|m| matches!(m, Outbound::Broadcast(_))) {
                queue.remove(pos);
                self.set_lifecycle(SessionLifecycle::Slow);
            } else if matches!(message, Outbound::Critical(_)) {
                drop(queue);
                return PushOutcome::Escalate;
            } else {
                self.set_lifecycle(SessionLifecycle::Slow);
                return PushOutcome::Dropped;
            }
        }

        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        PushOutcome::Delivered
    }

    /// Pop the next message, waiting for one to arrive. Returns `None`
    /// once the queue has been closed and drained.
    pub async fn recv(&self) -> Option<Outbound> {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Handle to a live session, held (behind an `Arc`) by the registry, the
/// owning connection task's reader/writer halves, and the heartbeat
/// ticker. `auth_state` and `last_heartbeat` are mutex-guarded rather
/// than plain fields since several of those holders run concurrently.
pub struct Session {
    pub session_id: SessionId,
    auth_state: Mutex<AuthState>,
    last_heartbeat: Mutex<Instant>,
    pub queue: OutboundQueue,
}

impl Session {
    pub fn new(session_id: SessionId, queue_capacity: usize) -> Self {
        Self {
            session_id,
            auth_state: Mutex::new(AuthState::Anonymous),
            last_heartbeat: Mutex::new(Instant::now()),
            queue: OutboundQueue::new(queue_capacity),
        }
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        match *self.auth_state.lock().unwrap() {
            AuthState::Authenticated(id) => Some(id),
            AuthState::Anonymous => None,
        }
    }

    pub fn set_auth_state(&self, state: AuthState) {
        *self.auth_state.lock().unwrap() = state;
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap() = Instant::now();
    }

    pub fn is_timed_out(&self, timeout: std::time::Duration) -> bool {
        self.last_heartbeat.lock().unwrap().elapsed() > timeout
    }

    /// Enqueue a message per the queue's back-pressure policy. The
    /// caller is expected to follow up an `Escalate` outcome with its
    /// own `Close` push.
    pub fn try_send(&self, message: Outbound) -> PushOutcome {
        self.queue.push(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_wire::Frame;

    fn frame() -> Frame {
        Frame {
            msg_type: 0x1000,
            player_id_hint: 0,
            timestamp_ms: 0,
            sequence: 0,
            payload: bytes::Bytes::new(),
        }
    }

    #[test]
    fn fresh_session_has_no_player_bound() {
        let session = Session::new(SessionId::new(), 4);
        assert_eq!(session.player_id(), None);
        assert!(!session.is_timed_out(Duration::from_secs(60)));
    }

    #[test]
    fn a_full_queue_drops_the_oldest_broadcast_to_make_room() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push(Outbound::Broadcast(frame())), PushOutcome::Delivered);
        assert_eq!(queue.push(Outbound::Broadcast(frame())), PushOutcome::Delivered);
    }

    #[test]
    fn critical_sends_evict_a_broadcast_to_make_room() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push(Outbound::Broadcast(frame())), PushOutcome::Delivered);
        assert_eq!(queue.push(Outbound::Critical(frame())), PushOutcome::Delivered);
    }

    #[test]
    fn a_queue_full_of_critical_sends_escalates() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push(Outbound::Critical(frame())), PushOutcome::Delivered);
        assert_eq!(queue.push(Outbound::Critical(frame())), PushOutcome::Escalate);
    }

    #[test]
    fn close_always_gets_through_and_marks_closing() {
        let queue = OutboundQueue::new(1);
        queue.push(Outbound::Critical(frame()));
        assert_eq!(
            queue.push(Outbound::Close(frame(), LogoutReason::Backpressure)),
            PushOutcome::Delivered
        );
        assert_eq!(queue.lifecycle(), SessionLifecycle::Closing);
    }

    use std::time::Duration;
}
