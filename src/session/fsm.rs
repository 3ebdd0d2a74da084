use std::fmt;

use crate::engine::Role;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Loading credentials.
    Setup,
    /// Responder waiting for a client hello with a valid cookie.
    Cookie,
    /// Handshake in progress, initial or renegotiated.
    Handshake,
    /// Application data flows.
    Established,
    /// Terminal.
    Shutdown,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Setup => "SETUP",
            State::Cookie => "COOKIE",
            State::Handshake => "HANDSHAKE",
            State::Established => "ESTABLISHED",
            State::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one worker step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Input {
    CredentialsLoaded,
    CookieVerified,
    HandshakeComplete,
    Rehandshake,
    /// The peer sent close_notify.
    Closed,
    Fatal,
    /// Local request or a give-up timer.
    Shutdown,
}

/// The state after `input`. Inputs that do not apply leave the state as is.
pub(crate) fn next(state: State, role: Role, input: Input) -> State {
    use State::*;

    match (state, input) {
        (Shutdown, _) => Shutdown,
        (_, Input::Fatal) | (_, Input::Shutdown) => Shutdown,
        (Setup, Input::CredentialsLoaded) => match role {
            Role::Initiator => Handshake,
            Role::Responder => Cookie,
        },
        (Cookie, Input::CookieVerified) => Handshake,
        (Handshake, Input::HandshakeComplete) => Established,
        (Established, Input::Rehandshake) => Handshake,
        (Handshake, Input::Closed) | (Established, Input::Closed) => Shutdown,
        (state, _) => state,
    }
}
