//! Control session manager.
//!
//! Owns the single control channel and enforces one request in flight.
//! Callers queue on a parking mutex (no spinning). A response must echo
//! the request's command code; anything else is a desync.
//!
//! After a timeout or a desync the channel state is unknown: a late
//! reply may still be on its way. The session purges the mailbox, sends
//! a `Reset`, and discards frames until the reset is echoed, so the late
//! reply is never handed to the next caller. If that recovery itself
//! fails, the session retries it before the next request goes out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::constants::CONTROL_TIMEOUT;
use crate::error::{Error, Result};
use crate::link::LinkState;
use crate::protocol::{self, Command, Request};
use crate::transport::ControlTransport;

struct Channel<T> {
    transport: T,
    needs_reset: bool,
}

/// Serialized access to a device's control channel.
pub struct ControlSession<T> {
    channel: Mutex<Channel<T>>,
    link: Arc<LinkState>,
    timeout: Duration,
}

impl<T: ControlTransport> ControlSession<T> {
    pub fn new(transport: T, link: Arc<LinkState>) -> Self {
        Self {
            channel: Mutex::new(Channel {
                transport,
                needs_reset: false,
            }),
            link,
            timeout: CONTROL_TIMEOUT,
        }
    }

    /// Replace the default response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` and return the response data after the status word.
    pub fn call(&self, request: &Request) -> Result<Vec<u8>> {
        self.call_with_timeout(request, self.timeout)
    }

    pub fn call_with_timeout(&self, request: &Request, timeout: Duration) -> Result<Vec<u8>> {
        let mut channel = self.channel.lock();
        self.link.check()?;

        if channel.needs_reset {
            channel.reset(&self.link, timeout)?;
            channel.needs_reset = false;
        }

        let result = channel.exchange(request, &self.link, timeout);
        match &result {
            Err(err @ (Error::TimedOut(_) | Error::ProtocolDesync { .. })) => {
                warn!(
                    command = ?request.command(),
                    error = %err,
                    "control channel out of step, resetting"
                );
                if let Err(reset_err) = channel.reset(&self.link, timeout) {
                    warn!(error = %reset_err, "control channel reset failed");
                    channel.needs_reset = true;
                }
            }
            Err(err) => debug!(command = ?request.command(), error = %err, "control call failed"),
            Ok(_) => {}
        }
        result
    }

    /// Put the channel into a known state now.
    pub fn reset(&self) -> Result<()> {
        let mut channel = self.channel.lock();
        self.link.check()?;
        let result = channel.reset(&self.link, self.timeout);
        channel.needs_reset = result.is_err();
        result
    }

    /// Give back the transport.
    pub fn into_transport(self) -> T {
        self.channel.into_inner().transport
    }
}

impl<T: ControlTransport> Channel<T> {
    fn exchange(
        &mut self,
        request: &Request,
        link: &LinkState,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let expected = request.command();
        self.transport.send(&request.to_message().encode())?;
        let reply = self.transport.receive(timeout, link)?;
        let message = protocol::decode(&reply)?;
        if message.command() != expected {
            return Err(Error::ProtocolDesync {
                expected: expected.code(),
                actual: message.command().code(),
            });
        }
        Ok(protocol::split_status(message.payload())?.to_vec())
    }

    fn reset(&mut self, link: &LinkState, timeout: Duration) -> Result<()> {
        self.transport.purge()?;
        self.transport.send(&Request::Reset.to_message().encode())?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::TimedOut(timeout));
            }
            let reply = self.transport.receive(remaining, link)?;
            match protocol::decode(&reply) {
                Ok(message) if message.command() == Command::Reset => {
                    protocol::split_status(message.payload())?;
                    debug!("control channel reset");
                    return Ok(());
                }
                Ok(message) => debug!(command = ?message.command(), "discarding stale reply"),
                Err(err) => debug!(error = %err, "discarding unreadable reply"),
            }
        }
    }
}
